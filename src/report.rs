// 该文件是 CNG Queue （加气排队） 项目的一部分。
// src/report.rs - 排队长度上报
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::fmt;
use std::io::Write;

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{info, warn};

/// 操作员输入的加气站名称，去除首尾空白后不能为空
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct StationName(String);

impl StationName {
  pub fn parse(raw: &str) -> Option<Self> {
    let name = raw.trim();
    if name.is_empty() {
      None
    } else {
      Some(Self(name.to_string()))
    }
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for StationName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// 单帧排队长度观测值，只输出不保存
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueObservation {
  pub station_name: StationName,
  pub queue_length: usize,
  pub timestamp: DateTime<Local>,
}

impl QueueObservation {
  pub fn now(station_name: StationName, queue_length: usize) -> Self {
    Self {
      station_name,
      queue_length,
      timestamp: Local::now(),
    }
  }

  pub fn to_json(&self) -> serde_json::Result<String> {
    serde_json::to_string(self)
  }
}

pub trait QueueReporter: Send + Sync {
  fn report(&self, observation: &QueueObservation);
}

impl<F> QueueReporter for F
where
  F: Fn(&QueueObservation) + Send + Sync,
{
  fn report(&self, observation: &QueueObservation) {
    self(observation)
  }
}

/// 控制台上报：结构化日志，可选逐行 JSON 输出到标准输出
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter {
  json_lines: bool,
}

impl ConsoleReporter {
  pub fn with_json_lines(mut self, json_lines: bool) -> Self {
    self.json_lines = json_lines;
    self
  }
}

impl QueueReporter for ConsoleReporter {
  fn report(&self, observation: &QueueObservation) {
    info!(
      station_name = %observation.station_name,
      queue_length = observation.queue_length,
      timestamp = %observation.timestamp.to_rfc3339(),
      "排队长度更新"
    );

    if self.json_lines {
      match observation.to_json() {
        Ok(line) => {
          let mut stdout = std::io::stdout().lock();
          if let Err(e) = writeln!(stdout, "{}", line) {
            warn!("写出观测值失败: {}", e);
          }
        }
        Err(e) => warn!("序列化观测值失败: {}", e),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;

  #[test]
  fn station_name_is_trimmed_and_required() {
    assert_eq!(StationName::parse("  Eastside CNG ").unwrap().as_str(), "Eastside CNG");
    assert!(StationName::parse("").is_none());
    assert!(StationName::parse("   \t").is_none());
  }

  #[test]
  fn observation_json_shape() {
    let obs = QueueObservation::now(StationName::parse("North").unwrap(), 4);
    let value: serde_json::Value = serde_json::from_str(&obs.to_json().unwrap()).unwrap();
    assert_eq!(value["station_name"], "North");
    assert_eq!(value["queue_length"], 4);
    let ts = value["timestamp"].as_str().unwrap();
    assert!(DateTime::parse_from_rfc3339(ts).is_ok());
  }

  #[test]
  fn closures_are_reporters() {
    let seen = Mutex::new(Vec::new());
    let reporter = |obs: &QueueObservation| seen.lock().unwrap().push(obs.queue_length);
    reporter.report(&QueueObservation::now(StationName::parse("A").unwrap(), 2));
    reporter.report(&QueueObservation::now(StationName::parse("A").unwrap(), 0));
    assert_eq!(*seen.lock().unwrap(), vec![2, 0]);
  }
}
