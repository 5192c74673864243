// 该文件是 CNG Queue （加气排队） 项目的一部分。
// src/config.rs - 检测参数配置
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::num::NonZeroU64;
use std::path::PathBuf;

use clap::Args;
use thiserror::Error;
use url::Url;

use crate::model::{DetectionPolicy, VEHICLE_CLASSES};

pub const DEFAULT_FRAME_STRIDE: u64 = 2;
pub const DEFAULT_CONFIDENCE: f32 = 0.3;
pub const DEFAULT_DISPLAY_WIDTH: u32 = 800;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("置信度阈值必须在 [0, 1) 区间内, 实际为 {0}")]
  Confidence(f32),
  #[error("预览宽度必须大于 0")]
  DisplayWidth,
}

/// 一次会话使用的检测参数
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionConfig {
  pub stride: NonZeroU64,
  pub policy: DetectionPolicy,
  pub display_width: u32,
  pub font: Option<PathBuf>,
}

impl Default for DetectionConfig {
  fn default() -> Self {
    Self {
      stride: NonZeroU64::new(DEFAULT_FRAME_STRIDE).unwrap_or(NonZeroU64::MIN),
      policy: DetectionPolicy::default(),
      display_width: DEFAULT_DISPLAY_WIDTH,
      font: None,
    }
  }
}

/// 两个程序共用的检测参数
#[derive(Args, Debug, Clone)]
pub struct DetectionArgs {
  /// 检测模型，例如 yolov8:///models/yolov8n.onnx
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 预览输出，例如 image:///tmp/preview.png
  #[arg(long, value_name = "OUTPUT")]
  pub preview: Option<Url>,

  /// 抽帧步长：每 N 帧检测一次
  #[arg(long, default_value_t = NonZeroU64::new(DEFAULT_FRAME_STRIDE).unwrap_or(NonZeroU64::MIN), value_name = "N")]
  pub stride: NonZeroU64,

  /// 置信度阈值（严格大于才计数）
  #[arg(long, default_value_t = DEFAULT_CONFIDENCE, value_name = "THRESHOLD")]
  pub confidence: f32,

  /// 预览宽度（像素），高度按比例缩放
  #[arg(long, default_value_t = DEFAULT_DISPLAY_WIDTH, value_name = "PIXELS")]
  pub display_width: u32,

  /// 标签字体文件（TTF/OTF），缺省时只绘制边框
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,

  /// 每个观测值额外以 JSON 行输出到标准输出
  #[arg(long)]
  pub json: bool,
}

impl DetectionArgs {
  pub fn detection_config(&self) -> Result<DetectionConfig, ConfigError> {
    if !(0.0..1.0).contains(&self.confidence) {
      return Err(ConfigError::Confidence(self.confidence));
    }
    if self.display_width == 0 {
      return Err(ConfigError::DisplayWidth);
    }

    Ok(DetectionConfig {
      stride: self.stride,
      policy: DetectionPolicy {
        classes: VEHICLE_CLASSES.to_vec(),
        confidence_threshold: self.confidence,
      },
      display_width: self.display_width,
      font: self.font.clone(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use clap::Parser;

  #[derive(Parser, Debug)]
  struct TestArgs {
    #[command(flatten)]
    detection: DetectionArgs,
  }

  #[test]
  fn defaults_match_station_setup() {
    let args = TestArgs::try_parse_from(["test", "--model", "yolov8:///m.onnx"]).unwrap();
    let config = args.detection.detection_config().unwrap();
    assert_eq!(config, DetectionConfig::default());
    assert_eq!(config.stride.get(), 2);
    assert_eq!(config.policy.confidence_threshold, 0.3);
    assert_eq!(config.policy.classes, vec![2, 3, 5, 7]);
    assert_eq!(config.display_width, 800);
  }

  #[test]
  fn rejects_zero_stride_and_bad_threshold() {
    assert!(TestArgs::try_parse_from(["test", "--model", "yolov8:///m.onnx", "--stride", "0"]).is_err());

    let args = TestArgs::try_parse_from([
      "test",
      "--model",
      "yolov8:///m.onnx",
      "--confidence",
      "1.5",
    ])
    .unwrap();
    assert_eq!(
      args.detection.detection_config(),
      Err(ConfigError::Confidence(1.5))
    );
  }
}
