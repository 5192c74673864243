// 该文件是 CNG Queue （加气排队） 项目的一部分。
// src/main.rs - 交互式控制台主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use cngqueue::{
  FromUrl,
  config::DetectionArgs,
  console::{Console, Flow},
  input::VideoFileOpener,
  model::Yolov8Builder,
  output::{OutputWrapper, draw::Draw},
  report::{ConsoleReporter, StationName},
  session::SessionController,
};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// CNG 加气站排队长度监测（交互式）
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub detection: DetectionArgs,

  /// 预先填写的加气站名称
  #[arg(long, value_name = "NAME")]
  pub station: Option<String>,

  /// 预先选择的视频文件
  #[arg(long, value_name = "VIDEO")]
  pub video: Option<PathBuf>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let config = args.detection.detection_config()?;

  info!("模型文件路径: {}", args.detection.model);
  info!("抽帧步长: {}", config.stride);
  info!("置信度阈值: {}", config.policy.confidence_threshold);

  let model = Yolov8Builder::from_url(&args.detection.model)?
    .classes(&config.policy.classes)
    .build()?;
  let draw = match &config.font {
    Some(font) => Draw::default().with_font_file(font)?,
    None => Draw::default(),
  };
  let output = args
    .detection
    .preview
    .as_ref()
    .map(OutputWrapper::from_url)
    .transpose()?;
  let reporter = ConsoleReporter::default().with_json_lines(args.detection.json);

  let controller =
    SessionController::new(VideoFileOpener, Arc::new(model), Arc::new(reporter), config)
      .with_draw(draw);
  let mut console = Console::new(controller, output, std::io::stdout())
    .with_station(args.station.as_deref().and_then(StationName::parse))
    .with_video(args.video);

  let (lines, commands) = mpsc::channel::<String>();
  thread::Builder::new()
    .name("stdin".to_string())
    .spawn(move || {
      for line in std::io::stdin().lock().lines() {
        match line {
          Ok(line) => {
            if lines.send(line).is_err() {
              break;
            }
          }
          Err(e) => {
            warn!("读取输入失败: {}", e);
            break;
          }
        }
      }
    })?;

  console.handle_line("help")?;
  loop {
    let line = if console.controller().is_processing() {
      match commands.try_recv() {
        Ok(line) => Some(line),
        Err(TryRecvError::Empty) => None,
        Err(TryRecvError::Disconnected) => break,
      }
    } else {
      match commands.recv_timeout(POLL_INTERVAL) {
        Ok(line) => Some(line),
        Err(RecvTimeoutError::Timeout) => None,
        Err(RecvTimeoutError::Disconnected) => break,
      }
    };

    if let Some(line) = line
      && console.handle_line(&line)? == Flow::Quit
    {
      break;
    }
    console.pump(POLL_INTERVAL)?;
  }

  // 输入关闭时也要停下工作线程
  console.handle_line("quit")?;
  info!("退出");
  Ok(())
}
