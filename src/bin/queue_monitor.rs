// 该文件是 CNG Queue （加气排队） 项目的一部分。
// src/bin/queue_monitor.rs - 非交互式排队监测
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;
use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};

use cngqueue::{
  FromUrl,
  config::DetectionArgs,
  input::VideoFileOpener,
  model::Yolov8Builder,
  output::{OutputWrapper, Render, draw::Draw},
  report::{ConsoleReporter, StationName},
  session::SessionController,
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

/// CNG 加气站排队长度监测：处理一个视频文件后退出
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub detection: DetectionArgs,

  /// 加气站名称
  #[arg(long, value_name = "NAME")]
  pub station: String,

  /// 视频文件 (.mp4 / .avi / .mov)
  #[arg(long, value_name = "VIDEO")]
  pub video: PathBuf,

  /// 最多解码的帧数
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_limit: Option<u64>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let config = args.detection.detection_config()?;
  let station = StationName::parse(&args.station).context("加气站名称不能为空")?;

  info!("模型文件路径: {}", args.detection.model);
  info!("视频文件: {}", args.video.display());
  info!("加气站: {}", station);

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

  let mut controller =
    SessionController::new(VideoFileOpener, Arc::new(model), Arc::new(reporter), config)
      .with_draw(draw)
      .with_frame_limit(args.frame_limit);

  let interrupted = Arc::new(AtomicBool::new(false));
  {
    let interrupted = Arc::clone(&interrupted);
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      interrupted.store(true, Ordering::SeqCst);
      // 推理卡住时兜底退出
      thread::spawn(|| {
        thread::sleep(FORCE_EXIT_AFTER);
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;
  }

  controller.toggle(Some(&station), Some(&args.video))?;
  let mailbox = controller.mailbox();

  let outcome = loop {
    if let Some(update) = mailbox.wait_timeout(POLL_INTERVAL)
      && let Some(output) = &output
      && let Err(e) = output.render_result(&update.preview, &update.queue_length)
    {
      warn!("预览输出失败: {}", e);
    }

    if interrupted.load(Ordering::SeqCst) {
      warn!("收到 Ctrl-C，停止处理");
      break controller.stop();
    }

    if let Some(end) = controller.poll() {
      if let Some(update) = end.last_update
        && let Some(output) = &output
        && let Err(e) = output.render_result(&update.preview, &update.queue_length)
      {
        warn!("预览输出失败: {}", e);
      }
      break Some(end.outcome);
    }
  };

  info!("{}", controller.status());
  let stats = mailbox.stats();
  info!("预览帧: 投递 {}, 丢弃 {}", stats.posted, stats.dropped);

  if let Some(outcome) = outcome
    && outcome.is_failure()
  {
    bail!("{}", outcome.status_text());
  }
  Ok(())
}
