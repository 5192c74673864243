// 该文件是 CNG Queue （加气排队） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频文件输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # GStreamer 视频输入模块
//!
//! 本模块使用 GStreamer 解码加气站视频文件，逐帧输出紧凑排列的 RGB 帧。
//!
//! ## 系统依赖
//!
//! 使用前需要安装 GStreamer 开发库：
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! **macOS:**
//! ```bash
//! brew install gstreamer
//! ```
//!
//! ## 基本用法
//!
//! ```no_run
//! use cngqueue::input::GStreamerInputPipelineBuilder;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let input = GStreamerInputPipelineBuilder::new()
//!     .file("station.mp4")
//!     .target_format("RGB")
//!     .build()?;
//!
//! for frame in input {
//!     let frame = frame?;
//!     println!("帧 {}: {}x{}", frame.index, frame.width(), frame.height());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## 结束与错误
//!
//! 迭代器在流结束（EOS）时返回 `None`；管道报告错误时先返回一次
//! `Some(Err(..))`，之后返回 `None`。两种情况可以区分。

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::frame::RgbFrame;

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsink 元素
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  /// 无法转换元素为 appsink
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  /// 无法从 caps 获取视频信息
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  /// 不支持的视频格式
  #[error("Unsupported video format: {0}")]
  UnsupportedFormat(String),
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 缓冲区大小不匹配
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

/// 等待管道进入播放状态的最长时间
const STATE_CHANGE_TIMEOUT_SECS: u64 = 10;

pub enum GStreamerInputBuilderItem {
  FileSource(String),
  TargetFormat { format: String },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin", path)
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
    }
  }
}

/// GStreamer 输入管道构建器
#[derive(Default)]
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
}

impl GStreamerInputPipelineBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn file(mut self, path: impl AsRef<Path>) -> Self {
    let path = path.as_ref().to_string_lossy().replace('"', "\\\"");
    self.items.push(GStreamerInputBuilderItem::FileSource(path));
    self
  }

  pub fn target_format(mut self, format: &str) -> Self {
    self.items.push(GStreamerInputBuilderItem::TargetFormat {
      format: format.to_string(),
    });
    self
  }

  fn description(&self) -> String {
    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    // 文件输入不能丢帧，否则抽帧计数会与解码序号错位
    format!(
      "{} ! appsink max-buffers=4 drop=false sync=false name=sink",
      basic_pipeline
    )
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let full_pipeline = self.description();
    info!("GStreamer pipeline description: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    let input = GStreamerInput {
      pipeline,
      appsink,
      index: 0,
      finished: false,
    };

    input.pipeline.set_state(gst::State::Playing)?;

    // 打开失败（文件损坏、缺少解码器）在状态切换时才会暴露
    let (result, _, _) = input
      .pipeline
      .state(gst::ClockTime::from_seconds(STATE_CHANGE_TIMEOUT_SECS));
    if result.is_err() {
      return Err(input.bus_error());
    }

    Ok(input)
  }
}

/// GStreamer 视频输入
///
/// 管理 GStreamer 管道和 appsink，逐帧产出 [`RgbFrame`]。
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  index: u64,
  finished: bool,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl GStreamerInput {
  fn bus_error(&self) -> GStreamerInputError {
    let message = self
      .pipeline
      .bus()
      .and_then(|bus| bus.pop_filtered(&[gst::MessageType::Error]));

    if let Some(message) = message
      && let gst::MessageView::Error(err) = message.view()
    {
      let debug = err.debug().map(|d| d.to_string()).unwrap_or_default();
      error!("GStreamer 管道错误: {} {}", err.error(), debug);
      return GStreamerInputError::PipelineError(format!("{} {}", err.error(), debug));
    }

    GStreamerInputError::PipelineError("appsink stopped before end-of-stream".to_string())
  }
}

impl Iterator for GStreamerInput {
  type Item = Result<RgbFrame, GStreamerInputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    match self.appsink.pull_sample() {
      Ok(sample) => {
        self.index += 1;
        let index = self.index;
        Some(convert_sample(sample).map(|frame| frame.with_index(index)))
      }
      Err(_) if self.appsink.is_eos() => {
        debug!("视频流结束，共解码 {} 帧", self.index);
        self.finished = true;
        None
      }
      Err(_) => {
        self.finished = true;
        Some(Err(self.bus_error()))
      }
    }
  }
}

fn convert_sample(sample: gst::Sample) -> Result<RgbFrame, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let expected_size = stride * (height.saturating_sub(1)) + width * 3;
  if data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  let mut frame = RgbFrame::with_shape(width as u32, height as u32);
  let frame_slice = frame.as_mut();

  if video_info.format() != gst_video::VideoFormat::Rgb {
    return Err(GStreamerInputError::UnsupportedFormat(format!(
      "{:?}",
      video_info.format()
    )));
  }

  // 去掉每行末尾的对齐填充
  for h in 0..height {
    let src = &data[h * stride..h * stride + width * 3];
    frame_slice[h * width * 3..(h + 1) * width * 3].copy_from_slice(src);
  }

  Ok(frame)
}
