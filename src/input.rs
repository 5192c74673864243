// 该文件是 CNG Queue （加气排队） 项目的一部分。
// src/input.rs - 视频输入
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

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::frame::RgbFrame;

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder,
};

/// 可选择的视频容器扩展名
pub const VIDEO_EXTENSIONS: [&str; 3] = ["mp4", "avi", "mov"];

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("不支持的视频格式: {0} (仅支持 .mp4 / .avi / .mov)")]
  UnsupportedExtension(PathBuf),
  #[error("视频文件不存在: {0}")]
  NotFound(PathBuf),
  /// 打开成功后读取帧时出错，区别于文件结束
  #[error("解码错误: {0}")]
  Decode(String),
  #[error("未启用任何视频解码后端")]
  NoBackend,
}

/// 判断路径是否为支持的视频文件（扩展名不区分大小写）
pub fn is_supported_video(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      VIDEO_EXTENSIONS
        .iter()
        .any(|allowed| ext.eq_ignore_ascii_case(allowed))
    })
    .unwrap_or(false)
}

/// 视频源打开器
///
/// 工作线程在会话开始后才调用 `open`，因此打开失败与解码失败一样
/// 作为会话结果上报，而不是在前台抛出。
pub trait OpenSource: Send + Sync {
  type Source: Iterator<Item = Result<RgbFrame, InputError>>;

  fn open(&self, path: &Path) -> Result<Self::Source, InputError>;
}

impl<F, S> OpenSource for F
where
  F: Fn(&Path) -> Result<S, InputError> + Send + Sync,
  S: Iterator<Item = Result<RgbFrame, InputError>>,
{
  type Source = S;

  fn open(&self, path: &Path) -> Result<Self::Source, InputError> {
    self(path)
  }
}

/// 基于 GStreamer 的视频文件打开器
#[derive(Debug, Default, Clone, Copy)]
pub struct VideoFileOpener;

#[cfg(feature = "gstreamer_input")]
pub struct VideoFileSource {
  inner: GStreamerInput,
}

#[cfg(feature = "gstreamer_input")]
impl Iterator for VideoFileSource {
  type Item = Result<RgbFrame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    self
      .inner
      .next()
      .map(|frame| frame.map_err(|e| InputError::Decode(e.to_string())))
  }
}

#[cfg(not(feature = "gstreamer_input"))]
pub type VideoFileSource = std::iter::Empty<Result<RgbFrame, InputError>>;

impl OpenSource for VideoFileOpener {
  type Source = VideoFileSource;

  fn open(&self, path: &Path) -> Result<Self::Source, InputError> {
    if !is_supported_video(path) {
      return Err(InputError::UnsupportedExtension(path.to_path_buf()));
    }
    if !path.is_file() {
      return Err(InputError::NotFound(path.to_path_buf()));
    }

    #[cfg(feature = "gstreamer_input")]
    {
      let inner = GStreamerInputPipelineBuilder::new()
        .file(path)
        .target_format("RGB")
        .build()?;
      Ok(VideoFileSource { inner })
    }
    #[cfg(not(feature = "gstreamer_input"))]
    {
      Err(InputError::NoBackend)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn accepts_only_video_containers() {
    assert!(is_supported_video(Path::new("station.mp4")));
    assert!(is_supported_video(Path::new("/data/Queue.AVI")));
    assert!(is_supported_video(Path::new("clip.Mov")));
    assert!(!is_supported_video(Path::new("clip.mkv")));
    assert!(!is_supported_video(Path::new("mp4")));
    assert!(!is_supported_video(Path::new("frame.png")));
  }

  #[test]
  fn opener_rejects_before_decoding() {
    let opener = VideoFileOpener;
    assert!(matches!(
      opener.open(Path::new("queue.mkv")),
      Err(InputError::UnsupportedExtension(_))
    ));
    assert!(matches!(
      opener.open(Path::new("/nonexistent/queue.mp4")),
      Err(InputError::NotFound(_))
    ));
  }

  #[test]
  fn closures_open_sources() {
    let opener = |_: &Path| -> Result<_, InputError> {
      Ok((1..=3).map(|i| Ok(RgbFrame::with_shape(2, 2).with_index(i))))
    };
    let frames: Vec<_> = opener
      .open(Path::new("any.mp4"))
      .unwrap()
      .map(|f| f.unwrap().index)
      .collect();
    assert_eq!(frames, vec![1, 2, 3]);
  }
}
