// 该文件是 CNG Queue （加气排队） 项目的一部分。
// src/session.rs - 会话控制
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

//! 开始/停止切换的会话控制器。
//!
//! 每个会话只有一个工作线程：线程打开视频、运行抽帧检测任务，
//! 预览帧投递到邮箱，结束时通过通道发回一次结果。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::{self, JoinHandle};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  config::DetectionConfig,
  frame::RgbFrame,
  input::{OpenSource, is_supported_video},
  mailbox::Mailbox,
  model::{CocoLabel, DetectResult, Model},
  output::{FrameUpdate, PreviewPoster, draw::Draw},
  report::{QueueReporter, StationName},
  sampler::FrameSampler,
  task::{CancelToken, LoopOutcome, LoopStats, SampledTask, Task, TaskError},
};

pub const STATUS_PROCESSING: &str = "Processing video...";
pub const STATUS_STOPPED: &str = "Processing stopped";
pub const STATUS_COMPLETED: &str = "Processing completed";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
  #[error("请先输入加气站名称")]
  MissingStation,
  #[error("请先选择视频文件")]
  MissingVideo,
  #[error("不支持的视频格式: {0}")]
  UnsupportedVideo(PathBuf),
}

#[derive(Error, Debug)]
pub enum SessionError {
  #[error("参数校验失败: {0}")]
  Validation(#[from] ValidationError),
  #[error("无法创建工作线程: {0}")]
  Spawn(#[source] std::io::Error),
}

#[derive(Error, Debug)]
pub enum WorkerError {
  #[error(transparent)]
  Task(#[from] TaskError),
  #[error("工作线程异常退出")]
  Panicked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
  Idle,
  Processing,
}

/// 一次会话的结束方式
#[derive(Debug)]
pub enum SessionOutcome {
  /// 视频流结束或达到指定帧数
  Completed(LoopStats),
  /// 被停止
  Stopped(LoopStats),
  Failed(WorkerError),
}

impl SessionOutcome {
  fn from_result(result: Result<LoopOutcome, TaskError>) -> Self {
    match result {
      Ok(LoopOutcome::EndOfStream(stats)) | Ok(LoopOutcome::FrameLimit(stats)) => {
        SessionOutcome::Completed(stats)
      }
      Ok(LoopOutcome::Cancelled(stats)) => SessionOutcome::Stopped(stats),
      Err(e) => SessionOutcome::Failed(e.into()),
    }
  }

  /// 对应的状态栏文字
  pub fn status_text(&self) -> String {
    match self {
      SessionOutcome::Completed(_) => STATUS_COMPLETED.to_string(),
      SessionOutcome::Stopped(_) => STATUS_STOPPED.to_string(),
      SessionOutcome::Failed(e) => format!("Processing failed: {}", e),
    }
  }

  pub fn is_failure(&self) -> bool {
    matches!(self, SessionOutcome::Failed(_))
  }
}

/// 会话自然结束时的结果，附带尚未被前台取走的最后一帧预览
#[derive(Debug)]
pub struct SessionEnd {
  pub outcome: SessionOutcome,
  pub last_update: Option<FrameUpdate>,
}

/// `toggle` 的结果
#[derive(Debug)]
pub enum Transition {
  Started,
  Stopped(SessionOutcome),
}

struct Worker {
  handle: JoinHandle<()>,
  cancel: CancelToken,
  events: Receiver<Result<LoopOutcome, TaskError>>,
}

impl Worker {
  /// 等待线程退出并取回结果；线程 panic 时没有结果
  fn join(self) -> SessionOutcome {
    let joined = self.handle.join();
    match self.events.try_recv() {
      Ok(result) => SessionOutcome::from_result(result),
      Err(_) => {
        if joined.is_err() {
          error!("工作线程 panic");
        }
        SessionOutcome::Failed(WorkerError::Panicked)
      }
    }
  }
}

pub struct SessionController<S, M, R: ?Sized> {
  opener: Arc<S>,
  model: Arc<M>,
  reporter: Arc<R>,
  config: DetectionConfig,
  draw: Draw,
  frame_limit: Option<u64>,
  mailbox: Arc<Mailbox<FrameUpdate>>,
  worker: Option<Worker>,
  status: String,
}

impl<S, M, R> SessionController<S, M, R>
where
  S: OpenSource + 'static,
  M: Model<Input = RgbFrame, Output = DetectResult<CocoLabel>> + Send + Sync + 'static,
  M::Error: std::error::Error + Send + Sync + 'static,
  R: QueueReporter + ?Sized + 'static,
{
  pub fn new(opener: S, model: Arc<M>, reporter: Arc<R>, config: DetectionConfig) -> Self {
    Self {
      opener: Arc::new(opener),
      model,
      reporter,
      config,
      draw: Draw::default(),
      frame_limit: None,
      mailbox: Mailbox::new(),
      worker: None,
      status: String::new(),
    }
  }

  /// 预览帧使用的绘制器（例如已加载字体）
  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  pub fn with_frame_limit(mut self, frame_limit: Option<u64>) -> Self {
    self.frame_limit = frame_limit;
    self
  }

  pub fn state(&self) -> SessionState {
    if self.worker.is_some() {
      SessionState::Processing
    } else {
      SessionState::Idle
    }
  }

  pub fn is_processing(&self) -> bool {
    self.worker.is_some()
  }

  pub fn status(&self) -> &str {
    &self.status
  }

  pub fn set_status(&mut self, status: impl Into<String>) {
    self.status = status.into();
  }

  pub fn config(&self) -> &DetectionConfig {
    &self.config
  }

  /// 前台从这里取预览帧
  pub fn mailbox(&self) -> Arc<Mailbox<FrameUpdate>> {
    Arc::clone(&self.mailbox)
  }

  /// 空闲时开始处理，处理中时停止。参数不全时不改变任何状态。
  pub fn toggle(
    &mut self,
    station: Option<&StationName>,
    video: Option<&Path>,
  ) -> Result<Transition, SessionError> {
    let station = station.ok_or(ValidationError::MissingStation)?;
    let video = video.ok_or(ValidationError::MissingVideo)?;
    if !is_supported_video(video) {
      return Err(ValidationError::UnsupportedVideo(video.to_path_buf()).into());
    }

    // 已自然结束但尚未回收的会话按空闲处理
    if let Some(end) = self.poll() {
      debug!("回收已结束的会话: {:?}", end.outcome);
    }

    match self.stop() {
      Some(outcome) => Ok(Transition::Stopped(outcome)),
      None => {
        self.start(station.clone(), video.to_path_buf())?;
        Ok(Transition::Started)
      }
    }
  }

  fn start(&mut self, station: StationName, video: PathBuf) -> Result<(), SessionError> {
    let cancel = CancelToken::new();
    let (events, receiver) = mpsc::channel();
    self.mailbox.reopen();

    let task = SampledTask::new(
      station.clone(),
      FrameSampler::new(self.config.stride),
      self.config.policy.clone(),
      Arc::clone(&self.reporter),
    )
    .with_cancel(cancel.clone())
    .with_frame_limit(self.frame_limit);
    let poster = PreviewPoster::new(
      self.draw.clone(),
      self.config.display_width,
      Arc::clone(&self.mailbox),
    );
    let opener = Arc::clone(&self.opener);
    let model = Arc::clone(&self.model);

    let handle = thread::Builder::new()
      .name("queue-worker".to_string())
      .spawn(move || {
        let result = match opener.open(&video) {
          Ok(source) => {
            info!("打开视频: {}", video.display());
            task.run_task(source, model, poster)
          }
          Err(e) => Err(TaskError::Open(e)),
        };
        if let Err(e) = &result {
          error!("会话失败: {}", e);
        }
        // 前台已放弃会话时接收端可能已丢弃
        let _ = events.send(result);
      })
      .map_err(SessionError::Spawn)?;

    info!("开始处理: 加气站 {}", station);
    self.worker = Some(Worker {
      handle,
      cancel,
      events: receiver,
    });
    self.status = STATUS_PROCESSING.to_string();
    Ok(())
  }

  /// 取消并等待工作线程退出，丢弃未渲染的预览帧。空闲时返回 `None`。
  ///
  /// 取消前工作线程可能已经自然结束，状态文本以实际结果为准。
  pub fn stop(&mut self) -> Option<SessionOutcome> {
    let worker = self.worker.take()?;
    worker.cancel.cancel();
    let outcome = worker.join();
    self.mailbox.close();
    self.status = outcome.status_text();
    warn!("处理已停止: {}", self.status);
    Some(outcome)
  }

  /// 非阻塞地检查会话是否自然结束
  pub fn poll(&mut self) -> Option<SessionEnd> {
    let finished = match self.worker.as_ref()?.events.try_recv() {
      Ok(result) => Some(result),
      Err(TryRecvError::Empty) => return None,
      Err(TryRecvError::Disconnected) => None,
    };
    let worker = self.worker.take()?;
    let outcome = match finished {
      Some(result) => {
        let _ = worker.handle.join();
        SessionOutcome::from_result(result)
      }
      None => worker.join(),
    };

    let last_update = self.mailbox.clear();
    self.mailbox.close();
    self.status = outcome.status_text();
    info!("会话结束: {}", self.status);
    Some(SessionEnd {
      outcome,
      last_update,
    })
  }
}

impl<S, M, R: ?Sized> Drop for SessionController<S, M, R> {
  fn drop(&mut self) {
    if let Some(worker) = self.worker.take() {
      worker.cancel.cancel();
      let _ = worker.handle.join();
    }
  }
}
