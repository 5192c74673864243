// 该文件是 CNG Queue （加气排队） 项目的一部分。
// src/task.rs - 抽帧检测任务
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

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  input::InputError,
  model::{DetectResult, DetectionPolicy, Model, WithLabel},
  output::Render,
  report::{QueueObservation, QueueReporter, StationName},
  sampler::FrameSampler,
};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 协作式取消标志，工作线程每轮循环检查一次
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::Release);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::Acquire)
  }
}

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("视频源打开失败: {0}")]
  Open(#[source] InputError),
  #[error("第 {frame} 帧解码失败: {source}")]
  Decode { frame: u64, source: BoxError },
  #[error("第 {frame} 帧检测失败: {source}")]
  Detector { frame: u64, source: BoxError },
  #[error("第 {frame} 帧渲染失败: {source}")]
  Render { frame: u64, source: BoxError },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
  pub decoded: u64,
  pub retained: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
  /// 视频流正常结束
  EndOfStream(LoopStats),
  /// 会话被取消
  Cancelled(LoopStats),
  /// 达到指定帧数
  FrameLimit(LoopStats),
}

impl LoopOutcome {
  pub fn stats(&self) -> LoopStats {
    match *self {
      LoopOutcome::EndOfStream(stats)
      | LoopOutcome::Cancelled(stats)
      | LoopOutcome::FrameLimit(stats) => stats,
    }
  }
}

/// 抽帧检测任务
///
/// 逐帧解码，按步长抽帧后调用检测器，过滤出车辆后上报排队长度，
/// 最后把结果交给渲染输出。
pub struct SampledTask<R: ?Sized> {
  station: StationName,
  sampler: FrameSampler,
  policy: DetectionPolicy,
  cancel: CancelToken,
  reporter: Arc<R>,
  frame_limit: Option<u64>,
}

impl<R: QueueReporter + ?Sized> SampledTask<R> {
  pub fn new(
    station: StationName,
    sampler: FrameSampler,
    policy: DetectionPolicy,
    reporter: Arc<R>,
  ) -> Self {
    Self {
      station,
      sampler,
      policy,
      cancel: CancelToken::new(),
      reporter,
      frame_limit: None,
    }
  }

  pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn with_frame_limit(mut self, frame_limit: Option<u64>) -> Self {
    self.frame_limit = frame_limit;
    self
  }

  fn stats(&self) -> LoopStats {
    LoopStats {
      decoded: self.sampler.decoded(),
      retained: self.sampler.retained(),
    }
  }
}

impl<F, T, IE, ME, RE, I, M, O, R> Task<I, M, O> for SampledTask<R>
where
  T: WithLabel + Clone,
  IE: std::error::Error + Send + Sync + 'static,
  ME: std::error::Error + Send + Sync + 'static,
  RE: std::error::Error + Send + Sync + 'static,
  I: Iterator<Item = Result<F, IE>>,
  M: Model<Input = F, Output = DetectResult<T>, Error = ME>,
  O: Render<F, DetectResult<T>, Error = RE>,
  R: QueueReporter + ?Sized,
{
  type Output = LoopOutcome;
  type Error = TaskError;

  fn run_task(mut self, mut input: I, model: M, output: O) -> Result<Self::Output, Self::Error> {
    info!(
      "开始任务: 加气站 {}, 抽帧步长 {}",
      self.station,
      self.sampler.stride()
    );
    self.sampler.reset();

    loop {
      if self.cancel.is_cancelled() {
        warn!("收到停止请求，退出任务循环");
        return Ok(LoopOutcome::Cancelled(self.stats()));
      }

      let Some(frame) = input.next() else {
        info!("视频流结束，退出任务循环");
        return Ok(LoopOutcome::EndOfStream(self.stats()));
      };
      let frame = frame.map_err(|e| TaskError::Decode {
        frame: self.sampler.decoded() + 1,
        source: Box::new(e),
      })?;

      let index = self.sampler.decoded() + 1;
      if !self.sampler.advance() {
        debug!("跳过第 {} 帧", index);
      } else {
        let now = Instant::now();
        let detections = model.infer(&frame).map_err(|e| TaskError::Detector {
          frame: index,
          source: Box::new(e),
        })?;
        let elapsed = now.elapsed();

        let vehicles = self.policy.filter(&detections);
        self.reporter.report(&QueueObservation::now(
          self.station.clone(),
          vehicles.len(),
        ));

        output
          .render_result(&frame, &vehicles)
          .map_err(|e| TaskError::Render {
            frame: index,
            source: Box::new(e),
          })?;
        info!(
          "第 {} 帧: 排队长度 {}, 推理耗时: {:.2?}",
          index,
          vehicles.len(),
          elapsed
        );
      }

      if self.frame_limit.is_some_and(|n| self.sampler.decoded() >= n) {
        info!("达到指定帧数 {}, 退出任务循环", self.sampler.decoded());
        return Ok(LoopOutcome::FrameLimit(self.stats()));
      }
    }
  }
}
