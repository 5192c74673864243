// 该文件是 CNG Queue （加气排队） 项目的一部分。
// src/sampler.rs - 固定步长抽帧
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

use std::num::NonZeroU64;

/// 固定步长抽帧器
///
/// 计数器从 0 开始，每解码一帧先加一再取模：第 k 帧（从 1 计）在
/// `k % stride == 0` 时保留。步长为 2 时第一帧保留的是第 2 帧。
#[derive(Debug, Clone)]
pub struct FrameSampler {
  stride: NonZeroU64,
  decoded: u64,
  retained: u64,
}

impl FrameSampler {
  pub fn new(stride: NonZeroU64) -> Self {
    Self {
      stride,
      decoded: 0,
      retained: 0,
    }
  }

  /// 记录一帧已解码，返回该帧是否需要检测
  pub fn advance(&mut self) -> bool {
    self.decoded += 1;
    let keep = self.decoded % self.stride.get() == 0;
    if keep {
      self.retained += 1;
    }
    keep
  }

  pub fn reset(&mut self) {
    self.decoded = 0;
    self.retained = 0;
  }

  pub fn stride(&self) -> NonZeroU64 {
    self.stride
  }

  /// 已解码帧数，即最近一帧的序号
  pub fn decoded(&self) -> u64 {
    self.decoded
  }

  pub fn retained(&self) -> u64 {
    self.retained
  }
}
