// 该文件是 CNG Queue （加气排队） 项目的一部分。
// src/frame.rs - RGB 帧定义
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

use image::RgbImage;
use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug)]
#[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
pub struct FrameSizeError {
  pub expected: usize,
  pub actual: usize,
}

/// 紧凑排列的 RGB (HWC) 视频帧
///
/// `index` 为解码序号，从 1 开始。
#[derive(Debug, Clone)]
pub struct RgbFrame {
  data: Box<[u8]>,
  width: u32,
  height: u32,
  pub index: u64,
}

impl RgbFrame {
  pub fn with_shape(width: u32, height: u32) -> Self {
    let size = RGB_CHANNELS * width as usize * height as usize;
    Self {
      data: vec![0u8; size].into_boxed_slice(),
      width,
      height,
      index: 0,
    }
  }

  pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameSizeError> {
    let expected = RGB_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(FrameSizeError {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      data: data.into_boxed_slice(),
      width,
      height,
      index: 0,
    })
  }

  pub fn with_index(mut self, index: u64) -> Self {
    self.index = index;
    self
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_hwc(&self) -> &[u8] {
    &self.data
  }

  pub fn to_rgb_image(&self) -> RgbImage {
    // 长度在构造时已校验
    RgbImage::from_raw(self.width, self.height, self.data.to_vec())
      .unwrap_or_else(|| RgbImage::new(self.width, self.height))
  }
}

impl AsMut<[u8]> for RgbFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

impl From<RgbImage> for RgbFrame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      data: image.into_raw().into_boxed_slice(),
      width,
      height,
      index: 0,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_mismatched_buffer() {
    let err = RgbFrame::from_raw(4, 2, vec![0u8; 10]).unwrap_err();
    assert_eq!(err.expected, 24);
    assert_eq!(err.actual, 10);
  }

  #[test]
  fn image_conversion_keeps_pixels() {
    let mut image = RgbImage::new(3, 2);
    image.put_pixel(2, 1, image::Rgb([10, 20, 30]));
    let frame = RgbFrame::from(image).with_index(7);
    assert_eq!(frame.index, 7);
    assert_eq!(&frame.as_hwc()[15..18], &[10, 20, 30]);
    assert_eq!(frame.to_rgb_image().get_pixel(2, 1).0, [10, 20, 30]);
  }
}
