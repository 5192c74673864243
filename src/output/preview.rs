// 该文件是 CNG Queue （加气排队） 项目的一部分。
// src/output/preview.rs - 预览帧投递
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::convert::Infallible;
use std::sync::Arc;

use image::{RgbImage, imageops::FilterType};
use tracing::debug;

use crate::{
  frame::RgbFrame,
  mailbox::Mailbox,
  model::{DetectResult, WithLabel},
  output::{Render, draw::Draw},
};

/// 工作线程投递给前台的一次刷新
#[derive(Debug, Clone)]
pub struct FrameUpdate {
  pub frame_index: u64,
  pub queue_length: usize,
  pub preview: RgbImage,
}

/// 按显示宽度等比缩放
pub fn resize_for_display(image: RgbImage, display_width: u32) -> RgbImage {
  let (width, height) = image.dimensions();
  if width == 0 || height == 0 || width == display_width {
    return image;
  }
  let display_height =
    ((height as f64 * display_width as f64 / width as f64).round() as u32).max(1);
  image::imageops::resize(&image, display_width, display_height, FilterType::Lanczos3)
}

/// 在工作线程上绘制并缩放预览图，然后投递到邮箱
pub struct PreviewPoster {
  draw: Draw,
  display_width: u32,
  mailbox: Arc<Mailbox<FrameUpdate>>,
}

impl PreviewPoster {
  pub fn new(draw: Draw, display_width: u32, mailbox: Arc<Mailbox<FrameUpdate>>) -> Self {
    Self {
      draw,
      display_width,
      mailbox,
    }
  }
}

impl<T: WithLabel> Render<RgbFrame, DetectResult<T>> for PreviewPoster {
  type Error = Infallible;

  fn render_result(&self, frame: &RgbFrame, result: &DetectResult<T>) -> Result<(), Self::Error> {
    let mut image = frame.to_rgb_image();
    self.draw.draw_detections_on_image(&mut image, result);
    let update = FrameUpdate {
      frame_index: frame.index,
      queue_length: result.len(),
      preview: resize_for_display(image, self.display_width),
    };
    if !self.mailbox.post(update) {
      debug!("邮箱已关闭，丢弃第 {} 帧预览", frame.index);
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{CocoLabel, DetectItem};

  #[test]
  fn keeps_aspect_ratio() {
    let resized = resize_for_display(RgbImage::new(1920, 1080), 800);
    assert_eq!(resized.dimensions(), (800, 450));
    let resized = resize_for_display(RgbImage::new(400, 300), 800);
    assert_eq!(resized.dimensions(), (800, 600));
  }

  #[test]
  fn posts_annotated_update() {
    let mailbox = Mailbox::new();
    let poster = PreviewPoster::new(Draw::default(), 20, Arc::clone(&mailbox));
    let frame = RgbFrame::with_shape(40, 20).with_index(6);
    let result: DetectResult<CocoLabel> = vec![DetectItem {
      kind: CocoLabel(7),
      score: 0.8,
      bbox: [0.0, 0.0, 39.0, 19.0],
    }]
    .into();

    poster.render_result(&frame, &result).unwrap();

    let update = mailbox.take().unwrap();
    assert_eq!(update.frame_index, 6);
    assert_eq!(update.queue_length, 1);
    assert_eq!(update.preview.dimensions(), (20, 10));
  }
}
