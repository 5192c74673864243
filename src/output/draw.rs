// 该文件是 CNG Queue （加气排队） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::info;

use crate::model::{DetectItem, DetectResult, WithLabel};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_COLOR: [u8; 3] = [0, 255, 0]; // 绿色
const TEXT_COLOR: [u8; 3] = [0, 0, 0];
const BOX_THICKNESS: u32 = 2;

#[derive(Error, Debug)]
pub enum FontError {
  #[error("无法读取字体文件: {0}")]
  Io(#[from] std::io::Error),
  #[error("无效的字体文件: {0}")]
  Invalid(#[from] ab_glyph::InvalidFont),
}

#[derive(Clone)]
pub struct Draw {
  font_size: f32,
  font: Option<FontArc>,
  box_color: [u8; 3],
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font_size: LABEL_FONT_SIZE,
      font: None,
      box_color: BOX_COLOR,
    }
  }
}

impl Draw {
  /// 从字体文件加载标签字体；没有字体时只绘制边框
  pub fn with_font_file(mut self, path: &Path) -> Result<Self, FontError> {
    let data = std::fs::read(path)?;
    self.font = Some(FontArc::try_from_vec(data)?);
    info!("加载标签字体: {}", path.display());
    Ok(self)
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  fn draw_bbox_with_label<T: WithLabel>(&self, image: &mut RgbImage, item: &DetectItem<T>) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let [x_min, y_min, x_max, y_max] = item.pixel_box();
    let x_min = x_min.clamp(0, w - 1);
    let y_min = y_min.clamp(0, h - 1);
    let x_max = x_max.clamp(0, w - 1);
    let y_max = y_max.clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = Rgb(self.box_color);
    for t in 0..BOX_THICKNESS as i32 {
      let width = (x_max - x_min + 1 - 2 * t).max(1) as u32;
      let height = (y_max - y_min + 1 - 2 * t).max(1) as u32;
      draw_hollow_rect_mut(image, Rect::at(x_min + t, y_min + t).of_size(width, height), color);
    }

    let Some(font) = &self.font else {
      return;
    };

    let label = format!("{} {:.2}", item.kind.to_label_str(), item.score);
    let scale = PxScale::from(self.font_size);
    let (text_width, text_height) = text_size(scale, font, &label);
    let label_height = text_height as i32 + 2 * LABEL_TEXT_VERTICAL_PADDING;

    // 标签放在边框上方，空间不足时贴住图像顶部
    let label_x = x_min;
    let label_y = (y_min - label_height).max(0);
    let label_width = (text_width as i32).min(w - label_x);

    if label_width > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_width as u32, label_height as u32);
      draw_filled_rect_mut(image, rect, color);
      draw_text_mut(
        image,
        Rgb(TEXT_COLOR),
        label_x,
        label_y + LABEL_TEXT_VERTICAL_PADDING,
        scale,
        font,
        &label,
      );
    }
  }

  pub fn draw_detections_on_image<T: WithLabel>(&self, image: &mut RgbImage, result: &DetectResult<T>) {
    for item in result.items.iter() {
      self.draw_bbox_with_label(image, item);
    }
  }

  /// 在左上角绘制排队长度读数，没有字体时不绘制
  pub fn draw_banner(&self, image: &mut RgbImage, text: &str) {
    let Some(font) = &self.font else {
      return;
    };
    let scale = PxScale::from(self.font_size);
    let (text_width, text_height) = text_size(scale, font, text);
    let width = (text_width + 8).min(image.width());
    let height = (text_height + 8).min(image.height());
    if width == 0 || height == 0 {
      return;
    }
    draw_filled_rect_mut(image, Rect::at(0, 0).of_size(width, height), Rgb([0, 0, 0]));
    draw_text_mut(image, Rgb([255, 255, 255]), 4, 4, scale, font, text);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::CocoLabel;

  fn car(bbox: [f32; 4], score: f32) -> DetectItem<CocoLabel> {
    DetectItem {
      kind: CocoLabel(2),
      score,
      bbox,
    }
  }

  #[test]
  fn draws_two_pixel_green_box() {
    let mut image = RgbImage::new(40, 30);
    let result: DetectResult<CocoLabel> = vec![car([5.0, 5.0, 20.0, 15.0], 0.9)].into();
    Draw::default().draw_detections_on_image(&mut image, &result);

    let green = Rgb(BOX_COLOR);
    assert_eq!(*image.get_pixel(5, 5), green);
    assert_eq!(*image.get_pixel(6, 6), green);
    assert_eq!(*image.get_pixel(20, 15), green);
    assert_eq!(*image.get_pixel(12, 5), green);
    // 内部与第三圈不着色
    assert_eq!(*image.get_pixel(7, 7), Rgb([0, 0, 0]));
    assert_eq!(*image.get_pixel(12, 10), Rgb([0, 0, 0]));
  }

  #[test]
  fn boxes_are_clamped_and_degenerate_boxes_skipped() {
    let mut image = RgbImage::new(10, 10);
    let result: DetectResult<CocoLabel> = vec![
      car([-5.0, -5.0, 50.0, 50.0], 0.9),
      car([3.0, 3.0, 3.0, 8.0], 0.9),
    ]
    .into();
    Draw::default().draw_detections_on_image(&mut image, &result);
    assert_eq!(*image.get_pixel(0, 0), Rgb(BOX_COLOR));
    assert_eq!(*image.get_pixel(9, 9), Rgb(BOX_COLOR));
    assert_eq!(*image.get_pixel(3, 5), Rgb([0, 0, 0]));
  }

  #[test]
  fn missing_font_file_is_an_error() {
    assert!(matches!(
      Draw::default().with_font_file(Path::new("/nonexistent/font.ttf")),
      Err(FontError::Io(_))
    ));
  }
}
