// 该文件是 CNG Queue （加气排队） 项目的一部分。
// src/model/yolov8.rs - YOLOv8 (ONNX Runtime) 检测模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::sync::Mutex;

use image::{RgbImage, imageops::FilterType};
use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::Tensor,
};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::RgbFrame,
  model::{COCO_CLASSES, CocoLabel, DetectItem, DetectResult, Model, VEHICLE_CLASSES},
};

const YOLOV8_INPUT_SIZE: u32 = 640;
const YOLOV8_CLASS_NUM: usize = COCO_CLASSES.len();
const YOLOV8_LETTERBOX_FILL: u8 = 114;
const YOLOV8_SCORE_THRESH: f32 = 0.25;
const YOLOV8_IOU_THRESH: f32 = 0.7;
const YOLOV8_INPUT_NAME: &str = "images";

#[derive(Error, Debug)]
pub enum Yolov8Error {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(String),
  #[error("模型输出形状错误: {0}")]
  OutputShapeError(String),
  #[error("推理会话被污染")]
  SessionPoisoned,
}

fn ort_error<E: std::fmt::Display>(err: E) -> Yolov8Error {
  Yolov8Error::OrtError(err.to_string())
}

pub struct Yolov8Builder {
  model_path: String,
  classes: Vec<u32>,
  score_threshold: f32,
  iou_threshold: f32,
  intra_threads: usize,
}

impl FromUrlWithScheme for Yolov8Builder {
  const SCHEME: &'static str = "yolov8";
}

impl FromUrl for Yolov8Builder {
  type Error = Yolov8Error;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(Yolov8Error::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let threads = url
      .query_pairs()
      .find(|(k, _)| k == "threads")
      .and_then(|(_, v)| v.parse::<usize>().ok())
      .unwrap_or(4);

    Ok(Yolov8Builder {
      model_path: url.path().to_string(),
      classes: VEHICLE_CLASSES.to_vec(),
      score_threshold: YOLOV8_SCORE_THRESH,
      iou_threshold: YOLOV8_IOU_THRESH,
      intra_threads: threads,
    })
  }
}

impl Yolov8Builder {
  pub fn classes(mut self, classes: &[u32]) -> Self {
    self.classes = classes.to_vec();
    self
  }

  pub fn build(self) -> Result<Yolov8, Yolov8Error> {
    info!("加载模型文件: {}", self.model_path);

    let session = Session::builder()
      .map_err(ort_error)?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(ort_error)?
      .with_intra_threads(self.intra_threads)
      .map_err(ort_error)?
      .commit_from_file(&self.model_path)
      .map_err(ort_error)?;
    info!("模型加载完成");
    debug!("仅保留类别: {:?}", self.classes);

    Ok(Yolov8 {
      session: Mutex::new(session),
      classes: self.classes,
      score_threshold: self.score_threshold,
      iou_threshold: self.iou_threshold,
    })
  }
}

pub struct Yolov8 {
  session: Mutex<Session>,
  classes: Vec<u32>,
  score_threshold: f32,
  iou_threshold: f32,
}

/// 等比缩放并居中填充后的几何参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Letterbox {
  scale: f32,
  pad_x: f32,
  pad_y: f32,
  src_w: f32,
  src_h: f32,
}

impl Letterbox {
  fn new(src_w: u32, src_h: u32) -> Self {
    let target = YOLOV8_INPUT_SIZE as f32;
    let scale = (target / src_w as f32).min(target / src_h as f32);
    let scaled_w = (src_w as f32 * scale).round();
    let scaled_h = (src_h as f32 * scale).round();
    Self {
      scale,
      pad_x: ((target - scaled_w) / 2.0).floor(),
      pad_y: ((target - scaled_h) / 2.0).floor(),
      src_w: src_w as f32,
      src_h: src_h as f32,
    }
  }

  fn restore(&self, bbox: [f32; 4]) -> [f32; 4] {
    [
      ((bbox[0] - self.pad_x) / self.scale).clamp(0.0, self.src_w),
      ((bbox[1] - self.pad_y) / self.scale).clamp(0.0, self.src_h),
      ((bbox[2] - self.pad_x) / self.scale).clamp(0.0, self.src_w),
      ((bbox[3] - self.pad_y) / self.scale).clamp(0.0, self.src_h),
    ]
  }
}

fn preprocess(frame: &RgbFrame) -> (Vec<f32>, Letterbox) {
  let letterbox = Letterbox::new(frame.width(), frame.height());
  let scaled_w = ((frame.width() as f32 * letterbox.scale).round() as u32).max(1);
  let scaled_h = ((frame.height() as f32 * letterbox.scale).round() as u32).max(1);

  let resized = image::imageops::resize(
    &frame.to_rgb_image(),
    scaled_w,
    scaled_h,
    FilterType::Triangle,
  );

  let size = YOLOV8_INPUT_SIZE;
  let mut canvas = RgbImage::from_pixel(size, size, image::Rgb([YOLOV8_LETTERBOX_FILL; 3]));
  image::imageops::replace(
    &mut canvas,
    &resized,
    letterbox.pad_x as i64,
    letterbox.pad_y as i64,
  );

  // HWC -> CHW，归一化到 [0, 1]
  let plane = (size * size) as usize;
  let mut input = vec![0.0f32; 3 * plane];
  for (idx, pixel) in canvas.pixels().enumerate() {
    for c in 0..3 {
      input[c * plane + idx] = pixel[c] as f32 / 255.0;
    }
  }

  (input, letterbox)
}

/// 解码 `[1, 4 + 80, N]` 输出，按类别做 NMS
pub(crate) fn decode_output(
  output: &[f32],
  letterbox: &Letterbox,
  classes: &[u32],
  score_threshold: f32,
  iou_threshold: f32,
) -> Result<Vec<DetectItem<CocoLabel>>, Yolov8Error> {
  let rows = 4 + YOLOV8_CLASS_NUM;
  if output.is_empty() || output.len() % rows != 0 {
    return Err(Yolov8Error::OutputShapeError(format!(
      "输出长度 {} 不是 {} 的整数倍",
      output.len(),
      rows
    )));
  }
  let num_preds = output.len() / rows;

  let mut candidates = Vec::new();
  for i in 0..num_preds {
    let (class_id, score) = (0..YOLOV8_CLASS_NUM)
      .map(|c| (c as u32, output[(4 + c) * num_preds + i]))
      .fold((0u32, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

    if score <= score_threshold || !classes.contains(&class_id) {
      continue;
    }

    let cx = output[i];
    let cy = output[num_preds + i];
    let w = output[2 * num_preds + i];
    let h = output[3 * num_preds + i];

    candidates.push(DetectItem {
      kind: CocoLabel(class_id),
      score,
      bbox: letterbox.restore([cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0]),
    });
  }

  Ok(nms(candidates, iou_threshold))
}

fn nms(mut items: Vec<DetectItem<CocoLabel>>, iou_threshold: f32) -> Vec<DetectItem<CocoLabel>> {
  items.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut keep: Vec<DetectItem<CocoLabel>> = Vec::with_capacity(items.len());
  for item in items {
    let suppressed = keep
      .iter()
      .any(|k| k.kind == item.kind && iou(&k.bbox, &item.bbox) > iou_threshold);
    if !suppressed {
      keep.push(item);
    }
  }
  keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let union = (a[2] - a[0]) * (a[3] - a[1]) + (b[2] - b[0]) * (b[3] - b[1]) - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

impl Model for Yolov8 {
  type Input = RgbFrame;
  type Output = DetectResult<CocoLabel>;
  type Error = Yolov8Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    debug!("预处理第 {} 帧", input.index);
    let (tensor, letterbox) = preprocess(input);

    let size = YOLOV8_INPUT_SIZE as usize;
    let shape = [1, 3, size, size];
    let input_value =
      Tensor::from_array((shape, tensor.into_boxed_slice())).map_err(ort_error)?;

    debug!("执行模型推理");
    let output = {
      let mut session = self
        .session
        .lock()
        .map_err(|_| Yolov8Error::SessionPoisoned)?;
      let outputs = session
        .run(ort::inputs![YOLOV8_INPUT_NAME => input_value])
        .map_err(ort_error)?;
      let (_, data) = outputs[0].try_extract_tensor::<f32>().map_err(ort_error)?;
      data.to_vec()
    };

    let items = decode_output(
      &output,
      &letterbox,
      &self.classes,
      self.score_threshold,
      self.iou_threshold,
    )?;
    debug!("检测到 {} 个物体", items.len());

    Ok(items.into())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn synthetic_output(preds: &[([f32; 4], u32, f32)]) -> Vec<f32> {
    let n = preds.len();
    let mut out = vec![0.0f32; (4 + YOLOV8_CLASS_NUM) * n];
    for (i, (b, class, score)) in preds.iter().enumerate() {
      for k in 0..4 {
        out[k * n + i] = b[k];
      }
      out[(4 + *class as usize) * n + i] = *score;
    }
    out
  }

  #[test]
  fn letterbox_for_wide_frame() {
    let lb = Letterbox::new(1280, 720);
    assert_eq!(lb.scale, 0.5);
    assert_eq!(lb.pad_x, 0.0);
    assert_eq!(lb.pad_y, 140.0);
    assert_eq!(lb.restore([0.0, 140.0, 640.0, 500.0]), [0.0, 0.0, 1280.0, 720.0]);
  }

  #[test]
  fn decode_keeps_requested_classes_and_suppresses_overlaps() {
    let lb = Letterbox::new(640, 640);
    let output = synthetic_output(&[
      ([100.0, 100.0, 50.0, 50.0], 2, 0.9), // car
      ([102.0, 101.0, 50.0, 50.0], 2, 0.8), // 与上一个重叠
      ([300.0, 300.0, 40.0, 40.0], 0, 0.9), // person
      ([500.0, 500.0, 60.0, 60.0], 7, 0.6), // truck
      ([200.0, 400.0, 30.0, 30.0], 3, 0.2), // 低于模型阈值
    ]);
    let items = decode_output(&output, &lb, &VEHICLE_CLASSES, 0.25, 0.7).unwrap();
    let ids: Vec<u32> = items.iter().map(|i| i.kind.0).collect();
    assert_eq!(ids, vec![2, 7]);
    assert_eq!(items[0].bbox, [75.0, 75.0, 125.0, 125.0]);
  }

  #[test]
  fn rejects_malformed_output() {
    let lb = Letterbox::new(640, 640);
    assert!(matches!(
      decode_output(&[0.0; 10], &lb, &VEHICLE_CLASSES, 0.25, 0.7),
      Err(Yolov8Error::OutputShapeError(_))
    ));
  }

  #[test]
  fn url_scheme() {
    let url = Url::parse("yolov8:///models/yolov8n.onnx?threads=2").unwrap();
    let builder = Yolov8Builder::from_url(&url).unwrap();
    assert_eq!(builder.model_path, "/models/yolov8n.onnx");
    assert_eq!(builder.intra_threads, 2);
    assert_eq!(builder.classes, VEHICLE_CLASSES.to_vec());

    let url = Url::parse("rknn:///models/yolov8n.rknn").unwrap();
    assert!(Yolov8Builder::from_url(&url).is_err());
  }
}
