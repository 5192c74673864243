// 该文件是 CNG Queue （加气排队） 项目的一部分。
// src/model.rs - 模型
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use tracing::debug;

/// 检测模型
///
/// 检测器是外部能力：给定一帧，返回带类别和置信度的边界框集合。
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

impl<M: Model + ?Sized> Model for &M {
  type Input = M::Input;
  type Output = M::Output;
  type Error = M::Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    (**self).infer(input)
  }
}

impl<M: Model + ?Sized> Model for std::sync::Arc<M> {
  type Input = M::Input;
  type Output = M::Output;
  type Error = M::Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    (**self).infer(input)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem<T> {
  pub kind: T,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，源帧像素坐标
}

impl<T> DetectItem<T> {
  /// 取整后的像素框，用于绘制
  pub fn pixel_box(&self) -> [i32; 4] {
    [
      self.bbox[0].floor() as i32,
      self.bbox[1].floor() as i32,
      self.bbox[2].ceil() as i32,
      self.bbox[3].ceil() as i32,
    ]
  }
}

#[derive(Debug, Clone)]
pub struct DetectResult<T> {
  pub items: Box<[DetectItem<T>]>,
}

impl<T> DetectResult<T> {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

impl<T> From<Vec<DetectItem<T>>> for DetectResult<T> {
  fn from(items: Vec<DetectItem<T>>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> u32;
  fn from_label_id(id: u32) -> Self;
}

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

/// 车辆类别：car, motorcycle, bus, truck
pub const VEHICLE_CLASSES: [u32; 4] = [2, 3, 5, 7];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CocoLabel(pub u32);

impl WithLabel for CocoLabel {
  fn to_label_str(&self) -> String {
    COCO_CLASSES
      .get(self.0 as usize)
      .map(|name| name.to_string())
      .unwrap_or_else(|| format!("class{}", self.0))
  }

  fn to_label_id(&self) -> u32 {
    self.0
  }

  fn from_label_id(id: u32) -> Self {
    CocoLabel(id)
  }
}

/// 检测结果过滤策略：类别白名单 + 置信度阈值（严格大于）
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionPolicy {
  pub classes: Vec<u32>,
  pub confidence_threshold: f32,
}

impl Default for DetectionPolicy {
  fn default() -> Self {
    Self {
      classes: VEHICLE_CLASSES.to_vec(),
      confidence_threshold: 0.3,
    }
  }
}

impl DetectionPolicy {
  pub fn accepts<T: WithLabel>(&self, item: &DetectItem<T>) -> bool {
    item.score > self.confidence_threshold && self.classes.contains(&item.kind.to_label_id())
  }

  pub fn filter<T: WithLabel + Clone>(&self, result: &DetectResult<T>) -> DetectResult<T> {
    let accepted: Vec<_> = result
      .items
      .iter()
      .filter(|item| self.accepts(*item))
      .cloned()
      .collect();
    debug!(
      "过滤检测结果: {} -> {} 个目标",
      result.items.len(),
      accepted.len()
    );
    accepted.into()
  }
}

#[cfg(feature = "model_yolov8")]
mod yolov8;
#[cfg(feature = "model_yolov8")]
pub use self::yolov8::{Yolov8, Yolov8Builder, Yolov8Error};

#[cfg(test)]
mod tests {
  use super::*;

  fn item(class: u32, score: f32) -> DetectItem<CocoLabel> {
    DetectItem {
      kind: CocoLabel(class),
      score,
      bbox: [10.0, 10.0, 50.0, 40.0],
    }
  }

  #[test]
  fn threshold_is_exclusive() {
    let policy = DetectionPolicy::default();
    assert!(!policy.accepts(&item(2, 0.3)));
    assert!(!policy.accepts(&item(2, 0.1)));
    assert!(policy.accepts(&item(2, 0.31)));
  }

  #[test]
  fn only_vehicle_classes_are_counted() {
    let policy = DetectionPolicy::default();
    let result: DetectResult<CocoLabel> = vec![
      item(0, 0.9),  // person
      item(2, 0.9),  // car
      item(3, 0.5),  // motorcycle
      item(5, 0.3),  // bus，阈值上
      item(7, 0.8),  // truck
      item(1, 0.99), // bicycle
    ]
    .into();
    let accepted = policy.filter(&result);
    let ids: Vec<u32> = accepted.items.iter().map(|i| i.kind.0).collect();
    assert_eq!(ids, vec![2, 3, 7]);
  }

  #[test]
  fn labels() {
    assert_eq!(CocoLabel(2).to_label_str(), "car");
    assert_eq!(CocoLabel(7).to_label_str(), "truck");
    assert_eq!(CocoLabel(99).to_label_str(), "class99");
    assert_eq!(CocoLabel::from_label_id(5).to_label_id(), 5);
  }

  #[test]
  fn pixel_box_rounds_outward() {
    let mut it = item(2, 0.9);
    it.bbox = [1.6, 2.2, 10.1, 20.9];
    assert_eq!(it.pixel_box(), [1, 2, 11, 21]);
  }
}
