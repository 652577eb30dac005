// 该文件是 Gabarito （答题卡阅卷） 项目的一部分。
// src/detection.rs - 检测结果与阅读顺序
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

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::geometry::{BoundingBox, Point};

/// 允许同一行/列的框之间有少量重叠
const OVERLAP_TOLERANCE: f32 = 0.9;

/// 一个检测结果，创建后不可修改
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  bbox: BoundingBox,
  class_id: u32,
  class_name: String,
  score: f32,
  image_width: u32,
  image_height: u32,
  center: Point,
  aspect_ratio: f32,
  order: usize,
}

impl Detection {
  /// `bbox` 为归一化坐标，`image_width`/`image_height` 为所属图像的像素尺寸
  pub fn new(
    bbox: BoundingBox,
    class_id: u32,
    class_name: impl Into<String>,
    score: f32,
    image_width: u32,
    image_height: u32,
  ) -> Self {
    let center = bbox.center();
    let aspect_ratio =
      (bbox.height() / bbox.width()) * (image_height as f32 / image_width as f32);
    Self {
      bbox,
      class_id,
      class_name: class_name.into(),
      score,
      image_width,
      image_height,
      center,
      aspect_ratio,
      order: 0,
    }
  }

  /// 记录该检测在所属图像排序后列表中的位置
  pub(crate) fn with_order(mut self, order: usize) -> Self {
    self.order = order;
    self
  }

  pub fn bbox(&self) -> &BoundingBox {
    &self.bbox
  }

  pub fn class_id(&self) -> u32 {
    self.class_id
  }

  pub fn class_name(&self) -> &str {
    &self.class_name
  }

  pub fn score(&self) -> f32 {
    self.score
  }

  pub fn image_width(&self) -> u32 {
    self.image_width
  }

  pub fn image_height(&self) -> u32 {
    self.image_height
  }

  pub fn center(&self) -> Point {
    self.center
  }

  /// 像素空间下的高宽比
  pub fn aspect_ratio(&self) -> f32 {
    self.aspect_ratio
  }

  /// 在所属图像检测列表中的序号，用作删除时的标识
  pub fn order(&self) -> usize {
    self.order
  }

  /// 按从左上到右下的阅读顺序，判断自身是否排在 `other` 之前
  pub fn precedes(&self, other: &Detection) -> bool {
    let dv = self.center.y - other.center.y;
    if dv.abs() > self.bbox.height() * OVERLAP_TOLERANCE {
      return dv < 0.0;
    }

    let dh = self.center.x - other.center.x;
    if dh.abs() > self.bbox.width() * OVERLAP_TOLERANCE {
      return dh < 0.0;
    }

    if dv.abs() >= dh.abs() {
      dv < 0.0
    } else {
      dh < 0.0
    }
  }

  /// 像素坐标下的 (x, y, w, h)
  pub fn to_pixels(&self) -> (u32, u32, u32, u32) {
    self.bbox.to_pixels(self.image_width, self.image_height)
  }
}

impl fmt::Display for Detection {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let [x0, y0, x1, y1] = self.bbox.to_array();
    write!(
      f,
      "{}#{}_{:.2}-{:.2}-{:.2}-{:.2}",
      self.class_name, self.order, x0, y0, x1, y1
    )
  }
}

/// 由 [`Detection::precedes`] 导出的比较函数
pub fn reading_cmp(a: &Detection, b: &Detection) -> Ordering {
  if a.precedes(b) {
    Ordering::Less
  } else if b.precedes(a) {
    Ordering::Greater
  } else {
    Ordering::Equal
  }
}

/// 稳定的插入排序：重叠框之间的比较关系不满足全序，不能交给 `sort_by`
pub fn sort_reading_order(detections: &mut [Detection]) {
  for i in 1..detections.len() {
    let mut j = i;
    while j > 0 && detections[j].precedes(&detections[j - 1]) {
      detections.swap(j, j - 1);
      j -= 1;
    }
  }
}

/// 检测结果在 JSON 转储中的形式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
  #[serde(rename = "class_id")]
  pub class_name: String,
  pub score: f32,
  /// `[x_min, y_min, x_max, y_max]`
  pub bounding_box: [f32; 4],
}

impl DetectionRecord {
  pub fn into_detection(self, class_id: u32, image_width: u32, image_height: u32) -> Detection {
    Detection::new(
      BoundingBox::from_array(self.bounding_box),
      class_id,
      self.class_name,
      self.score,
      image_width,
      image_height,
    )
  }
}

impl From<&Detection> for DetectionRecord {
  fn from(detection: &Detection) -> Self {
    Self {
      class_name: detection.class_name.clone(),
      score: detection.score,
      bounding_box: detection.bbox.to_array(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn mark(cx: f32, cy: f32) -> Detection {
    Detection::new(
      BoundingBox::from_floats(cx - 0.02, cy - 0.02, cx + 0.02, cy + 0.02),
      0,
      "selected_ball",
      0.9,
      1000,
      1000,
    )
  }

  #[test]
  fn aspect_ratio_is_scaled_by_image_shape() {
    let detection = Detection::new(
      BoundingBox::from_floats(0.0, 0.0, 0.2, 0.1),
      1,
      "questions_block",
      0.8,
      200,
      400,
    );
    assert!((detection.aspect_ratio() - 1.0).abs() < 1e-6);
    assert_eq!(detection.center(), Point::new(0.1, 0.05));
  }

  #[test]
  fn rows_come_before_columns() {
    let upper_right = mark(0.8, 0.1);
    let lower_left = mark(0.1, 0.5);
    assert!(upper_right.precedes(&lower_left));
    assert!(!lower_left.precedes(&upper_right));

    let left = mark(0.1, 0.5);
    let right = mark(0.3, 0.51);
    assert!(left.precedes(&right));
    assert_eq!(reading_cmp(&right, &left), Ordering::Greater);
  }

  #[test]
  fn precedes_is_irreflexive() {
    let a = mark(0.4, 0.4);
    assert!(!a.precedes(&a));
    assert_eq!(reading_cmp(&a, &a), Ordering::Equal);
  }

  #[test]
  fn overlapping_boxes_break_ties_on_the_larger_axis() {
    let a = mark(0.50, 0.50);
    let b = mark(0.51, 0.53);
    assert!(a.precedes(&b));
    let c = mark(0.53, 0.51);
    assert!(a.precedes(&c));
    assert!(!c.precedes(&a));
  }

  #[test]
  fn sort_walks_grid_row_by_row() {
    let mut marks = vec![
      mark(0.7, 0.6),
      mark(0.1, 0.6),
      mark(0.4, 0.2),
      mark(0.7, 0.2),
      mark(0.1, 0.2),
      mark(0.4, 0.6),
    ];
    sort_reading_order(&mut marks);
    let centers: Vec<_> = marks.iter().map(|d| d.center()).collect();
    let expected = [
      (0.1, 0.2),
      (0.4, 0.2),
      (0.7, 0.2),
      (0.1, 0.6),
      (0.4, 0.6),
      (0.7, 0.6),
    ];
    for (center, (x, y)) in centers.iter().zip(expected) {
      assert!((center.x - x).abs() < 1e-6 && (center.y - y).abs() < 1e-6);
    }
  }

  #[test]
  fn record_keeps_class_name_under_class_id() {
    let detection = mark(0.5, 0.5);
    let record = DetectionRecord::from(&detection);
    let json = serde_json::to_value(&record).unwrap();
    assert_eq!(json["class_id"], "selected_ball");
    let back = record.into_detection(0, 1000, 1000);
    assert_eq!(back.bbox(), detection.bbox());
  }
}
