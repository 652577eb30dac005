// 该文件是 Gabarito （答题卡阅卷） 项目的一部分。
// src/check/predicate.rs - 基础几何谓词
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

use crate::cluster::Axis;
use crate::config::AspectRange;
use crate::detection::Detection;
use crate::geometry::{BoundingBox, Point};

/// 一次谓词求值的结果
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
  pub passed: bool,
  pub expected: String,
  pub actual: String,
  pub offenders: Vec<Detection>,
}

impl Outcome {
  pub fn pass(expected: impl Into<String>, actual: impl Into<String>) -> Self {
    Self {
      passed: true,
      expected: expected.into(),
      actual: actual.into(),
      offenders: Vec::new(),
    }
  }

  pub fn fail(expected: impl Into<String>, actual: impl Into<String>) -> Self {
    Self {
      passed: false,
      ..Self::pass(expected, actual)
    }
  }
}

/// 逐个检测求值，不满足的检测作为问题检测
pub fn each<'a>(
  detections: impl IntoIterator<Item = &'a Detection>,
  expected: impl Into<String>,
  predicate: impl Fn(&Detection) -> bool,
) -> Outcome {
  let mut total = 0;
  let offenders: Vec<Detection> = detections
    .into_iter()
    .inspect(|_| total += 1)
    .filter(|d| !predicate(d))
    .cloned()
    .collect();
  Outcome {
    passed: offenders.is_empty(),
    expected: expected.into(),
    actual: format!("{}/{} 不满足", offenders.len(), total),
    offenders,
  }
}

pub fn count(detections: &[Detection], expected: usize, class_name: &str) -> Outcome {
  let actual = detections
    .iter()
    .filter(|d| d.class_name() == class_name)
    .count();
  Outcome {
    passed: actual == expected,
    expected: format!("{expected} 个 {class_name}"),
    actual: format!("{actual} 个"),
    offenders: Vec::new(),
  }
}

/// 在像素空间比较距离，半径以图像高度为单位
pub fn center_is_near(detection: &Detection, point: Point, radius: f32) -> bool {
  let (width, height) = (detection.image_width(), detection.image_height());
  let center = detection.center().to_pixels(width, height);
  center.distance(point.to_pixels(width, height)) <= radius * height as f32
}

pub fn center_is_near_any(detection: &Detection, points: &[Point], radius: f32) -> bool {
  points
    .iter()
    .any(|point| center_is_near(detection, *point, radius))
}

pub fn aspect_ratio(detection: &Detection, range: AspectRange) -> bool {
  (detection.aspect_ratio() - range.expected).abs() <= range.tolerance
}

pub fn inside_box(detection: &Detection, bbox: &BoundingBox) -> bool {
  bbox.contains(detection.center())
}

/// `child` 的中心落在 `parent` 的框内
pub fn contains(parent: &Detection, child: &Detection) -> bool {
  parent.bbox().contains(child.center())
}

fn aligned(detections: &[Detection], axis: Axis, tolerance: f32) -> Outcome {
  let expected = format!("偏差 <= {tolerance}");
  if detections.is_empty() {
    return Outcome::pass(expected, "无检测");
  }
  let mean = detections
    .iter()
    .map(|d| axis.coordinate(d.center()))
    .sum::<f32>()
    / detections.len() as f32;
  let deviation = |d: &Detection| (axis.coordinate(d.center()) - mean).abs();
  let max_deviation = detections.iter().map(deviation).fold(0.0_f32, f32::max);
  let offenders: Vec<Detection> = detections
    .iter()
    .filter(|d| deviation(d) > tolerance)
    .cloned()
    .collect();
  Outcome {
    passed: offenders.is_empty(),
    expected,
    actual: format!("最大偏差 {max_deviation:.4}"),
    offenders,
  }
}

/// 所有中心的 y 坐标与均值的偏差不超过 `tolerance`
pub fn horizontally_aligned(detections: &[Detection], tolerance: f32) -> Outcome {
  aligned(detections, Axis::Y, tolerance)
}

/// 所有中心的 x 坐标与均值的偏差不超过 `tolerance`
pub fn vertically_aligned(detections: &[Detection], tolerance: f32) -> Outcome {
  aligned(detections, Axis::X, tolerance)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn at(class_name: &str, cx: f32, cy: f32, width: u32, height: u32) -> Detection {
    Detection::new(
      BoundingBox::from_floats(cx - 0.02, cy - 0.02, cx + 0.02, cy + 0.02),
      0,
      class_name,
      0.9,
      width,
      height,
    )
  }

  #[test]
  fn count_is_exact() {
    let balls: Vec<_> = (0..3)
      .map(|i| at("selected_ball", 0.1 * i as f32 + 0.1, 0.5, 100, 100))
      .collect();
    for (n, passed) in [(0, false), (2, false), (3, true), (4, false)] {
      assert_eq!(count(&balls, n, "selected_ball").passed, passed, "n = {n}");
    }
    assert!(!count(&balls, 3, "unselected_ball").passed);
    assert!(count(&[], 0, "selected_ball").passed);
  }

  #[test]
  fn nearness_is_measured_in_pixels() {
    // 宽图像上 x 方向的归一化距离会被放大
    let detection = at("cpf_block", 0.5, 0.5, 1000, 100);
    assert!(center_is_near(&detection, Point::new(0.5, 0.54), 0.05));
    assert!(!center_is_near(&detection, Point::new(0.51, 0.5), 0.05));
    assert!(center_is_near_any(
      &detection,
      &[Point::new(0.9, 0.9), Point::new(0.5, 0.5)],
      0.05
    ));
  }

  #[test]
  fn alignment_reports_offenders() {
    let row = vec![
      at("questions_block", 0.2, 0.50, 100, 100),
      at("questions_block", 0.5, 0.50, 100, 100),
      at("questions_block", 0.8, 0.56, 100, 100),
    ];
    let outcome = horizontally_aligned(&row, 0.01);
    assert!(!outcome.passed);
    assert_eq!(outcome.offenders.len(), 3);
    assert!(horizontally_aligned(&row[..2], 0.01).passed);
    assert!(vertically_aligned(&[], 0.0).passed);
  }

  #[test]
  fn containment_uses_child_center() {
    let line = Detection::new(
      BoundingBox::from_floats(0.1, 0.45, 0.9, 0.55),
      0,
      "question_line",
      0.9,
      100,
      100,
    );
    assert!(contains(&line, &at("selected_ball", 0.3, 0.5, 100, 100)));
    assert!(!contains(&line, &at("selected_ball", 0.3, 0.7, 100, 100)));
  }

  #[test]
  fn each_collects_failing_detections() {
    let bounds = BoundingBox::from_floats(0.0, 0.0, 0.5, 0.5);
    let marks = vec![
      at("selected_ball", 0.2, 0.2, 100, 100),
      at("selected_ball", 0.7, 0.2, 100, 100),
    ];
    let outcome = each(&marks, "在区间内", |d| inside_box(d, &bounds));
    assert!(!outcome.passed);
    assert_eq!(outcome.offenders, vec![marks[1].clone()]);
  }
}
