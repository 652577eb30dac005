// 该文件是 Gabarito （答题卡阅卷） 项目的一部分。
// src/cluster.rs - 按坐标轴对检测结果分组
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

use crate::detection::Detection;
use crate::geometry::Point;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
  X,
  Y,
}

impl Axis {
  pub fn coordinate(&self, point: Point) -> f32 {
    match self {
      Axis::X => point.x,
      Axis::Y => point.y,
    }
  }
}

/// 一组检测结果，成员按分组所用的坐标轴升序排列
#[derive(Debug, Clone, Default)]
pub struct Group<'a> {
  members: Vec<&'a Detection>,
}

impl<'a> Group<'a> {
  pub fn members(&self) -> &[&'a Detection] {
    &self.members
  }

  pub fn len(&self) -> usize {
    self.members.len()
  }

  pub fn is_empty(&self) -> bool {
    self.members.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &'a Detection> + '_ {
    self.members.iter().copied()
  }

  /// 成员中心点的平均值，空组返回原点
  pub fn centroid(&self) -> Point {
    if self.members.is_empty() {
      return Point::default();
    }
    let n = self.members.len() as f32;
    let (sx, sy) = self
      .members
      .iter()
      .fold((0.0, 0.0), |(sx, sy), d| (sx + d.center().x, sy + d.center().y));
    Point::new(sx / n, sy / n)
  }

  pub fn count_class(&self, class_name: &str) -> usize {
    self
      .members
      .iter()
      .filter(|d| d.class_name() == class_name)
      .count()
  }

  /// 成员按 `axis` 排序后，第一个 `class_name` 成员的位置
  pub fn rank_of(&self, class_name: &str, axis: Axis) -> Option<usize> {
    let mut sorted = self.members.clone();
    sort_by_axis(&mut sorted, axis);
    sorted.iter().position(|d| d.class_name() == class_name)
  }
}

fn sort_by_axis(detections: &mut [&Detection], axis: Axis) {
  detections.sort_by(|a, b| {
    axis
      .coordinate(a.center())
      .total_cmp(&axis.coordinate(b.center()))
  });
}

/// 沿 `axis` 排序，相邻中心的距离超过 `threshold` 时开始新的一组
pub fn group_by_gap<'a>(
  detections: impl IntoIterator<Item = &'a Detection>,
  axis: Axis,
  threshold: f32,
) -> Vec<Group<'a>> {
  let mut sorted: Vec<&Detection> = detections.into_iter().collect();
  sort_by_axis(&mut sorted, axis);

  let mut groups: Vec<Group<'a>> = Vec::new();
  let mut current = Group::default();
  for detection in sorted {
    if let Some(last) = current.members.last()
      && (axis.coordinate(detection.center()) - axis.coordinate(last.center())).abs() > threshold
    {
      groups.push(std::mem::take(&mut current));
    }
    current.members.push(detection);
  }
  if !current.is_empty() {
    groups.push(current);
  }
  groups
}

/// 沿 `axis` 排序后按固定数量切分，最后一组可能不满
pub fn chunk_by_size<'a>(
  detections: impl IntoIterator<Item = &'a Detection>,
  axis: Axis,
  size: usize,
) -> Vec<Group<'a>> {
  let mut sorted: Vec<&Detection> = detections.into_iter().collect();
  sort_by_axis(&mut sorted, axis);
  sorted
    .chunks(size.max(1))
    .map(|chunk| Group {
      members: chunk.to_vec(),
    })
    .collect()
}
