// 该文件是 Gabarito （答题卡阅卷） 项目的一部分。
// src/geometry.rs - 几何基础类型
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

use serde::{Deserialize, Serialize};

/// 图像上的一个点，默认使用归一化坐标 [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
  pub x: f32,
  pub y: f32,
}

impl Point {
  pub const fn new(x: f32, y: f32) -> Self {
    Self { x, y }
  }

  /// 将归一化坐标变换到像素坐标
  pub fn to_pixels(self, width: u32, height: u32) -> Self {
    Self {
      x: self.x * width as f32,
      y: self.y * height as f32,
    }
  }

  pub fn distance(self, other: Point) -> f32 {
    ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
  }
}

/// 轴对齐边界框，min <= max
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
  pub min: Point,
  pub max: Point,
}

impl BoundingBox {
  pub const fn from_floats(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
    Self {
      min: Point::new(x_min, y_min),
      max: Point::new(x_max, y_max),
    }
  }

  /// 从 `[x_min, y_min, x_max, y_max]` 构造，顺序颠倒的角会被交换
  pub fn from_array(bbox: [f32; 4]) -> Self {
    let [x0, y0, x1, y1] = bbox;
    Self::from_floats(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
  }

  pub fn to_array(&self) -> [f32; 4] {
    [self.min.x, self.min.y, self.max.x, self.max.y]
  }

  pub fn width(&self) -> f32 {
    self.max.x - self.min.x
  }

  pub fn height(&self) -> f32 {
    self.max.y - self.min.y
  }

  pub fn center(&self) -> Point {
    Point::new(
      (self.min.x + self.max.x) / 2.0,
      (self.min.y + self.max.y) / 2.0,
    )
  }

  /// 点是否落在框内（含边界）
  pub fn contains(&self, point: Point) -> bool {
    self.min.x <= point.x && point.x <= self.max.x && self.min.y <= point.y && point.y <= self.max.y
  }

  /// 像素坐标下的 (x, y, w, h)，已截断到图像范围内
  pub fn to_pixels(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
    let clamp = |v: f32, max: u32| (v.max(0.0) as u32).min(max);
    let x_min = clamp((self.min.x * width as f32).floor(), width);
    let y_min = clamp((self.min.y * height as f32).floor(), height);
    let x_max = clamp((self.max.x * width as f32).ceil(), width);
    let y_max = clamp((self.max.y * height as f32).ceil(), height);
    (x_min, y_min, x_max - x_min, y_max - y_min)
  }
}
