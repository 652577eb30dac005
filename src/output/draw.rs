// 该文件是 Gabarito （答题卡阅卷） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::detection::Detection;
use crate::sheet::Sheet;

const BOX_THICKNESS: u32 = 3;

/// 各类别的边框颜色
pub fn class_color(class_name: &str) -> [u8; 3] {
  match class_name {
    "cpf_block" | "cpf_column" => [0, 0, 255],
    "questions_block" | "question_line" => [0, 160, 0],
    "question_number" => [255, 128, 0],
    "selected_ball" => [255, 0, 0],
    "unselected_ball" => [160, 0, 160],
    _ => [128, 128, 128],
  }
}

/// 在图像上绘制一个检测框，边框向内加粗
pub fn draw_detection(image: &mut RgbImage, detection: &Detection) {
  let (x, y, w, h) = detection.bbox().to_pixels(image.width(), image.height());
  let color = Rgb(class_color(detection.class_name()));
  for t in 0..BOX_THICKNESS {
    if w <= 2 * t || h <= 2 * t {
      break;
    }
    let rect = Rect::at((x + t) as i32, (y + t) as i32).of_size(w - 2 * t, h - 2 * t);
    draw_hollow_rect_mut(image, rect, color);
  }
}

/// 复制图像并按阅读顺序画出全部检测
pub fn annotate(sheet: &Sheet) -> RgbImage {
  let mut image = sheet.image().clone();
  for detection in sheet.detections() {
    draw_detection(&mut image, detection);
  }
  image
}
