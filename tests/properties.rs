// 该文件是 Gabarito （答题卡阅卷） 项目的一部分。
// tests/properties.rs - 阅读顺序与聚类的性质测试
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

use gabarito::cluster::{Axis, group_by_gap};
use gabarito::detection::{Detection, sort_reading_order};
use gabarito::geometry::BoundingBox;
use proptest::prelude::*;

/// 第 `row` 行第 `col` 列的框，框之间不重叠
fn grid_box(row: usize, col: usize, sx: f32, sy: f32) -> Detection {
  let x0 = 0.02 + col as f32 * sx;
  let y0 = 0.02 + row as f32 * sy;
  Detection::new(
    BoundingBox::from_floats(x0, y0, x0 + sx * 0.5, y0 + sy * 0.5),
    0,
    "selected_ball",
    0.9,
    1000,
    1000,
  )
}

/// 打乱顺序的网格，返回 (行, 列, 检测)
fn shuffled_grid() -> impl Strategy<Value = (usize, Vec<(usize, usize)>, f32, f32)> {
  (1usize..5, 1usize..5, 0.05f32..0.15, 0.05f32..0.15).prop_flat_map(|(rows, cols, sx, sy)| {
    let cells: Vec<(usize, usize)> = (0..rows)
      .flat_map(|r| (0..cols).map(move |c| (r, c)))
      .collect();
    (Just(cols), Just(cells).prop_shuffle(), Just(sx), Just(sy))
  })
}

#[test]
fn proptest_reading_order_is_irreflexive_and_transitive() {
  proptest!(|((_cols, cells, sx, sy) in shuffled_grid())| {
    let boxes: Vec<Detection> = cells.iter().map(|&(r, c)| grid_box(r, c, sx, sy)).collect();
    for a in &boxes {
      prop_assert!(!a.precedes(a), "{} 不应排在自身之前", a);
      for b in &boxes {
        for c in &boxes {
          if a.precedes(b) && b.precedes(c) {
            prop_assert!(a.precedes(c), "{} < {} < {} 但不满足传递性", a, b, c);
          }
        }
      }
    }
  });
}

#[test]
fn proptest_sorted_grid_is_row_major() {
  proptest!(|((cols, cells, sx, sy) in shuffled_grid())| {
    let mut boxes: Vec<Detection> = cells.iter().map(|&(r, c)| grid_box(r, c, sx, sy)).collect();
    sort_reading_order(&mut boxes);
    for (i, detection) in boxes.iter().enumerate() {
      let expected = grid_box(i / cols, i % cols, sx, sy);
      prop_assert_eq!(detection.bbox(), expected.bbox());
    }
  });
}

/// 每组成员间距 0.005，组间距 0.15
fn clustered(sizes: &[usize]) -> Vec<Detection> {
  sizes
    .iter()
    .enumerate()
    .flat_map(|(g, &n)| {
      (0..n).map(move |j| {
        let x = 0.05 + g as f32 * 0.15 + j as f32 * 0.005;
        Detection::new(
          BoundingBox::from_floats(x - 0.002, 0.4, x + 0.002, 0.6),
          0,
          "unselected_ball",
          0.9,
          1000,
          1000,
        )
      })
    })
    .collect()
}

#[test]
fn proptest_gap_clustering_ignores_input_order() {
  let strategy = prop::collection::vec(1usize..5, 1..6).prop_flat_map(|sizes| {
    let detections = clustered(&sizes);
    (Just(sizes), Just(detections).prop_shuffle())
  });
  proptest!(|((sizes, detections) in strategy)| {
    let groups = group_by_gap(&detections, Axis::X, 0.02);
    let actual: Vec<usize> = groups.iter().map(|group| group.len()).collect();
    prop_assert_eq!(&actual, &sizes);
    for (g, group) in groups.iter().enumerate() {
      let base = 0.05 + g as f32 * 0.15;
      for member in group.iter() {
        prop_assert!((member.center().x - base).abs() < 0.03);
      }
    }
  });
}
