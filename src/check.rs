// 该文件是 Gabarito （答题卡阅卷） 项目的一部分。
// src/check.rs - 检测结果分桶与校验
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

use std::fmt;

use clap::ValueEnum;
use serde::{Serialize, Serializer};
use thiserror::Error;
use tracing::debug;

use crate::cluster::{Axis, chunk_by_size};
use crate::detection::Detection;
use crate::sheet::Sheet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum)]
pub enum Stage {
  First,
  Second,
}

impl Stage {
  pub fn number(&self) -> u8 {
    match self {
      Stage::First => 1,
      Stage::Second => 2,
    }
  }
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "stage {}", self.number())
  }
}

impl Serialize for Stage {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(self.number())
  }
}

/// 每种标记一个桶
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bucket {
  CpfBlock,
  QuestionsBlock,
  CpfColumn,
  QuestionLine,
  QuestionNumber,
  SelectedBall,
  UnselectedBall,
}

impl Bucket {
  pub const ALL: [Bucket; 7] = [
    Bucket::CpfBlock,
    Bucket::QuestionsBlock,
    Bucket::CpfColumn,
    Bucket::QuestionLine,
    Bucket::QuestionNumber,
    Bucket::SelectedBall,
    Bucket::UnselectedBall,
  ];

  /// 对应的类别名称，同时用作检查项名称的前缀
  pub fn name(&self) -> &'static str {
    match self {
      Bucket::CpfBlock => "cpf_block",
      Bucket::QuestionsBlock => "questions_block",
      Bucket::CpfColumn => "cpf_column",
      Bucket::QuestionLine => "question_line",
      Bucket::QuestionNumber => "question_number",
      Bucket::SelectedBall => "selected_ball",
      Bucket::UnselectedBall => "unselected_ball",
    }
  }

  /// 各阶段的类别路由表
  pub fn route(stage: Stage, class_name: &str) -> Option<Bucket> {
    match (stage, class_name) {
      (Stage::First, "cpf_block") => Some(Bucket::CpfBlock),
      (Stage::First, "questions_block") => Some(Bucket::QuestionsBlock),
      (Stage::Second, "cpf_column") => Some(Bucket::CpfColumn),
      (Stage::Second, "question_line") => Some(Bucket::QuestionLine),
      (Stage::Second, "question_number") => Some(Bucket::QuestionNumber),
      (Stage::Second, "selected_ball") => Some(Bucket::SelectedBall),
      (Stage::Second, "unselected_ball") => Some(Bucket::UnselectedBall),
      _ => None,
    }
  }

  fn index(&self) -> usize {
    *self as usize
  }
}

impl fmt::Display for Bucket {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
  /// 数量不符或分组不匹配
  Structural,
  /// 位置、对齐、形状或包含关系不符
  Geometric,
}

impl fmt::Display for FailureKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FailureKind::Structural => f.write_str("结构错误"),
      FailureKind::Geometric => f.write_str("几何错误"),
    }
  }
}

/// 一次失败的检查
#[derive(Debug, Clone)]
pub struct ValidationFailure {
  pub sheet: String,
  pub stage: Stage,
  pub bucket: Bucket,
  pub check: String,
  pub kind: FailureKind,
  pub expected: String,
  pub actual: String,
  pub offenders: Vec<Detection>,
}

impl fmt::Display for ValidationFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "{} ({}) 检查 {} 未通过 [{}]: 期望 {}, 实际 {}",
      self.sheet, self.stage, self.check, self.kind, self.expected, self.actual
    )?;
    if !self.offenders.is_empty() {
      let offenders: Vec<_> = self.offenders.iter().map(ToString::to_string).collect();
      write!(f, ", 问题检测: {}", offenders.join(", "))?;
    }
    Ok(())
  }
}

#[derive(Error, Debug)]
pub enum CheckError {
  #[error("{stage} 中没有类别 {class_name} 对应的检查器")]
  UnknownClass { class_name: String, stage: Stage },
  #[error("第二阶段图像 {0} 缺少裁剪来源标记")]
  MissingCropTag(String),
  #[error("{0}")]
  Failed(Box<ValidationFailure>),
}

/// 一个桶在当前图像上的状态
#[derive(Debug, Clone, Default)]
pub struct BucketState {
  pub detections: Vec<Detection>,
  pub failed: bool,
  /// 预计算得到的行，每行按 x 排序
  pub rows: Vec<Vec<Detection>>,
}

/// 单个工作线程持有的全部桶状态，每张图像每个阶段开始时重置
#[derive(Debug, Clone)]
pub struct CheckContext {
  buckets: [BucketState; 7],
}

impl Default for CheckContext {
  fn default() -> Self {
    Self::new()
  }
}

impl CheckContext {
  pub fn new() -> Self {
    Self {
      buckets: Default::default(),
    }
  }

  pub fn reset(&mut self) {
    for state in &mut self.buckets {
      *state = BucketState::default();
    }
  }

  pub fn bucket(&self, bucket: Bucket) -> &BucketState {
    &self.buckets[bucket.index()]
  }

  pub fn bucket_mut(&mut self, bucket: Bucket) -> &mut BucketState {
    &mut self.buckets[bucket.index()]
  }

  /// 将图像上的检测结果分发到各个桶，调用前必须先 [`CheckContext::reset`]
  pub fn dispatch(&mut self, sheet: &Sheet, stage: Stage) -> Result<(), CheckError> {
    for detection in sheet.detections() {
      let bucket =
        Bucket::route(stage, detection.class_name()).ok_or_else(|| CheckError::UnknownClass {
          class_name: detection.class_name().to_string(),
          stage,
        })?;
      self.bucket_mut(bucket).detections.push(detection.clone());
    }
    debug!(
      "{}: 分发 {} 个检测结果 ({})",
      sheet.name(),
      sheet.detections().len(),
      stage
    );
    Ok(())
  }

  /// 按 y 分行，每行 `row_len` 个，行内按 x 排序
  pub fn split_rows(&mut self, bucket: Bucket, row_len: usize) {
    let rows: Vec<Vec<Detection>> = {
      let state = self.bucket(bucket);
      chunk_by_size(&state.detections, Axis::Y, row_len)
        .into_iter()
        .map(|row| {
          let mut row: Vec<Detection> = row.iter().cloned().collect();
          row.sort_by(|a, b| a.center().x.total_cmp(&b.center().x));
          row
        })
        .collect()
    };
    self.bucket_mut(bucket).rows = rows;
  }

  pub fn failed_buckets(&self) -> Vec<Bucket> {
    Bucket::ALL
      .into_iter()
      .filter(|bucket| self.bucket(*bucket).failed)
      .collect()
  }
}

mod engine;
mod predicate;
mod rules;

pub use self::engine::{CheckOptions, CheckReport, perform};
pub use self::predicate::Outcome;
pub use self::rules::{CheckRegistry, CheckerDef, Precompute, Rule};

#[cfg(test)]
mod tests {
  use super::*;
  use crate::geometry::BoundingBox;

  fn detection(class_name: &str, cx: f32, cy: f32) -> Detection {
    Detection::new(
      BoundingBox::from_floats(cx - 0.05, cy - 0.05, cx + 0.05, cy + 0.05),
      0,
      class_name,
      0.9,
      100,
      100,
    )
  }

  #[test]
  fn router_rejects_classes_of_other_stage() {
    let mut sheet = Sheet::blank("a.jpg", 100, 100);
    sheet.set_detections(vec![detection("selected_ball", 0.5, 0.5)]);
    let mut ctx = CheckContext::new();
    let err = ctx.dispatch(&sheet, Stage::First).unwrap_err();
    assert!(matches!(
      err,
      CheckError::UnknownClass { ref class_name, stage: Stage::First } if class_name == "selected_ball"
    ));
    ctx.reset();
    ctx.dispatch(&sheet, Stage::Second).unwrap();
    assert_eq!(ctx.bucket(Bucket::SelectedBall).detections.len(), 1);
  }

  #[test]
  fn reset_clears_state() {
    let mut sheet = Sheet::blank("a.jpg", 100, 100);
    sheet.set_detections(vec![detection("cpf_block", 0.3, 0.3)]);
    let mut ctx = CheckContext::new();
    ctx.dispatch(&sheet, Stage::First).unwrap();
    ctx.bucket_mut(Bucket::CpfBlock).failed = true;
    ctx.reset();
    assert!(ctx.bucket(Bucket::CpfBlock).detections.is_empty());
    assert!(ctx.failed_buckets().is_empty());
  }

  #[test]
  fn rows_are_sorted_left_to_right() {
    let mut sheet = Sheet::blank("a.jpg", 100, 100);
    sheet.set_detections(vec![
      detection("questions_block", 0.8, 0.7),
      detection("questions_block", 0.2, 0.5),
      detection("questions_block", 0.5, 0.7),
      detection("questions_block", 0.8, 0.5),
    ]);
    let mut ctx = CheckContext::new();
    ctx.dispatch(&sheet, Stage::First).unwrap();
    ctx.split_rows(Bucket::QuestionsBlock, 2);
    let rows = &ctx.bucket(Bucket::QuestionsBlock).rows;
    assert_eq!(rows.len(), 2);
    assert!(rows[0][0].center().x < rows[0][1].center().x);
    assert!((rows[1][0].center().x - 0.5).abs() < 1e-6);
  }
}
