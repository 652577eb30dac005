// 该文件是 Gabarito （答题卡阅卷） 项目的一部分。
// tests/common/mod.rs - 合成答题卡与检测结果
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

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::path::{Path, PathBuf};

use gabarito::config::{ExamLayout, RunConfig};
use gabarito::model::{DetectItem, DetectResult, Model};
use gabarito::sheet::{BlockKind, Sheet};
use gabarito::task::ScanSetup;

pub const SHEET_SIZE: u32 = 800;
pub const CPF: &str = "52998224725";
pub const CHOICES: [char; 5] = ['A', 'B', 'C', 'D', 'E'];

// 第一阶段类别编号
pub const CPF_BLOCK: u32 = 0;
pub const QUESTIONS_BLOCK: u32 = 1;
// 第二阶段类别编号
pub const CPF_COLUMN: u32 = 0;
pub const QUESTION_LINE: u32 = 1;
pub const SELECTED_BALL: u32 = 2;
pub const UNSELECTED_BALL: u32 = 3;
pub const QUESTION_NUMBER: u32 = 4;

const QUESTION_CENTERS: [(f32, f32); 6] = [
  (0.2101, 0.5249),
  (0.5, 0.5249),
  (0.7713, 0.5249),
  (0.2101, 0.7245),
  (0.5, 0.7245),
  (0.7713, 0.7245),
];

pub fn item(class_id: u32, cx: f32, cy: f32, w: f32, h: f32) -> DetectItem {
  DetectItem {
    class_id,
    score: 0.9,
    bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
  }
}

/// 第 `q` 题（从 1 开始）的答案，按题号循环 A..E
pub fn expected_answer(q: u32) -> char {
  CHOICES[(q as usize * 3) % CHOICES.len()]
}

/// 按固定版面生成检测结果的模型，两个阶段共用
///
/// 第一阶段返回 1 个 CPF 区域和 6 个题目区域；第二阶段按裁剪来源返回 CPF 标记或题目标记。
#[derive(Debug, Clone)]
pub struct SyntheticModel {
  pub cpf: String,
  /// 再加一个 CPF 区域
  pub duplicate_cpf: bool,
  /// 第一个题目区域第一行不选
  pub blank_first_line: bool,
}

impl Default for SyntheticModel {
  fn default() -> Self {
    Self {
      cpf: CPF.to_string(),
      duplicate_cpf: false,
      blank_first_line: false,
    }
  }
}

impl SyntheticModel {
  pub fn duplicate_cpf() -> Self {
    Self {
      duplicate_cpf: true,
      ..Self::default()
    }
  }

  pub fn first_stage(&self) -> Vec<DetectItem> {
    let mut items = vec![item(CPF_BLOCK, 0.35, 0.30, 0.40, 0.24)];
    if self.duplicate_cpf {
      items.push(item(CPF_BLOCK, 0.36, 0.31, 0.40, 0.24));
    }
    items.extend(
      QUESTION_CENTERS
        .iter()
        .map(|&(cx, cy)| item(QUESTIONS_BLOCK, cx, cy, 0.15, 0.18)),
    );
    items
  }

  pub fn cpf_crop(&self) -> Vec<DetectItem> {
    let mut items = Vec::new();
    for (column, digit) in self.cpf.chars().enumerate() {
      let x = 0.15 + 0.07 * column as f32;
      items.push(item(CPF_COLUMN, x, 0.5, 0.02, 0.3167));
      for row in 0..10 {
        let y = 0.12 + 0.08 * row as f32;
        let class_id = if digit.to_digit(10) == Some(row) {
          SELECTED_BALL
        } else {
          UNSELECTED_BALL
        };
        items.push(item(class_id, x, y, 0.03, 0.05));
      }
    }
    items
  }

  pub fn questions_crop(&self, order: usize) -> Vec<DetectItem> {
    let mut items = Vec::new();
    for line in 0..10 {
      let y = 0.2 + 0.08 * line as f32;
      items.push(item(QUESTION_LINE, 0.5, y, 0.9, 0.06));
      items.push(item(QUESTION_NUMBER, 0.12, y, 0.04, 0.03));

      let question = (order * 10 + line + 1) as u32;
      let answer = CHOICES
        .iter()
        .position(|c| *c == expected_answer(question));
      let blank = self.blank_first_line && order == 0 && line == 0;
      for (k, _) in CHOICES.iter().enumerate() {
        let class_id = if !blank && answer == Some(k) {
          SELECTED_BALL
        } else {
          UNSELECTED_BALL
        };
        items.push(item(class_id, 0.3 + 0.15 * k as f32, y, 0.06, 0.05));
      }
    }
    items
  }

  /// 该模型对某张图像的全部检测
  pub fn items_for(&self, sheet: &Sheet) -> Vec<DetectItem> {
    match sheet.cropped_by() {
      None => self.first_stage(),
      Some(BlockKind::Cpf) => self.cpf_crop(),
      Some(BlockKind::Questions) => self.questions_crop(crop_order(sheet.stem())),
    }
  }
}

/// `<名称>_questions_block_NN` 中的 `NN`
pub fn crop_order(stem: &str) -> usize {
  stem
    .rsplit('_')
    .next()
    .and_then(|n| n.parse().ok())
    .unwrap_or(0)
}

impl Model for SyntheticModel {
  type Error = Infallible;

  fn infer(&self, sheet: &Sheet) -> Result<DetectResult, Self::Error> {
    Ok(DetectResult {
      items: self.items_for(sheet).into_boxed_slice(),
    })
  }
}

/// 在每个题目区域的检测结果末尾追加一个多余的检测
#[derive(Debug, Clone)]
pub struct StrayModel {
  pub inner: SyntheticModel,
  pub stray: DetectItem,
}

impl StrayModel {
  pub fn new(stray: DetectItem) -> Self {
    Self {
      inner: SyntheticModel::default(),
      stray,
    }
  }
}

impl Model for StrayModel {
  type Error = Infallible;

  fn infer(&self, sheet: &Sheet) -> Result<DetectResult, Self::Error> {
    let mut items = self.inner.items_for(sheet);
    if sheet.cropped_by() == Some(BlockKind::Questions) {
      items.push(self.stray.clone());
    }
    Ok(DetectResult {
      items: items.into_boxed_slice(),
    })
  }
}

/// 按图像名称选择模型：名称在表中时使用对应模型，否则使用默认模型
#[derive(Debug, Clone, Default)]
pub struct PerSheetModel {
  pub default: SyntheticModel,
  pub overrides: BTreeMap<String, SyntheticModel>,
}

impl PerSheetModel {
  pub fn with(mut self, prefix: &str, model: SyntheticModel) -> Self {
    self.overrides.insert(prefix.to_string(), model);
    self
  }
}

impl Model for PerSheetModel {
  type Error = Infallible;

  fn infer(&self, sheet: &Sheet) -> Result<DetectResult, Self::Error> {
    let model = self
      .overrides
      .iter()
      .find(|(prefix, _)| sheet.name().starts_with(prefix.as_str()))
      .map_or(&self.default, |(_, model)| model);
    model.infer(sheet)
  }
}

pub fn setup(config: &RunConfig) -> ScanSetup {
  ScanSetup::new(&ExamLayout::ps(), config).unwrap()
}

/// 在目录中写入空白 PNG 答题卡，返回路径
pub fn write_blank_sheets(dir: &Path, stems: &[&str]) -> Vec<PathBuf> {
  stems
    .iter()
    .map(|stem| {
      let path = dir.join(format!("{stem}.png"));
      image::RgbImage::new(SHEET_SIZE, SHEET_SIZE).save(&path).unwrap();
      path
    })
    .collect()
}
