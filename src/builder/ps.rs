// 该文件是 Gabarito （答题卡阅卷） 项目的一部分。
// src/builder/ps.rs - 入学考试答题卡解码
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

use tracing::debug;

use crate::builder::{AnswerDecoder, Block, BuilderContext, CpfStrategy};
use crate::cluster::{Axis, Group, group_by_gap};
use crate::config::DecoderLayout;
use crate::detection::Detection;
use crate::report::{Answer, SheetReport};

const SELECTED: &str = "selected_ball";
const UNSELECTED: &str = "unselected_ball";
const UNKNOWN_DIGIT: char = 'X';

fn is_ball(detection: &&Detection) -> bool {
  matches!(detection.class_name(), SELECTED | UNSELECTED)
}

/// 组内恰好 `expected` 个候选且恰好一个选中时，返回选中标记沿 `axis` 的位置
fn selected_rank(group: &Group<'_>, expected: usize, axis: Axis) -> Option<usize> {
  if group.len() != expected || group.count_class(SELECTED) != 1 {
    return None;
  }
  group.rank_of(SELECTED, axis)
}

#[derive(Debug, Clone)]
pub struct PsDecoder {
  layout: DecoderLayout,
  cpf_strategy: CpfStrategy,
}

impl PsDecoder {
  pub fn new(layout: DecoderLayout, cpf_strategy: CpfStrategy) -> Self {
    Self {
      layout,
      cpf_strategy,
    }
  }

  fn unknown_cpf(&self) -> String {
    std::iter::repeat_n(UNKNOWN_DIGIT, self.layout.cpf_digits).collect()
  }

  fn digit(rank: Option<usize>) -> char {
    rank
      .and_then(|rank| char::from_digit(rank as u32, 10))
      .unwrap_or(UNKNOWN_DIGIT)
  }

  /// 按列分组，不足的位数补 `X`
  pub fn decode_cpf_columns(&self, block: &Block) -> String {
    let columns = group_by_gap(
      block.detections.iter().filter(is_ball),
      Axis::X,
      self.layout.cpf_column_gap,
    );
    debug!("{}: CPF 共 {} 列", block.name, columns.len());
    (0..self.layout.cpf_digits)
      .map(|i| {
        let rank = columns
          .get(i)
          .and_then(|column| selected_rank(column, self.layout.digits_per_column, Axis::Y));
        Self::digit(rank)
      })
      .collect()
  }

  /// 以每行最低的框底作为参考线，选中标记的框底落在哪一行即为数字
  pub fn decode_cpf_rows(&self, block: &Block) -> String {
    let balls: Vec<&Detection> = block.detections.iter().filter(is_ball).collect();
    let rows = group_by_gap(balls.iter().copied(), Axis::Y, self.layout.cpf_row_gap);
    if rows.len() != self.layout.digits_per_column {
      debug!("{}: CPF 行数 {} 不符", block.name, rows.len());
      return self.unknown_cpf();
    }
    let columns = group_by_gap(balls.iter().copied(), Axis::X, self.layout.cpf_column_gap);
    if columns.len() != self.layout.cpf_digits {
      debug!("{}: CPF 列数 {} 不符", block.name, columns.len());
      return self.unknown_cpf();
    }

    let references: Vec<f32> = rows
      .iter()
      .map(|row| row.iter().map(|d| d.bbox().max.y).fold(f32::MIN, f32::max))
      .collect();

    columns
      .iter()
      .map(|column| {
        let mut selected = column.iter().filter(|d| d.class_name() == SELECTED);
        let rank = match (selected.next(), selected.next()) {
          (Some(mark), None) => references
            .iter()
            .position(|reference| *reference >= mark.bbox().max.y),
          _ => None,
        };
        Self::digit(rank)
      })
      .collect()
  }

  pub fn decode_cpf(&self, block: &Block) -> String {
    match self.cpf_strategy {
      CpfStrategy::Columns => self.decode_cpf_columns(block),
      CpfStrategy::RowReference => self.decode_cpf_rows(block),
    }
  }

  /// 第 `order` 个题目区域中每条线对应一道题
  pub fn decode_questions(&self, block: &Block) -> Vec<(u32, Answer)> {
    let per_block = self.layout.lines_per_block;
    let first = (block.order * per_block) as u32 + 1;
    let lines = group_by_gap(
      block.detections.iter().filter(is_ball),
      Axis::Y,
      self.layout.line_gap,
    );
    debug!("{}: 共 {} 行", block.name, lines.len());

    (0..per_block)
      .map(|j| {
        let answer = lines
          .get(j)
          .and_then(|line| selected_rank(line, self.layout.choices.len(), Axis::X))
          .and_then(|rank| self.layout.choices.get(rank).copied())
          .map_or(Answer::NotDetected, Answer::Letter);
        (first + j as u32, answer)
      })
      .collect()
  }
}

impl AnswerDecoder for PsDecoder {
  fn decode(&self, context: &BuilderContext) -> SheetReport {
    let mut report = SheetReport {
      cpf: context.cpf_block.as_ref().map(|block| self.decode_cpf(block)),
      ..Default::default()
    };
    for block in &context.question_blocks {
      report.answers.extend(self.decode_questions(block));
    }
    debug!(
      "{}: CPF {:?}, {} 道题",
      context.name,
      report.cpf,
      report.answers.len()
    );
    report
  }
}
