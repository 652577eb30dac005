// 该文件是 Gabarito （答题卡阅卷） 项目的一部分。
// src/check/rules.rs - 各桶的检查规则与规则表
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

use crate::check::predicate::{self, Outcome};
use crate::check::{Bucket, CheckContext, CheckError, FailureKind, Stage};
use crate::cluster::{Axis, chunk_by_size};
use crate::config::{AnchoredBlock, AspectRange, BoundedMarks, ExamLayout};
use crate::detection::Detection;
use crate::geometry::{BoundingBox, Point};
use crate::sheet::{BlockKind, Sheet};

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
  Count {
    expected: usize,
  },
  /// 该桶不应有任何检测
  Absent,
  CenterNear {
    center: Point,
    radius: f32,
  },
  CenterNearAny {
    centers: Vec<Point>,
    radius: f32,
  },
  AspectRatio(AspectRange),
  InsideBox(BoundingBox),
  HorizontallyAligned {
    tolerance: f32,
  },
  VerticallyAligned {
    tolerance: f32,
  },
  /// 使用预计算的行：每行水平对齐，各列垂直对齐
  GridAligned {
    tolerance: f32,
  },
  /// 每条题目线上应有的选中、未选中标记和题号数量
  LineClusters {
    selected: usize,
    unselected: usize,
    numbers: usize,
  },
}

/// 一个已命名的检查结果
#[derive(Debug, Clone)]
pub struct Evaluation {
  pub check: String,
  pub kind: FailureKind,
  pub outcome: Outcome,
}

impl Evaluation {
  fn new(check: impl Into<String>, kind: FailureKind, outcome: Outcome) -> Self {
    Self {
      check: check.into(),
      kind,
      outcome,
    }
  }
}

impl Rule {
  /// 清理阶段只执行逐个检测的规则
  pub fn cleanable(&self) -> bool {
    matches!(
      self,
      Rule::Absent
        | Rule::CenterNear { .. }
        | Rule::CenterNearAny { .. }
        | Rule::AspectRatio(_)
        | Rule::InsideBox(_)
    )
  }

  pub fn evaluate(&self, bucket: Bucket, ctx: &CheckContext) -> Vec<Evaluation> {
    let detections = &ctx.bucket(bucket).detections;
    let name = bucket.name();
    match self {
      Rule::Count { expected } => vec![Evaluation::new(
        format!("{name}_count"),
        FailureKind::Structural,
        predicate::count(detections, *expected, name),
      )],
      Rule::Absent => vec![Evaluation::new(
        format!("{name}_absent"),
        FailureKind::Structural,
        predicate::each(detections, "无检测", |_| false),
      )],
      Rule::CenterNear { center, radius } => vec![Evaluation::new(
        format!("{name}_center_is_near"),
        FailureKind::Geometric,
        predicate::each(
          detections,
          format!("距 ({:.4}, {:.4}) 不超过 {radius}", center.x, center.y),
          |d| predicate::center_is_near(d, *center, *radius),
        ),
      )],
      Rule::CenterNearAny { centers, radius } => vec![Evaluation::new(
        format!("{name}_center_is_near"),
        FailureKind::Geometric,
        predicate::each(
          detections,
          format!("距 {} 个参考点之一不超过 {radius}", centers.len()),
          |d| predicate::center_is_near_any(d, centers, *radius),
        ),
      )],
      Rule::AspectRatio(range) => vec![Evaluation::new(
        format!("{name}_aspect_ratio"),
        FailureKind::Geometric,
        predicate::each(
          detections,
          format!("高宽比 {} ± {}", range.expected, range.tolerance),
          |d| predicate::aspect_ratio(d, *range),
        ),
      )],
      Rule::InsideBox(bbox) => vec![Evaluation::new(
        format!("{name}_inside_box"),
        FailureKind::Geometric,
        predicate::each(detections, format!("中心在 {:?} 内", bbox.to_array()), |d| {
          predicate::inside_box(d, bbox)
        }),
      )],
      Rule::HorizontallyAligned { tolerance } => vec![Evaluation::new(
        format!("{name}_horizontally_aligned"),
        FailureKind::Geometric,
        predicate::horizontally_aligned(detections, *tolerance),
      )],
      Rule::VerticallyAligned { tolerance } => vec![Evaluation::new(
        format!("{name}_vertically_aligned"),
        FailureKind::Geometric,
        predicate::vertically_aligned(detections, *tolerance),
      )],
      Rule::GridAligned { tolerance } => grid_aligned(&ctx.bucket(bucket).rows, *tolerance),
      Rule::LineClusters {
        selected,
        unselected,
        numbers,
      } => line_clusters(ctx, *selected, *unselected, *numbers),
    }
  }
}

fn row_name(index: usize, rows: usize) -> String {
  match index {
    0 => "upper_row".to_string(),
    i if i + 1 == rows => "lower_row".to_string(),
    i => format!("row_{i}"),
  }
}

fn grid_aligned(rows: &[Vec<Detection>], tolerance: f32) -> Vec<Evaluation> {
  let mut evaluations: Vec<Evaluation> = rows
    .iter()
    .enumerate()
    .map(|(i, row)| {
      Evaluation::new(
        format!("{}_horizontally_aligned", row_name(i, rows.len())),
        FailureKind::Geometric,
        predicate::horizontally_aligned(row, tolerance),
      )
    })
    .collect();

  let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
  for column in 0..columns {
    let members: Vec<Detection> = rows.iter().filter_map(|row| row.get(column).cloned()).collect();
    evaluations.push(Evaluation::new(
      format!("column_{column}_vertically_aligned"),
      FailureKind::Geometric,
      predicate::vertically_aligned(&members, tolerance),
    ));
  }
  evaluations
}

fn line_clusters(
  ctx: &CheckContext,
  selected: usize,
  unselected: usize,
  numbers: usize,
) -> Vec<Evaluation> {
  let mut lines: Vec<&Detection> = ctx.bucket(Bucket::QuestionLine).detections.iter().collect();
  lines.sort_by(|a, b| a.center().y.total_cmp(&b.center().y));

  let groups = [
    (Bucket::SelectedBall, selected),
    (Bucket::UnselectedBall, unselected),
    (Bucket::QuestionNumber, numbers),
  ]
  .map(|(bucket, per_line)| {
    (
      bucket,
      chunk_by_size(&ctx.bucket(bucket).detections, Axis::Y, per_line),
    )
  });

  let mismatched: Vec<String> = groups
    .iter()
    .filter(|(_, chunks)| chunks.len() != lines.len())
    .map(|(bucket, chunks)| format!("{} {} 组", bucket, chunks.len()))
    .collect();
  let expected = format!("每类 {} 组", lines.len());
  let clusters = if mismatched.is_empty() {
    Outcome::pass(expected, "一致")
  } else {
    Outcome::fail(expected, mismatched.join(", "))
  };

  let mut offenders = Vec::new();
  for (_, chunks) in &groups {
    for (line, chunk) in lines.iter().zip(chunks) {
      offenders.extend(
        chunk
          .iter()
          .filter(|member| !predicate::contains(line, member))
          .cloned(),
      );
    }
  }
  let contains = Outcome {
    passed: offenders.is_empty(),
    expected: "每组标记都在对应题目线内".to_string(),
    actual: format!("{} 个标记在线外", offenders.len()),
    offenders,
  };

  vec![
    Evaluation::new("question_line_clusters", FailureKind::Structural, clusters),
    Evaluation::new("question_line_contains", FailureKind::Geometric, contains),
  ]
}

/// 检查前的预计算步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precompute {
  Rows { row_len: usize },
}

/// 一个桶的检查器定义
#[derive(Debug, Clone, PartialEq)]
pub struct CheckerDef {
  pub bucket: Bucket,
  pub precompute: Option<Precompute>,
  pub rules: Vec<Rule>,
}

impl CheckerDef {
  pub fn new(bucket: Bucket, rules: Vec<Rule>) -> Self {
    Self {
      bucket,
      precompute: None,
      rules,
    }
  }

  pub fn with_precompute(mut self, precompute: Precompute) -> Self {
    self.precompute = Some(precompute);
    self
  }

  fn absent(bucket: Bucket) -> Self {
    Self::new(bucket, vec![Rule::Absent])
  }

  fn anchored(bucket: Bucket, block: &AnchoredBlock) -> Self {
    let position = match block.centers.as_slice() {
      [center] => Rule::CenterNear {
        center: *center,
        radius: block.radius,
      },
      centers => Rule::CenterNearAny {
        centers: centers.to_vec(),
        radius: block.radius,
      },
    };
    Self::new(
      bucket,
      vec![
        Rule::Count {
          expected: block.count,
        },
        position,
        Rule::AspectRatio(block.aspect),
      ],
    )
  }

  fn bounded(bucket: Bucket, marks: &BoundedMarks) -> Self {
    let mut rules = vec![
      Rule::Count {
        expected: marks.count,
      },
      Rule::InsideBox(marks.bounds),
      Rule::AspectRatio(marks.aspect),
    ];
    if let Some(tolerance) = marks.horizontal_alignment {
      rules.push(Rule::HorizontallyAligned { tolerance });
    }
    if let Some(tolerance) = marks.vertical_alignment {
      rules.push(Rule::VerticallyAligned { tolerance });
    }
    Self::new(bucket, rules)
  }
}

/// 启动时根据版面构建的全部检查器
#[derive(Debug, Clone)]
pub struct CheckRegistry {
  first: Vec<CheckerDef>,
  cpf_crop: Vec<CheckerDef>,
  questions_crop: Vec<CheckerDef>,
}

impl CheckRegistry {
  pub fn from_layout(layout: &ExamLayout) -> Self {
    let stage = &layout.first_stage;
    let first = vec![
      CheckerDef::anchored(Bucket::CpfBlock, &stage.cpf_block),
      {
        let mut def = CheckerDef::anchored(Bucket::QuestionsBlock, &stage.questions_block)
          .with_precompute(Precompute::Rows {
            row_len: stage.row_len,
          });
        def.rules.push(Rule::GridAligned {
          tolerance: stage.alignment_tolerance,
        });
        def
      },
    ];

    let cpf = &layout.cpf_crop;
    let cpf_crop = vec![
      CheckerDef::bounded(Bucket::CpfColumn, &cpf.cpf_column),
      CheckerDef::bounded(Bucket::SelectedBall, &cpf.selected_ball),
      CheckerDef::bounded(Bucket::UnselectedBall, &cpf.unselected_ball),
      CheckerDef::absent(Bucket::QuestionLine),
      CheckerDef::absent(Bucket::QuestionNumber),
    ];

    let questions = &layout.questions_crop;
    let mut question_line = CheckerDef::bounded(Bucket::QuestionLine, &questions.question_line);
    question_line.rules.push(Rule::LineClusters {
      selected: 1,
      unselected: layout.unselected_per_line(),
      numbers: 1,
    });
    let questions_crop = vec![
      question_line,
      CheckerDef::bounded(Bucket::QuestionNumber, &questions.question_number),
      CheckerDef::bounded(Bucket::SelectedBall, &questions.selected_ball),
      CheckerDef::bounded(Bucket::UnselectedBall, &questions.unselected_ball),
      CheckerDef::absent(Bucket::CpfColumn),
    ];

    Self {
      first,
      cpf_crop,
      questions_crop,
    }
  }

  /// 第二阶段按图像的裁剪来源选择检查器
  pub fn select(&self, stage: Stage, sheet: &Sheet) -> Result<&[CheckerDef], CheckError> {
    match (stage, sheet.cropped_by()) {
      (Stage::First, _) => Ok(&self.first),
      (Stage::Second, Some(BlockKind::Cpf)) => Ok(&self.cpf_crop),
      (Stage::Second, Some(BlockKind::Questions)) => Ok(&self.questions_crop),
      (Stage::Second, None) => Err(CheckError::MissingCropTag(sheet.name().to_string())),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn detection(class_name: &str, bbox: [f32; 4]) -> Detection {
    Detection::new(BoundingBox::from_array(bbox), 0, class_name, 0.9, 100, 100)
  }

  #[test]
  fn second_stage_rules_follow_crop_tag() {
    let registry = CheckRegistry::from_layout(&ExamLayout::ps());
    let untagged = Sheet::blank("crop.jpg", 10, 10);
    assert!(matches!(
      registry.select(Stage::Second, &untagged),
      Err(CheckError::MissingCropTag(_))
    ));

    let cpf = Sheet::blank("crop.jpg", 10, 10).with_cropped_by(BlockKind::Cpf);
    let defs = registry.select(Stage::Second, &cpf).unwrap();
    let unselected = defs
      .iter()
      .find(|def| def.bucket == Bucket::UnselectedBall)
      .unwrap();
    assert_eq!(unselected.rules[0], Rule::Count { expected: 99 });

    let questions = Sheet::blank("crop.jpg", 10, 10).with_cropped_by(BlockKind::Questions);
    let defs = registry.select(Stage::Second, &questions).unwrap();
    let cpf_column = defs.iter().find(|def| def.bucket == Bucket::CpfColumn).unwrap();
    assert_eq!(cpf_column.rules, vec![Rule::Absent]);
  }

  #[test]
  fn cleanable_rules_are_per_detection() {
    assert!(Rule::Absent.cleanable());
    assert!(Rule::InsideBox(BoundingBox::default()).cleanable());
    assert!(!Rule::Count { expected: 1 }.cleanable());
    assert!(!Rule::GridAligned { tolerance: 0.1 }.cleanable());
  }

  #[test]
  fn grid_names_rows_and_columns() {
    let rows = vec![
      vec![
        detection("questions_block", [0.1, 0.4, 0.3, 0.6]),
        detection("questions_block", [0.4, 0.4, 0.6, 0.6]),
      ],
      vec![
        detection("questions_block", [0.1, 0.7, 0.3, 0.9]),
        detection("questions_block", [0.45, 0.7, 0.65, 0.9]),
      ],
    ];
    let evaluations = grid_aligned(&rows, 0.01);
    let names: Vec<_> = evaluations.iter().map(|e| e.check.as_str()).collect();
    assert_eq!(
      names,
      [
        "upper_row_horizontally_aligned",
        "lower_row_horizontally_aligned",
        "column_0_vertically_aligned",
        "column_1_vertically_aligned"
      ]
    );
    let passed: Vec<_> = evaluations.iter().map(|e| e.outcome.passed).collect();
    assert_eq!(passed, [true, true, true, false]);
  }

  #[test]
  fn line_clusters_check_membership() {
    let mut sheet = Sheet::blank("q.jpg", 100, 100).with_cropped_by(BlockKind::Questions);
    let mut detections = Vec::new();
    for (row, y) in [0.3_f32, 0.6].into_iter().enumerate() {
      detections.push(detection("question_line", [0.1, y - 0.05, 0.95, y + 0.05]));
      detections.push(detection("question_number", [0.12, y - 0.02, 0.14, y + 0.02]));
      for choice in 0..5 {
        let x = 0.3 + 0.1 * choice as f32;
        let class_name = if choice == row {
          "selected_ball"
        } else {
          "unselected_ball"
        };
        detections.push(detection(class_name, [x - 0.02, y - 0.02, x + 0.02, y + 0.02]));
      }
    }
    sheet.set_detections(detections);

    let mut ctx = CheckContext::new();
    ctx.dispatch(&sheet, Stage::Second).unwrap();
    let rule = Rule::LineClusters {
      selected: 1,
      unselected: 4,
      numbers: 1,
    };
    let evaluations = rule.evaluate(Bucket::QuestionLine, &ctx);
    assert!(evaluations.iter().all(|e| e.outcome.passed));

    ctx.bucket_mut(Bucket::SelectedBall).detections.pop();
    let evaluations = rule.evaluate(Bucket::QuestionLine, &ctx);
    assert_eq!(evaluations[0].check, "question_line_clusters");
    assert!(!evaluations[0].outcome.passed);
  }
}
