// 该文件是 Gabarito （答题卡阅卷） 项目的一部分。
// src/config.rs - 试卷类型、版面常量与运行配置
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
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::check::Stage;
use crate::geometry::{BoundingBox, Point};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("试卷类型 {0} 尚未实现")]
  NotImplemented(ExamType),
  #[error("无法读取版面文件 {path}: {source}")]
  LayoutIo {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("版面文件解析失败: {0}")]
  LayoutParse(#[from] toml::de::Error),
  #[error("版面常量无效: {0}")]
  InvalidLayout(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExamType {
  /// 入学考试答题卡
  Ps,
  Simufsc,
  Simuenem,
}

impl ExamType {
  pub fn as_str(&self) -> &'static str {
    match self {
      ExamType::Ps => "ps",
      ExamType::Simufsc => "simufsc",
      ExamType::Simuenem => "simuenem",
    }
  }

  /// 内置版面
  pub fn layout(&self) -> Result<ExamLayout, ConfigError> {
    match self {
      ExamType::Ps => Ok(ExamLayout::ps()),
      other => Err(ConfigError::NotImplemented(*other)),
    }
  }

  /// 内置版面，`path` 存在时用其中的段落覆盖
  pub fn resolve_layout(&self, path: Option<&Path>) -> Result<ExamLayout, ConfigError> {
    let builtin = self.layout()?;
    let layout = match path {
      Some(path) => {
        info!("从 {} 加载版面覆盖", path.display());
        ExamLayout::from_toml_file(path)?
      }
      None => builtin,
    };
    layout.validate()?;
    Ok(layout)
  }
}

impl fmt::Display for ExamType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCorrection {
  /// 对未通过校验的答题卡按行参考解码 CPF
  Cpf,
}

/// 期望的高宽比及允许偏差
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AspectRange {
  pub expected: f32,
  pub tolerance: f32,
}

impl AspectRange {
  pub const fn new(expected: f32, tolerance: f32) -> Self {
    Self {
      expected,
      tolerance,
    }
  }
}

/// 第一阶段的区域：数量、参考中心点与形状
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchoredBlock {
  pub count: usize,
  pub centers: Vec<Point>,
  /// 以图像高度为单位
  pub radius: f32,
  pub aspect: AspectRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirstStageLayout {
  pub cpf_block: AnchoredBlock,
  pub questions_block: AnchoredBlock,
  /// 每行题目区域的数量
  pub row_len: usize,
  pub alignment_tolerance: f32,
}

/// 第二阶段的标记：数量、所在区间、形状与可选的对齐要求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundedMarks {
  pub count: usize,
  pub bounds: BoundingBox,
  pub aspect: AspectRange,
  #[serde(default)]
  pub horizontal_alignment: Option<f32>,
  #[serde(default)]
  pub vertical_alignment: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpfCropLayout {
  pub cpf_column: BoundedMarks,
  pub selected_ball: BoundedMarks,
  pub unselected_ball: BoundedMarks,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionsCropLayout {
  pub question_line: BoundedMarks,
  pub question_number: BoundedMarks,
  pub selected_ball: BoundedMarks,
  pub unselected_ball: BoundedMarks,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoderLayout {
  pub cpf_digits: usize,
  pub digits_per_column: usize,
  pub lines_per_block: usize,
  pub choices: Vec<char>,
  pub cpf_column_gap: f32,
  pub line_gap: f32,
  pub cpf_row_gap: f32,
}

/// 某种试卷版面的全部几何常量
///
/// TOML 覆盖以段落为单位：文件中出现的段落整体替换内置值，缺失的段落保持内置值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExamLayout {
  pub first_stage: FirstStageLayout,
  pub cpf_crop: CpfCropLayout,
  pub questions_crop: QuestionsCropLayout,
  pub decoder: DecoderLayout,
}

impl Default for ExamLayout {
  fn default() -> Self {
    Self::ps()
  }
}

impl ExamLayout {
  pub fn ps() -> Self {
    let ball_aspect = AspectRange::new(1.0, 0.3);
    let cpf_bounds = BoundingBox::from_floats(0.135, 0.08, 0.96, 0.96);
    let questions_bounds = BoundingBox::from_floats(0.138, 0.17, 0.96, 0.96);
    let ball = |count, bounds| BoundedMarks {
      count,
      bounds,
      aspect: ball_aspect,
      horizontal_alignment: None,
      vertical_alignment: None,
    };

    Self {
      first_stage: FirstStageLayout {
        cpf_block: AnchoredBlock {
          count: 1,
          centers: vec![Point::new(0.3443, 0.3013)],
          radius: 0.05,
          aspect: AspectRange::new(0.5847, 0.1),
        },
        questions_block: AnchoredBlock {
          count: 6,
          centers: vec![
            Point::new(0.2101, 0.5249),
            Point::new(0.5, 0.5249),
            Point::new(0.7713, 0.5249),
            Point::new(0.2101, 0.7245),
            Point::new(0.5, 0.7245),
            Point::new(0.7713, 0.7245),
          ],
          radius: 0.05,
          aspect: AspectRange::new(1.1896, 0.15),
        },
        row_len: 3,
        alignment_tolerance: 0.01,
      },
      cpf_crop: CpfCropLayout {
        cpf_column: BoundedMarks {
          count: 11,
          bounds: BoundingBox::from_floats(0.1167, 0.4259, 0.9867, 0.5555),
          aspect: AspectRange::new(9.5, 0.2),
          horizontal_alignment: Some(0.15),
          vertical_alignment: None,
        },
        selected_ball: ball(11, cpf_bounds),
        unselected_ball: ball(99, cpf_bounds),
      },
      questions_crop: QuestionsCropLayout {
        question_line: BoundedMarks {
          count: 10,
          bounds: BoundingBox::from_floats(0.4, 0.17, 0.6, 0.96),
          aspect: AspectRange::new(0.09, 0.8),
          horizontal_alignment: None,
          vertical_alignment: Some(0.10),
        },
        question_number: BoundedMarks {
          count: 10,
          bounds: BoundingBox::from_floats(0.09, 0.17, 0.15, 0.96),
          aspect: AspectRange::new(0.574, 0.8),
          horizontal_alignment: None,
          vertical_alignment: Some(0.10),
        },
        selected_ball: ball(10, questions_bounds),
        unselected_ball: ball(40, questions_bounds),
      },
      decoder: DecoderLayout {
        cpf_digits: 11,
        digits_per_column: 10,
        lines_per_block: 10,
        choices: vec!['A', 'B', 'C', 'D', 'E'],
        cpf_column_gap: 0.02,
        line_gap: 0.05,
        cpf_row_gap: 0.05,
      },
    }
  }

  pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
    Ok(toml::from_str(text)?)
  }

  pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::LayoutIo {
      path: path.to_path_buf(),
      source,
    })?;
    Self::from_toml_str(&text)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    let questions = &self.first_stage.questions_block;
    if self.first_stage.row_len == 0 || questions.count % self.first_stage.row_len != 0 {
      return Err(ConfigError::InvalidLayout(format!(
        "题目区域数量 {} 不能按每行 {} 个分行",
        questions.count, self.first_stage.row_len
      )));
    }
    if questions.centers.len() != questions.count {
      return Err(ConfigError::InvalidLayout(format!(
        "题目区域参考点数量 {} 与期望数量 {} 不一致",
        questions.centers.len(),
        questions.count
      )));
    }
    if self.first_stage.cpf_block.centers.is_empty() {
      return Err(ConfigError::InvalidLayout("CPF 区域缺少参考点".into()));
    }
    if self.decoder.choices.is_empty() {
      return Err(ConfigError::InvalidLayout("选项列表为空".into()));
    }
    debug!("版面常量校验通过");
    Ok(())
  }

  /// 每道题的空白选项数量
  pub fn unselected_per_line(&self) -> usize {
    self.decoder.choices.len().saturating_sub(1)
  }
}

/// 模型类别编号到类别名称的映射
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelMap(Vec<String>);

impl LabelMap {
  pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
    Self(names.into_iter().map(Into::into).collect())
  }

  pub fn first_stage() -> Self {
    Self::new(["cpf_block", "questions_block"])
  }

  pub fn second_stage() -> Self {
    Self::new([
      "cpf_column",
      "question_line",
      "selected_ball",
      "unselected_ball",
      "question_number",
    ])
  }

  /// 该阶段的默认标签表
  pub fn for_stage(stage: Stage) -> Self {
    match stage {
      Stage::First => Self::first_stage(),
      Stage::Second => Self::second_stage(),
    }
  }

  pub fn name(&self, id: u32) -> Option<&str> {
    self.0.get(id as usize).map(String::as_str)
  }

  pub fn id(&self, name: &str) -> Option<u32> {
    self.0.iter().position(|n| n == name).map(|id| id as u32)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageSettings {
  pub labels: LabelMap,
  pub score_threshold: f32,
}

impl StageSettings {
  pub fn new(labels: LabelMap, score_threshold: f32) -> Self {
    Self {
      labels,
      score_threshold,
    }
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
  pub exam: ExamType,
  pub first: StageSettings,
  pub second: StageSettings,
  pub continue_on_fail: bool,
  pub filter_detections: bool,
  pub jobs: usize,
}

impl Default for RunConfig {
  fn default() -> Self {
    Self {
      exam: ExamType::Ps,
      first: StageSettings::new(LabelMap::first_stage(), 0.5),
      second: StageSettings::new(LabelMap::second_stage(), 0.5),
      continue_on_fail: false,
      filter_detections: false,
      jobs: 1,
    }
  }
}
