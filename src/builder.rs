// 该文件是 Gabarito （答题卡阅卷） 项目的一部分。
// src/builder.rs - 由第二阶段检测结果解码答案
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

use crate::config::{ConfigError, ExamLayout, ExamType, LabelMap};
use crate::detection::Detection;
use crate::report::{ReportError, SheetReport};
use crate::sheet::{BlockKind, CropRecord, Sheet, SheetDump};

/// 一个裁剪区域内的检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
  pub name: String,
  pub order: usize,
  pub detections: Vec<Detection>,
}

/// 解码一张答题卡所需的全部区域
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuilderContext {
  pub name: String,
  pub cpf_block: Option<Block>,
  pub question_blocks: Vec<Block>,
}

impl BuilderContext {
  /// 由内存中的裁剪图像构建，题目区域保持裁剪时的阅读顺序；
  /// 第一个 CPF 区域之后的区域都作为题目区域，与 [`BuilderContext::from_dump`] 一致
  pub fn from_crops(name: impl Into<String>, crops: &[Sheet]) -> Self {
    let mut context = Self {
      name: name.into(),
      ..Default::default()
    };
    for crop in crops {
      let block = |order| Block {
        name: crop.name().to_string(),
        order,
        detections: crop.detections().to_vec(),
      };
      match crop.cropped_by() {
        Some(BlockKind::Cpf) if context.cpf_block.is_none() => context.cpf_block = Some(block(0)),
        Some(_) => {
          let order = context.question_blocks.len();
          context.question_blocks.push(block(order));
        }
        None => debug!("{}: 忽略区域 {}", context.name, crop.name()),
      }
    }
    context
  }

  /// 由转储构建：带裁剪来源标记时按标记区分，否则名称中第一个含 "cpf" 的区域为 CPF 区域，
  /// 其余按名称顺序作为题目区域
  pub fn from_dump(
    name: impl Into<String>,
    dump: &SheetDump,
    labels: &LabelMap,
  ) -> Result<Self, ReportError> {
    let mut context = Self {
      name: name.into(),
      ..Default::default()
    };
    for (crop_name, record) in dump {
      let is_cpf = match record.cropped_by {
        Some(kind) => kind == BlockKind::Cpf,
        None => crop_name.to_lowercase().contains("cpf"),
      };
      if is_cpf && context.cpf_block.is_none() {
        context.cpf_block = Some(Block {
          name: crop_name.clone(),
          order: 0,
          detections: record_detections(crop_name, record, labels)?,
        });
        continue;
      }
      let order = context.question_blocks.len();
      context.question_blocks.push(Block {
        name: crop_name.clone(),
        order,
        detections: record_detections(crop_name, record, labels)?,
      });
    }
    Ok(context)
  }
}

fn record_detections(
  crop_name: &str,
  record: &CropRecord,
  labels: &LabelMap,
) -> Result<Vec<Detection>, ReportError> {
  record
    .detections
    .iter()
    .map(|detection| {
      let class_id =
        labels
          .id(&detection.class_name)
          .ok_or_else(|| ReportError::UnknownClass {
            crop: crop_name.to_string(),
            class_name: detection.class_name.clone(),
          })?;
      Ok(
        detection
          .clone()
          .into_detection(class_id, record.width, record.height),
      )
    })
    .collect()
}

pub trait AnswerDecoder {
  fn decode(&self, context: &BuilderContext) -> SheetReport;
}

/// CPF 的解码方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpfStrategy {
  /// 按列分组，选中标记在列中的位置即为数字
  Columns,
  /// 按行参考线确定选中标记所在的行
  RowReference,
}

mod ps;
pub use self::ps::PsDecoder;

/// 为试卷类型选择解码器
pub fn decoder_for(
  exam: ExamType,
  layout: &ExamLayout,
  strategy: CpfStrategy,
) -> Result<Box<dyn AnswerDecoder + Send + Sync>, ConfigError> {
  match exam {
    ExamType::Ps => Ok(Box::new(PsDecoder::new(layout.decoder.clone(), strategy))),
    other => Err(ConfigError::NotImplemented(other)),
  }
}
