// 该文件是 Gabarito （答题卡阅卷） 项目的一部分。
// src/model.rs - 检测模型适配
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

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::{LabelMap, StageSettings};
use crate::detection::Detection;
use crate::geometry::BoundingBox;
use crate::sheet::Sheet;
use crate::{FromUrl, FromUrlWithScheme};

pub trait Model {
  type Error;

  fn infer(&self, sheet: &Sheet) -> Result<DetectResult, Self::Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: u32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，归一化坐标
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("模型推理失败: {0}")]
  Inference(Box<dyn std::error::Error + Send + Sync>),
  #[error("{sheet}: 类别编号 {class_id} 不在标签表中")]
  UnknownLabel { sheet: String, class_id: u32 },
}

/// 在图像上执行推理，按标签表转换类别并保留分数高于阈值的结果
pub fn make_detections<M>(
  model: &M,
  sheet: &Sheet,
  settings: &StageSettings,
) -> Result<Vec<Detection>, DetectError>
where
  M: Model,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  let now = std::time::Instant::now();
  let result = model
    .infer(sheet)
    .map_err(|e| DetectError::Inference(Box::new(e)))?;
  debug!(
    "{}: 推理完成，耗时 {:.2?}，共 {} 个结果",
    sheet.name(),
    now.elapsed(),
    result.items.len()
  );

  let mut detections = Vec::with_capacity(result.items.len());
  for item in result.items.iter() {
    if item.score <= settings.score_threshold {
      continue;
    }
    let class_name =
      settings
        .labels
        .name(item.class_id)
        .ok_or_else(|| DetectError::UnknownLabel {
          sheet: sheet.name().to_string(),
          class_id: item.class_id,
        })?;
    detections.push(Detection::new(
      BoundingBox::from_array(item.bbox),
      item.class_id,
      class_name,
      item.score,
      sheet.width(),
      sheet.height(),
    ));
  }
  Ok(detections)
}

mod recorded;
pub use self::recorded::{RecordedModel, RecordedModelError};

#[cfg(feature = "model_yolo26")]
mod yolo26;
#[cfg(feature = "model_yolo26")]
pub use self::yolo26::{Yolo26, Yolo26Builder, Yolo26Error};

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("回放模型错误: {0}")]
  RecordedModelError(#[from] RecordedModelError),
  #[cfg(feature = "model_yolo26")]
  #[error("YOLO26 模型错误: {0}")]
  Yolo26Error(#[from] Yolo26Error),
  #[error("不支持的模型 URI 方案: {0}")]
  SchemeMismatch(String),
}

pub enum ModelWrapper {
  Recorded(RecordedModel),
  #[cfg(feature = "model_yolo26")]
  Yolo26(Yolo26),
}

impl ModelWrapper {
  /// 回放模型需要标签表把类别名称换回编号
  pub fn with_labels(self, labels: &LabelMap) -> Self {
    match self {
      ModelWrapper::Recorded(model) => ModelWrapper::Recorded(model.with_labels(labels.clone())),
      #[cfg(feature = "model_yolo26")]
      other => other,
    }
  }
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      RecordedModel::SCHEME => Ok(ModelWrapper::Recorded(RecordedModel::from_url(url)?)),
      #[cfg(feature = "model_yolo26")]
      Yolo26Builder::SCHEME => Ok(ModelWrapper::Yolo26(
        Yolo26Builder::from_url(url)?.build()?,
      )),
      other => Err(ModelError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Model for ModelWrapper {
  type Error = ModelError;

  fn infer(&self, sheet: &Sheet) -> Result<DetectResult, Self::Error> {
    match self {
      ModelWrapper::Recorded(model) => model.infer(sheet).map_err(ModelError::from),
      #[cfg(feature = "model_yolo26")]
      ModelWrapper::Yolo26(model) => model.infer(sheet).map_err(ModelError::from),
    }
  }
}
