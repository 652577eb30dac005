// 该文件是 Gabarito （答题卡阅卷） 项目的一部分。
// src/model/recorded.rs - 回放已记录的检测结果
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

use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::LabelMap;
use crate::detection::DetectionRecord;
use crate::model::{DetectItem, DetectResult, Model};
use crate::sheet::Sheet;
use crate::{FromUrl, FromUrlWithScheme};

#[derive(Error, Debug)]
pub enum RecordedModelError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无法读取记录 {path}: {source}")]
  IoError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("记录格式错误 {path}: {source}")]
  ParseError {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
  #[error("记录中的类别 {0} 不在标签表中")]
  UnknownClass(String),
}

/// 从 `<dir>/<图像名称去掉扩展名>.json` 读取检测结果，
/// 文件内容为 [`DetectionRecord`] 数组
#[derive(Debug, Clone)]
pub struct RecordedModel {
  dir: PathBuf,
  labels: LabelMap,
}

impl RecordedModel {
  pub fn new(dir: impl Into<PathBuf>, labels: LabelMap) -> Self {
    Self {
      dir: dir.into(),
      labels,
    }
  }

  pub fn with_labels(mut self, labels: LabelMap) -> Self {
    self.labels = labels;
    self
  }

  pub fn record_path(&self, sheet: &Sheet) -> PathBuf {
    self.dir.join(format!("{}.json", sheet.stem()))
  }
}

impl FromUrlWithScheme for RecordedModel {
  const SCHEME: &'static str = "record";
}

impl FromUrl for RecordedModel {
  type Error = RecordedModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RecordedModelError::SchemeMismatch);
    }
    Ok(Self::new(url.path(), LabelMap::new(Vec::<String>::new())))
  }
}

impl Model for RecordedModel {
  type Error = RecordedModelError;

  fn infer(&self, sheet: &Sheet) -> Result<DetectResult, Self::Error> {
    let path = self.record_path(sheet);
    debug!("读取检测记录 {}", path.display());
    let text = std::fs::read_to_string(&path).map_err(|source| RecordedModelError::IoError {
      path: path.clone(),
      source,
    })?;
    let records: Vec<DetectionRecord> =
      serde_json::from_str(&text).map_err(|source| RecordedModelError::ParseError {
        path: path.clone(),
        source,
      })?;

    let items = records
      .into_iter()
      .map(|record| {
        let class_id = self
          .labels
          .id(&record.class_name)
          .ok_or_else(|| RecordedModelError::UnknownClass(record.class_name.clone()))?;
        Ok(DetectItem {
          class_id,
          score: record.score,
          bbox: record.bounding_box,
        })
      })
      .collect::<Result<Vec<_>, RecordedModelError>>()?;

    Ok(DetectResult {
      items: items.into_boxed_slice(),
    })
  }
}
