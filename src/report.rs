// 该文件是 Gabarito （答题卡阅卷） 项目的一部分。
// src/report.rs - 单张与汇总阅卷报告
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

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::builder::{AnswerDecoder, BuilderContext};
use crate::check::{FailureKind, Stage, ValidationFailure};
use crate::config::{ErrorCorrection, ExamType, LabelMap, RunConfig};
use crate::sheet::SheetDump;

pub const NOT_DETECTED: &str = "NAO DETECTADO";
pub const SCAN_STATUS_FILE: &str = "scan_status.json";
pub const FINAL_REPORT_FILE: &str = "final_report.json";

#[derive(Error, Debug)]
pub enum ReportError {
  #[error("无法访问 {path}: {source}")]
  IoError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("无法解析 {path}: {source}")]
  ParseError {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
  #[error("无法写入 {path}: {source}")]
  SerializeError {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
  #[error("{crop}: 类别 {class_name} 不在标签表中")]
  UnknownClass { crop: String, class_name: String },
  #[error("{0}: 没有找到 CPF 区域")]
  MissingCpfBlock(String),
}

/// 一道题的作答
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
  Letter(char),
  NotDetected,
}

impl fmt::Display for Answer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Answer::Letter(letter) => write!(f, "{letter}"),
      Answer::NotDetected => f.write_str(NOT_DETECTED),
    }
  }
}

impl Serialize for Answer {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(self)
  }
}

/// 一张答题卡的解码结果，序列化为 `{"cpf": ..., "1": "A", ...}`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetReport {
  pub cpf: Option<String>,
  pub answers: BTreeMap<u32, Answer>,
}

impl SheetReport {
  pub fn answer(&self, question: u32) -> Option<Answer> {
    self.answers.get(&question).copied()
  }
}

impl Serialize for SheetReport {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let len = self.answers.len() + usize::from(self.cpf.is_some());
    let mut map = serializer.serialize_map(Some(len))?;
    if let Some(cpf) = &self.cpf {
      map.serialize_entry("cpf", cpf)?;
    }
    for (question, answer) in &self.answers {
      map.serialize_entry(&question.to_string(), answer)?;
    }
    map.end()
  }
}

/// 汇总报告中一张答题卡的条目
#[derive(Debug, Clone, PartialEq)]
pub enum SheetOutcome {
  Decoded(SheetReport),
  Failed {
    stage: Option<Stage>,
    check: Option<String>,
    kind: Option<FailureKind>,
    message: String,
  },
}

impl SheetOutcome {
  pub fn failed(message: impl Into<String>) -> Self {
    SheetOutcome::Failed {
      stage: None,
      check: None,
      kind: None,
      message: message.into(),
    }
  }

  pub fn is_failed(&self) -> bool {
    matches!(self, SheetOutcome::Failed { .. })
  }
}

impl From<&ValidationFailure> for SheetOutcome {
  fn from(failure: &ValidationFailure) -> Self {
    SheetOutcome::Failed {
      stage: Some(failure.stage),
      check: Some(failure.check.clone()),
      kind: Some(failure.kind),
      message: failure.to_string(),
    }
  }
}

impl Serialize for SheetOutcome {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    match self {
      SheetOutcome::Decoded(report) => report.serialize(serializer),
      SheetOutcome::Failed {
        stage,
        check,
        kind,
        message,
      } => {
        let mut map = serializer.serialize_map(Some(5))?;
        map.serialize_entry("status", "failed")?;
        map.serialize_entry("stage", stage)?;
        map.serialize_entry("check", check)?;
        map.serialize_entry("kind", kind)?;
        map.serialize_entry("message", message)?;
        map.end()
      }
    }
  }
}

/// 汇总报告的 `"config"` 条目：完整的运行配置与报告自身的选项
#[derive(Debug, Clone, Serialize)]
pub struct ReportConfig {
  #[serde(flatten)]
  pub run: RunConfig,
  pub error_correction: Option<ErrorCorrection>,
  pub failed_too: bool,
  pub datetime: String,
}

impl ReportConfig {
  pub fn new(exam: ExamType) -> Self {
    Self::from(&RunConfig {
      exam,
      ..RunConfig::default()
    })
  }
}

impl From<&RunConfig> for ReportConfig {
  fn from(config: &RunConfig) -> Self {
    Self {
      run: config.clone(),
      error_correction: None,
      failed_too: false,
      datetime: chrono::Local::now()
        .format("%Y-%m-%d %H:%M:%S")
        .to_string(),
    }
  }
}

#[derive(Debug, Clone)]
pub struct BatchReport {
  pub config: ReportConfig,
  pub sheets: BTreeMap<String, SheetOutcome>,
}

impl BatchReport {
  pub fn new(config: ReportConfig) -> Self {
    Self {
      config,
      sheets: BTreeMap::new(),
    }
  }

  /// 同名条目会被替换，返回被替换的结果
  pub fn insert(&mut self, name: impl Into<String>, outcome: SheetOutcome) -> Option<SheetOutcome> {
    let name = name.into();
    let replaced = self.sheets.insert(name.clone(), outcome);
    if replaced.is_some() {
      warn!("{} 重名，之前的结果被覆盖", name);
    }
    replaced
  }

  pub fn write(&self, path: &Path) -> Result<(), ReportError> {
    write_json(path, self)
  }
}

impl Serialize for BatchReport {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.sheets.len() + 1))?;
    map.serialize_entry("config", &self.config)?;
    for (name, outcome) in &self.sheets {
      map.serialize_entry(name, outcome)?;
    }
    map.end()
  }
}

/// 扫描结束时记录的成功与失败名单
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStatus {
  pub success: Vec<String>,
  pub failed: Vec<String>,
}

impl ScanStatus {
  pub fn load(path: &Path) -> Result<Self, ReportError> {
    read_json(path)
  }

  pub fn write(&self, path: &Path) -> Result<(), ReportError> {
    write_json(path, self)
  }
}

pub fn dump_path(dir: &Path, stem: &str) -> PathBuf {
  dir.join(stem).join(format!("{stem}.json"))
}

pub fn load_dump(path: &Path) -> Result<SheetDump, ReportError> {
  read_json(path)
}

pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ReportError> {
  let file = File::open(path).map_err(|source| ReportError::IoError {
    path: path.to_path_buf(),
    source,
  })?;
  serde_json::from_reader(BufReader::new(file)).map_err(|source| ReportError::ParseError {
    path: path.to_path_buf(),
    source,
  })
}

pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), ReportError> {
  let file = File::create(path).map_err(|source| ReportError::IoError {
    path: path.to_path_buf(),
    source,
  })?;
  let mut writer = BufWriter::new(file);
  serde_json::to_writer_pretty(&mut writer, value).map_err(|source| {
    ReportError::SerializeError {
      path: path.to_path_buf(),
      source,
    }
  })?;
  writer.flush().map_err(|source| ReportError::IoError {
    path: path.to_path_buf(),
    source,
  })
}

/// 从扫描输出目录中的转储重新解码，生成汇总报告
pub struct DumpReportBuilder<'a> {
  pub labels: &'a LabelMap,
  pub decoder: &'a dyn AnswerDecoder,
  /// 用于失败答题卡的解码器，未设置时与 `decoder` 相同
  pub failed_decoder: Option<&'a dyn AnswerDecoder>,
  pub failed_too: bool,
  pub continue_on_fail: bool,
}

impl DumpReportBuilder<'_> {
  fn decode_one(
    &self,
    input: &Path,
    stem: &str,
    decoder: &dyn AnswerDecoder,
  ) -> Result<SheetReport, ReportError> {
    let dump = load_dump(&dump_path(input, stem))?;
    let context = BuilderContext::from_dump(stem, &dump, self.labels)?;
    if context.cpf_block.is_none() {
      if !self.continue_on_fail {
        return Err(ReportError::MissingCpfBlock(stem.to_string()));
      }
      warn!("{}: 没有找到 CPF 区域，仅解码题目", stem);
    }
    Ok(decoder.decode(&context))
  }

  fn add(
    &self,
    report: &mut BatchReport,
    input: &Path,
    stem: &str,
    decoder: &dyn AnswerDecoder,
  ) -> Result<(), ReportError> {
    match self.decode_one(input, stem, decoder) {
      Ok(sheet) => {
        info!("{} 已加入报告", stem);
        report.insert(stem, SheetOutcome::Decoded(sheet));
      }
      Err(e) if self.continue_on_fail => {
        error!("{} 解码失败: {}", stem, e);
        report.insert(stem, SheetOutcome::failed(e.to_string()));
      }
      Err(e) => return Err(e),
    }
    Ok(())
  }

  pub fn build(&self, input: &Path, config: ReportConfig) -> Result<BatchReport, ReportError> {
    let status = ScanStatus::load(&input.join(SCAN_STATUS_FILE))?;
    info!(
      "扫描结果: {} 张成功, {} 张失败",
      status.success.len(),
      status.failed.len()
    );

    let mut report = BatchReport::new(config);
    for stem in &status.success {
      self.add(&mut report, input, stem, self.decoder)?;
    }
    if self.failed_too {
      let decoder = self.failed_decoder.unwrap_or(self.decoder);
      for stem in &status.failed {
        self.add(&mut report, input, stem, decoder)?;
      }
    }
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn sheet_report_is_a_flat_map() {
    let report = SheetReport {
      cpf: Some("0123456789X".into()),
      answers: BTreeMap::from([(1, Answer::Letter('C')), (2, Answer::NotDetected)]),
    };
    assert_eq!(
      serde_json::to_value(&report).unwrap(),
      json!({"cpf": "0123456789X", "1": "C", "2": "NAO DETECTADO"})
    );
  }

  #[test]
  fn batch_report_puts_config_first() {
    let mut report = BatchReport::new(ReportConfig::new(ExamType::Ps));
    report.insert(
      "a",
      SheetOutcome::Failed {
        stage: Some(Stage::First),
        check: Some("cpf_block_count".into()),
        kind: Some(FailureKind::Structural),
        message: "boom".into(),
      },
    );
    let text = serde_json::to_string(&report).unwrap();
    assert!(text.starts_with(r#"{"config":{"exam":"ps""#));
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(
      value["a"],
      json!({
        "status": "failed",
        "stage": 1,
        "check": "cpf_block_count",
        "kind": "structural",
        "message": "boom"
      })
    );
    assert_eq!(
      value["config"]["first"],
      json!({"labels": ["cpf_block", "questions_block"], "score_threshold": 0.5})
    );
    assert_eq!(value["config"]["jobs"], 1);
    assert_eq!(value["config"]["error_correction"], serde_json::Value::Null);
  }

  #[test]
  fn colliding_names_replace_the_earlier_entry() {
    let mut report = BatchReport::new(ReportConfig::new(ExamType::Ps));
    assert!(report.insert("scan", SheetOutcome::failed("first")).is_none());
    let replaced = report.insert("scan", SheetOutcome::failed("second"));
    assert_eq!(replaced, Some(SheetOutcome::failed("first")));
    assert_eq!(report.sheets.len(), 1);
  }

  #[test]
  fn scan_status_round_trips_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(SCAN_STATUS_FILE);
    let status = ScanStatus {
      success: vec!["a".into()],
      failed: vec!["b".into()],
    };
    status.write(&path).unwrap();
    assert_eq!(ScanStatus::load(&path).unwrap(), status);
    assert!(matches!(
      ScanStatus::load(&dir.path().join("missing.json")),
      Err(ReportError::IoError { .. })
    ));
  }
}
