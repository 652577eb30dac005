// 该文件是 Gabarito （答题卡阅卷） 项目的一部分。
// tests/detect_stage.rs - 单阶段检测工具测试
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

mod common;

use std::path::{Path, PathBuf};
use std::process::Command;

use common::{SHEET_SIZE, SyntheticModel, write_blank_sheets};
use gabarito::FromUrl;
use gabarito::check::Stage;
use gabarito::config::{LabelMap, StageSettings};
use gabarito::detection::DetectionRecord;
use gabarito::model::{ModelWrapper, make_detections};
use gabarito::output::AnnotatedImageOutput;
use gabarito::sheet::Sheet;
use gabarito::task::{DetectTask, Task};

/// 把合成模型第一阶段的结果写成 `<records>/<stem>.json`
fn record_first_stage(records: &Path, stem: &str) {
  std::fs::create_dir_all(records).unwrap();
  let settings = StageSettings::new(LabelMap::for_stage(Stage::First), 0.5);
  let sheet = Sheet::blank(format!("{stem}.png"), SHEET_SIZE, SHEET_SIZE);
  let detections = make_detections(&SyntheticModel::default(), &sheet, &settings).unwrap();
  let records_json: Vec<DetectionRecord> = detections.iter().map(DetectionRecord::from).collect();
  std::fs::write(
    records.join(format!("{stem}.json")),
    serde_json::to_string(&records_json).unwrap(),
  )
  .unwrap();
}

fn record_url(dir: &Path) -> url::Url {
  url::Url::parse(&format!("record://{}", dir.display())).unwrap()
}

fn expected_crops(out: &Path, stem: &str) -> Vec<PathBuf> {
  let mut paths = vec![out.join(format!("{stem}_cpf_block_00.jpg"))];
  paths.extend((0..6).map(|n| out.join(format!("{stem}_questions_block_{n:02}.jpg"))));
  paths
}

#[test]
fn detect_task_replays_records_and_crops_objects() {
  let dir = tempfile::tempdir().unwrap();
  let inputs = write_blank_sheets(dir.path(), &["replay"]);
  let records = dir.path().join("records");
  record_first_stage(&records, "replay");

  let settings = StageSettings::new(LabelMap::for_stage(Stage::First), 0.5);
  let model = ModelWrapper::from_url(&record_url(&records))
    .unwrap()
    .with_labels(&settings.labels);
  let out = dir.path().join("out");
  let output = AnnotatedImageOutput::new(&out)
    .unwrap()
    .with_crops(out.join("cropped"))
    .unwrap();

  let total = DetectTask::new(&settings, true)
    .run_task(&inputs, model, &output)
    .unwrap();
  assert_eq!(total, 7);
  assert!(out.join("replay.png").exists());
  for path in expected_crops(&out.join("cropped"), "replay") {
    assert!(path.exists(), "{}", path.display());
  }

  // 输出目录本身可以再次作为回放模型
  let again = ModelWrapper::from_url(&record_url(&out))
    .unwrap()
    .with_labels(&settings.labels);
  let second = dir.path().join("again");
  let output = AnnotatedImageOutput::new(&second).unwrap();
  let total = DetectTask::new(&settings, false)
    .run_task(&inputs, again, &output)
    .unwrap();
  assert_eq!(total, 7);
  assert!(!second.join("cropped").exists());
}

#[test]
fn detect_task_without_records_fails() {
  let dir = tempfile::tempdir().unwrap();
  let inputs = write_blank_sheets(dir.path(), &["missing"]);
  let settings = StageSettings::new(LabelMap::for_stage(Stage::First), 0.5);
  let model = ModelWrapper::from_url(&record_url(&dir.path().join("records")))
    .unwrap()
    .with_labels(&settings.labels);
  let output = AnnotatedImageOutput::new(dir.path().join("out")).unwrap();
  assert!(DetectTask::new(&settings, false)
    .run_task(&inputs, model, &output)
    .is_err());
}

#[test]
fn detect_binary_runs_on_recorded_model() {
  let dir = tempfile::tempdir().unwrap();
  write_blank_sheets(dir.path(), &["cli"]);
  let records = dir.path().join("records");
  record_first_stage(&records, "cli");
  let out = dir.path().join("detected");

  let status = Command::new(env!("CARGO_BIN_EXE_detect"))
    .arg("--input")
    .arg(dir.path().join("cli.png"))
    .arg("--output")
    .arg(&out)
    .arg("--model")
    .arg(record_url(&records).as_str())
    .args(["--stage", "first", "--crop-objects", "--log-level", "warn"])
    .status()
    .unwrap();
  assert!(status.success());

  assert!(out.join("cli.png").exists());
  let text = std::fs::read_to_string(out.join("cli.json")).unwrap();
  let replayed: Vec<DetectionRecord> = serde_json::from_str(&text).unwrap();
  assert_eq!(replayed.len(), 7);
  for path in expected_crops(&out.join("cropped"), "cli") {
    assert!(path.exists(), "{}", path.display());
  }
}
