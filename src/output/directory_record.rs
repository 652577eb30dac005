// 该文件是 Gabarito （答题卡阅卷） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::output::{OutputError, Render, create_dir, rendered};
use crate::report::{
  BatchReport, FINAL_REPORT_FILE, SCAN_STATUS_FILE, ScanStatus, dump_path, write_json,
};
use crate::sheet::{Sheet, SheetDump};
use crate::{FromUrl, FromUrlWithScheme};

/// 将每张答题卡的检测结果写入 `<目录>/<名称>/<名称>.json`，可选保存标注后的图像
#[derive(Debug)]
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  save_images: bool,
  /// 本次运行已写入的名称
  recorded: Mutex<BTreeSet<String>>,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = OutputError;

  /// `folder:///path/to/output?images`
  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch);
    }
    let save_images = uri.query_pairs().any(|(k, _)| k == "images");
    Self::new(uri.path()).map(|output| output.with_images(save_images))
  }
}

impl DirectoryRecordOutput {
  /// 目录不存在时创建
  pub fn new(directory: impl Into<PathBuf>) -> Result<Self, OutputError> {
    let directory = directory.into();
    create_dir(&directory)?;
    Ok(Self {
      directory,
      save_images: false,
      recorded: Mutex::new(BTreeSet::new()),
    })
  }

  pub fn with_images(mut self, save_images: bool) -> Self {
    self.save_images = save_images;
    self
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  pub fn write_status(&self, status: &ScanStatus) -> Result<(), OutputError> {
    let path = self.directory.join(SCAN_STATUS_FILE);
    status.write(&path)?;
    info!("扫描状态已保存: {}", path.display());
    Ok(())
  }

  pub fn write_report(&self, report: &BatchReport) -> Result<(), OutputError> {
    let path = self.directory.join(FINAL_REPORT_FILE);
    report.write(&path)?;
    info!("报告已保存: {}", path.display());
    Ok(())
  }

  /// 记录名称，本次运行中已写过时返回 `false`
  fn claim(&self, stem: &str) -> bool {
    self
      .recorded
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(stem.to_string())
  }

  fn save_image(&self, dir: &Path, sheet: &Sheet) -> Result<(), OutputError> {
    let path = dir.join(sheet.name());
    debug!("保存图像 {}", path.display());
    rendered(sheet).save(&path)?;
    Ok(())
  }
}

/// 主图像与其裁剪区域
impl Render<Sheet, [Sheet]> for DirectoryRecordOutput {
  type Error = OutputError;

  fn render_result(&self, frame: &Sheet, crops: &[Sheet]) -> Result<(), Self::Error> {
    if !self.claim(frame.stem()) {
      warn!("{}: 同名转储已在本次运行中写入，将被覆盖", frame.name());
    }
    let dump_file = dump_path(&self.directory, frame.stem());
    let dir = self.directory.join(frame.stem());
    create_dir(&dir)?;

    let dump: SheetDump = crops
      .iter()
      .map(|crop| (crop.name().to_string(), crop.to_record()))
      .collect();
    write_json(&dump_file, &dump)?;
    info!("保存 {}: {}", frame.name(), dump_file.display());

    if self.save_images {
      self.save_image(&dir, frame)?;
      for crop in crops {
        self.save_image(&dir, crop)?;
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::report::load_dump;
  use crate::sheet::BlockKind;

  #[test]
  fn writes_dump_under_sheet_stem() {
    let dir = tempfile::tempdir().unwrap();
    let output = DirectoryRecordOutput::new(dir.path().join("out")).unwrap();
    let sheet = Sheet::blank("scan_01.jpg", 40, 40);
    let crops = vec![Sheet::blank("scan_01_cpf_block_00.jpg", 20, 10).with_cropped_by(BlockKind::Cpf)];

    output.render_result(&sheet, &crops).unwrap();

    let dump = load_dump(&dir.path().join("out/scan_01/scan_01.json")).unwrap();
    let record = &dump["scan_01_cpf_block_00.jpg"];
    assert_eq!((record.width, record.height), (20, 10));
    assert_eq!(record.cropped_by, Some(BlockKind::Cpf));
    assert!(!dir.path().join("out/scan_01/scan_01.jpg").exists());
  }

  #[test]
  fn repeated_stem_is_detected() {
    let dir = tempfile::tempdir().unwrap();
    let output = DirectoryRecordOutput::new(dir.path()).unwrap();
    let sheet = Sheet::blank("scan.png", 8, 8);
    output.render_result(&sheet, &[]).unwrap();
    assert!(!output.claim("scan"));
    assert!(output.claim("other"));
  }

  #[test]
  fn saves_images_when_asked() {
    let dir = tempfile::tempdir().unwrap();
    let url = url::Url::from_directory_path(dir.path()).unwrap();
    let url = url::Url::parse(&format!("folder://{}?images", url.path())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    let sheet = Sheet::blank("scan_02.png", 8, 8);

    output.render_result(&sheet, &[]).unwrap();
    assert!(dir.path().join("scan_02/scan_02.png").exists());
  }
}
