// 该文件是 Gabarito （答题卡阅卷） 项目的一部分。
// src/output/annotated_image.rs - 单阶段检测的标注图像输出
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

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::detection::DetectionRecord;
use crate::output::{OutputError, Render, create_dir, rendered};
use crate::report::write_json;
use crate::sheet::Sheet;
use crate::{FromUrl, FromUrlWithScheme};

/// 保存标注后的图像 `<目录>/<名称>` 与检测记录 `<目录>/<stem>.json`，
/// 记录格式与 `record://` 回放模型读取的一致。
/// 设置了裁剪目录时，每个裁剪区域按原样保存到该目录
#[derive(Debug)]
pub struct AnnotatedImageOutput {
  directory: PathBuf,
  crop_directory: Option<PathBuf>,
}

impl FromUrlWithScheme for AnnotatedImageOutput {
  const SCHEME: &'static str = "annotated";
}

impl FromUrl for AnnotatedImageOutput {
  type Error = OutputError;

  /// `annotated:///path/to/output?crops=/path/to/cropped`
  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch);
    }
    let output = Self::new(uri.path())?;
    match uri.query_pairs().find(|(k, _)| k == "crops") {
      Some((_, dir)) => output.with_crops(dir.as_ref()),
      None => Ok(output),
    }
  }
}

impl AnnotatedImageOutput {
  pub fn new(directory: impl Into<PathBuf>) -> Result<Self, OutputError> {
    let directory = directory.into();
    create_dir(&directory)?;
    Ok(Self {
      directory,
      crop_directory: None,
    })
  }

  pub fn with_crops(mut self, directory: impl Into<PathBuf>) -> Result<Self, OutputError> {
    let directory = directory.into();
    create_dir(&directory)?;
    self.crop_directory = Some(directory);
    Ok(self)
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  pub fn crop_directory(&self) -> Option<&Path> {
    self.crop_directory.as_deref()
  }
}

impl Render<Sheet, [Sheet]> for AnnotatedImageOutput {
  type Error = OutputError;

  fn render_result(&self, frame: &Sheet, crops: &[Sheet]) -> Result<(), Self::Error> {
    let records: Vec<DetectionRecord> = frame.detections().iter().map(DetectionRecord::from).collect();
    let record_file = self.directory.join(format!("{}.json", frame.stem()));
    write_json(&record_file, &records)?;

    let image_file = self.directory.join(frame.name());
    rendered(frame).save(&image_file)?;
    info!(
      "保存 {}: {} 个检测结果 -> {}",
      frame.name(),
      records.len(),
      image_file.display()
    );

    if let Some(dir) = &self.crop_directory {
      for crop in crops {
        let path = dir.join(crop.name());
        debug!("保存裁剪 {}", path.display());
        crop.image().save(&path)?;
      }
    }
    Ok(())
  }
}
