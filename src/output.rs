// 该文件是 Gabarito （答题卡阅卷） 项目的一部分。
// src/output.rs - 输出定义
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

use image::RgbImage;
use thiserror::Error;

use crate::report::ReportError;

pub trait Render<Frame, Output: ?Sized> {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

#[cfg(feature = "save_image_file")]
pub mod draw;

mod annotated_image;
pub use self::annotated_image::AnnotatedImageOutput;

mod directory_record;
pub use self::directory_record::DirectoryRecordOutput;

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无法创建目录 {path}: {source}")]
  IoError {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("图像保存错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("记录写入错误: {0}")]
  ReportError(#[from] ReportError),
}

pub(crate) fn create_dir(path: &Path) -> Result<(), OutputError> {
  std::fs::create_dir_all(path).map_err(|source| OutputError::IoError {
    path: path.to_path_buf(),
    source,
  })
}

/// 带检测框的图像，未启用绘制时为原图
#[cfg(feature = "save_image_file")]
pub(crate) fn rendered(sheet: &crate::sheet::Sheet) -> RgbImage {
  draw::annotate(sheet)
}

#[cfg(not(feature = "save_image_file"))]
pub(crate) fn rendered(sheet: &crate::sheet::Sheet) -> RgbImage {
  sheet.image().clone()
}
