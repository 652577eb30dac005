// 该文件是 Gabarito （答题卡阅卷） 项目的一部分。
// src/sheet.rs - 答题卡图像
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

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use image::{ImageReader, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::detection::{Detection, DetectionRecord, sort_reading_order};

pub const ACCEPTED_IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum SheetError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("输入路径无效: {0}")]
  InvalidInput(PathBuf),
}

/// 第一阶段检测出的大区域，第二阶段图像由它裁剪得到
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BlockKind {
  #[serde(rename = "cpf_block")]
  Cpf,
  #[serde(rename = "questions_block")]
  Questions,
}

impl BlockKind {
  pub fn class_name(&self) -> &'static str {
    match self {
      BlockKind::Cpf => "cpf_block",
      BlockKind::Questions => "questions_block",
    }
  }

  pub fn from_class_name(name: &str) -> Option<Self> {
    match name {
      "cpf_block" => Some(BlockKind::Cpf),
      "questions_block" => Some(BlockKind::Questions),
      _ => None,
    }
  }
}

impl fmt::Display for BlockKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.class_name())
  }
}

/// 一张答题卡或从答题卡上裁剪出的区域
#[derive(Debug, Clone)]
pub struct Sheet {
  name: String,
  image: RgbImage,
  detections: Vec<Detection>,
  cropped_by: Option<BlockKind>,
}

impl Sheet {
  pub fn new(name: impl Into<String>, image: RgbImage) -> Self {
    Self {
      name: name.into(),
      image,
      detections: Vec::new(),
      cropped_by: None,
    }
  }

  /// 空白图像，只保留尺寸，用于回放检测结果和测试
  pub fn blank(name: impl Into<String>, width: u32, height: u32) -> Self {
    Self::new(name, RgbImage::new(width, height))
  }

  pub fn open(path: &Path) -> Result<Self, SheetError> {
    let image = ImageReader::open(path)?.decode()?.to_rgb8();
    let name = path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .ok_or_else(|| SheetError::InvalidInput(path.to_path_buf()))?;
    debug!("加载图像 {}: {}x{}", name, image.width(), image.height());
    Ok(Self::new(name, image))
  }

  pub fn with_cropped_by(mut self, kind: BlockKind) -> Self {
    self.cropped_by = Some(kind);
    self
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// 去掉扩展名的名称
  pub fn stem(&self) -> &str {
    Path::new(&self.name)
      .file_stem()
      .and_then(|stem| stem.to_str())
      .unwrap_or(&self.name)
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn cropped_by(&self) -> Option<BlockKind> {
    self.cropped_by
  }

  pub fn detections(&self) -> &[Detection] {
    &self.detections
  }

  /// 替换检测结果：按阅读顺序排序并重新编号
  pub fn set_detections(&mut self, mut detections: Vec<Detection>) {
    sort_reading_order(&mut detections);
    self.detections = detections
      .into_iter()
      .enumerate()
      .map(|(order, detection)| detection.with_order(order))
      .collect();
  }

  /// 按序号删除检测结果，返回被删除的部分
  pub fn remove_detections(&mut self, orders: &BTreeSet<usize>) -> Vec<Detection> {
    let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.detections)
      .into_iter()
      .partition(|detection| orders.contains(&detection.order()));
    self.detections = kept;
    removed
  }

  /// 按第一阶段的检测结果裁剪出各个区域，名称为 `<stem>_<类别>_<NN>.jpg`
  pub fn crop_blocks(&self) -> Vec<Sheet> {
    let mut counters: BTreeMap<BlockKind, usize> = BTreeMap::new();
    let mut crops = Vec::new();

    for detection in &self.detections {
      let Some(kind) = BlockKind::from_class_name(detection.class_name()) else {
        warn!("{}: 跳过非区域类别 {}", self.name, detection);
        continue;
      };
      let counter = counters.entry(kind).or_insert(0);
      let name = format!("{}_{}_{:02}.jpg", self.stem(), kind, counter);
      if let Some(crop) = self.crop(detection, name) {
        *counter += 1;
        crops.push(crop.with_cropped_by(kind));
      }
    }

    crops
  }

  /// 裁剪出每个检测框，不限类别，命名方式同 [`Sheet::crop_blocks`]
  pub fn crop_detections(&self) -> Vec<Sheet> {
    let mut counters: BTreeMap<&str, usize> = BTreeMap::new();
    let mut crops = Vec::new();

    for detection in &self.detections {
      let counter = counters.entry(detection.class_name()).or_insert(0);
      let name = format!("{}_{}_{:02}.jpg", self.stem(), detection.class_name(), counter);
      if let Some(mut crop) = self.crop(detection, name) {
        *counter += 1;
        crop.cropped_by = BlockKind::from_class_name(detection.class_name());
        crops.push(crop);
      }
    }

    crops
  }

  fn crop(&self, detection: &Detection, name: String) -> Option<Sheet> {
    let (x, y, w, h) = detection.bbox().to_pixels(self.width(), self.height());
    if w == 0 || h == 0 {
      warn!("{}: 区域 {} 裁剪后为空", self.name, detection);
      return None;
    }
    let image = image::imageops::crop_imm(&self.image, x, y, w, h).to_image();
    debug!("裁剪 {}: ({}, {}) {}x{}", name, x, y, w, h);
    Some(Sheet::new(name, image))
  }

  pub fn to_record(&self) -> CropRecord {
    CropRecord {
      width: self.width(),
      height: self.height(),
      cropped_by: self.cropped_by,
      detections: self.detections.iter().map(DetectionRecord::from).collect(),
    }
  }
}

/// 一个裁剪区域在转储文件中的形式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropRecord {
  pub width: u32,
  pub height: u32,
  pub cropped_by: Option<BlockKind>,
  pub detections: Vec<DetectionRecord>,
}

/// 一张答题卡的转储：裁剪区域名称到其检测结果
pub type SheetDump = BTreeMap<String, CropRecord>;

/// 收集输入路径下的所有图像文件，结果按路径排序
pub fn collect_image_paths(input: &Path, recursive: bool) -> Result<Vec<PathBuf>, SheetError> {
  if input.is_file() {
    return if has_image_extension(input) {
      Ok(vec![input.to_path_buf()])
    } else {
      Err(SheetError::InvalidInput(input.to_path_buf()))
    };
  }
  if !input.is_dir() {
    return Err(SheetError::InvalidInput(input.to_path_buf()));
  }

  let mut paths = Vec::new();
  let mut pending = vec![input.to_path_buf()];
  while let Some(dir) = pending.pop() {
    for entry in std::fs::read_dir(&dir)? {
      let path = entry?.path();
      if path.is_dir() {
        if recursive {
          pending.push(path);
        }
      } else if has_image_extension(&path) {
        debug!("添加输入: {}", path.display());
        paths.push(path);
      }
    }
  }
  paths.sort();
  Ok(paths)
}

fn has_image_extension(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      let ext = ext.to_ascii_lowercase();
      ACCEPTED_IMAGE_EXTENSIONS.contains(&ext.as_str())
    })
    .unwrap_or(false)
}
