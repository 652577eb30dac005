// 该文件是 Gabarito （答题卡阅卷） 项目的一部分。
// src/model/yolo26.rs - RKNN YOLO26 检测模型
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

use image::imageops::{self, FilterType};
use rknpu::{Context, InitFlags, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::model::{DetectItem, DetectResult, Model};
use crate::sheet::Sheet;
use crate::{FromUrl, FromUrlWithScheme};

const YOLO26_NUM_INPUTS: u32 = 1;
const YOLO26_NUM_OUTPUTS: u32 = 6;
const YOLO26_INPUT_SIZE: u32 = 640;
const YOLO26_HEAD_SIZES: [(usize, usize); 3] = [(80, 80), (40, 40), (20, 20)];
const YOLO26_STRIDES: [f32; 3] = [8.0, 16.0, 32.0];
/// 低于该分数的候选不进入结果，最终阈值由调用方决定
const YOLO26_CANDIDATE_THRESH: f32 = 0.25;
const YOLO26_DEFAULT_CLASSES: usize = 5;

#[derive(Error, Debug)]
pub enum Yolo26Error {
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型无效: {0}, 错误: {1}")]
  ModelInvalid(String, rknpu::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(#[from] rknpu::Error),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
}

impl Yolo26Error {
  fn invalid(msg: impl Into<String>, e: rknpu::Error) -> Self {
    Yolo26Error::ModelInvalid(msg.into(), e)
  }
}

pub struct Yolo26 {
  context: Context,
  classes: usize,
}

/// `yolo26:///path/to/model.rknn?classes=5`
pub struct Yolo26Builder {
  model_path: String,
  classes: usize,
  flags: InitFlags,
}

impl FromUrlWithScheme for Yolo26Builder {
  const SCHEME: &'static str = "yolo26";
}

impl FromUrl for Yolo26Builder {
  type Error = Yolo26Error;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(Yolo26Error::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let mut classes = YOLO26_DEFAULT_CLASSES;
    for (key, value) in url.query_pairs() {
      if key == "classes" {
        classes = value
          .parse()
          .map_err(|_| Yolo26Error::ModelPathError(format!("类别数量无效: {}", value)))?;
      }
    }

    Ok(Yolo26Builder {
      model_path: url.path().to_string(),
      classes,
      flags: InitFlags::default(),
    })
  }
}

impl Yolo26Builder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }

  pub fn classes(mut self, classes: usize) -> Self {
    self.classes = classes;
    self
  }

  pub fn build(self) -> Result<Yolo26, Yolo26Error> {
    info!("加载模型文件: {}", self.model_path);
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    let context = Context::new(&model_data, self.flags)?;
    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(Yolo26Error::invalid("无法查询 SDK 版本", e));
      }
    }

    let num_inputs = context
      .num_inputs()
      .map_err(|e| Yolo26Error::invalid("无法获取输入数量", e))?;
    let num_outputs = context
      .num_outputs()
      .map_err(|e| Yolo26Error::invalid("无法获取输出数量", e))?;
    if num_inputs != YOLO26_NUM_INPUTS || num_outputs != YOLO26_NUM_OUTPUTS {
      let msg = format!(
        "预期输入/输出数量为 {}/{}, 实际为 {}/{}",
        YOLO26_NUM_INPUTS, YOLO26_NUM_OUTPUTS, num_inputs, num_outputs
      );
      error!("{}", msg);
      return Err(Yolo26Error::invalid(msg, rknpu::Error::InvalidModel));
    }

    info!("模型加载完成，类别数量 {}", self.classes);
    Ok(Yolo26 {
      context,
      classes: self.classes,
    })
  }
}

/// 按张量大小区分回归输出与分类输出
fn match_reg_cls<'a>(
  first: &'a [f32],
  second: &'a [f32],
  reg_expected: usize,
  cls_expected: usize,
) -> Option<(&'a [f32], &'a [f32])> {
  if first.len() == reg_expected && second.len() == cls_expected {
    Some((first, second))
  } else if first.len() == cls_expected && second.len() == reg_expected {
    Some((second, first))
  } else {
    None
  }
}

fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

impl Yolo26 {
  fn postprocess(&self, output: rknpu::Output) -> DetectResult {
    let size = YOLO26_INPUT_SIZE as f32;
    let mut items = Vec::new();

    for (head_idx, (&(map_h, map_w), stride)) in
      YOLO26_HEAD_SIZES.iter().zip(YOLO26_STRIDES).enumerate()
    {
      let spatial = map_h * map_w;
      let (first, second) = match (
        output.get_f32(head_idx * 2),
        output.get_f32(head_idx * 2 + 1),
      ) {
        (Ok(first), Ok(second)) => (first, second),
        (Err(e), _) | (_, Err(e)) => {
          error!("检测头 {}: 获取输出失败: {}", head_idx, e);
          continue;
        }
      };
      let Some((reg, cls)) = match_reg_cls(first, second, 4 * spatial, self.classes * spatial)
      else {
        error!(
          "检测头 {}: 输出大小不匹配 {} / {}",
          head_idx,
          first.len(),
          second.len()
        );
        continue;
      };

      for idx in 0..spatial {
        let (h, w) = (idx / map_w, idx % map_w);
        let (logit, class_id) = (0..self.classes)
          .map(|c| (cls[c * spatial + idx], c as u32))
          .fold((f32::MIN, 0), |best, cur| if cur.0 > best.0 { cur } else { best });
        let score = sigmoid(logit);
        if score <= YOLO26_CANDIDATE_THRESH {
          continue;
        }

        let grid_x = w as f32 + 0.5;
        let grid_y = h as f32 + 0.5;
        let xmin = ((grid_x - reg[idx]) * stride).clamp(0.0, size);
        let ymin = ((grid_y - reg[spatial + idx]) * stride).clamp(0.0, size);
        let xmax = ((grid_x + reg[2 * spatial + idx]) * stride).clamp(0.0, size);
        let ymax = ((grid_y + reg[3 * spatial + idx]) * stride).clamp(0.0, size);
        items.push(DetectItem {
          class_id,
          score,
          bbox: [xmin / size, ymin / size, xmax / size, ymax / size],
        });
      }
    }

    debug!("检测到 {} 个候选", items.len());
    DetectResult {
      items: items.into_boxed_slice(),
    }
  }
}

impl Model for Yolo26 {
  type Error = Yolo26Error;

  fn infer(&self, sheet: &Sheet) -> Result<DetectResult, Self::Error> {
    // 直接拉伸到输入尺寸，输出的归一化坐标与原图一致
    let input = imageops::resize(
      sheet.image(),
      YOLO26_INPUT_SIZE,
      YOLO26_INPUT_SIZE,
      FilterType::Triangle,
    );
    self.context.set_input(
      0,
      input.as_raw(),
      rknpu::TensorFormat::NHWC,
      TensorType::UInt8,
    )?;
    self.context.run()?;
    let output = self.context.get_outputs()?;
    Ok(self.postprocess(output))
  }
}
