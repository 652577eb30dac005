// 该文件是 Gabarito （答题卡阅卷） 项目的一部分。
// src/bin/detect.rs - 运行单个阶段的检测模型并输出标注图像
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

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;
use url::Url;

use gabarito::FromUrl;
use gabarito::check::Stage;
use gabarito::config::{LabelMap, StageSettings};
use gabarito::model::ModelWrapper;
use gabarito::output::AnnotatedImageOutput;
use gabarito::sheet::collect_image_paths;
use gabarito::task::{DetectTask, Task};

/// 裁剪结果所在的子目录
const CROPPED_DIR: &str = "cropped";

/// 对图像运行一个阶段的检测模型，保存标注图像与检测记录
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入图片或目录（*.jpg, *.jpeg, *.png）
  #[arg(long, value_name = "PATH")]
  pub input: PathBuf,
  /// 递归查找目录中的图片
  #[arg(long)]
  pub recursive: bool,
  /// 输出目录，检测记录可直接作为 record:// 模型回放
  #[arg(long, value_name = "DIR", default_value = "detection_output")]
  pub output: PathBuf,
  /// 检测模型
  /// 支持格式:
  /// - 回放: record:///path/to/detections
  /// - RKNN: yolo26:///path/to/model.rknn?classes=2
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 模型所属阶段，决定默认标签表
  #[arg(long, value_enum, default_value = "first")]
  pub stage: Stage,
  /// 类别名称，按编号顺序，逗号分隔
  #[arg(long, value_name = "NAMES", value_delimiter = ',')]
  pub labels: Option<Vec<String>>,
  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub threshold: f32,
  /// 把每个检测框裁剪保存到 `<输出目录>/cropped`
  #[arg(long)]
  pub crop_objects: bool,
  /// 日志级别 (trace, debug, info, warn, error)
  #[arg(long, default_value = "info", value_name = "LEVEL")]
  pub log_level: tracing::Level,
}

fn main() -> Result<()> {
  let args = Args::parse();
  tracing_subscriber::fmt().with_max_level(args.log_level).init();

  info!("输入路径: {}", args.input.display());
  info!("输出目录: {}", args.output.display());
  info!("模型: {} ({})", args.model, args.stage);

  let labels = args.labels.as_ref().map_or_else(
    || LabelMap::for_stage(args.stage),
    |names| LabelMap::new(names.iter().map(String::as_str)),
  );
  let settings = StageSettings::new(labels, args.threshold);

  let inputs = collect_image_paths(&args.input, args.recursive)
    .with_context(|| format!("无法读取输入 {}", args.input.display()))?;
  if inputs.is_empty() {
    bail!("{} 中没有找到图片", args.input.display());
  }

  let mut output = AnnotatedImageOutput::new(&args.output)
    .with_context(|| format!("无法创建输出目录 {}", args.output.display()))?;
  if args.crop_objects {
    output = output
      .with_crops(args.output.join(CROPPED_DIR))
      .context("无法创建裁剪目录")?;
  }

  let model = ModelWrapper::from_url(&args.model)
    .context("模型创建失败")?
    .with_labels(&settings.labels);

  let now = std::time::Instant::now();
  let total = DetectTask::new(&settings, args.crop_objects).run_task(&inputs, model, &output)?;
  info!("{} 张图像，{} 个检测结果，耗时 {:.2?}", inputs.len(), total, now.elapsed());
  Ok(())
}
