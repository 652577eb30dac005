// 该文件是 Gabarito （答题卡阅卷） 项目的一部分。
// src/main.rs - 答题卡扫描主程序
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

mod args;

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;

use gabarito::FromUrl;
use gabarito::config::LabelMap;
use gabarito::model::{ModelError, ModelWrapper};
use gabarito::output::DirectoryRecordOutput;
use gabarito::sheet::collect_image_paths;
use gabarito::task::{ParallelTask, ScanSetup, SequentialTask, Task};

fn init_logging(level: tracing::Level, log_file: Option<&Path>) -> Result<()> {
  let builder = tracing_subscriber::fmt().with_max_level(level);
  match log_file {
    Some(path) => {
      let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("无法打开日志文件 {}", path.display()))?;
      builder.with_writer(Mutex::new(file)).with_ansi(false).init();
    }
    None => builder.init(),
  }
  Ok(())
}

fn make_model(url: &url::Url, labels: &LabelMap) -> Result<ModelWrapper, ModelError> {
  Ok(ModelWrapper::from_url(url)?.with_labels(labels))
}

fn main() -> Result<()> {
  let args = args::Args::parse();
  init_logging(args.log_level, args.log_file.as_deref())?;

  info!("输入路径: {}", args.input.display());
  info!("输出目录: {}", args.output.display());
  info!("第一阶段模型: {}", args.model_first);
  info!("第二阶段模型: {}", args.model_second);
  info!("考试类型: {}", args.exam);

  let config = args.run_config();
  let layout = args
    .exam
    .resolve_layout(args.layout.as_deref())
    .context("版面参数加载失败")?;
  let setup = ScanSetup::new(&layout, &config).context("扫描配置创建失败")?;

  let inputs = collect_image_paths(&args.input, args.recursive)
    .with_context(|| format!("无法读取输入 {}", args.input.display()))?;
  if inputs.is_empty() {
    bail!("{} 中没有找到图片", args.input.display());
  }

  let output = DirectoryRecordOutput::new(&args.output)
    .with_context(|| format!("无法创建输出目录 {}", args.output.display()))?
    .with_images(args.save_images);

  let now = std::time::Instant::now();
  let outcome = if config.jobs <= 1 {
    let first = make_model(&args.model_first, &config.first.labels)
      .context("第一阶段模型创建失败")?;
    let second = make_model(&args.model_second, &config.second.labels)
      .context("第二阶段模型创建失败")?;
    SequentialTask::new(&setup).run_task(&inputs, (first, second), &output)?
  } else {
    let make_models = || -> Result<_, ModelError> {
      Ok((
        make_model(&args.model_first, &config.first.labels)?,
        make_model(&args.model_second, &config.second.labels)?,
      ))
    };
    ParallelTask::new(&setup, config.jobs).run_task(&inputs, make_models, &output)?
  };
  info!("扫描耗时: {:.2?}", now.elapsed());

  output.write_status(&outcome.status)?;
  output.write_report(&outcome.report)?;
  Ok(())
}
