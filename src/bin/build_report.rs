// 该文件是 Gabarito （答题卡阅卷） 项目的一部分。
// src/bin/build_report.rs - 从扫描转储重新生成报告
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

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use gabarito::builder::{AnswerDecoder, CpfStrategy, decoder_for};
use gabarito::config::{ErrorCorrection, ExamType, RunConfig};
use gabarito::report::{DumpReportBuilder, FINAL_REPORT_FILE, ReportConfig};

/// 从扫描输出目录重新解码并生成汇总报告
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 扫描输出目录（包含 scan_status.json）
  #[arg(long, value_name = "DIR")]
  pub input: PathBuf,
  /// 报告输出目录
  #[arg(long, value_name = "DIR")]
  pub output: PathBuf,
  /// 考试类型
  #[arg(long, value_enum, default_value_t = ExamType::Ps)]
  pub exam: ExamType,
  /// 覆盖内置版面参数的 TOML 文件
  #[arg(long, value_name = "FILE")]
  pub layout: Option<PathBuf>,
  /// 同时解码扫描失败的答题卡
  #[arg(long)]
  pub failed_too: bool,
  /// 失败答题卡的纠错方式
  #[arg(long, value_enum, value_name = "KIND")]
  pub error_correction: Option<ErrorCorrection>,
  /// 单张答题卡解码失败时继续
  #[arg(long)]
  pub continue_on_fail: bool,
  /// 日志级别 (trace, debug, info, warn, error)
  #[arg(long, default_value = "info", value_name = "LEVEL")]
  pub log_level: tracing::Level,
}

fn main() -> Result<()> {
  let args = Args::parse();
  tracing_subscriber::fmt().with_max_level(args.log_level).init();

  info!("输入目录: {}", args.input.display());
  info!("输出目录: {}", args.output.display());

  let layout = args
    .exam
    .resolve_layout(args.layout.as_deref())
    .context("版面参数加载失败")?;
  let decoder = decoder_for(args.exam, &layout, CpfStrategy::Columns)?;
  let failed_decoder = match args.error_correction {
    Some(ErrorCorrection::Cpf) => Some(decoder_for(args.exam, &layout, CpfStrategy::RowReference)?),
    None => None,
  };

  let run = RunConfig {
    exam: args.exam,
    continue_on_fail: args.continue_on_fail,
    ..RunConfig::default()
  };
  let builder = DumpReportBuilder {
    labels: &run.second.labels,
    decoder: &*decoder,
    failed_decoder: failed_decoder
      .as_deref()
      .map(|d| d as &dyn AnswerDecoder),
    failed_too: args.failed_too,
    continue_on_fail: args.continue_on_fail,
  };
  let config = ReportConfig {
    error_correction: args.error_correction,
    failed_too: args.failed_too,
    ..ReportConfig::from(&run)
  };
  let report = builder
    .build(&args.input, config)
    .with_context(|| format!("无法从 {} 生成报告", args.input.display()))?;

  std::fs::create_dir_all(&args.output)
    .with_context(|| format!("无法创建输出目录 {}", args.output.display()))?;
  let path = args.output.join(FINAL_REPORT_FILE);
  report.write(&path)?;
  info!("报告已保存: {}", path.display());
  Ok(())
}
