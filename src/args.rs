// 该文件是 Gabarito （答题卡阅卷） 项目的一部分。
// src/args.rs - 扫描程序参数配置
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

use clap::Parser;
use gabarito::config::{ExamType, LabelMap, RunConfig, StageSettings};
use url::Url;

/// Gabarito 答题卡扫描
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入图片或目录（*.jpg, *.jpeg, *.png）
  #[arg(long, value_name = "PATH")]
  pub input: PathBuf,

  /// 递归查找目录中的图片
  #[arg(long)]
  pub recursive: bool,

  /// 输出目录
  #[arg(long, value_name = "DIR")]
  pub output: PathBuf,

  /// 第一阶段模型
  /// 支持格式:
  /// - 回放: record:///path/to/detections
  /// - RKNN: yolo26:///path/to/model.rknn?classes=2
  #[arg(long, value_name = "MODEL")]
  pub model_first: Url,

  /// 第二阶段模型，格式同上
  #[arg(long, value_name = "MODEL")]
  pub model_second: Url,

  /// 第一阶段类别名称，按编号顺序，逗号分隔
  #[arg(long, value_name = "NAMES", value_delimiter = ',')]
  pub labels_first: Option<Vec<String>>,

  /// 第二阶段类别名称，按编号顺序，逗号分隔
  #[arg(long, value_name = "NAMES", value_delimiter = ',')]
  pub labels_second: Option<Vec<String>>,

  /// 第一阶段置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub threshold_first: f32,

  /// 第二阶段置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub threshold_second: f32,

  /// 考试类型
  #[arg(long, value_enum, default_value_t = ExamType::Ps)]
  pub exam: ExamType,

  /// 覆盖内置版面参数的 TOML 文件
  #[arg(long, value_name = "FILE")]
  pub layout: Option<PathBuf>,

  /// 校验失败时尝试删除不合规的检测后重新校验
  #[arg(long)]
  pub filter_detections: bool,

  /// 单张答题卡失败时继续处理下一张
  #[arg(long)]
  pub continue_on_fail: bool,

  /// 保存带检测框的图像
  #[arg(long)]
  pub save_images: bool,

  /// 工作线程数
  #[arg(long, default_value = "1", value_name = "COUNT")]
  pub jobs: usize,

  /// 日志级别 (trace, debug, info, warn, error)
  #[arg(long, default_value = "info", value_name = "LEVEL")]
  pub log_level: tracing::Level,

  /// 日志文件，未设置时输出到终端
  #[arg(long, value_name = "FILE")]
  pub log_file: Option<PathBuf>,
}

impl Args {
  pub fn run_config(&self) -> RunConfig {
    let labels = |names: &Option<Vec<String>>, default: LabelMap| {
      names.as_ref().map_or(default, |names| LabelMap::new(names.iter().map(String::as_str)))
    };
    RunConfig {
      exam: self.exam,
      first: StageSettings::new(
        labels(&self.labels_first, LabelMap::first_stage()),
        self.threshold_first,
      ),
      second: StageSettings::new(
        labels(&self.labels_second, LabelMap::second_stage()),
        self.threshold_second,
      ),
      continue_on_fail: self.continue_on_fail,
      filter_detections: self.filter_detections,
      jobs: self.jobs.max(1),
    }
  }
}
