// 该文件是 Gabarito （答题卡阅卷） 项目的一部分。
// src/task.rs - 扫描任务：检测、校验、裁剪、解码
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

use rayon::prelude::*;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::builder::{AnswerDecoder, BuilderContext, CpfStrategy, decoder_for};
use crate::check::{self, CheckContext, CheckError, CheckOptions, CheckRegistry, CheckReport, Stage};
use crate::config::{ConfigError, ExamLayout, RunConfig, StageSettings};
use crate::model::{DetectError, Model, make_detections};
use crate::output::Render;
use crate::report::{BatchReport, ReportConfig, ScanStatus, SheetOutcome};
use crate::sheet::{Sheet, SheetError};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum ScanError {
  #[error("图像错误: {0}")]
  Sheet(#[from] SheetError),
  #[error("{sheet} 检测失败: {source}")]
  Detect {
    sheet: String,
    #[source]
    source: DetectError,
  },
  #[error("{0}")]
  Check(#[from] CheckError),
  #[error("模型创建失败: {0}")]
  Model(BoxError),
  #[error("输出错误: {0}")]
  Output(BoxError),
  #[error("线程池创建失败: {0}")]
  ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl ScanError {
  /// 类别或标签不匹配属于配置错误，即使设置了 `continue_on_fail` 也中止任务
  pub fn is_fatal(&self) -> bool {
    matches!(
      self,
      ScanError::Check(CheckError::UnknownClass { .. } | CheckError::MissingCropTag(_))
        | ScanError::Detect {
          source: DetectError::UnknownLabel { .. },
          ..
        }
        | ScanError::Model(_)
        | ScanError::Output(_)
        | ScanError::ThreadPool(_)
    )
  }
}

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, models: M, output: O) -> Result<Self::Output, Self::Error>;
}

/// 各工作线程共享的只读配置
pub struct ScanSetup {
  pub registry: CheckRegistry,
  pub decoder: Box<dyn AnswerDecoder + Send + Sync>,
  pub first: StageSettings,
  pub second: StageSettings,
  pub options: CheckOptions,
  pub report: ReportConfig,
}

impl ScanSetup {
  pub fn new(layout: &ExamLayout, config: &RunConfig) -> Result<Self, ConfigError> {
    Ok(Self {
      registry: CheckRegistry::from_layout(layout),
      decoder: decoder_for(config.exam, layout, CpfStrategy::Columns)?,
      first: config.first.clone(),
      second: config.second.clone(),
      options: CheckOptions {
        filter_detections: config.filter_detections,
        continue_on_fail: config.continue_on_fail,
      },
      report: ReportConfig::from(config),
    })
  }
}

/// 一张答题卡的扫描结果
#[derive(Debug)]
pub struct SheetScan {
  pub sheet: Sheet,
  pub crops: Vec<Sheet>,
  pub checks: Vec<CheckReport>,
  pub outcome: SheetOutcome,
}

/// 单个工作线程：一对模型与自己的检查状态
pub struct Scanner<'a, M> {
  setup: &'a ScanSetup,
  first: M,
  second: M,
  ctx: CheckContext,
}

impl<'a, M> Scanner<'a, M>
where
  M: Model,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  pub fn new(setup: &'a ScanSetup, first: M, second: M) -> Self {
    Self {
      setup,
      first,
      second,
      ctx: CheckContext::new(),
    }
  }

  fn detect(&self, sheet: &mut Sheet, stage: Stage) -> Result<(), ScanError> {
    let (model, settings) = match stage {
      Stage::First => (&self.first, &self.setup.first),
      Stage::Second => (&self.second, &self.setup.second),
    };
    let detections =
      make_detections(model, sheet, settings).map_err(|source| ScanError::Detect {
        sheet: sheet.name().to_string(),
        source,
      })?;
    sheet.set_detections(detections);
    Ok(())
  }

  fn check(&mut self, sheet: &mut Sheet, stage: Stage) -> Result<CheckReport, ScanError> {
    Ok(check::perform(
      &mut self.ctx,
      sheet,
      stage,
      &self.setup.registry,
      self.setup.options,
    )?)
  }

  /// 第一阶段检测与校验，通过后裁剪，对每个裁剪区域做第二阶段检测与校验，全部通过后解码
  pub fn scan_sheet(&mut self, mut sheet: Sheet) -> Result<SheetScan, ScanError> {
    let now = std::time::Instant::now();
    self.detect(&mut sheet, Stage::First)?;
    let first = self.check(&mut sheet, Stage::First)?;
    if let Some(failure) = first.first_failure() {
      let outcome = SheetOutcome::from(failure);
      return Ok(SheetScan {
        sheet,
        crops: Vec::new(),
        checks: vec![first],
        outcome,
      });
    }

    let mut crops = sheet.crop_blocks();
    let mut checks = vec![first];
    for crop in &mut crops {
      self.detect(crop, Stage::Second)?;
      checks.push(self.check(crop, Stage::Second)?);
    }

    let outcome = match checks.iter().find_map(CheckReport::first_failure) {
      Some(failure) => SheetOutcome::from(failure),
      None => {
        let context = BuilderContext::from_crops(sheet.stem(), &crops);
        SheetOutcome::Decoded(self.setup.decoder.decode(&context))
      }
    };
    info!(
      "{} 扫描完成 ({})，耗时 {:.2?}",
      sheet.name(),
      if outcome.is_failed() { "失败" } else { "成功" },
      now.elapsed()
    );

    Ok(SheetScan {
      sheet,
      crops,
      checks,
      outcome,
    })
  }

  /// 读取、扫描并输出一张答题卡，返回名称与结果
  pub fn process<R>(&mut self, path: &Path, output: &R) -> Result<(String, SheetOutcome), ScanError>
  where
    R: Render<Sheet, [Sheet]>,
    R::Error: std::error::Error + Send + Sync + 'static,
  {
    let stem = path
      .file_stem()
      .map(|stem| stem.to_string_lossy().into_owned())
      .unwrap_or_default();
    let scan = Sheet::open(path)
      .map_err(ScanError::from)
      .and_then(|sheet| self.scan_sheet(sheet));

    match scan {
      Ok(scan) => {
        // 第一阶段未通过的答题卡没有裁剪结果，不写转储
        if !scan.crops.is_empty() {
          output
            .render_result(&scan.sheet, &scan.crops)
            .map_err(|e| ScanError::Output(Box::new(e)))?;
        }
        Ok((stem, scan.outcome))
      }
      Err(e) if self.setup.options.continue_on_fail && !e.is_fatal() => {
        warn!("{} 扫描失败，继续下一张: {}", path.display(), e);
        Ok((stem, SheetOutcome::failed(e.to_string())))
      }
      Err(e) => {
        error!("{} 扫描失败: {}", path.display(), e);
        Err(e)
      }
    }
  }
}

/// 批量扫描的汇总
#[derive(Debug, Clone)]
pub struct BatchOutcome {
  pub status: ScanStatus,
  pub report: BatchReport,
}

impl BatchOutcome {
  fn collect(setup: &ScanSetup, results: Vec<(String, SheetOutcome)>) -> Self {
    let mut status = ScanStatus::default();
    let mut report = BatchReport::new(setup.report.clone());
    for (stem, outcome) in results {
      if outcome.is_failed() {
        status.failed.push(stem.clone());
      } else {
        status.success.push(stem.clone());
      }
      report.insert(stem, outcome);
    }
    info!(
      "共 {} 张：{} 张成功，{} 张失败",
      status.success.len() + status.failed.len(),
      status.success.len(),
      status.failed.len()
    );
    Self { status, report }
  }
}

/// 在当前线程上依次扫描，使用同一对模型
pub struct SequentialTask<'a> {
  setup: &'a ScanSetup,
}

impl<'a> SequentialTask<'a> {
  pub fn new(setup: &'a ScanSetup) -> Self {
    Self { setup }
  }
}

impl<'a, M, R> Task<&[PathBuf], (M, M), &R> for SequentialTask<'a>
where
  M: Model,
  M::Error: std::error::Error + Send + Sync + 'static,
  R: Render<Sheet, [Sheet]>,
  R::Error: std::error::Error + Send + Sync + 'static,
{
  type Output = BatchOutcome;
  type Error = ScanError;

  fn run_task(
    self,
    input: &[PathBuf],
    (first, second): (M, M),
    output: &R,
  ) -> Result<Self::Output, Self::Error> {
    info!("开始扫描 {} 张答题卡...", input.len());
    let mut scanner = Scanner::new(self.setup, first, second);
    let results = input
      .iter()
      .map(|path| scanner.process(path, output))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(BatchOutcome::collect(self.setup, results))
  }
}

/// 在 rayon 线程池上扫描，每个工作线程通过工厂创建自己的模型
pub struct ParallelTask<'a> {
  setup: &'a ScanSetup,
  jobs: usize,
}

impl<'a> ParallelTask<'a> {
  pub fn new(setup: &'a ScanSetup, jobs: usize) -> Self {
    Self { setup, jobs }
  }
}

impl<'a, M, E, F, R> Task<&[PathBuf], F, &R> for ParallelTask<'a>
where
  M: Model,
  M::Error: std::error::Error + Send + Sync + 'static,
  E: std::fmt::Display,
  F: Fn() -> Result<(M, M), E> + Send + Sync,
  R: Render<Sheet, [Sheet]> + Sync,
  R::Error: std::error::Error + Send + Sync + 'static,
{
  type Output = BatchOutcome;
  type Error = ScanError;

  fn run_task(
    self,
    input: &[PathBuf],
    make_models: F,
    output: &R,
  ) -> Result<Self::Output, Self::Error> {
    let pool = rayon::ThreadPoolBuilder::new()
      .num_threads(self.jobs)
      .build()?;
    info!(
      "开始扫描 {} 张答题卡，工作线程 {} 个...",
      input.len(),
      self.jobs
    );

    let setup = self.setup;
    let results = pool.install(|| {
      input
        .par_iter()
        .map_init(
          || {
            make_models()
              .map(|(first, second)| Scanner::new(setup, first, second))
              .map_err(|e| e.to_string())
          },
          |scanner, path| match scanner {
            Ok(scanner) => scanner.process(path, output),
            Err(message) => Err(ScanError::Model(message.clone().into())),
          },
        )
        .collect::<Result<Vec<_>, _>>()
    })?;
    Ok(BatchOutcome::collect(setup, results))
  }
}

/// 单阶段检测：对每张图像运行一个模型，输出标注结果，可选裁剪出所有检测框
pub struct DetectTask<'a> {
  settings: &'a StageSettings,
  crop_objects: bool,
}

impl<'a> DetectTask<'a> {
  pub fn new(settings: &'a StageSettings, crop_objects: bool) -> Self {
    Self {
      settings,
      crop_objects,
    }
  }
}

impl<'a, M, R> Task<&[PathBuf], M, &R> for DetectTask<'a>
where
  M: Model,
  M::Error: std::error::Error + Send + Sync + 'static,
  R: Render<Sheet, [Sheet]>,
  R::Error: std::error::Error + Send + Sync + 'static,
{
  /// 检测结果总数
  type Output = usize;
  type Error = ScanError;

  fn run_task(self, input: &[PathBuf], model: M, output: &R) -> Result<Self::Output, Self::Error> {
    info!("开始检测 {} 张图像...", input.len());
    let mut total = 0;
    for path in input {
      let mut sheet = Sheet::open(path)?;
      let detections =
        make_detections(&model, &sheet, self.settings).map_err(|source| ScanError::Detect {
          sheet: sheet.name().to_string(),
          source,
        })?;
      total += detections.len();
      sheet.set_detections(detections);

      let crops = if self.crop_objects {
        sheet.crop_detections()
      } else {
        Vec::new()
      };
      output
        .render_result(&sheet, &crops)
        .map_err(|e| ScanError::Output(Box::new(e)))?;
    }
    info!("检测完成，共 {} 个结果", total);
    Ok(total)
  }
}
