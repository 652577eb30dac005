// 该文件是 Gabarito （答题卡阅卷） 项目的一部分。
// src/check/engine.rs - 清理与校验流程
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

use tracing::{debug, info, warn};

use crate::check::rules::{CheckRegistry, CheckerDef, Precompute};
use crate::check::{CheckContext, CheckError, Stage, ValidationFailure};
use crate::detection::Detection;
use crate::sheet::Sheet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckOptions {
  /// 校验前删除不满足逐个检测规则的结果
  pub filter_detections: bool,
  /// 记录全部失败而不是在第一个失败处返回错误
  pub continue_on_fail: bool,
}

/// 一张图像一个阶段的校验结果
#[derive(Debug, Clone)]
pub struct CheckReport {
  pub sheet: String,
  pub stage: Stage,
  pub removed: Vec<Detection>,
  pub passed_checks: usize,
  pub failures: Vec<ValidationFailure>,
}

impl CheckReport {
  pub fn is_passed(&self) -> bool {
    self.failures.is_empty()
  }

  pub fn first_failure(&self) -> Option<&ValidationFailure> {
    self.failures.first()
  }
}

fn prepare(
  ctx: &mut CheckContext,
  sheet: &Sheet,
  stage: Stage,
  defs: &[CheckerDef],
) -> Result<(), CheckError> {
  ctx.reset();
  ctx.dispatch(sheet, stage)?;
  for def in defs {
    match def.precompute {
      Some(Precompute::Rows { row_len }) => ctx.split_rows(def.bucket, row_len),
      None => {}
    }
  }
  Ok(())
}

/// 以只收集的方式执行可清理规则，返回问题检测的序号
fn collect_offenders(ctx: &CheckContext, defs: &[CheckerDef]) -> BTreeSet<usize> {
  let mut offenders = BTreeSet::new();
  for def in defs {
    for rule in def.rules.iter().filter(|rule| rule.cleanable()) {
      for evaluation in rule.evaluate(def.bucket, ctx) {
        for detection in &evaluation.outcome.offenders {
          debug!("{} 清理: {}", evaluation.check, detection);
          offenders.insert(detection.order());
        }
      }
    }
  }
  offenders
}

fn validate(
  ctx: &mut CheckContext,
  sheet: &str,
  stage: Stage,
  defs: &[CheckerDef],
  continue_on_fail: bool,
) -> (usize, Vec<ValidationFailure>) {
  let mut passed = 0;
  let mut failures = Vec::new();

  for def in defs {
    let mut bucket_failed = false;
    'rules: for rule in &def.rules {
      for evaluation in rule.evaluate(def.bucket, ctx) {
        if evaluation.outcome.passed {
          debug!(
            "{} {}: {} 通过 ({})",
            sheet, stage, evaluation.check, evaluation.outcome.actual
          );
          passed += 1;
          continue;
        }

        let failure = ValidationFailure {
          sheet: sheet.to_string(),
          stage,
          bucket: def.bucket,
          check: evaluation.check,
          kind: evaluation.kind,
          expected: evaluation.outcome.expected,
          actual: evaluation.outcome.actual,
          offenders: evaluation.outcome.offenders,
        };
        warn!("{}", failure);
        failures.push(failure);
        bucket_failed = true;
        if !continue_on_fail {
          break 'rules;
        }
      }
    }

    if bucket_failed {
      ctx.bucket_mut(def.bucket).failed = true;
    } else {
      info!("{} {}: {} 全部检查通过", sheet, stage, def.bucket);
    }
  }

  (passed, failures)
}

/// 对一张图像执行一个阶段的完整校验：重置、分发、预计算、可选清理、校验
///
/// 所有桶都会被校验。未设置 `continue_on_fail` 时，每个桶在第一个失败处停止，
/// 且只要有失败就返回 [`CheckError::Failed`]，携带第一个失败；设置后返回包含全部失败的报告。
pub fn perform(
  ctx: &mut CheckContext,
  sheet: &mut Sheet,
  stage: Stage,
  registry: &CheckRegistry,
  options: CheckOptions,
) -> Result<CheckReport, CheckError> {
  let defs = registry.select(stage, sheet)?;
  prepare(ctx, sheet, stage, defs)?;

  let mut removed = Vec::new();
  if options.filter_detections {
    let offenders = collect_offenders(ctx, defs);
    if !offenders.is_empty() {
      removed = sheet.remove_detections(&offenders);
      info!(
        "{} {}: 清理了 {} 个检测结果",
        sheet.name(),
        stage,
        removed.len()
      );
      prepare(ctx, sheet, stage, defs)?;
    }
  }

  let (passed_checks, mut failures) =
    validate(ctx, sheet.name(), stage, defs, options.continue_on_fail);

  if !options.continue_on_fail && !failures.is_empty() {
    return Err(CheckError::Failed(Box::new(failures.swap_remove(0))));
  }

  Ok(CheckReport {
    sheet: sheet.name().to_string(),
    stage,
    removed,
    passed_checks,
    failures,
  })
}
