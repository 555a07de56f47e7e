//! 生命周期计数器 → 本地当日增量。

use chrono::NaiveDateTime;
use domain::{Field, round_to};
use std::collections::HashMap;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CounterBaseline {
    pub offset: f64,
    /// 本地墙钟时间。
    pub last_update: NaiveDateTime,
}

/// 按字段保存基线，跨本地日时重置为新的零点。
#[derive(Debug, Default)]
pub struct CounterRebaser {
    baselines: HashMap<Field, CounterBaseline>,
}

impl CounterRebaser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn baseline(&self, field: Field) -> Option<&CounterBaseline> {
        self.baselines.get(&field)
    }

    /// 返回自本地零点以来的增量（1 位小数）。
    ///
    /// 首次观测与跨日后的首次观测都以当前值为基线，增量为 0。
    pub fn adjust(&mut self, field: Field, value: f64, now: NaiveDateTime) -> f64 {
        let baseline = self.baselines.entry(field).or_insert_with(|| {
            info!(target: "bms.pipeline", field = %field, offset = value, "counter_baseline_created");
            CounterBaseline {
                offset: value,
                last_update: now,
            }
        });
        if now.date() > baseline.last_update.date() {
            info!(
                target: "bms.pipeline",
                field = %field,
                previous_offset = baseline.offset,
                offset = value,
                "counter_baseline_rolled_over"
            );
            baseline.offset = value;
        }
        baseline.last_update = now;
        round_to(value - baseline.offset, 1)
    }
}
