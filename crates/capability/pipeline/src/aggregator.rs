//! 窗口聚合：解码事件持续累积样本，定时刷新为每字段一个值。

use domain::{Field, Reading, round_to};
use std::collections::BTreeMap;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// 刷新得到的单字段值。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlushedValue {
    pub field: Field,
    pub value: f64,
    pub samples: usize,
}

/// 一次进行中的刷新。
///
/// 持有刷新锁直到被 drop；期间新的 `begin_flush` 返回 `None`。
pub struct Flush<'a> {
    _guard: MutexGuard<'a, ()>,
    pub values: Vec<FlushedValue>,
}

pub struct Aggregator {
    samples: Mutex<BTreeMap<Field, Vec<f64>>>,
    flushing: Mutex<()>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(BTreeMap::new()),
            flushing: Mutex::new(()),
        }
    }

    pub async fn accumulate(&self, readings: &[Reading]) {
        if readings.is_empty() {
            return;
        }
        let mut samples = self.samples.lock().await;
        for reading in readings {
            samples.entry(reading.field).or_default().push(reading.value);
        }
    }

    /// 当前累积的样本数（按字段）。
    pub async fn pending(&self) -> BTreeMap<Field, usize> {
        let samples = self.samples.lock().await;
        samples
            .iter()
            .map(|(field, values)| (*field, values.len()))
            .collect()
    }

    /// 开始刷新：取走全部样本并归约。
    ///
    /// 上一次刷新尚未结束时返回 `None`，样本保留到下一次。
    pub async fn begin_flush(&self) -> Option<Flush<'_>> {
        let guard = self.flushing.try_lock().ok()?;
        let drained = std::mem::take(&mut *self.samples.lock().await);
        let values = drained
            .into_iter()
            .filter_map(|(field, samples)| {
                let value = reduce(field, &samples);
                if value.is_none() {
                    debug!(target: "bms.pipeline", field = %field, "field_without_samples");
                }
                value.map(|value| FlushedValue {
                    field,
                    value,
                    samples: samples.len(),
                })
            })
            .collect();
        Some(Flush {
            _guard: guard,
            values,
        })
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// 按字段策略归约样本：逐个缩放后求算术平均，再取整。无样本返回 `None`。
pub fn reduce(field: Field, samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let rounding = field.rounding();
    let sum: f64 = samples.iter().map(|value| value * rounding.scale).sum();
    Some(round_to(sum / samples.len() as f64, rounding.decimals))
}
