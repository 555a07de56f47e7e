//! 通知帧 → 物理读数。

pub mod decoder;
pub mod transform;

pub use decoder::{DecodedFrame, decode_frame, decode_hex};
pub use transform::{Transformed, ValueTransformer};

use domain::{ChargeDirection, Field, RawNotification, Reading};
use tokio::sync::Mutex;
use tracing::debug;

/// 规范化错误。
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("invalid battery capacity: {0}")]
    InvalidCapacity(f64),
}

/// 一帧的规范化结果。
#[derive(Debug, Clone, Default)]
pub struct NormalizedFrame {
    pub readings: Vec<Reading>,
    /// 找到标记且有数字串的字段数。
    pub decoded: usize,
    /// 数字串无法解析为整数而丢弃的字段数。
    pub undecodable: usize,
    pub implausible: Vec<(Field, f64)>,
}

/// 解码 + 换算，持有跨通知的充放电方向。
pub struct Normalizer {
    transformer: ValueTransformer,
    direction: Mutex<ChargeDirection>,
}

impl Normalizer {
    pub fn new(transformer: ValueTransformer) -> Self {
        Self {
            transformer,
            direction: Mutex::new(ChargeDirection::default()),
        }
    }

    pub async fn direction(&self) -> ChargeDirection {
        *self.direction.lock().await
    }

    /// 处理一帧。整帧持有方向锁，帧内符号一致。
    ///
    /// 字段按解码发现顺序处理；单字段失败不影响其他字段。
    pub async fn normalize(&self, notification: &RawNotification) -> NormalizedFrame {
        let frame = decode_frame(&notification.payload);
        let ts_ms = notification.received_at_ms;
        let mut result = NormalizedFrame {
            decoded: frame.len(),
            ..NormalizedFrame::default()
        };

        let mut direction = self.direction.lock().await;
        for (field, digits) in frame.iter() {
            let raw = match digits.parse::<u64>() {
                Ok(raw) => raw,
                Err(err) => {
                    result.undecodable += 1;
                    debug!(target: "bms.normalize", field = %field, digits = %digits, error = %err, "field_undecodable");
                    continue;
                }
            };
            match self.transformer.transform(field, raw, &mut direction) {
                Transformed::Value(value) => {
                    result.readings.push(Reading { field, value, ts_ms });
                    if field == Field::AhRemaining {
                        result.readings.push(Reading {
                            field: Field::Soc,
                            value: self.transformer.derived_soc(value),
                            ts_ms,
                        });
                    }
                }
                Transformed::Implausible(value) => {
                    debug!(target: "bms.normalize", field = %field, value = value, "reading_implausible");
                    result.implausible.push((field, value));
                }
                Transformed::DirectionUpdated | Transformed::Unused => {}
            }
        }
        result
    }
}
