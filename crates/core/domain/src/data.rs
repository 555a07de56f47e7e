use crate::field::Field;

/// 外设推送的一次原始通知。
#[derive(Debug, Clone)]
pub struct RawNotification {
    pub payload: Vec<u8>,
    pub received_at_ms: i64,
}

impl RawNotification {
    pub fn new(payload: Vec<u8>, received_at_ms: i64) -> Self {
        Self {
            payload,
            received_at_ms,
        }
    }
}

/// 解码并换算后的单个字段读数。
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub field: Field,
    pub value: f64,
    pub ts_ms: i64,
}

/// 充放电方向。
///
/// 由方向标记或充电/放电累计字段更新，跨通知保持到下一次更新。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChargeDirection {
    Charging,
    #[default]
    Discharging,
}

impl ChargeDirection {
    pub fn from_charging(charging: bool) -> Self {
        if charging {
            Self::Charging
        } else {
            Self::Discharging
        }
    }

    pub fn is_charging(self) -> bool {
        matches!(self, Self::Charging)
    }

    /// 放电时取负号。
    pub fn sign(self) -> f64 {
        if self.is_charging() { 1.0 } else { -1.0 }
    }
}
