//! 电池监测器字段枚举。
//!
//! 每个字段携带自己的线上标记、换算方式、合理性下限与聚合取整策略，
//! 取代按字符串分派的字段表。

use crate::data::ChargeDirection;

/// 累计类字段在聚合时乘以的系数。
///
/// 来源硬件的校准常数，无法从帧格式推导；数值保持不变。
pub const CUMULATIVE_CALIBRATION: f64 = 48.0;

/// 线上标记 → 字段。标记互不重复。
pub const MARKER_TABLE: [(&str, Field); 13] = [
    ("c0", Field::Voltage),
    ("c1", Field::Current),
    ("d0", Field::CurrentSoc),
    ("d1", Field::Direction),
    ("d2", Field::AhRemaining),
    ("d3", Field::Discharge),
    ("d4", Field::Charge),
    ("d5", Field::AccumChargeCap),
    ("d6", Field::MinsRemaining),
    ("d8", Field::Power),
    ("d9", Field::Temperature),
    ("e6", Field::FullChargeVolt),
    ("e7", Field::ZeroChargeVolt),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Voltage,
    Current,
    /// 设备自报的 SOC 原值，下游不使用。
    CurrentSoc,
    Direction,
    AhRemaining,
    Discharge,
    Charge,
    AccumChargeCap,
    MinsRemaining,
    Power,
    Temperature,
    FullChargeVolt,
    ZeroChargeVolt,
    /// 由剩余容量与电池额定容量派生。
    Soc,
}

/// 原始整数到物理值的换算方式。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Conversion {
    /// `raw / divisor`，`signed` 时按充放电方向取符号。
    Scaled { divisor: f64, signed: bool },
    /// `raw - offset`。
    Offset(f64),
    /// 显式覆盖充放电方向（raw == 1 表示充电）。
    Direction,
    /// 解码但不参与下游。
    Unused,
    /// 不来自线上，由其他字段派生。
    Derived,
}

/// 聚合取整策略：先按 `scale` 缩放每个样本，再求均值并保留 `decimals` 位小数。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rounding {
    pub scale: f64,
    pub decimals: u32,
}

impl Field {
    pub fn from_marker(token: &str) -> Option<Self> {
        MARKER_TABLE
            .iter()
            .find(|(marker, _)| marker.eq_ignore_ascii_case(token))
            .map(|(_, field)| *field)
    }

    pub fn marker(self) -> Option<&'static str> {
        MARKER_TABLE
            .iter()
            .find(|(_, field)| *field == self)
            .map(|(marker, _)| *marker)
    }

    /// 字段键（与传感器目录的 key 对应）。
    pub fn key(self) -> &'static str {
        match self {
            Self::Voltage => "voltage",
            Self::Current => "current",
            Self::CurrentSoc => "cur_soc",
            Self::Direction => "dir_of_current",
            Self::AhRemaining => "ah_remaining",
            Self::Discharge => "discharge",
            Self::Charge => "charge",
            Self::AccumChargeCap => "accum_charge_cap",
            Self::MinsRemaining => "mins_remaining",
            Self::Power => "power",
            Self::Temperature => "temp",
            Self::FullChargeVolt => "full_charge_volt",
            Self::ZeroChargeVolt => "zero_charge_volt",
            Self::Soc => "soc",
        }
    }

    pub fn conversion(self) -> Conversion {
        match self {
            Self::Voltage => Conversion::Scaled {
                divisor: 100.0,
                signed: false,
            },
            Self::Current | Self::Power => Conversion::Scaled {
                divisor: 100.0,
                signed: true,
            },
            Self::Discharge | Self::Charge => Conversion::Scaled {
                divisor: 100_000.0,
                signed: false,
            },
            Self::AhRemaining | Self::AccumChargeCap => Conversion::Scaled {
                divisor: 1000.0,
                signed: false,
            },
            Self::MinsRemaining => Conversion::Scaled {
                divisor: 1.0,
                signed: false,
            },
            Self::Temperature => Conversion::Offset(100.0),
            Self::Direction => Conversion::Direction,
            Self::CurrentSoc | Self::FullChargeVolt | Self::ZeroChargeVolt => Conversion::Unused,
            Self::Soc => Conversion::Derived,
        }
    }

    /// 合理性下限：换算结果小于等于该值时丢弃。
    pub fn lower_bound(self) -> Option<f64> {
        match self {
            Self::Voltage => Some(40.0),
            Self::Temperature => Some(10.0),
            _ => None,
        }
    }

    /// 收到该字段即隐含的充放电方向。
    pub fn implied_direction(self) -> Option<ChargeDirection> {
        match self {
            Self::Discharge => Some(ChargeDirection::Discharging),
            Self::Charge => Some(ChargeDirection::Charging),
            _ => None,
        }
    }

    /// 单调递增的生命周期计数器，发布前需要按本地日重置。
    pub fn is_cumulative(self) -> bool {
        matches!(self, Self::Discharge | Self::Charge | Self::AccumChargeCap)
    }

    pub fn rounding(self) -> Rounding {
        if self.is_cumulative() {
            return Rounding {
                scale: CUMULATIVE_CALIBRATION,
                decimals: 2,
            };
        }
        match self {
            Self::MinsRemaining => Rounding {
                scale: 1.0,
                decimals: 0,
            },
            _ => Rounding {
                scale: 1.0,
                decimals: 1,
            },
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// 四舍五入到指定小数位。
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_to_handles_zero_decimals() {
        assert_eq!(round_to(57.6, 0), 58.0);
        assert_eq!(round_to(12.345, 1), 12.3);
        assert_eq!(round_to(959.996, 2), 960.0);
    }

    #[test]
    fn direction_sign() {
        assert_eq!(ChargeDirection::Charging.sign(), 1.0);
        assert_eq!(ChargeDirection::Discharging.sign(), -1.0);
        assert_eq!(ChargeDirection::default(), ChargeDirection::Discharging);
    }
}
