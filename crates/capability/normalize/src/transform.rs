//! 原始整数 → 物理值。

use crate::NormalizeError;
use domain::{ChargeDirection, Conversion, Field};

/// 单字段换算结果。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Transformed {
    Value(f64),
    /// 换算后低于合理下限，丢弃。
    Implausible(f64),
    /// 仅更新了充放电方向。
    DirectionUpdated,
    /// 下游不使用的字段。
    Unused,
}

#[derive(Debug, Clone)]
pub struct ValueTransformer {
    battery_capacity_ah: f64,
}

impl ValueTransformer {
    pub fn new(battery_capacity_ah: f64) -> Result<Self, NormalizeError> {
        if !(battery_capacity_ah.is_finite() && battery_capacity_ah > 0.0) {
            return Err(NormalizeError::InvalidCapacity(battery_capacity_ah));
        }
        Ok(Self {
            battery_capacity_ah,
        })
    }

    pub fn battery_capacity_ah(&self) -> f64 {
        self.battery_capacity_ah
    }

    /// 换算单个字段，可能改写 `direction`。
    pub fn transform(&self, field: Field, raw: u64, direction: &mut ChargeDirection) -> Transformed {
        if let Some(implied) = field.implied_direction() {
            *direction = implied;
        }
        let value = match field.conversion() {
            Conversion::Scaled { divisor, signed } => {
                let value = raw as f64 / divisor;
                if signed { value * direction.sign() } else { value }
            }
            Conversion::Offset(offset) => raw as f64 - offset,
            Conversion::Direction => {
                *direction = ChargeDirection::from_charging(raw == 1);
                return Transformed::DirectionUpdated;
            }
            Conversion::Unused | Conversion::Derived => return Transformed::Unused,
        };
        match field.lower_bound() {
            Some(bound) if value <= bound => Transformed::Implausible(value),
            _ => Transformed::Value(value),
        }
    }

    /// 由剩余容量（Ah）派生 SOC 百分比。
    pub fn derived_soc(&self, ah_remaining: f64) -> f64 {
        ah_remaining / self.battery_capacity_ah * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transformer() -> ValueTransformer {
        ValueTransformer::new(400.0).expect("capacity")
    }

    #[test]
    fn current_sign_follows_direction() {
        let transformer = transformer();
        let mut direction = ChargeDirection::Discharging;
        assert_eq!(
            transformer.transform(Field::Current, 150, &mut direction),
            Transformed::Value(-1.5)
        );
        let mut direction = ChargeDirection::Charging;
        assert_eq!(
            transformer.transform(Field::Current, 150, &mut direction),
            Transformed::Value(1.5)
        );
    }

    #[test]
    fn charge_and_discharge_set_direction() {
        let transformer = transformer();
        let mut direction = ChargeDirection::Discharging;
        assert_eq!(
            transformer.transform(Field::Charge, 250_000, &mut direction),
            Transformed::Value(2.5)
        );
        assert_eq!(direction, ChargeDirection::Charging);
        transformer.transform(Field::Discharge, 1, &mut direction);
        assert_eq!(direction, ChargeDirection::Discharging);
    }

    #[test]
    fn direction_marker_overrides() {
        let transformer = transformer();
        let mut direction = ChargeDirection::Discharging;
        assert_eq!(
            transformer.transform(Field::Direction, 1, &mut direction),
            Transformed::DirectionUpdated
        );
        assert!(direction.is_charging());
        transformer.transform(Field::Direction, 0, &mut direction);
        assert!(!direction.is_charging());
    }

    #[test]
    fn implausible_bounds_are_exclusive() {
        let transformer = transformer();
        let mut direction = ChargeDirection::default();
        assert_eq!(
            transformer.transform(Field::Voltage, 4000, &mut direction),
            Transformed::Implausible(40.0)
        );
        assert_eq!(
            transformer.transform(Field::Voltage, 4001, &mut direction),
            Transformed::Value(40.01)
        );
        assert_eq!(
            transformer.transform(Field::Temperature, 110, &mut direction),
            Transformed::Implausible(10.0)
        );
        assert_eq!(
            transformer.transform(Field::Temperature, 125, &mut direction),
            Transformed::Value(25.0)
        );
    }

    #[test]
    fn remaining_fields_scale() {
        let transformer = transformer();
        let mut direction = ChargeDirection::Charging;
        assert_eq!(
            transformer.transform(Field::AhRemaining, 200_000, &mut direction),
            Transformed::Value(200.0)
        );
        assert_eq!(
            transformer.transform(Field::MinsRemaining, 57, &mut direction),
            Transformed::Value(57.0)
        );
        assert_eq!(
            transformer.transform(Field::Power, 12_345, &mut direction),
            Transformed::Value(123.45)
        );
        assert_eq!(
            transformer.transform(Field::CurrentSoc, 88, &mut direction),
            Transformed::Unused
        );
        assert_eq!(transformer.derived_soc(200.0), 50.0);
    }

    #[test]
    fn capacity_must_be_positive() {
        assert!(ValueTransformer::new(0.0).is_err());
        assert!(ValueTransformer::new(f64::NAN).is_err());
    }
}
