//! 应用运行配置加载。

use std::env;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 通知来源。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// 从 stdin 按行读取十六进制通知。
    Stdin,
    /// 不接入任何通知（仅维持 broker 会话与心跳）。
    None,
}

/// 看门狗在途上限的最大取值。
pub const MAX_IN_FLIGHT_LIMIT: usize = 60_000;

/// 应用运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_client_id: String,
    pub mqtt_keep_alive_seconds: u64,
    pub mqtt_channel_capacity: usize,
    pub discovery_prefix: String,
    pub status_topics: Vec<String>,
    pub availability_namespace: String,
    pub flush_interval_seconds: u64,
    pub battery_capacity_ah: f64,
    pub retry_refused_seconds: u64,
    pub retry_unreachable_seconds: u64,
    pub in_flight_limit: usize,
    pub source: SourceKind,
    pub device_id: String,
    pub device_name: String,
    pub device_model: Option<String>,
    pub device_manufacturer: Option<String>,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let mqtt_host = env::var("BMS_MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let mqtt_port = read_with_default("BMS_MQTT_PORT", 1883u16)?;
        let mqtt_username = read_optional("BMS_MQTT_USERNAME");
        let mqtt_password = read_optional("BMS_MQTT_PASSWORD");
        let mqtt_client_id = read_optional("BMS_MQTT_CLIENT_ID")
            .unwrap_or_else(|| format!("bms-bridge-{}", uuid::Uuid::new_v4()));
        let mqtt_keep_alive_seconds = read_with_default("BMS_MQTT_KEEP_ALIVE_SECONDS", 30u64)?;
        let mqtt_channel_capacity = read_positive("BMS_MQTT_CHANNEL_CAPACITY", 100usize)?;
        let discovery_prefix =
            env::var("BMS_DISCOVERY_PREFIX").unwrap_or_else(|_| "homeassistant".to_string());
        let status_topics = read_list("BMS_STATUS_TOPIC", "homeassistant/status");
        let availability_namespace = env::var("BMS_AVAILABILITY_NAMESPACE")
            .unwrap_or_else(|_| "system-sensors/sensor".to_string());
        let flush_interval_seconds = read_positive("BMS_FLUSH_INTERVAL_SECONDS", 10u64)?;
        let battery_capacity_ah = read_with_default("BMS_BATTERY_CAPACITY_AH", 400.0f64)?;
        if !(battery_capacity_ah > 0.0 && battery_capacity_ah.is_finite()) {
            return Err(ConfigError::Invalid(
                "BMS_BATTERY_CAPACITY_AH".to_string(),
                battery_capacity_ah.to_string(),
            ));
        }
        let retry_refused_seconds = read_with_default("BMS_RETRY_REFUSED_SECONDS", 120u64)?;
        let retry_unreachable_seconds =
            read_with_default("BMS_RETRY_UNREACHABLE_SECONDS", 600u64)?;
        let in_flight_limit = read_positive("BMS_IN_FLIGHT_LIMIT", 10_000usize)?;
        // rumqttc 在途窗口为 u16，且须大于看门狗上限
        if in_flight_limit > MAX_IN_FLIGHT_LIMIT {
            return Err(ConfigError::Invalid(
                "BMS_IN_FLIGHT_LIMIT".to_string(),
                in_flight_limit.to_string(),
            ));
        }
        let source = read_source("BMS_SOURCE")?;
        let device_id =
            env::var("BMS_DEVICE_ID").unwrap_or_else(|_| "solar_batteries_ble".to_string());
        let device_name =
            env::var("BMS_DEVICE_NAME").unwrap_or_else(|_| "Battery Status Monitor".to_string());
        let device_model = read_optional("BMS_DEVICE_MODEL").or_else(|| Some("Junctec".to_string()));
        let device_manufacturer = read_optional("BMS_DEVICE_MANUFACTURER");

        Ok(Self {
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_client_id,
            mqtt_keep_alive_seconds,
            mqtt_channel_capacity,
            discovery_prefix,
            status_topics,
            availability_namespace,
            flush_interval_seconds,
            battery_capacity_ah,
            retry_refused_seconds,
            retry_unreachable_seconds,
            in_flight_limit,
            source,
            device_id,
            device_name,
            device_model,
            device_manufacturer,
        })
    }
}

fn read_with_default<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    let value = match env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => return Ok(default),
    };
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

/// 零值无意义的数值配置。
fn read_positive<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialEq + Default + ToString,
{
    let value = read_with_default(key, default)?;
    if value == T::default() {
        return Err(ConfigError::Invalid(key.to_string(), value.to_string()));
    }
    Ok(value)
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_list(key: &str, default: &str) -> Vec<String> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn read_source(key: &str) -> Result<SourceKind, ConfigError> {
    match env::var(key) {
        Ok(value) => match value.to_ascii_lowercase().as_str() {
            "" | "stdin" => Ok(SourceKind::Stdin),
            "none" | "off" => Ok(SourceKind::None),
            _ => Err(ConfigError::Invalid(key.to_string(), value)),
        },
        Err(_) => Ok(SourceKind::Stdin),
    }
}
