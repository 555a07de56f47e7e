use bms_config::{AppConfig, SourceKind};

// 环境变量是进程级共享状态，所有断言放在同一个测试里顺序执行。
#[test]
fn load_config_from_env() {
    // Rust 2024 中 set_var 需要显式标注 unsafe（测试进程内可控）。
    unsafe {
        std::env::set_var("BMS_MQTT_HOST", "broker.local");
        std::env::set_var("BMS_MQTT_PORT", "1884");
        std::env::set_var("BMS_STATUS_TOPIC", "homeassistant/status, ha/status");
        std::env::set_var("BMS_FLUSH_INTERVAL_SECONDS", "5");
        std::env::set_var("BMS_SOURCE", "none");
    }

    let config = AppConfig::from_env().expect("config");
    assert_eq!(config.mqtt_host, "broker.local");
    assert_eq!(config.mqtt_port, 1884);
    assert_eq!(config.status_topics, vec!["homeassistant/status", "ha/status"]);
    assert_eq!(config.flush_interval_seconds, 5);
    assert_eq!(config.source, SourceKind::None);
    assert_eq!(config.in_flight_limit, 10_000);
    assert_eq!(config.battery_capacity_ah, 400.0);
    assert_eq!(config.retry_refused_seconds, 120);
    assert_eq!(config.retry_unreachable_seconds, 600);
    assert!(config.mqtt_client_id.starts_with("bms-bridge-"));

    unsafe {
        std::env::set_var("BMS_FLUSH_INTERVAL_SECONDS", "0");
    }
    let err = AppConfig::from_env().expect_err("zero interval");
    assert_eq!(
        err.to_string(),
        "invalid value for BMS_FLUSH_INTERVAL_SECONDS: 0"
    );

    unsafe {
        std::env::set_var("BMS_FLUSH_INTERVAL_SECONDS", "10");
        std::env::set_var("BMS_MQTT_PORT", "not-a-port");
    }
    let err = AppConfig::from_env().expect_err("bad port");
    assert_eq!(err.to_string(), "invalid value for BMS_MQTT_PORT: not-a-port");

    unsafe {
        std::env::set_var("BMS_MQTT_PORT", "1884");
        std::env::set_var("BMS_IN_FLIGHT_LIMIT", "70000");
    }
    let err = AppConfig::from_env().expect_err("limit above window");
    assert_eq!(err.to_string(), "invalid value for BMS_IN_FLIGHT_LIMIT: 70000");

    unsafe {
        std::env::set_var("BMS_IN_FLIGHT_LIMIT", "60000");
    }
    let config = AppConfig::from_env().expect("limit at cap");
    assert_eq!(config.in_flight_limit, bms_config::MAX_IN_FLIGHT_LIMIT);
}
