//! 家庭自动化平台的 MQTT 自动发现契约：设备、传感器目录与 topic 规则。

use serde::Serialize;

/// 心跳传感器键：每次聚合刷新都发布一次时间戳。
pub const HEARTBEAT_KEY: &str = "last_message";

/// 默认传感器类型（discovery topic 第二段）。
pub const DEFAULT_SENSOR_KIND: &str = "sensor";

/// 设备描述（随每个 discovery 配置下发）。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
}

impl DeviceInfo {
    pub fn new(device_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            identifiers: vec![device_id.into()],
            name: name.into(),
            model: None,
            manufacturer: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = Some(manufacturer.into());
        self
    }

    /// 第一个 identifier 即 topic 中的设备 ID。
    pub fn device_id(&self) -> &str {
        self.identifiers.first().map(String::as_str).unwrap_or("")
    }

    pub fn slug(&self) -> String {
        slugify(&self.name)
    }
}

/// 单个传感器的静态元数据。
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSpec {
    pub key: String,
    pub name: String,
    pub kind: String,
    pub state_class: Option<String>,
    pub unit: Option<String>,
    pub device_class: Option<String>,
    pub icon: Option<String>,
    /// 每次注册后紧跟 discovery 配置发送的初始值。
    pub initial: Option<serde_json::Value>,
}

impl SensorSpec {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            kind: DEFAULT_SENSOR_KIND.to_string(),
            state_class: None,
            unit: None,
            device_class: None,
            icon: None,
            initial: None,
        }
    }

    pub fn with_state_class(mut self, state_class: impl Into<String>) -> Self {
        self.state_class = Some(state_class.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_device_class(mut self, device_class: impl Into<String>) -> Self {
        self.device_class = Some(device_class.into());
        self
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_initial(mut self, initial: serde_json::Value) -> Self {
        self.initial = Some(initial);
        self
    }

    pub fn slug(&self) -> String {
        slugify(&self.name)
    }
}

/// discovery 配置载荷。
#[derive(Debug, Serialize)]
pub struct DiscoveryConfig<'a> {
    pub name: &'a str,
    pub state_topic: String,
    pub unique_id: String,
    pub device: &'a DeviceInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<&'a str>,
    pub platform: &'static str,
}

/// 设备 + 传感器目录 + topic 规则。
#[derive(Debug, Clone)]
pub struct SensorCatalog {
    pub discovery_prefix: String,
    pub availability_namespace: String,
    pub device: DeviceInfo,
    pub sensors: Vec<SensorSpec>,
}

impl SensorCatalog {
    pub fn new(
        discovery_prefix: impl Into<String>,
        availability_namespace: impl Into<String>,
        device: DeviceInfo,
        sensors: Vec<SensorSpec>,
    ) -> Self {
        Self {
            discovery_prefix: discovery_prefix.into(),
            availability_namespace: availability_namespace.into(),
            device,
            sensors,
        }
    }

    pub fn sensor(&self, key: &str) -> Option<&SensorSpec> {
        self.sensors.iter().find(|sensor| sensor.key == key)
    }

    /// `<prefix>/<kind>/<device_id>/<slug>`
    pub fn base_topic(&self, sensor: &SensorSpec) -> String {
        format!(
            "{}/{}/{}/{}",
            self.discovery_prefix.trim_end_matches('/'),
            sensor.kind,
            self.device.device_id(),
            sensor.slug()
        )
    }

    pub fn config_topic(&self, sensor: &SensorSpec) -> String {
        format!("{}/config", self.base_topic(sensor))
    }

    pub fn state_topic(&self, sensor: &SensorSpec) -> String {
        format!("{}/state", self.base_topic(sensor))
    }

    /// 按字段键查 state topic；目录中没有的键不发布。
    pub fn state_topic_for(&self, key: &str) -> Option<String> {
        self.sensor(key).map(|sensor| self.state_topic(sensor))
    }

    pub fn unique_id(&self, sensor: &SensorSpec) -> String {
        format!("{}_{}", self.device.slug(), sensor.slug())
    }

    /// `<namespace>/<device_slug>/availability`
    pub fn availability_topic(&self) -> String {
        format!(
            "{}/{}/availability",
            self.availability_namespace.trim_end_matches('/'),
            self.device.slug()
        )
    }

    pub fn discovery_config<'a>(&'a self, sensor: &'a SensorSpec) -> DiscoveryConfig<'a> {
        DiscoveryConfig {
            name: &sensor.name,
            state_topic: self.state_topic(sensor),
            unique_id: self.unique_id(sensor),
            device: &self.device,
            state_class: sensor.state_class.as_deref(),
            unit_of_measurement: sensor.unit.as_deref(),
            device_class: sensor.device_class.as_deref(),
            icon: sensor.icon.as_deref(),
            platform: "mqtt",
        }
    }

    pub fn config_payload(&self, sensor: &SensorSpec) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.discovery_config(sensor))
    }
}

/// 电池监测器的内置传感器目录。
pub fn battery_monitor_sensors() -> Vec<SensorSpec> {
    vec![
        SensorSpec::new("voltage", "Voltage")
            .with_state_class("measurement")
            .with_unit("V")
            .with_device_class("voltage")
            .with_icon("mdi:flash-triangle"),
        SensorSpec::new("current", "Current")
            .with_state_class("measurement")
            .with_unit("A")
            .with_device_class("current")
            .with_icon("mdi:current-ac"),
        SensorSpec::new("power", "Power")
            .with_state_class("measurement")
            .with_unit("W")
            .with_device_class("power")
            .with_icon("mdi:home-lightning-bolt-outline"),
        SensorSpec::new("temp", "Temperature")
            .with_state_class("measurement")
            .with_unit("°C")
            .with_device_class("temperature")
            .with_icon("mdi:thermometer"),
        SensorSpec::new("soc", "Soc")
            .with_state_class("measurement")
            .with_unit("%")
            .with_device_class("battery"),
        SensorSpec::new("ah_remaining", "Remaining Energy")
            .with_state_class("measurement")
            .with_unit("kWh")
            .with_device_class("energy_storage"),
        SensorSpec::new("mins_remaining", "Remaining Time")
            .with_state_class("measurement")
            .with_unit("min")
            .with_device_class("duration"),
        SensorSpec::new("accum_charge_cap", "Accumulated Charged Load")
            .with_state_class("measurement")
            .with_unit("kWh")
            .with_device_class("energy_storage"),
        SensorSpec::new("discharge", "Discharged Today")
            .with_state_class("total_increasing")
            .with_unit("kWh")
            .with_device_class("energy"),
        SensorSpec::new("charge", "Charged Today")
            .with_state_class("total_increasing")
            .with_unit("kWh")
            .with_device_class("energy"),
        SensorSpec::new(HEARTBEAT_KEY, "Last Message")
            .with_device_class("timestamp")
            .with_icon("mdi:clock-check"),
    ]
}

fn slugify(name: &str) -> String {
    name.replace(' ', "_").to_lowercase()
}
