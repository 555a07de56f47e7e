//! 至少一次发布：待发队列 + 在途确认表 + 看门狗。

use crate::{MessageId, PublishError, StateValue, Transport};
use bms_telemetry::{
    record_acknowledgement, record_publish_failure, record_value_published, record_watchdog_reset,
};
use ha_contract::SensorCatalog;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

pub const AVAILABILITY_ONLINE: &str = "online";
pub const AVAILABILITY_OFFLINE: &str = "offline";

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// 在途未确认消息数超过该值时重建会话。
    pub in_flight_limit: usize,
    /// 平台状态 topic；收到 "online" 时重新注册。
    pub status_topics: Vec<String>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            in_flight_limit: 10_000,
            status_topics: vec!["homeassistant/status".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublisherSnapshot {
    pub connected: bool,
    pub pending: usize,
    pub in_flight: usize,
    /// 连续被传输层拒收的投递次数。
    pub rejected: usize,
}

#[derive(Debug, Clone)]
struct Pending {
    payload: String,
    retain: bool,
}

impl Pending {
    fn plain(payload: String) -> Self {
        Self {
            payload,
            retain: false,
        }
    }
}

#[derive(Debug, Default)]
struct PublisherState {
    connected: bool,
    /// topic → 最新 payload
    queue: BTreeMap<String, Pending>,
    in_flight: HashMap<MessageId, String>,
    /// 传输层请求通道满时消息进不了在途表，拒收也计入积压。
    rejected: usize,
}

impl PublisherState {
    fn backlog(&self) -> usize {
        self.in_flight.len() + self.rejected
    }
}

pub struct Publisher {
    transport: Arc<dyn Transport>,
    catalog: SensorCatalog,
    config: PublisherConfig,
    state: Mutex<PublisherState>,
    reset: Notify,
    stop: Notify,
}

impl Publisher {
    pub fn new(transport: Arc<dyn Transport>, catalog: SensorCatalog, config: PublisherConfig) -> Self {
        Self {
            transport,
            catalog,
            config,
            state: Mutex::new(PublisherState::default()),
            reset: Notify::new(),
            stop: Notify::new(),
        }
    }

    pub fn catalog(&self) -> &SensorCatalog {
        &self.catalog
    }

    pub async fn snapshot(&self) -> PublisherSnapshot {
        let state = self.state.lock().await;
        PublisherSnapshot {
            connected: state.connected,
            pending: state.queue.len(),
            in_flight: state.in_flight.len(),
            rejected: state.rejected,
        }
    }

    /// 某 topic 当前待发的 payload。
    pub async fn pending_payload(&self, topic: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .queue
            .get(topic)
            .map(|pending| pending.payload.clone())
    }

    /// 写入待发队列（同 topic 覆盖旧值）；已连接时投递整个队列。
    pub async fn enqueue(&self, topic: impl Into<String>, value: &StateValue) -> Result<(), PublishError> {
        let payload = value.encode()?;
        let topic = topic.into();
        let mut state = self.state.lock().await;
        state.queue.insert(topic.clone(), Pending::plain(payload));
        if !state.connected {
            debug!(target: "bms.publish", topic = %topic, pending = state.queue.len(), "state_queued_offline");
            return Ok(());
        }
        self.deliver_pending(&mut state).await
    }

    /// 按传感器键发布；目录中没有的键返回 `false`。
    pub async fn send_value(&self, key: &str, value: &StateValue) -> Result<bool, PublishError> {
        let Some(topic) = self.catalog.state_topic_for(key) else {
            debug!(target: "bms.publish", key, "sensor_not_in_catalog");
            return Ok(false);
        };
        self.enqueue(topic, value).await?;
        Ok(true)
    }

    /// 发布全部 discovery 配置并排入初始值。可重复调用。
    pub async fn register_sensors(&self) -> Result<usize, PublishError> {
        let mut state = self.state.lock().await;
        if !state.connected {
            return Err(PublishError::NotConnected);
        }
        let registered = self.register_locked(&mut state).await?;
        self.deliver_pending(&mut state).await?;
        Ok(registered)
    }

    /// 会话建立：订阅状态 topic、声明在线、注册、投递积压。
    pub async fn on_connect(&self) -> Result<(), PublishError> {
        let mut state = self.state.lock().await;
        state.connected = true;
        state.rejected = 0;
        info!(target: "bms.publish", pending = state.queue.len(), "broker_connected");
        for topic in &self.config.status_topics {
            if let Err(err) = self.transport.subscribe(topic).await {
                warn!(target: "bms.publish", topic = %topic, error = %err, "status_subscribe_failed");
            }
        }
        if let Err(err) = self.announce(&mut state, AVAILABILITY_ONLINE).await {
            warn!(target: "bms.publish", error = %err, "availability_queued");
            state.queue.insert(
                self.catalog.availability_topic(),
                Pending {
                    payload: AVAILABILITY_ONLINE.to_string(),
                    retain: true,
                },
            );
        }
        let registered = self.register_locked(&mut state).await?;
        info!(target: "bms.publish", sensors = registered, "sensors_registered");
        self.deliver_pending(&mut state).await
    }

    pub async fn on_disconnect(&self) {
        let mut state = self.state.lock().await;
        if state.connected {
            warn!(
                target: "bms.publish",
                pending = state.queue.len(),
                in_flight = state.in_flight.len(),
                "broker_disconnected"
            );
        }
        state.connected = false;
    }

    /// broker 确认；未知 ID 忽略。
    pub async fn on_acknowledge(&self, id: MessageId) {
        let mut state = self.state.lock().await;
        if state.in_flight.remove(&id).is_some() {
            state.rejected = 0;
            record_acknowledgement();
        } else {
            debug!(target: "bms.publish", message_id = id.0, "unknown_acknowledgement");
        }
    }

    pub async fn on_message(&self, topic: &str, payload: &[u8]) {
        let text = String::from_utf8_lossy(payload);
        if !self.config.status_topics.iter().any(|status| status == topic) {
            debug!(target: "bms.publish", topic, "message_ignored");
            return;
        }
        info!(target: "bms.publish", topic, status = %text, "platform_status");
        if text.trim().eq_ignore_ascii_case(AVAILABILITY_ONLINE) {
            match self.register_sensors().await {
                Ok(registered) => {
                    info!(target: "bms.publish", sensors = registered, "sensors_reregistered")
                }
                Err(err) => warn!(target: "bms.publish", error = %err, "sensor_registration_failed"),
            }
        }
    }

    /// 等待看门狗请求重建会话。
    pub async fn reset_requested(&self) {
        self.reset.notified().await;
    }

    /// 等待进程退出请求（重试等待期间用来提前结束会话任务）。
    pub async fn stop_requested(&self) {
        self.stop.notified().await;
    }

    /// 声明离线（保留消息）并断开。
    pub async fn shutdown(&self) -> Result<(), PublishError> {
        self.stop.notify_one();
        let mut state = self.state.lock().await;
        if state.connected {
            self.announce(&mut state, AVAILABILITY_OFFLINE).await?;
        }
        state.connected = false;
        info!(
            target: "bms.publish",
            pending = state.queue.len(),
            in_flight = state.in_flight.len(),
            "publisher_shutdown"
        );
        self.transport.disconnect().await
    }

    async fn announce(&self, state: &mut PublisherState, status: &str) -> Result<(), PublishError> {
        let topic = self.catalog.availability_topic();
        let id = self.transport.publish(&topic, status, true).await?;
        state.in_flight.insert(id, status.to_string());
        Ok(())
    }

    /// 发送失败的配置转入待发队列，随下一次投递补发。
    ///
    /// 同一传感器的 `config` topic 排序在 `state` 之前，补发顺序不变。
    async fn register_locked(&self, state: &mut PublisherState) -> Result<usize, PublishError> {
        let mut deferred = 0;
        for sensor in &self.catalog.sensors {
            let payload = self
                .catalog
                .config_payload(sensor)
                .map_err(|err| PublishError::Payload(err.to_string()))?;
            let topic = self.catalog.config_topic(sensor);
            if deferred > 0 {
                deferred += 1;
                state.queue.insert(topic, Pending::plain(payload));
            } else {
                match self.transport.publish(&topic, &payload, false).await {
                    Ok(id) => {
                        state.in_flight.insert(id, payload);
                    }
                    Err(err) => {
                        warn!(target: "bms.publish", topic = %topic, error = %err, "sensor_config_deferred");
                        deferred += 1;
                        state.queue.insert(topic, Pending::plain(payload));
                    }
                }
            }
            if let Some(initial) = &sensor.initial {
                // 已有待发值优先
                state
                    .queue
                    .entry(self.catalog.state_topic(sensor))
                    .or_insert_with(|| Pending::plain(initial.to_string()));
            }
        }
        if deferred > 0 {
            debug!(target: "bms.publish", deferred, "sensor_configs_queued");
        }
        Ok(self.catalog.sensors.len())
    }

    async fn deliver_pending(&self, state: &mut PublisherState) -> Result<(), PublishError> {
        if state.backlog() > self.config.in_flight_limit {
            self.trip_watchdog(state);
            return Ok(());
        }
        let pending = std::mem::take(&mut state.queue);
        let mut failure = None;
        for (topic, item) in pending {
            if failure.is_some() {
                state.queue.insert(topic, item);
                continue;
            }
            match self.transport.publish(&topic, &item.payload, item.retain).await {
                Ok(id) => {
                    record_value_published();
                    state.rejected = 0;
                    state.in_flight.insert(id, item.payload);
                }
                Err(err) => {
                    record_publish_failure();
                    state.rejected += 1;
                    warn!(target: "bms.publish", topic = %topic, error = %err, "state_publish_failed");
                    state.queue.insert(topic, item);
                    failure = Some(err);
                }
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// 清空在途表并请求重建会话；待发队列保留，重连后补发（至少一次语义允许重复）。
    fn trip_watchdog(&self, state: &mut PublisherState) {
        warn!(
            target: "bms.publish",
            in_flight = state.in_flight.len(),
            rejected = state.rejected,
            limit = self.config.in_flight_limit,
            "delivery_stalled"
        );
        state.in_flight.clear();
        state.rejected = 0;
        state.connected = false;
        record_watchdog_reset();
        self.reset.notify_one();
    }
}
