//! rumqttc 传输与会话驱动。

use crate::publisher::{AVAILABILITY_OFFLINE, Publisher};
use crate::session::{ConnectionMachine, FailureKind, LinkAction, LinkEvent, LinkState, RetryPolicy};
use crate::{MessageId, PublishError, Transport};
use async_trait::async_trait;
use bms_telemetry::record_reconnect;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS,
};
use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// MQTT 会话配置。
#[derive(Debug, Clone)]
pub struct MqttLinkConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub keep_alive: Duration,
    pub channel_capacity: usize,
    /// rumqttc 未确认窗口，须大于在途上限，否则窗口满时请求通道停止消费，在途表到不了上限。
    pub inflight_window: u16,
    /// 遗嘱 topic（payload 固定为 "offline"，保留）。
    pub last_will_topic: Option<String>,
    pub retry: RetryPolicy,
}

impl MqttLinkConfig {
    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        options.set_inflight(self.inflight_window.max(1));
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            options.set_credentials(username.clone(), password.clone());
        }
        if let Some(topic) = &self.last_will_topic {
            options.set_last_will(LastWill::new(
                topic.clone(),
                AVAILABILITY_OFFLINE,
                QoS::AtLeastOnce,
                true,
            ));
        }
        options
    }
}

/// 能容纳 `in_flight_limit + 1` 条未确认消息的窗口。
pub fn inflight_window_for(in_flight_limit: usize) -> u16 {
    u16::try_from(in_flight_limit.saturating_add(1)).unwrap_or(u16::MAX)
}

/// 本地消息 ID 与 MQTT packet id 的对应关系。
///
/// packet id 由事件循环在真正发出时分配，因此本地 ID 先按发送顺序排队，
/// 在 `Outgoing::Publish` 出现时绑定。
#[derive(Debug, Default)]
pub struct PacketTracker {
    next_local: u64,
    unbound: VecDeque<MessageId>,
    bound: HashMap<u16, MessageId>,
}

impl PacketTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&mut self) -> MessageId {
        self.next_local += 1;
        let id = MessageId(self.next_local);
        self.unbound.push_back(id);
        id
    }

    /// 撤回未交出的 ID（客户端拒绝入队时）。
    pub fn cancel(&mut self, id: MessageId) {
        self.unbound.retain(|queued| *queued != id);
    }

    /// 已绑定的 pkid 再次出现视为重传，忽略。
    pub fn bind(&mut self, pkid: u16) -> Option<MessageId> {
        if self.bound.contains_key(&pkid) {
            return None;
        }
        let id = self.unbound.pop_front()?;
        self.bound.insert(pkid, id);
        Some(id)
    }

    pub fn resolve(&mut self, pkid: u16) -> Option<MessageId> {
        self.bound.remove(&pkid)
    }

    pub fn reset(&mut self) {
        self.unbound.clear();
        self.bound.clear();
    }
}

/// 基于 rumqttc `AsyncClient` 的传输。客户端在每次重建会话时替换。
#[derive(Default)]
pub struct MqttTransport {
    client: RwLock<Option<AsyncClient>>,
    tracker: Mutex<PacketTracker>,
    send_lock: Mutex<()>,
}

impl MqttTransport {
    pub fn new() -> Self {
        Self::default()
    }

    async fn install(&self, client: AsyncClient) {
        let _send = self.send_lock.lock().await;
        *self.client.write().await = Some(client);
        self.tracker.lock().await.reset();
    }

    async fn clear(&self) {
        let _send = self.send_lock.lock().await;
        *self.client.write().await = None;
        self.tracker.lock().await.reset();
    }

    async fn bind_packet(&self, pkid: u16) {
        if self.tracker.lock().await.bind(pkid).is_none() {
            debug!(target: "bms.publish", pkid, "outgoing_packet_unbound");
        }
    }

    async fn resolve_ack(&self, pkid: u16) -> Option<MessageId> {
        self.tracker.lock().await.resolve(pkid)
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn publish(
        &self,
        topic: &str,
        payload: &str,
        retain: bool,
    ) -> Result<MessageId, PublishError> {
        // ID 入队与请求入队须保持同一顺序
        let _send = self.send_lock.lock().await;
        let guard = self.client.read().await;
        let client = guard.as_ref().ok_or(PublishError::NotConnected)?;
        let id = self.tracker.lock().await.issue();
        if let Err(err) = client.try_publish(topic, QoS::AtLeastOnce, retain, payload.as_bytes().to_vec()) {
            self.tracker.lock().await.cancel(id);
            return Err(PublishError::Transport(err.to_string()));
        }
        Ok(id)
    }

    async fn subscribe(&self, topic: &str) -> Result<(), PublishError> {
        let guard = self.client.read().await;
        let client = guard.as_ref().ok_or(PublishError::NotConnected)?;
        client
            .try_subscribe(topic, QoS::AtLeastOnce)
            .map_err(|err| PublishError::Transport(err.to_string()))
    }

    async fn disconnect(&self) -> Result<(), PublishError> {
        let guard = self.client.read().await;
        let Some(client) = guard.as_ref() else {
            return Ok(());
        };
        client
            .try_disconnect()
            .map_err(|err| PublishError::Transport(err.to_string()))
    }
}

/// 连接错误分类：拒绝与不可达采用不同的重试间隔。
pub fn classify(err: &ConnectionError) -> FailureKind {
    match err {
        ConnectionError::ConnectionRefused(_) => FailureKind::Refused,
        ConnectionError::Io(io) if io.kind() == ErrorKind::ConnectionRefused => FailureKind::Refused,
        _ => FailureKind::Unreachable,
    }
}

enum SessionEnd {
    Rebuild,
    Shutdown,
}

/// 会话驱动对外可见的状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatus {
    pub state: LinkState,
    pub last_failure: Option<FailureKind>,
    /// 已建立的客户端数（含看门狗重建）。
    pub sessions: u64,
}

/// 会话驱动：轮询事件循环，把连接事件转交给 [`Publisher`]。
pub struct MqttLink {
    config: MqttLinkConfig,
    transport: Arc<MqttTransport>,
    publisher: Arc<Publisher>,
    status: watch::Sender<LinkStatus>,
}

impl MqttLink {
    pub fn new(config: MqttLinkConfig, transport: Arc<MqttTransport>, publisher: Arc<Publisher>) -> Self {
        let (status, _) = watch::channel(LinkStatus {
            state: LinkState::Disconnected,
            last_failure: None,
            sessions: 0,
        });
        Self {
            config,
            transport,
            publisher,
            status,
        }
    }

    pub fn status(&self) -> watch::Receiver<LinkStatus> {
        self.status.subscribe()
    }

    fn report(&self, machine: &ConnectionMachine, failure: Option<FailureKind>) {
        self.status.send_modify(|status| {
            status.state = machine.state();
            if failure.is_some() {
                status.last_failure = failure;
            }
        });
    }

    /// 任务在主动断开（`Publisher::shutdown`）后结束。
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut machine = ConnectionMachine::new(self.config.retry);
        loop {
            let (client, mut eventloop) =
                AsyncClient::new(self.config.options(), self.config.channel_capacity.max(1));
            self.transport.install(client).await;
            machine.handle(LinkEvent::Attempt);
            self.status.send_modify(|status| {
                status.state = machine.state();
                status.sessions += 1;
            });
            info!(
                target: "bms.publish",
                host = %self.config.host,
                port = self.config.port,
                client_id = %self.config.client_id,
                "mqtt_session_started"
            );
            match self.drive(&mut machine, &mut eventloop).await {
                SessionEnd::Rebuild => {
                    record_reconnect();
                    warn!(target: "bms.publish", "mqtt_session_rebuilt");
                }
                SessionEnd::Shutdown => {
                    self.transport.clear().await;
                    self.status
                        .send_modify(|status| status.state = LinkState::Disconnected);
                    info!(target: "bms.publish", "mqtt_session_closed");
                    return;
                }
            }
        }
    }

    async fn drive(&self, machine: &mut ConnectionMachine, eventloop: &mut EventLoop) -> SessionEnd {
        loop {
            let polled = tokio::select! {
                _ = self.publisher.reset_requested() => {
                    machine.handle(LinkEvent::Watchdog);
                    self.report(machine, None);
                    return SessionEnd::Rebuild;
                }
                // 已连接时由 DISCONNECT 报文结束会话，先把离线声明送出去
                _ = self.publisher.stop_requested(), if machine.state() != LinkState::Connected => {
                    return SessionEnd::Shutdown;
                }
                polled = eventloop.poll() => polled,
            };
            match polled {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    let action = machine.handle(LinkEvent::ConnAck);
                    self.report(machine, None);
                    if action == LinkAction::Register {
                        if let Err(err) = self.publisher.on_connect().await {
                            warn!(target: "bms.publish", error = %err, "session_setup_failed");
                        }
                    }
                }
                Ok(Event::Incoming(Packet::PubAck(ack))) => {
                    if let Some(id) = self.transport.resolve_ack(ack.pkid).await {
                        self.publisher.on_acknowledge(id).await;
                    }
                }
                Ok(Event::Incoming(Packet::Publish(message))) => {
                    self.publisher.on_message(&message.topic, &message.payload).await;
                }
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                    self.transport.bind_packet(pkid).await;
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => return SessionEnd::Shutdown,
                Ok(_) => {}
                Err(err) => {
                    let kind = classify(&err);
                    let was_connected = machine.state() == LinkState::Connected;
                    let action = machine.handle(LinkEvent::Failure(kind));
                    self.report(machine, Some(kind));
                    if was_connected {
                        self.publisher.on_disconnect().await;
                        record_reconnect();
                    }
                    if let LinkAction::Retry(delay) = action {
                        warn!(
                            target: "bms.publish",
                            error = %err,
                            failure = ?kind,
                            retry_in_secs = delay.as_secs(),
                            "mqtt_connection_failed"
                        );
                        if !delay.is_zero() {
                            tokio::select! {
                                _ = tokio::time::sleep(delay) => {}
                                _ = self.publisher.stop_requested() => return SessionEnd::Shutdown,
                            }
                        }
                    }
                    machine.handle(LinkEvent::Attempt);
                    self.report(machine, None);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PublisherConfig, StateValue};
    use ha_contract::{DeviceInfo, SensorCatalog, battery_monitor_sensors};
    use rumqttc::ConnectReturnCode;

    fn link_config(channel_capacity: usize, inflight_window: u16) -> MqttLinkConfig {
        MqttLinkConfig {
            host: "broker.local".to_string(),
            port: 1883,
            username: Some("bms".to_string()),
            password: Some("secret".to_string()),
            client_id: "bms-bridge-test".to_string(),
            keep_alive: Duration::from_secs(30),
            channel_capacity,
            inflight_window,
            last_will_topic: Some("system-sensors/sensor/junctec/availability".to_string()),
            retry: RetryPolicy::default(),
        }
    }

    fn catalog(sensors: Vec<ha_contract::SensorSpec>) -> SensorCatalog {
        SensorCatalog::new(
            "homeassistant",
            "system-sensors/sensor",
            DeviceInfo::new("solar_batteries_ble", "Battery Status Monitor"),
            sensors,
        )
    }

    #[test]
    fn tracker_binds_in_send_order() {
        let mut tracker = PacketTracker::new();
        let first = tracker.issue();
        let second = tracker.issue();
        assert_eq!(tracker.bind(7), Some(first));
        assert_eq!(tracker.bind(8), Some(second));
        assert_eq!(tracker.resolve(8), Some(second));
        assert_eq!(tracker.resolve(7), Some(first));
        assert_eq!(tracker.resolve(7), None);
    }

    #[test]
    fn tracker_ignores_retransmissions_and_cancelled_ids() {
        let mut tracker = PacketTracker::new();
        let first = tracker.issue();
        let dropped = tracker.issue();
        tracker.cancel(dropped);
        assert_eq!(tracker.bind(1), Some(first));
        assert_eq!(tracker.bind(1), None);
        assert_eq!(tracker.bind(2), None);
        tracker.reset();
        assert_eq!(tracker.resolve(1), None);
    }

    #[test]
    fn refusals_are_classified_apart_from_unreachable() {
        let refused = ConnectionError::ConnectionRefused(ConnectReturnCode::NotAuthorized);
        assert_eq!(classify(&refused), FailureKind::Refused);
        let tcp_refused = ConnectionError::Io(std::io::Error::from(ErrorKind::ConnectionRefused));
        assert_eq!(classify(&tcp_refused), FailureKind::Refused);
        let timed_out = ConnectionError::Io(std::io::Error::from(ErrorKind::TimedOut));
        assert_eq!(classify(&timed_out), FailureKind::Unreachable);
        assert_eq!(classify(&ConnectionError::NetworkTimeout), FailureKind::Unreachable);
    }

    #[test]
    fn options_carry_retained_last_will() {
        let options = link_config(10, inflight_window_for(10_000)).options();
        assert_eq!(options.broker_address(), ("broker.local".to_string(), 1883));
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
        assert!(options.clean_session());
        let will = options.last_will().expect("last will");
        assert!(will.retain);
        assert_eq!(will.qos, QoS::AtLeastOnce);
        assert_eq!(options.inflight(), 10_001);
    }

    #[test]
    fn inflight_window_exceeds_limit() {
        assert_eq!(inflight_window_for(10_000), 10_001);
        assert_eq!(inflight_window_for(0), 1);
        assert_eq!(inflight_window_for(usize::MAX), u16::MAX);
    }

    #[tokio::test]
    async fn full_request_channel_counts_toward_stall() {
        // 事件循环不轮询：请求通道满后 try_publish 一直失败
        let (client, _eventloop) = AsyncClient::new(link_config(10, 11).options(), 10);
        let transport = Arc::new(MqttTransport::new());
        transport.install(client).await;
        let publisher = Publisher::new(
            transport.clone(),
            catalog(Vec::new()),
            PublisherConfig {
                in_flight_limit: 50,
                status_topics: Vec::new(),
            },
        );
        publisher.on_connect().await.expect("connect");

        let mut errors = 0;
        for index in 0..200 {
            let topic = format!("bms/test/{}", index % 5);
            if publisher
                .enqueue(topic, &StateValue::Number(index as f64))
                .await
                .is_err()
            {
                errors += 1;
            }
        }

        assert!(errors > 0);
        let snapshot = publisher.snapshot().await;
        assert!(!snapshot.connected);
        assert_eq!(snapshot.in_flight, 0);
        assert_eq!(snapshot.rejected, 0);
        assert_eq!(snapshot.pending, 5);
        tokio::time::timeout(Duration::from_millis(100), publisher.reset_requested())
            .await
            .expect("reset requested");
    }

    #[tokio::test]
    async fn small_request_channel_defers_remaining_configs() {
        let (client, _eventloop) = AsyncClient::new(link_config(10, 11).options(), 10);
        let transport = Arc::new(MqttTransport::new());
        transport.install(client).await;
        let catalog = catalog(battery_monitor_sensors());
        let last = catalog.sensors.last().cloned().expect("sensor");
        let last_topic = catalog.config_topic(&last);
        let publisher = Publisher::new(transport.clone(), catalog, PublisherConfig::default());

        // 订阅 + 在线声明 + 8 条配置占满通道，其余 3 条配置转入待发队列
        let _ = publisher.on_connect().await;
        let snapshot = publisher.snapshot().await;
        assert_eq!(snapshot.in_flight, 9);
        assert_eq!(snapshot.pending, 3);
        let deferred = publisher.pending_payload(&last_topic).await.expect("deferred config");
        assert!(deferred.contains("\"platform\":\"mqtt\""));
    }
}
