//! 链路装配：通知 → 规范化 → 聚合 → 定时刷新发布。

use bms_ingest::{IngestError, NotificationHandler};
use bms_normalize::Normalizer;
use bms_pipeline::{Aggregator, CounterRebaser};
use bms_publish::{Publisher, StateValue};
use bms_telemetry::{
    record_fields_decoded, record_fields_undecodable, record_flush_completed,
    record_flush_skipped, record_frame_received, record_readings_implausible,
};
use chrono::{DateTime, Local, NaiveDateTime, Utc};
use domain::RawNotification;
use ha_contract::HEARTBEAT_KEY;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// 通知处理器：规范化后写入聚合窗口。
pub struct FrameHandler {
    normalizer: Arc<Normalizer>,
    aggregator: Arc<Aggregator>,
}

impl FrameHandler {
    pub fn new(normalizer: Arc<Normalizer>, aggregator: Arc<Aggregator>) -> Self {
        Self {
            normalizer,
            aggregator,
        }
    }
}

#[async_trait::async_trait]
impl NotificationHandler for FrameHandler {
    async fn handle(&self, notification: RawNotification) -> Result<(), IngestError> {
        record_frame_received();
        let frame = self.normalizer.normalize(&notification).await;
        record_fields_decoded(frame.decoded as u64);
        if frame.undecodable > 0 {
            record_fields_undecodable(frame.undecodable as u64);
        }
        if !frame.implausible.is_empty() {
            record_readings_implausible(frame.implausible.len() as u64);
        }
        debug!(
            target: "bms.ingest",
            payload_size = notification.payload.len(),
            decoded = frame.decoded,
            readings = frame.readings.len(),
            received_at_ms = notification.received_at_ms,
            "frame_normalized"
        );
        self.aggregator.accumulate(&frame.readings).await;
        Ok(())
    }
}

/// 单次刷新的发布结果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub published: usize,
    pub failed: usize,
}

/// 周期刷新：归约窗口、累计量换算为当日增量、逐字段发布，并发送心跳。
pub struct FlushWorker {
    aggregator: Arc<Aggregator>,
    rebaser: Mutex<CounterRebaser>,
    publisher: Arc<Publisher>,
}

impl FlushWorker {
    pub fn new(aggregator: Arc<Aggregator>, publisher: Arc<Publisher>) -> Self {
        Self {
            aggregator,
            rebaser: Mutex::new(CounterRebaser::new()),
            publisher,
        }
    }

    pub async fn flush_once(&self) -> Option<FlushReport> {
        self.flush_at(Local::now().naive_local(), Utc::now()).await
    }

    /// 上一次刷新未结束时跳过，样本留给下一次。
    pub async fn flush_at(&self, local: NaiveDateTime, utc: DateTime<Utc>) -> Option<FlushReport> {
        let Some(flush) = self.aggregator.begin_flush().await else {
            record_flush_skipped();
            warn!(target: "bms.pipeline", "flush_skipped");
            return None;
        };
        let mut report = FlushReport::default();
        {
            let mut rebaser = self.rebaser.lock().await;
            for item in &flush.values {
                let value = if item.field.is_cumulative() {
                    rebaser.adjust(item.field, item.value, local)
                } else {
                    item.value
                };
                // 单字段失败不影响其余字段
                match self
                    .publisher
                    .send_value(item.field.key(), &StateValue::Number(value))
                    .await
                {
                    Ok(true) => report.published += 1,
                    Ok(false) => {}
                    Err(err) => {
                        report.failed += 1;
                        warn!(
                            target: "bms.pipeline",
                            field = %item.field,
                            value,
                            error = %err,
                            "value_publish_failed"
                        );
                    }
                }
            }
        }

        let heartbeat = StateValue::Raw(utc.to_rfc3339());
        match self.publisher.send_value(HEARTBEAT_KEY, &heartbeat).await {
            Ok(_) => {}
            Err(err) => {
                report.failed += 1;
                warn!(target: "bms.pipeline", error = %err, "heartbeat_publish_failed");
            }
        }

        record_flush_completed();
        info!(
            target: "bms.pipeline",
            fields = flush.values.len(),
            published = report.published,
            failed = report.failed,
            "flush_completed"
        );
        Some(report)
    }

    /// 按固定周期刷新；错过的周期直接跳过。
    pub fn spawn(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // 首个 tick 立即返回
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.flush_once().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bms_normalize::ValueTransformer;
    use bms_publish::{MessageId, PublishError, PublisherConfig, Transport};
    use chrono::{NaiveDate, TimeZone};
    use ha_contract::{DeviceInfo, SensorCatalog, battery_monitor_sensors};
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct RecordingTransport {
        next_id: AtomicU64,
        sent: std::sync::Mutex<Vec<(String, String)>>,
    }

    impl RecordingTransport {
        fn payloads(&self, topic: &str) -> Vec<String> {
            self.sent
                .lock()
                .expect("sent lock")
                .iter()
                .filter(|(sent, _)| sent == topic)
                .map(|(_, payload)| payload.clone())
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl Transport for RecordingTransport {
        async fn publish(
            &self,
            topic: &str,
            payload: &str,
            _retain: bool,
        ) -> Result<MessageId, PublishError> {
            self.sent
                .lock()
                .expect("sent lock")
                .push((topic.to_string(), payload.to_string()));
            Ok(MessageId(self.next_id.fetch_add(1, Ordering::SeqCst)))
        }

        async fn subscribe(&self, _topic: &str) -> Result<(), PublishError> {
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), PublishError> {
            Ok(())
        }
    }

    struct Harness {
        transport: Arc<RecordingTransport>,
        publisher: Arc<Publisher>,
        aggregator: Arc<Aggregator>,
        handler: FrameHandler,
        worker: FlushWorker,
    }

    async fn harness() -> Harness {
        let transport = Arc::new(RecordingTransport::default());
        let catalog = SensorCatalog::new(
            "homeassistant",
            "system-sensors/sensor",
            DeviceInfo::new("solar_batteries_ble", "Battery Status Monitor"),
            battery_monitor_sensors(),
        );
        let publisher = Arc::new(Publisher::new(
            transport.clone(),
            catalog,
            PublisherConfig::default(),
        ));
        publisher.on_connect().await.expect("connect");
        let aggregator = Arc::new(Aggregator::new());
        let normalizer = Arc::new(Normalizer::new(
            ValueTransformer::new(400.0).expect("capacity"),
        ));
        Harness {
            handler: FrameHandler::new(normalizer, aggregator.clone()),
            worker: FlushWorker::new(aggregator.clone(), publisher.clone()),
            transport,
            publisher,
            aggregator,
        }
    }

    fn local(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 18)
            .and_then(|date| date.and_hms_opt(hour, 0, 0))
            .expect("datetime")
    }

    fn utc() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 0).single().expect("utc")
    }

    async fn feed(harness: &Harness, hex_payload: &str) {
        let payload = hex::decode(hex_payload).expect("hex");
        harness
            .handler
            .handle(RawNotification::new(payload, 1))
            .await
            .expect("handle");
    }

    fn state_topic(harness: &Harness, key: &str) -> String {
        harness
            .publisher
            .catalog()
            .state_topic_for(key)
            .expect("state topic")
    }

    #[tokio::test]
    async fn flush_publishes_averages_and_heartbeat() {
        let harness = harness().await;
        feed(&harness, "bb4200c0").await;
        feed(&harness, "bb4220c0").await;

        let report = harness.worker.flush_at(local(9), utc()).await.expect("flush");
        assert_eq!(report, FlushReport { published: 1, failed: 0 });
        let voltage = state_topic(&harness, "voltage");
        assert_eq!(harness.transport.payloads(&voltage), vec!["42.1".to_string()]);
        let heartbeat = state_topic(&harness, HEARTBEAT_KEY);
        assert_eq!(
            harness.transport.payloads(&heartbeat),
            vec!["2026-10-18T09:30:00+00:00".to_string()]
        );
    }

    #[tokio::test]
    async fn cumulative_counters_publish_daily_delta() {
        let harness = harness().await;
        let charge = state_topic(&harness, "charge");

        feed(&harness, "bb100000d4").await;
        harness.worker.flush_at(local(9), utc()).await.expect("flush");
        feed(&harness, "bb200000d4").await;
        harness.worker.flush_at(local(10), utc()).await.expect("flush");

        assert_eq!(
            harness.transport.payloads(&charge),
            vec!["0.0".to_string(), "48.0".to_string()]
        );
    }

    #[tokio::test]
    async fn empty_window_still_sends_heartbeat() {
        let harness = harness().await;
        let report = harness.worker.flush_at(local(9), utc()).await.expect("flush");
        assert_eq!(report.published, 0);
        let heartbeat = state_topic(&harness, HEARTBEAT_KEY);
        assert_eq!(harness.transport.payloads(&heartbeat).len(), 1);
    }

    #[tokio::test]
    async fn overlapping_flush_is_skipped() {
        let harness = harness().await;
        feed(&harness, "bb4200c0").await;
        let held = harness.aggregator.begin_flush().await.expect("held flush");
        assert!(harness.worker.flush_at(local(9), utc()).await.is_none());
        drop(held);
        let heartbeat = state_topic(&harness, HEARTBEAT_KEY);
        assert!(harness.transport.payloads(&heartbeat).is_empty());
    }
}
