//! 日志初始化与进程级计数指标。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 指标快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_received: u64,
    pub fields_decoded: u64,
    pub fields_undecodable: u64,
    pub readings_implausible: u64,
    pub flushes_completed: u64,
    pub flushes_skipped: u64,
    pub values_published: u64,
    pub publish_failures: u64,
    pub acknowledgements: u64,
    pub reconnects: u64,
    pub watchdog_resets: u64,
}

/// 进程级计数指标。
pub struct TelemetryMetrics {
    frames_received: AtomicU64,
    fields_decoded: AtomicU64,
    fields_undecodable: AtomicU64,
    readings_implausible: AtomicU64,
    flushes_completed: AtomicU64,
    flushes_skipped: AtomicU64,
    values_published: AtomicU64,
    publish_failures: AtomicU64,
    acknowledgements: AtomicU64,
    reconnects: AtomicU64,
    watchdog_resets: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            fields_decoded: AtomicU64::new(0),
            fields_undecodable: AtomicU64::new(0),
            readings_implausible: AtomicU64::new(0),
            flushes_completed: AtomicU64::new(0),
            flushes_skipped: AtomicU64::new(0),
            values_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            acknowledgements: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            watchdog_resets: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            fields_decoded: self.fields_decoded.load(Ordering::Relaxed),
            fields_undecodable: self.fields_undecodable.load(Ordering::Relaxed),
            readings_implausible: self.readings_implausible.load(Ordering::Relaxed),
            flushes_completed: self.flushes_completed.load(Ordering::Relaxed),
            flushes_skipped: self.flushes_skipped.load(Ordering::Relaxed),
            values_published: self.values_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            acknowledgements: self.acknowledgements.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            watchdog_resets: self.watchdog_resets.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 记录收到的通知帧。
pub fn record_frame_received() {
    metrics().frames_received.fetch_add(1, Ordering::Relaxed);
}

/// 记录成功解码的字段数。
pub fn record_fields_decoded(count: u64) {
    metrics().fields_decoded.fetch_add(count, Ordering::Relaxed);
}

/// 记录数字串无法解析而丢弃的字段数。
pub fn record_fields_undecodable(count: u64) {
    metrics()
        .fields_undecodable
        .fetch_add(count, Ordering::Relaxed);
}

/// 记录超出物理合理范围而丢弃的读数。
pub fn record_readings_implausible(count: u64) {
    metrics()
        .readings_implausible
        .fetch_add(count, Ordering::Relaxed);
}

pub fn record_flush_completed() {
    metrics().flushes_completed.fetch_add(1, Ordering::Relaxed);
}

/// 上一次刷新仍在进行，本次定时触发被丢弃。
pub fn record_flush_skipped() {
    metrics().flushes_skipped.fetch_add(1, Ordering::Relaxed);
}

/// 记录交给传输层的消息数。
pub fn record_value_published() {
    metrics().values_published.fetch_add(1, Ordering::Relaxed);
}

pub fn record_publish_failure() {
    metrics().publish_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录 broker 确认（PUBACK）。
pub fn record_acknowledgement() {
    metrics().acknowledgements.fetch_add(1, Ordering::Relaxed);
}

pub fn record_reconnect() {
    metrics().reconnects.fetch_add(1, Ordering::Relaxed);
}

/// 记录在途表超限触发的会话重建。
pub fn record_watchdog_reset() {
    metrics().watchdog_resets.fetch_add(1, Ordering::Relaxed);
}
