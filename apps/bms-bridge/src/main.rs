//! 电池监测器遥测桥：通知接入 → 规范化 → 周期聚合 → MQTT 自动发现发布。

mod bridge;

use bms_config::{AppConfig, SourceKind};
use bms_ingest::{NoopSource, NotificationHandler, Source, StdinHexSource};
use bms_normalize::{Normalizer, ValueTransformer};
use bms_pipeline::Aggregator;
use bms_publish::{
    MqttLink, MqttLinkConfig, MqttTransport, Publisher, PublisherConfig, RetryPolicy,
    inflight_window_for,
};
use bms_telemetry::{init_tracing, metrics};
use bridge::{FlushWorker, FrameHandler};
use ha_contract::{DeviceInfo, SensorCatalog, battery_monitor_sensors};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在）
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    init_tracing();

    let mut device = DeviceInfo::new(config.device_id.clone(), config.device_name.clone());
    if let Some(model) = &config.device_model {
        device = device.with_model(model.clone());
    }
    if let Some(manufacturer) = &config.device_manufacturer {
        device = device.with_manufacturer(manufacturer.clone());
    }
    let catalog = SensorCatalog::new(
        config.discovery_prefix.clone(),
        config.availability_namespace.clone(),
        device,
        battery_monitor_sensors(),
    );
    let availability_topic = catalog.availability_topic();

    // broker 会话：遗嘱 = availability offline（保留）
    let transport = Arc::new(MqttTransport::new());
    let publisher = Arc::new(Publisher::new(
        transport.clone(),
        catalog,
        PublisherConfig {
            in_flight_limit: config.in_flight_limit,
            status_topics: config.status_topics.clone(),
        },
    ));
    let link = MqttLink::new(
        MqttLinkConfig {
            host: config.mqtt_host.clone(),
            port: config.mqtt_port,
            username: config.mqtt_username.clone(),
            password: config.mqtt_password.clone(),
            client_id: config.mqtt_client_id.clone(),
            keep_alive: Duration::from_secs(config.mqtt_keep_alive_seconds),
            channel_capacity: config.mqtt_channel_capacity,
            inflight_window: inflight_window_for(config.in_flight_limit),
            last_will_topic: Some(availability_topic),
            retry: RetryPolicy {
                refused: Duration::from_secs(config.retry_refused_seconds),
                unreachable: Duration::from_secs(config.retry_unreachable_seconds),
            },
        },
        transport,
        publisher.clone(),
    )
    .spawn();

    // 规范化 + 聚合 + 周期刷新
    let normalizer = Arc::new(Normalizer::new(ValueTransformer::new(
        config.battery_capacity_ah,
    )?));
    let aggregator = Arc::new(Aggregator::new());
    let worker = Arc::new(FlushWorker::new(aggregator.clone(), publisher.clone()));
    let flusher = worker
        .clone()
        .spawn(Duration::from_secs(config.flush_interval_seconds));

    let handler: Arc<dyn NotificationHandler> =
        Arc::new(FrameHandler::new(normalizer, aggregator));
    let source: Arc<dyn Source> = match config.source {
        SourceKind::Stdin => Arc::new(StdinHexSource),
        SourceKind::None => Arc::new(NoopSource),
    };
    let source_task = tokio::spawn(async move {
        if let Err(err) = source.run(handler).await {
            warn!(target: "bms.ingest", error = %err, "source_failed");
        }
    });

    info!(
        target: "bms.bridge",
        mqtt_host = %config.mqtt_host,
        mqtt_port = config.mqtt_port,
        flush_interval_seconds = config.flush_interval_seconds,
        source = ?config.source,
        "bridge_started"
    );

    shutdown_signal().await;
    info!(target: "bms.bridge", "shutdown_requested");
    source_task.abort();
    flusher.abort();
    worker.flush_once().await;
    if let Err(err) = publisher.shutdown().await {
        warn!(target: "bms.bridge", error = %err, "publisher_shutdown_failed");
    }
    if tokio::time::timeout(Duration::from_secs(5), link).await.is_err() {
        warn!(target: "bms.bridge", "mqtt_link_shutdown_timeout");
    }
    info!(target: "bms.bridge", metrics = ?metrics().snapshot(), "bridge_stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target: "bms.bridge", error = %err, "ctrl_c_listener_failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(target: "bms.bridge", error = %err, "sigterm_listener_failed");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
