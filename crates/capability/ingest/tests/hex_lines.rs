use async_trait::async_trait;
use bms_ingest::{IngestError, NoopSource, NotificationHandler, Source, pump_hex_lines};
use domain::RawNotification;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::sync::Mutex;

#[derive(Default)]
struct CollectingHandler {
    payloads: Mutex<Vec<Vec<u8>>>,
}

#[async_trait]
impl NotificationHandler for CollectingHandler {
    async fn handle(&self, notification: RawNotification) -> Result<(), IngestError> {
        if notification.payload.is_empty() {
            return Err(IngestError::Handler("empty".to_string()));
        }
        assert!(notification.received_at_ms > 0);
        self.payloads.lock().await.push(notification.payload);
        Ok(())
    }
}

#[tokio::test]
async fn pump_skips_bad_lines_and_keeps_reading() {
    let input = b"bb4200c0\nnot-hex\n\n12 34 d6\n".to_vec();
    let handler = Arc::new(CollectingHandler::default());
    let delivered = pump_hex_lines(BufReader::new(&input[..]), handler.clone())
        .await
        .expect("pump");
    assert_eq!(delivered, 2);
    let payloads = handler.payloads.lock().await;
    assert_eq!(payloads[0], vec![0xbb, 0x42, 0x00, 0xc0]);
    assert_eq!(payloads[1], vec![0x12, 0x34, 0xd6]);
}

#[tokio::test]
async fn noop_source_returns_immediately() {
    let handler = Arc::new(CollectingHandler::default());
    NoopSource.run(handler.clone()).await.expect("run");
    assert!(handler.payloads.lock().await.is_empty());
}
