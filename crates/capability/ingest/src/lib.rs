//! 通知接入：外设连接层与解码链路之间的边界。

use async_trait::async_trait;
use domain::RawNotification;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// 接入错误。
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("handler error: {0}")]
    Handler(String),
    #[error("source error: {0}")]
    Source(String),
    #[error("invalid hex line: {0}")]
    InvalidHex(String),
}

/// 通知处理器。
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, notification: RawNotification) -> Result<(), IngestError>;
}

/// 通知来源抽象。
#[async_trait]
pub trait Source: Send + Sync {
    async fn run(&self, handler: Arc<dyn NotificationHandler>) -> Result<(), IngestError>;
}

/// 占位源（用于接线与测试）。
#[derive(Debug, Default)]
pub struct NoopSource;

#[async_trait]
impl Source for NoopSource {
    async fn run(&self, _handler: Arc<dyn NotificationHandler>) -> Result<(), IngestError> {
        Ok(())
    }
}

/// stdin 十六进制源：每行一条通知。
///
/// 外设连接工具（如 BLE 抓包脚本）把 notify 值打印成十六进制后用管道接入。
#[derive(Debug, Default)]
pub struct StdinHexSource;

#[async_trait]
impl Source for StdinHexSource {
    async fn run(&self, handler: Arc<dyn NotificationHandler>) -> Result<(), IngestError> {
        let reader = BufReader::new(tokio::io::stdin());
        let count = pump_hex_lines(reader, handler).await?;
        info!(target: "bms.ingest", notifications = count, "stdin_source_closed");
        Ok(())
    }
}

/// 从按行的十六进制流读取通知，直到 EOF；返回成功交付的通知数。
///
/// 非法行与处理器错误只记录日志，不中断读取。
pub async fn pump_hex_lines<R>(
    reader: R,
    handler: Arc<dyn NotificationHandler>,
) -> Result<usize, IngestError>
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut lines = reader.lines();
    let mut delivered = 0;
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|err| IngestError::Source(err.to_string()))?
    {
        let payload = match parse_hex_line(&line) {
            Ok(Some(payload)) => payload,
            Ok(None) => continue,
            Err(err) => {
                warn!(target: "bms.ingest", error = %err, "hex_line_skipped");
                continue;
            }
        };
        let notification = RawNotification::new(payload, now_epoch_ms());
        match handler.handle(notification).await {
            Ok(()) => delivered += 1,
            Err(err) => warn!(target: "bms.ingest", error = %err, "notification_handler_failed"),
        }
    }
    Ok(delivered)
}

/// 解析一行十六进制文本；空行返回 `None`。
///
/// 忽略空白以及 `:`、`-` 分隔符，可选 `0x` 前缀。
pub fn parse_hex_line(line: &str) -> Result<Option<Vec<u8>>, IngestError> {
    let trimmed = line.trim();
    let trimmed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    let compact: String = trimmed
        .chars()
        .filter(|ch| !ch.is_whitespace() && *ch != ':' && *ch != '-')
        .collect();
    if compact.is_empty() {
        return Ok(None);
    }
    hex::decode(&compact)
        .map(Some)
        .map_err(|err| IngestError::InvalidHex(format!("{}: {}", compact, err)))
}

fn now_epoch_ms() -> i64 {
    let now = std::time::SystemTime::now();
    let duration = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    duration.as_millis() as i64
}
