//! 向家庭自动化 broker 发布规范化数值。
//!
//! - [`Publisher`]：待发队列（每 topic 至多一条）、在途确认表、看门狗
//! - [`session::ConnectionMachine`]：Disconnected → Connecting → Connected 状态机
//! - [`mqtt`]：基于 rumqttc 的 [`Transport`] 实现与会话驱动任务

pub mod mqtt;
pub mod publisher;
pub mod session;

pub use mqtt::{
    LinkStatus, MqttLink, MqttLinkConfig, MqttTransport, PacketTracker, classify,
    inflight_window_for,
};
pub use publisher::{Publisher, PublisherConfig, PublisherSnapshot};
pub use session::{ConnectionMachine, FailureKind, LinkAction, LinkEvent, LinkState, RetryPolicy};

use async_trait::async_trait;

/// 发布链路错误。
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("payload error: {0}")]
    Payload(String),
    #[error("not connected")]
    NotConnected,
}

/// 传输层分配的消息 ID。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub u64);

/// 状态值。
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Number(f64),
    Text(String),
    /// 原样发送，不做 JSON 编码（如心跳时间戳）。
    Raw(String),
}

impl StateValue {
    pub fn encode(&self) -> Result<String, PublishError> {
        match self {
            Self::Number(value) => {
                serde_json::to_string(value).map_err(|err| PublishError::Payload(err.to_string()))
            }
            Self::Text(value) => {
                serde_json::to_string(value).map_err(|err| PublishError::Payload(err.to_string()))
            }
            Self::Raw(value) => Ok(value.clone()),
        }
    }
}

/// broker 传输抽象。
///
/// `publish` 不得阻塞等待 broker；消息交给传输层即返回其 ID，确认经由
/// [`Publisher::on_acknowledge`] 异步回报。
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str, retain: bool)
    -> Result<MessageId, PublishError>;
    async fn subscribe(&self, topic: &str) -> Result<(), PublishError>;
    async fn disconnect(&self) -> Result<(), PublishError>;
}
