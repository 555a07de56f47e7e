//! broker 连接状态机。

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// 连接失败分类。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// broker 主动拒绝（CONNACK 拒绝或 TCP 拒绝）。
    Refused,
    /// 网络不可达、超时等。
    Unreachable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// 开始一次连接尝试。
    Attempt,
    ConnAck,
    Failure(FailureKind),
    /// 在途表超限。
    Watchdog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAction {
    None,
    /// 重新订阅并重新注册传感器。
    Register,
    /// 等待后再次尝试（零表示立即）。
    Retry(Duration),
    /// 丢弃当前客户端，从头建立会话。
    Rebuild,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub refused: Duration,
    pub unreachable: Duration,
}

impl RetryPolicy {
    pub fn delay(&self, kind: FailureKind) -> Duration {
        match kind {
            FailureKind::Refused => self.refused,
            FailureKind::Unreachable => self.unreachable,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            refused: Duration::from_secs(120),
            unreachable: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: LinkState,
    policy: RetryPolicy,
}

impl ConnectionMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: LinkState::Disconnected,
            policy,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn handle(&mut self, event: LinkEvent) -> LinkAction {
        let (next, action) = match (self.state, event) {
            (_, LinkEvent::Watchdog) => (LinkState::Disconnected, LinkAction::Rebuild),
            (LinkState::Disconnected, LinkEvent::Attempt) => (LinkState::Connecting, LinkAction::None),
            (state, LinkEvent::Attempt) => (state, LinkAction::None),
            (_, LinkEvent::ConnAck) => (LinkState::Connected, LinkAction::Register),
            // 已建立的会话断开：立即重连一次。
            (LinkState::Connected, LinkEvent::Failure(_)) => {
                (LinkState::Disconnected, LinkAction::Retry(Duration::ZERO))
            }
            (_, LinkEvent::Failure(kind)) => (
                LinkState::Disconnected,
                LinkAction::Retry(self.policy.delay(kind)),
            ),
        };
        self.state = next;
        action
    }
}
