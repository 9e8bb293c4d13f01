use serde::Serialize;

use super::error::AppError;

/// プッシュ購読の状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PushState {
    Disconnected,
    /// 前提条件（組織ID / クライアント）待ちでリトライ中
    Retrying {
        attempt: u32,
    },
    Connecting,
    /// チャネル確立済み。confirmed は実イベント受信で true になる
    Live {
        confirmed: bool,
    },
    /// リトライ上限到達。セッション中はフォールバックのみ
    Exhausted,
}

impl PushState {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Retrying { .. } => "retrying",
            Self::Connecting => "connecting",
            Self::Live { confirmed: false } => "live",
            Self::Live { confirmed: true } => "confirmed",
            Self::Exhausted => "exhausted",
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live { .. })
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Live { confirmed: true })
    }
}

/// 状態遷移
#[derive(Debug, Clone, Serialize)]
pub struct StateTransition {
    pub prev_state: String,
    pub new_state: PushState,
}

/// 購読ステートマシン（リトライ上限付き）
///
/// ```text
/// Disconnected/Retrying/Live --attempt(ready)--> Connecting --connected--> Live{false} --event--> Live{true}
/// Disconnected/Retrying/Live --attempt(!ready, retries < max)--> Retrying{n}
/// Disconnected/Retrying/Live --attempt(!ready, retries == max)--> Exhausted
/// Connecting --failed--> Exhausted
/// * --reset--> Disconnected
/// ```
#[derive(Debug, Clone)]
pub struct PushMachine {
    state: PushState,
    retries: u32,
    max_retries: u32,
}

impl PushMachine {
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: PushState::Disconnected,
            retries: 0,
            max_retries,
        }
    }

    pub fn state(&self) -> PushState {
        self.state
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    fn transition(&mut self, new_state: PushState) -> StateTransition {
        let prev = self.state.as_str().to_string();
        self.state = new_state;
        StateTransition {
            prev_state: prev,
            new_state,
        }
    }

    /// 購読を試みる。ready は組織IDとクライアントが揃っているか
    pub fn attempt(&mut self, ready: bool) -> Result<StateTransition, AppError> {
        match self.state {
            PushState::Disconnected | PushState::Retrying { .. } | PushState::Live { .. } => {
                if ready {
                    self.retries = 0;
                    Ok(self.transition(PushState::Connecting))
                } else if self.retries < self.max_retries {
                    self.retries += 1;
                    let attempt = self.retries;
                    Ok(self.transition(PushState::Retrying { attempt }))
                } else {
                    Ok(self.transition(PushState::Exhausted))
                }
            }
            other => Err(AppError::invalid_state(format!(
                "attempt は {} 状態では実行できません",
                other.as_str()
            ))),
        }
    }

    /// チャネル確立: Connecting → Live{false}
    pub fn connected(&mut self) -> Result<StateTransition, AppError> {
        match self.state {
            PushState::Connecting => Ok(self.transition(PushState::Live { confirmed: false })),
            other => Err(AppError::invalid_state(format!(
                "connected は {} 状態では実行できません",
                other.as_str()
            ))),
        }
    }

    /// チャネル確立失敗: Connecting → Exhausted
    pub fn failed(&mut self) -> Result<StateTransition, AppError> {
        match self.state {
            PushState::Connecting => Ok(self.transition(PushState::Exhausted)),
            other => Err(AppError::invalid_state(format!(
                "failed は {} 状態では実行できません",
                other.as_str()
            ))),
        }
    }

    /// 実イベント受信。初回確認時のみ遷移を返す
    pub fn event_delivered(&mut self) -> Option<StateTransition> {
        match self.state {
            PushState::Live { confirmed: false } => {
                Some(self.transition(PushState::Live { confirmed: true }))
            }
            _ => None,
        }
    }

    /// 破棄: 状態とリトライカウンタを初期化
    pub fn reset(&mut self) {
        self.state = PushState::Disconnected;
        self.retries = 0;
    }
}

/// レガシーポーリングの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    Idle,
    Polling,
}

impl PollState {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Idle => "idle",
            Self::Polling => "polling",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_attempt_connects() {
        let mut m = PushMachine::new(15);
        let t = m.attempt(true).unwrap();
        assert_eq!(t.prev_state, "disconnected");
        assert_eq!(t.new_state, PushState::Connecting);
        let t = m.connected().unwrap();
        assert_eq!(t.new_state, PushState::Live { confirmed: false });
    }

    #[test]
    fn test_retry_bound_reaches_exhausted() {
        let mut m = PushMachine::new(15);
        for n in 1..=15 {
            let t = m.attempt(false).unwrap();
            assert_eq!(t.new_state, PushState::Retrying { attempt: n });
        }
        let t = m.attempt(false).unwrap();
        assert_eq!(t.new_state, PushState::Exhausted);
        assert!(m.attempt(true).is_err());
    }

    #[test]
    fn test_ready_attempt_resets_retry_counter() {
        let mut m = PushMachine::new(3);
        m.attempt(false).unwrap();
        m.attempt(false).unwrap();
        assert_eq!(m.retries(), 2);
        m.attempt(true).unwrap();
        assert_eq!(m.retries(), 0);
    }

    #[test]
    fn test_event_confirms_only_once() {
        let mut m = PushMachine::new(15);
        m.attempt(true).unwrap();
        m.connected().unwrap();
        let t = m.event_delivered().unwrap();
        assert_eq!(t.prev_state, "live");
        assert!(m.state().is_confirmed());
        assert!(m.event_delivered().is_none());
    }

    #[test]
    fn test_failed_subscribe_is_terminal() {
        let mut m = PushMachine::new(15);
        m.attempt(true).unwrap();
        let t = m.failed().unwrap();
        assert_eq!(t.new_state, PushState::Exhausted);
        assert!(m.connected().is_err());
    }

    #[test]
    fn test_invalid_transitions() {
        let mut m = PushMachine::new(15);
        assert!(m.connected().is_err());
        assert!(m.failed().is_err());
        assert!(m.event_delivered().is_none());
        m.attempt(true).unwrap();
        assert!(m.attempt(true).is_err());
    }

    #[test]
    fn test_reset_from_any_state() {
        let mut m = PushMachine::new(1);
        m.attempt(false).unwrap();
        m.attempt(false).unwrap();
        assert_eq!(m.state(), PushState::Exhausted);
        m.reset();
        assert_eq!(m.state(), PushState::Disconnected);
        assert_eq!(m.retries(), 0);
    }
}
