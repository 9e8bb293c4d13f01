use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::sync_session::SyncEvent;
use crate::domain::session::{PushMachine, PushState, StateTransition};
use crate::infra::metrics::Metrics;
use crate::infra::realtime::{
    ChannelHandle, ChannelSpec, ChannelStatus, RealtimeMessage, RealtimeProvider,
};
use crate::infra::timer::{delay_task, TaskSlot};

/// subscribe の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// プロバイダ未設定（レガシーポーリングのみ）
    Disabled,
    Live,
    Retrying(u32),
    Exhausted,
}

/// 組織スコープのジョブ変更購読を一本だけ保持する
pub struct PushSubscriptionManager {
    provider: Option<Arc<dyn RealtimeProvider>>,
    org_id: String,
    machine: PushMachine,
    retry_interval: Duration,
    retry: TaskSlot,
    forwarder: TaskSlot,
    channel: Option<ChannelHandle>,
    attempted: bool,
    metrics: Arc<Metrics>,
    tx: mpsc::UnboundedSender<SyncEvent>,
}

impl PushSubscriptionManager {
    pub fn new(
        provider: Option<Arc<dyn RealtimeProvider>>,
        org_id: &str,
        max_retries: u32,
        retry_interval: Duration,
        metrics: Arc<Metrics>,
        tx: mpsc::UnboundedSender<SyncEvent>,
    ) -> Self {
        Self {
            provider,
            org_id: org_id.to_string(),
            machine: PushMachine::new(max_retries),
            retry_interval,
            retry: TaskSlot::new("subscribe-retry"),
            forwarder: TaskSlot::new("realtime-forwarder"),
            channel: None,
            attempted: false,
            metrics,
            tx,
        }
    }

    pub fn state(&self) -> PushState {
        self.machine.state()
    }

    pub fn retries(&self) -> u32 {
        self.machine.retries()
    }

    /// 購読を一度でも試みたか（フォールバック起動の前提）
    pub fn has_attempted(&self) -> bool {
        self.attempted
    }

    pub fn is_confirmed(&self) -> bool {
        self.machine.state().is_confirmed()
    }

    fn is_ready(&self) -> bool {
        !self.org_id.is_empty() && self.provider.as_ref().is_some_and(|p| p.is_ready())
    }

    /// 購読を試みる。前提が揃っていなければリトライタイマーを張る
    pub async fn subscribe(&mut self) -> SubscribeOutcome {
        let Some(provider) = self.provider.clone() else {
            return SubscribeOutcome::Disabled;
        };
        if self.machine.state() == PushState::Exhausted {
            return SubscribeOutcome::Exhausted;
        }

        self.attempted = true;
        self.metrics.inc_subscribe_attempts();

        let ready = self.is_ready();
        let transition = match self.machine.attempt(ready) {
            Ok(t) => t,
            Err(e) => {
                log::warn!("Subscribe skipped: {}", e.message);
                return SubscribeOutcome::Exhausted;
            }
        };

        match transition.new_state {
            PushState::Retrying { attempt } => {
                self.metrics.inc_subscribe_retries();
                log::debug!(
                    "Realtime not ready (org set: {}), retry {}/{} in {}ms",
                    !self.org_id.is_empty(),
                    attempt,
                    self.machine.max_retries(),
                    self.retry_interval.as_millis()
                );
                let delay = self.retry_interval;
                let tx = self.tx.clone();
                self.retry.arm(move |token| {
                    delay_task(delay, tx, SyncEvent::RetrySubscribe { token })
                });
                SubscribeOutcome::Retrying(attempt)
            }
            PushState::Exhausted => {
                self.retry.cancel();
                log::warn!(
                    "Realtime subscription unavailable after {} retries; using fallback polling",
                    self.machine.max_retries()
                );
                SubscribeOutcome::Exhausted
            }
            _ => self.open_channel(provider).await,
        }
    }

    async fn open_channel(&mut self, provider: Arc<dyn RealtimeProvider>) -> SubscribeOutcome {
        self.retry.cancel();
        self.release_channel(&provider).await;

        let spec = ChannelSpec::jobs_for_organisation(&self.org_id);
        let topic = spec.topic.clone();
        match provider.subscribe(spec).await {
            Ok(channel) => {
                if let Err(e) = self.machine.connected() {
                    log::error!("Unexpected subscribe state: {}", e.message);
                }
                self.channel = Some(channel.handle);
                let mut messages = channel.messages;
                let tx = self.tx.clone();
                self.forwarder.arm(move |token| async move {
                    while let Some(message) = messages.recv().await {
                        if tx.send(SyncEvent::Realtime { token, message }).is_err() {
                            break;
                        }
                    }
                });
                log::info!("Realtime channel opened: {} via {}", topic, provider.name());
                SubscribeOutcome::Live
            }
            Err(e) => {
                if let Err(state_err) = self.machine.failed() {
                    log::error!("Unexpected subscribe state: {}", state_err.message);
                }
                log::error!("Realtime subscribe failed for {}: {}", topic, e);
                SubscribeOutcome::Exhausted
            }
        }
    }

    async fn release_channel(&mut self, provider: &Arc<dyn RealtimeProvider>) {
        self.forwarder.cancel();
        if let Some(handle) = self.channel.take() {
            if let Err(e) = provider.unsubscribe(handle).await {
                log::warn!("Realtime unsubscribe failed: {}", e);
            }
        }
    }

    /// リトライタイマー発火の受理
    pub fn accept_retry(&mut self, token: u64) -> bool {
        self.retry.release(token)
    }

    /// 現在のチャネルからのメッセージか
    pub fn accept_message(&self, token: u64) -> bool {
        self.forwarder.is_current(token)
    }

    /// チャネルメッセージを処理する。変更イベントなら true
    ///
    /// 初回の変更イベントで Live{confirmed} に遷移する。接続状態の通知は
    /// フォールバックを止めない。
    pub fn on_message(&mut self, message: &RealtimeMessage) -> (bool, Option<StateTransition>) {
        match message {
            RealtimeMessage::Change(event) => {
                self.metrics.inc_push_events();
                log::debug!(
                    "Realtime {:?} on {} ({})",
                    event.kind,
                    event.table,
                    event.record_id.as_deref().unwrap_or("-")
                );
                (true, self.machine.event_delivered())
            }
            RealtimeMessage::Status(status) => {
                match status {
                    ChannelStatus::Subscribed => log::debug!("Realtime channel subscribed"),
                    ChannelStatus::ChannelError | ChannelStatus::TimedOut => log::warn!(
                        "Realtime channel reported {:?}; fallback polling continues",
                        status
                    ),
                    ChannelStatus::Closed => log::info!("Realtime channel closed"),
                }
                (false, None)
            }
        }
    }

    /// チャネル解放・リトライ取消・カウンタ初期化。未購読でも安全
    pub async fn teardown(&mut self) {
        self.retry.cancel();
        if let Some(provider) = self.provider.clone() {
            self.release_channel(&provider).await;
        } else {
            self.forwarder.cancel();
        }
        self.machine.reset();
        self.attempted = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::realtime::{ChangeKind, MemoryRealtime};

    fn manager(
        hub: Option<Arc<MemoryRealtime>>,
        org: &str,
    ) -> (PushSubscriptionManager, mpsc::UnboundedReceiver<SyncEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let provider = hub.map(|h| h as Arc<dyn RealtimeProvider>);
        let m = PushSubscriptionManager::new(
            provider,
            org,
            15,
            Duration::from_millis(1000),
            Arc::new(Metrics::new()),
            tx,
        );
        (m, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_opens_single_channel() {
        let hub = Arc::new(MemoryRealtime::new());
        let (mut m, mut rx) = manager(Some(hub.clone()), "org-1");

        assert_eq!(m.subscribe().await, SubscribeOutcome::Live);
        assert_eq!(m.subscribe().await, SubscribeOutcome::Live);
        assert_eq!(hub.live_channels(), 1);
        assert_eq!(hub.topics(), vec!["jobs-changes:org-1"]);

        hub.publish("org-1", ChangeKind::Insert, Some("j1"));
        loop {
            match rx.recv().await {
                Some(SyncEvent::Realtime { token, message }) => {
                    if !m.accept_message(token) {
                        continue;
                    }
                    let (changed, transition) = m.on_message(&message);
                    if changed {
                        assert!(transition.is_some());
                        break;
                    }
                }
                other => panic!("Unexpected event: {other:?}"),
            }
        }
        assert!(m.is_confirmed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_org_retries_until_exhausted() {
        let hub = Arc::new(MemoryRealtime::new());
        let (mut m, mut rx) = manager(Some(hub.clone()), "");

        assert_eq!(m.subscribe().await, SubscribeOutcome::Retrying(1));
        let mut outcome = SubscribeOutcome::Retrying(1);
        while let Some(SyncEvent::RetrySubscribe { token }) = rx.recv().await {
            assert!(m.accept_retry(token));
            outcome = m.subscribe().await;
            if outcome == SubscribeOutcome::Exhausted {
                break;
            }
        }
        assert_eq!(outcome, SubscribeOutcome::Exhausted);
        assert_eq!(m.retries(), 15);
        assert_eq!(m.state(), PushState::Exhausted);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(m.subscribe().await, SubscribeOutcome::Exhausted);
        assert_eq!(hub.live_channels(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_becomes_ready_during_retries() {
        let hub = Arc::new(MemoryRealtime::new());
        hub.set_ready(false);
        let (mut m, mut rx) = manager(Some(hub.clone()), "org-1");

        assert_eq!(m.subscribe().await, SubscribeOutcome::Retrying(1));
        let mut outcome = SubscribeOutcome::Retrying(1);
        while let Some(SyncEvent::RetrySubscribe { token }) = rx.recv().await {
            assert!(m.accept_retry(token));
            if m.retries() == 3 {
                hub.set_ready(true);
            }
            outcome = m.subscribe().await;
            if !matches!(outcome, SubscribeOutcome::Retrying(_)) {
                break;
            }
        }

        assert_eq!(outcome, SubscribeOutcome::Live);
        assert_eq!(m.state(), PushState::Live { confirmed: false });
        assert_eq!(m.retries(), 0);
        assert_eq!(hub.live_channels(), 1);

        // リトライタイマーは残っていない（SUBSCRIBED 通知だけが届く）
        tokio::time::sleep(Duration::from_secs(5)).await;
        while let Ok(event) = rx.try_recv() {
            assert!(
                matches!(event, SyncEvent::Realtime { .. }),
                "Unexpected event: {event:?}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_failure_is_exhausted() {
        let hub = Arc::new(MemoryRealtime::new());
        hub.set_fail_subscribe(true);
        let (mut m, _rx) = manager(Some(hub), "org-1");
        assert_eq!(m.subscribe().await, SubscribeOutcome::Exhausted);
        assert!(m.has_attempted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_provider_is_disabled() {
        let (mut m, _rx) = manager(None, "org-1");
        assert_eq!(m.subscribe().await, SubscribeOutcome::Disabled);
        assert!(!m.has_attempted());
        m.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_releases_and_resets() {
        let hub = Arc::new(MemoryRealtime::new());
        let (mut m, _rx) = manager(Some(hub.clone()), "org-1");

        m.teardown().await;
        m.subscribe().await;
        assert_eq!(hub.live_channels(), 1);

        m.teardown().await;
        m.teardown().await;
        assert_eq!(hub.live_channels(), 0);
        assert_eq!(m.state(), PushState::Disconnected);
        assert_eq!(m.retries(), 0);
        assert!(!m.has_attempted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_error_does_not_confirm() {
        let hub = Arc::new(MemoryRealtime::new());
        let (mut m, _rx) = manager(Some(hub), "org-1");
        m.subscribe().await;
        let (changed, transition) =
            m.on_message(&RealtimeMessage::Status(ChannelStatus::ChannelError));
        assert!(!changed);
        assert!(transition.is_none());
        assert!(!m.is_confirmed());
    }
}
