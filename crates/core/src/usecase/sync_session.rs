use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::coordinator::{RefreshCoordinator, RefreshOutcome, RefreshResult};
use super::fallback::FallbackTimer;
use super::poll_scheduler::{PollConditions, PollScheduler};
use super::push_manager::{PushSubscriptionManager, SubscribeOutcome};
use crate::domain::error::{ApiError, AppError};
use crate::domain::job::Job;
use crate::domain::session::{PollState, PushState};
use crate::domain::settings::SyncSettings;
use crate::domain::site::SiteIdentity;
use crate::domain::types::UsageStats;
use crate::infra::api::JobApi;
use crate::infra::credentials::CredentialStore;
use crate::infra::metrics::Metrics;
use crate::infra::output::{DashboardView, ViewUpdate};
use crate::infra::realtime::{RealtimeMessage, RealtimeProvider};

/// リフレッシュ要求の発生源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Manual,
    Push,
    Fallback,
    Poll,
    Created,
}

/// セッションアクターが受け取るイベント
///
/// token 付きのイベントはタイマー/タスクの世代と照合し、破棄済みのものは無視する。
#[derive(Debug)]
pub enum SyncEvent {
    Signal(SignalSource),
    RetrySubscribe { token: u64 },
    DebounceElapsed { token: u64 },
    FallbackTick { token: u64 },
    PollTick { token: u64 },
    Realtime { token: u64, message: RealtimeMessage },
    RefreshFinished { token: u64, outcome: Box<RefreshOutcome> },
    JobCreated(Job),
    Shutdown(oneshot::Sender<()>),
}

/// 表示・テスト用のセッション状態
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncSnapshot {
    pub session_id: String,
    pub org_id: String,
    pub current_job: Option<Job>,
    pub recent_jobs: Vec<Job>,
    pub usage: Option<UsageStats>,
    pub push_state: PushState,
    pub subscribe_retries: u32,
    pub poll_state: PollState,
    pub fallback_running: bool,
    pub fallback_disabled: bool,
    pub refresh_in_flight: bool,
    pub active: bool,
}

/// セッションの依存一式
#[derive(Clone)]
pub struct SessionDeps {
    pub api: Arc<dyn JobApi>,
    pub realtime: Option<Arc<dyn RealtimeProvider>>,
    pub credentials: Arc<dyn CredentialStore>,
    pub view: Arc<dyn DashboardView>,
    pub metrics: Arc<Metrics>,
    pub settings: SyncSettings,
    pub site: SiteIdentity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// 組織スコープの同期セッション
///
/// タイマー・チャネル・リフレッシュタスクを排他的に所有する単一タスクとして動き、
/// 全ての状態変更はイベントループ内で直列に行われる。
pub struct SyncSession {
    session_id: String,
    org_id: String,
    credentials: Arc<dyn CredentialStore>,
    view: Arc<dyn DashboardView>,
    metrics: Arc<Metrics>,
    coordinator: RefreshCoordinator,
    push: PushSubscriptionManager,
    poll: PollScheduler,
    fallback: FallbackTimer,
    snapshot_tx: watch::Sender<SyncSnapshot>,
    forbidden: bool,
    active: bool,
}

impl SyncSession {
    /// セッションを起動する。最初に手動リフレッシュ、続いて購読を試みる
    pub fn start(org_id: &str, deps: SessionDeps) -> SyncHandle {
        let session_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        let coordinator = RefreshCoordinator::new(
            &deps.settings,
            deps.site.clone(),
            deps.api.clone(),
            deps.view.clone(),
            deps.metrics.clone(),
            tx.clone(),
        );
        let push = PushSubscriptionManager::new(
            deps.realtime.clone(),
            org_id,
            deps.settings.max_subscribe_retries,
            deps.settings.subscribe_retry_interval(),
            deps.metrics.clone(),
            tx.clone(),
        );
        let poll = PollScheduler::new(deps.settings.job_poll_interval(), tx.clone());
        let fallback = FallbackTimer::new(deps.settings.fallback_poll_interval(), tx.clone());

        let initial = SyncSnapshot {
            session_id: session_id.clone(),
            org_id: org_id.to_string(),
            current_job: None,
            recent_jobs: Vec::new(),
            usage: None,
            push_state: PushState::Disconnected,
            subscribe_retries: 0,
            poll_state: PollState::Idle,
            fallback_running: false,
            fallback_disabled: false,
            refresh_in_flight: false,
            active: true,
        };
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);

        let session = Self {
            session_id: session_id.clone(),
            org_id: org_id.to_string(),
            credentials: deps.credentials,
            view: deps.view,
            metrics: deps.metrics,
            coordinator,
            push,
            poll,
            fallback,
            snapshot_tx,
            forbidden: false,
            active: true,
        };
        let task = tokio::spawn(session.run(rx));

        SyncHandle {
            session_id,
            org_id: org_id.to_string(),
            tx,
            snapshot: snapshot_rx,
            task: Some(task),
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SyncEvent>) {
        log::info!(
            "Sync session {} started (org: {})",
            self.session_id,
            if self.org_id.is_empty() {
                "-"
            } else {
                self.org_id.as_str()
            }
        );

        self.coordinator.signal(SignalSource::Manual);
        self.subscribe().await;
        self.publish();

        while let Some(event) = rx.recv().await {
            let flow = self.handle(event).await;
            self.publish();
            if flow == Flow::Stop {
                break;
            }
        }

        log::info!("Sync session {} stopped", self.session_id);
    }

    async fn handle(&mut self, event: SyncEvent) -> Flow {
        match event {
            SyncEvent::Signal(source) => self.coordinator.signal(source),
            SyncEvent::FallbackTick { token } => {
                if self.fallback.accept_tick(token) {
                    self.metrics.inc_fallback_ticks();
                    self.coordinator.signal(SignalSource::Fallback);
                }
            }
            SyncEvent::PollTick { token } => {
                if self.poll.accept_tick(token) {
                    self.metrics.inc_poll_ticks();
                    self.coordinator.signal(SignalSource::Poll);
                }
            }
            SyncEvent::DebounceElapsed { token } => self.coordinator.on_debounce(token),
            SyncEvent::RetrySubscribe { token } => {
                if self.push.accept_retry(token) {
                    self.subscribe().await;
                }
            }
            SyncEvent::Realtime { token, message } => {
                if self.push.accept_message(token) {
                    self.on_realtime(&message);
                }
            }
            SyncEvent::RefreshFinished { token, outcome } => {
                match self.coordinator.on_refresh_finished(token, *outcome) {
                    RefreshResult::Stale => {}
                    RefreshResult::Updated => {
                        self.forbidden = false;
                        self.evaluate_timers();
                    }
                    RefreshResult::Failed(err) => return self.on_refresh_error(err).await,
                }
            }
            SyncEvent::JobCreated(job) => {
                log::info!("Adopting created job {}", job.id);
                self.coordinator.adopt(job);
                self.evaluate_timers();
                self.coordinator.signal(SignalSource::Created);
            }
            SyncEvent::Shutdown(ack) => {
                self.teardown().await;
                self.publish();
                let _ = ack.send(());
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    async fn subscribe(&mut self) {
        match self.push.subscribe().await {
            SubscribeOutcome::Disabled => {}
            outcome => {
                log::debug!("Subscribe attempt: {:?}", outcome);
                self.evaluate_timers();
            }
        }
    }

    fn on_realtime(&mut self, message: &RealtimeMessage) {
        let (changed, transition) = self.push.on_message(message);
        if let Some(transition) = transition {
            log::info!(
                "Realtime confirmed ({} -> {}); stopping fallback polling",
                transition.prev_state,
                transition.new_state.as_str()
            );
            self.fallback.disable();
            self.poll.stop();
        }
        if changed {
            self.coordinator.signal(SignalSource::Push);
        }
    }

    /// 現在のジョブとプッシュ状態からポーリング/フォールバックの要否を決める
    ///
    /// レガシーポーリングは購読を一度も試みていない場合だけ動く。
    fn evaluate_timers(&mut self) {
        let job_active = self.coordinator.current_job().is_some_and(Job::is_active);
        let push_confirmed = self.push.is_confirmed();

        self.poll.evaluate(PollConditions {
            authenticated: self.credentials.token().is_some(),
            site_known: self.coordinator.site().is_known(),
            job_active,
            realtime_engaged: self.push.has_attempted(),
            suspended: self.forbidden,
        });

        // 初回リフレッシュ前はジョブ不明のまま購読待ちの間も回す
        let job_may_change = job_active || !self.coordinator.has_refreshed();
        if self.push.has_attempted() && !push_confirmed && job_may_change && !self.forbidden {
            self.fallback.start();
        } else {
            self.fallback.stop();
        }
    }

    async fn on_refresh_error(&mut self, err: ApiError) -> Flow {
        let status = AppError::from_api(&err);
        if err.is_unauthorized() {
            log::warn!("Session {} unauthorized; tearing down", self.session_id);
            self.credentials.clear();
            self.teardown().await;
            self.view.render(ViewUpdate::AuthState {
                authenticated: false,
            });
            self.view.render(ViewUpdate::Job { job: None });
            self.view.render(ViewUpdate::status(status.message, status.detail));
            return Flow::Stop;
        }

        if err.is_forbidden() {
            // 再試行しない。次に成功したリフレッシュで再開する
            log::warn!("Refresh forbidden; pausing polling: {}", status.detail);
            self.forbidden = true;
            self.coordinator.cancel_pending();
            self.poll.stop();
            self.fallback.stop();
        } else if err.is_transport() {
            log::warn!("Refresh failed: {}", err);
        } else {
            log::error!("Refresh failed: {}", err);
        }
        self.view.render(ViewUpdate::status(status.message, status.detail));
        Flow::Continue
    }

    /// 全タイマーの取消とチャネル解放。二度目以降は何もしない
    async fn teardown(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.coordinator.reset();
        self.poll.stop();
        self.fallback.stop();
        self.push.teardown().await;
        log::debug!("Sync session {} torn down", self.session_id);
    }

    fn publish(&self) {
        let snapshot = SyncSnapshot {
            session_id: self.session_id.clone(),
            org_id: self.org_id.clone(),
            current_job: self.coordinator.current_job().cloned(),
            recent_jobs: self.coordinator.recent_jobs().to_vec(),
            usage: self.coordinator.usage().cloned(),
            push_state: self.push.state(),
            subscribe_retries: self.push.retries(),
            poll_state: self.poll.state(),
            fallback_running: self.fallback.is_running(),
            fallback_disabled: self.fallback.is_disabled(),
            refresh_in_flight: self.coordinator.in_flight(),
            active: self.active,
        };
        self.snapshot_tx.send_replace(snapshot);
    }
}

/// 起動済みセッションへのハンドル
///
/// drop するとセッションタスクを abort する。チャネルを確実に解放するには
/// teardown を使う。
pub struct SyncHandle {
    session_id: String,
    org_id: String,
    tx: mpsc::UnboundedSender<SyncEvent>,
    snapshot: watch::Receiver<SyncSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl SyncHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn org_id(&self) -> &str {
        &self.org_id
    }

    /// セッションが動作中か（401 で自ら終了した場合も false）
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn signal(&self, source: SignalSource) -> bool {
        self.tx.send(SyncEvent::Signal(source)).is_ok()
    }

    pub fn job_created(&self, job: Job) -> bool {
        self.tx.send(SyncEvent::JobCreated(job)).is_ok()
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<SyncSnapshot> {
        self.snapshot.clone()
    }

    /// タイマー取消・チャネル解放を待ってからタスクを終了させる
    pub async fn teardown(&mut self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(SyncEvent::Shutdown(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    log::error!("Sync session {} panicked", self.session_id);
                }
            }
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
