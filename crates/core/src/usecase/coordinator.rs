use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::coalescer::{RefreshCoalescer, SignalDecision};
use super::sync_session::{SignalSource, SyncEvent};
use crate::domain::error::ApiError;
use crate::domain::job::Job;
use crate::domain::settings::SyncSettings;
use crate::domain::site::SiteIdentity;
use crate::domain::snapshot::JobSnapshotStore;
use crate::domain::types::UsageStats;
use crate::infra::api::JobApi;
use crate::infra::metrics::Metrics;
use crate::infra::output::{DashboardView, ViewUpdate};
use crate::infra::timer::{delay_task, TaskSlot};

/// リフレッシュタスクの結果
#[derive(Debug)]
pub struct RefreshOutcome {
    pub jobs: Result<Vec<Job>, ApiError>,
    pub usage: Result<Option<UsageStats>, ApiError>,
    pub elapsed: Duration,
}

/// on_refresh_finished の判定
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshResult {
    /// 破棄済みタスクの結果
    Stale,
    Updated,
    Failed(ApiError),
}

/// signal を合流させて単一のリフレッシュに変換し、スナップショットストアを更新する
pub struct RefreshCoordinator {
    coalescer: RefreshCoalescer,
    debounce: TaskSlot,
    refresh: TaskSlot,
    store: JobSnapshotStore,
    usage: Option<UsageStats>,
    refreshed: bool,
    site: SiteIdentity,
    job_limit: u32,
    api: Arc<dyn JobApi>,
    view: Arc<dyn DashboardView>,
    metrics: Arc<Metrics>,
    tx: mpsc::UnboundedSender<SyncEvent>,
}

impl RefreshCoordinator {
    pub fn new(
        settings: &SyncSettings,
        site: SiteIdentity,
        api: Arc<dyn JobApi>,
        view: Arc<dyn DashboardView>,
        metrics: Arc<Metrics>,
        tx: mpsc::UnboundedSender<SyncEvent>,
    ) -> Self {
        Self {
            coalescer: RefreshCoalescer::new(
                settings.debounce_window(),
                settings.debounce_min_delay(),
            ),
            debounce: TaskSlot::new("refresh-debounce"),
            refresh: TaskSlot::new("refresh"),
            store: JobSnapshotStore::new(),
            usage: None,
            refreshed: false,
            site,
            job_limit: settings.job_list_limit,
            api,
            view,
            metrics,
            tx,
        }
    }

    pub fn site(&self) -> &SiteIdentity {
        &self.site
    }

    pub fn current_job(&self) -> Option<&Job> {
        self.store.current()
    }

    pub fn recent_jobs(&self) -> &[Job] {
        self.store.recent_jobs()
    }

    pub fn usage(&self) -> Option<&UsageStats> {
        self.usage.as_ref()
    }

    pub fn in_flight(&self) -> bool {
        self.coalescer.in_flight()
    }

    /// ジョブ一覧を一度でも取得できたか
    pub fn has_refreshed(&self) -> bool {
        self.refreshed
    }

    /// 「何か変わったかもしれない」合図
    pub fn signal(&mut self, source: SignalSource) {
        self.metrics.inc_signals_received();
        log::debug!("Refresh signal from {:?}", source);
        self.decide();
    }

    fn decide(&mut self) {
        match self.coalescer.signal(Instant::now()) {
            SignalDecision::RunNow => {
                self.debounce.cancel();
                self.start_refresh();
            }
            SignalDecision::Schedule(delay) => {
                let tx = self.tx.clone();
                self.debounce.arm(move |token| {
                    delay_task(delay, tx, SyncEvent::DebounceElapsed { token })
                });
            }
            SignalDecision::Absorbed => self.metrics.inc_signals_coalesced(),
        }
    }

    pub fn on_debounce(&mut self, token: u64) {
        if !self.debounce.release(token) {
            return;
        }
        if self.coalescer.timer_fired() {
            self.start_refresh();
        }
    }

    fn start_refresh(&mut self) {
        self.coalescer.begin(Instant::now());
        self.metrics.inc_refreshes_started();

        let api = self.api.clone();
        let limit = self.job_limit;
        let tx = self.tx.clone();
        self.refresh.arm(move |token| async move {
            let started = Instant::now();
            let (jobs, usage) = tokio::join!(api.list_jobs(limit), api.usage());
            let outcome = RefreshOutcome {
                jobs,
                usage,
                elapsed: started.elapsed(),
            };
            let _ = tx.send(SyncEvent::RefreshFinished {
                token,
                outcome: Box::new(outcome),
            });
        });
    }

    /// リフレッシュ結果をストアへ反映して描画する
    ///
    /// 利用状況の失敗は握りつぶして前回値を保持する。ジョブ一覧の失敗は
    /// 呼び出し側（認証エラー処理）へ返す。
    pub fn on_refresh_finished(&mut self, token: u64, outcome: RefreshOutcome) -> RefreshResult {
        if !self.refresh.release(token) {
            return RefreshResult::Stale;
        }
        let follow_up = self.coalescer.finish();
        self.metrics
            .record_refresh(outcome.elapsed.as_millis() as u64, outcome.jobs.is_ok());

        match outcome.usage {
            Ok(usage) => {
                self.usage = usage.clone();
                self.view.render(ViewUpdate::Usage { usage });
            }
            Err(e) => {
                log::warn!("Usage fetch failed, keeping last value: {}", e);
            }
        }

        let result = match outcome.jobs {
            Ok(jobs) => {
                self.refreshed = true;
                let current = self.store.replace(jobs, &self.site).cloned();
                self.view.render(ViewUpdate::Job { job: current });
                self.view.render(ViewUpdate::RecentJobs {
                    jobs: self.store.recent_jobs().to_vec(),
                });
                RefreshResult::Updated
            }
            Err(e) => {
                self.metrics.inc_error(&e);
                RefreshResult::Failed(e)
            }
        };

        if follow_up {
            log::debug!("Signals arrived during refresh; scheduling follow-up");
            self.decide();
        }
        result
    }

    /// 作成直後のジョブを current にする
    pub fn adopt(&mut self, job: Job) {
        self.store.adopt(job);
        self.view.render(ViewUpdate::Job {
            job: self.store.current().cloned(),
        });
        self.view.render(ViewUpdate::RecentJobs {
            jobs: self.store.recent_jobs().to_vec(),
        });
    }

    /// 保留中の遅延タイマーだけを破棄する（実行中のリフレッシュは残す）
    pub fn cancel_pending(&mut self) {
        self.debounce.cancel();
        self.coalescer.cancel_timer();
    }

    /// 保留中の遅延タイマーと実行中リフレッシュを破棄する
    pub fn reset(&mut self) {
        self.debounce.cancel();
        self.refresh.cancel();
        self.coalescer.reset();
        self.store.clear();
        self.refreshed = false;
    }
}
