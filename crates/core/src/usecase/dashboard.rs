use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use super::sync_session::{SessionDeps, SignalSource, SyncHandle, SyncSession, SyncSnapshot};
use crate::domain::error::{ApiError, AppError, ErrorCode};
use crate::domain::job::Job;
use crate::domain::settings::SyncSettings;
use crate::domain::site::SiteIdentity;
use crate::domain::types::CreateJobRequest;
use crate::infra::api::JobApi;
use crate::infra::credentials::CredentialStore;
use crate::infra::metrics::{Metrics, MetricsSummary};
use crate::infra::output::{DashboardView, ViewUpdate};
use crate::infra::realtime::RealtimeProvider;

/// ダッシュボードのアプリケーションサービス（埋め込み側のエントリポイント）
pub struct DashboardService {
    api: Arc<dyn JobApi>,
    realtime: Option<Arc<dyn RealtimeProvider>>,
    credentials: Arc<dyn CredentialStore>,
    view: Arc<dyn DashboardView>,
    metrics: Arc<Metrics>,
    settings: SyncSettings,
    site: parking_lot::Mutex<SiteIdentity>,
    session: Mutex<Option<SyncHandle>>,
}

impl DashboardService {
    pub fn new(
        api: Arc<dyn JobApi>,
        credentials: Arc<dyn CredentialStore>,
        view: Arc<dyn DashboardView>,
        settings: SyncSettings,
        site: SiteIdentity,
    ) -> Self {
        Self {
            api,
            realtime: None,
            credentials,
            view,
            metrics: Arc::new(Metrics::new()),
            settings,
            site: parking_lot::Mutex::new(site),
            session: Mutex::new(None),
        }
    }

    /// リアルタイムプロバイダを設定する（未設定ならレガシーポーリングのみ）
    pub fn with_realtime(mut self, provider: Arc<dyn RealtimeProvider>) -> Self {
        self.realtime = Some(provider);
        self
    }

    pub fn site(&self) -> SiteIdentity {
        self.site.lock().clone()
    }

    /// サイト情報の更新。次のセッションから有効
    pub fn set_site(&self, site: SiteIdentity) {
        *self.site.lock() = site;
    }

    pub fn is_authenticated(&self) -> bool {
        self.credentials.token().is_some()
    }

    // ==================== Session ====================

    /// 組織スコープでセッションを（再）作成する
    pub async fn start_session(&self, org_id: &str) -> String {
        let mut session = self.session.lock().await;
        if let Some(mut previous) = session.take() {
            previous.teardown().await;
        }

        let deps = SessionDeps {
            api: self.api.clone(),
            realtime: self.realtime.clone(),
            credentials: self.credentials.clone(),
            view: self.view.clone(),
            metrics: self.metrics.clone(),
            settings: self.settings.clone(),
            site: self.site(),
        };
        let handle = SyncSession::start(org_id, deps);
        let session_id = handle.session_id().to_string();
        *session = Some(handle);
        session_id
    }

    /// 全タイマー取消とチャネル解放。セッションが無ければ何もしない
    pub async fn teardown_session(&self) {
        let previous = self.session.lock().await.take();
        if let Some(mut handle) = previous {
            handle.teardown().await;
            log::info!("Session {} torn down", handle.session_id());
        }
    }

    /// 表示破棄時のフック
    pub async fn shutdown(&self) {
        self.teardown_session().await;
    }

    pub async fn snapshot(&self) -> Option<SyncSnapshot> {
        self.session.lock().await.as_ref().map(SyncHandle::snapshot)
    }

    /// 現セッションのスナップショット購読
    pub async fn watch(&self) -> Option<watch::Receiver<SyncSnapshot>> {
        self.session.lock().await.as_ref().map(SyncHandle::watch)
    }

    pub async fn current_job(&self) -> Option<Job> {
        self.snapshot().await.and_then(|s| s.current_job)
    }

    /// 手動リフレッシュ要求。セッションが動いていなければ false
    pub async fn signal_refresh(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| h.signal(SignalSource::Manual))
    }

    pub fn metrics(&self) -> MetricsSummary {
        self.metrics.summary()
    }

    // ==================== Dashboard ====================

    /// 全体の再同期
    ///
    /// 認証情報が無ければセッションを破棄して未認証表示にする。あれば組織一覧を
    /// 取得し、アクティブ組織でセッションを作り直す。
    pub async fn refresh_dashboard(&self) -> Result<(), AppError> {
        if !self.is_authenticated() {
            self.teardown_session().await;
            self.render_signed_out();
            return Ok(());
        }
        self.view.render(ViewUpdate::AuthState {
            authenticated: true,
        });

        let orgs = match self.api.organisations().await {
            Ok(orgs) => orgs,
            Err(e) => return Err(self.handle_api_error(&e).await),
        };

        let org_id = orgs
            .active_organisation_id
            .clone()
            .or_else(|| orgs.organisations.first().map(|o| o.id.clone()))
            .unwrap_or_default();
        self.view.render(ViewUpdate::Organisations {
            organisations: orgs.organisations,
            active_organisation_id: orgs.active_organisation_id,
        });

        self.start_session(&org_id).await;
        Ok(())
    }

    /// サイトチェックジョブを作成する
    pub async fn run_scan(&self) -> Result<Job, AppError> {
        if !self.is_authenticated() {
            let err = AppError {
                code: ErrorCode::Unauthorized,
                message: "Sign in to run a scan.".to_string(),
                detail: String::new(),
                recoverable: true,
            };
            self.view
                .render(ViewUpdate::status(err.message.clone(), String::new()));
            return Err(err);
        }

        let Some(domain) = self.site().domain else {
            let err = AppError::invalid_state("Site domain unavailable.");
            self.view
                .render(ViewUpdate::status(err.message.clone(), String::new()));
            return Err(err);
        };

        let request = CreateJobRequest::from_extension(domain);
        let job = match self.api.create_job(&request).await {
            Ok(job) => job,
            Err(e) => return Err(self.handle_api_error(&e).await),
        };
        log::info!("Scan started: job {} for {}", job.id, request.domain);

        let handed_over = self
            .session
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| h.job_created(job.clone()));
        if !handed_over {
            self.view.render(ViewUpdate::Job {
                job: Some(job.clone()),
            });
        }
        self.view.render(ViewUpdate::status("Scan started.", ""));
        Ok(job)
    }

    /// 組織を切り替えて再同期する
    pub async fn switch_organisation(&self, organisation_id: &str) -> Result<(), AppError> {
        if let Err(e) = self.api.switch_organisation(organisation_id).await {
            return Err(self.handle_api_error(&e).await);
        }
        log::info!("Switched organisation to {}", organisation_id);
        self.refresh_dashboard().await
    }

    /// API エラーの共通処理
    ///
    /// 401 は認証情報を消してセッションを破棄する。403 はメッセージ表示のみ。
    async fn handle_api_error(&self, err: &ApiError) -> AppError {
        self.metrics.inc_error(err);
        let app_err = AppError::from_api(err);

        if err.is_unauthorized() {
            log::warn!("Unauthorized; clearing credential and tearing down session");
            self.credentials.clear();
            self.teardown_session().await;
            self.render_signed_out();
        } else {
            log::warn!("API error: {}", err);
        }
        self.view.render(ViewUpdate::status(
            app_err.message.clone(),
            app_err.detail.clone(),
        ));
        app_err
    }

    fn render_signed_out(&self) {
        self.view.render(ViewUpdate::AuthState {
            authenticated: false,
        });
        self.view.render(ViewUpdate::Job { job: None });
    }
}
