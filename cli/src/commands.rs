use std::time::Duration;

use dashboard_core::domain::error::AppError;
use dashboard_core::usecase::dashboard::DashboardService;

use crate::events::{self, ErrorPayload, SessionStatePayload, METRICS, SESSION_STATE_CHANGED};

/// コマンドエラー型
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("{0}")]
    App(#[from] AppError),
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),
}

impl serde::Serialize for CommandError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<&CommandError> for ErrorPayload {
    fn from(err: &CommandError) -> Self {
        match err {
            CommandError::App(app) => Self {
                code: Some(app.code),
                message: app.message.clone(),
                recoverable: app.recoverable,
            },
            CommandError::Timeout(_) => Self {
                code: None,
                message: err.to_string(),
                recoverable: true,
            },
        }
    }
}

pub type CmdResult<T> = Result<T, CommandError>;

const FIRST_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

// --- Commands ---

/// 一度だけ同期して現在の状態を出力する
pub async fn status(service: &DashboardService) -> CmdResult<()> {
    service.refresh_dashboard().await?;
    wait_first_refresh(service).await?;
    emit_session_state(service).await;
    events::emit_event(METRICS, service.metrics());
    service.shutdown().await;
    Ok(())
}

/// Ctrl-C（または指定時間）までセッションを動かし、状態変化を出力し続ける
pub async fn watch(service: &DashboardService, duration: Option<Duration>) -> CmdResult<()> {
    service.refresh_dashboard().await?;
    follow(service, duration, false).await;
    events::emit_event(METRICS, service.metrics());
    service.shutdown().await;
    Ok(())
}

/// サイトチェックを開始し、必要なら終了まで追跡する
pub async fn scan(service: &DashboardService, follow_job: bool) -> CmdResult<()> {
    service.refresh_dashboard().await?;
    wait_first_refresh(service).await?;
    let job = service.run_scan().await?;
    log::info!("Scan job {} created", job.id);

    if follow_job {
        follow(service, None, true).await;
    }
    service.shutdown().await;
    Ok(())
}

/// 組織を切り替えて新しいスコープで一度同期する
pub async fn switch_org(service: &DashboardService, organisation_id: &str) -> CmdResult<()> {
    service.switch_organisation(organisation_id).await?;
    wait_first_refresh(service).await?;
    emit_session_state(service).await;
    service.shutdown().await;
    Ok(())
}

// --- Helpers ---

async fn emit_session_state(service: &DashboardService) {
    if let Some(snapshot) = service.snapshot().await {
        events::emit_event(SESSION_STATE_CHANGED, SessionStatePayload::from(&snapshot));
    }
}

/// セッション開始後、最初のリフレッシュ完了を待つ
async fn wait_first_refresh(service: &DashboardService) -> CmdResult<()> {
    let Some(mut rx) = service.watch().await else {
        // 未認証などでセッションが無い
        return Ok(());
    };
    let wait = async {
        loop {
            {
                let s = rx.borrow_and_update();
                if !s.active || (!s.refresh_in_flight && service.metrics().refreshes_completed > 0)
                {
                    return;
                }
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    };
    tokio::time::timeout(FIRST_REFRESH_TIMEOUT, wait)
        .await
        .map_err(|_| CommandError::Timeout("first refresh"))
}

/// スナップショットの変化を出力する。until_terminal なら現在ジョブが終わった時点で戻る
async fn follow(service: &DashboardService, duration: Option<Duration>, until_terminal: bool) {
    let Some(mut rx) = service.watch().await else {
        return;
    };
    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let mut last: Option<SessionStatePayload> = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted; shutting down");
                return;
            }
            _ = &mut deadline => return,
            changed = rx.changed() => {
                if changed.is_err() {
                    return;
                }
                let snapshot = rx.borrow_and_update().clone();
                let payload = SessionStatePayload::from(&snapshot);
                let differs = last.as_ref().map_or(true, |prev| {
                    prev.push_state != payload.push_state
                        || prev.poll_state != payload.poll_state
                        || prev.fallback_running != payload.fallback_running
                        || prev.active != payload.active
                });
                if differs {
                    events::emit_event(SESSION_STATE_CHANGED, payload.clone());
                    last = Some(payload);
                }
                if !snapshot.active {
                    return;
                }
                if until_terminal
                    && !snapshot.refresh_in_flight
                    && snapshot.current_job.as_ref().is_some_and(|j| !j.is_active())
                {
                    return;
                }
            }
        }
    }
}
