use serde::Serialize;
use tokio::sync::mpsc;

use crate::domain::job::Job;
use crate::domain::types::{Organisation, UsageStats};

/// 表示側へ送る更新
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViewUpdate {
    AuthState {
        authenticated: bool,
    },
    Job {
        job: Option<Job>,
    },
    RecentJobs {
        jobs: Vec<Job>,
    },
    Usage {
        usage: Option<UsageStats>,
    },
    Organisations {
        organisations: Vec<Organisation>,
        active_organisation_id: Option<String>,
    },
    Status {
        message: String,
        detail: String,
    },
}

impl ViewUpdate {
    pub fn status(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
            detail: detail.into(),
        }
    }
}

/// 描画先 trait（render コールバック）
pub trait DashboardView: Send + Sync {
    fn render(&self, update: ViewUpdate);
}

/// 更新を mpsc チャネルへ流すビュー
pub struct ChannelView {
    tx: mpsc::UnboundedSender<ViewUpdate>,
}

impl ChannelView {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ViewUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl DashboardView for ChannelView {
    fn render(&self, update: ViewUpdate) {
        if self.tx.send(update).is_err() {
            log::debug!("View receiver dropped; update discarded");
        }
    }
}
