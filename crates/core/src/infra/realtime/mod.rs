mod memory;

pub use memory::MemoryRealtime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// リアルタイムプロバイダのエラー
#[derive(Debug, Clone, thiserror::Error)]
pub enum RealtimeError {
    #[error("Realtime client not available: {0}")]
    NotAvailable(String),
    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),
    #[error("Unsubscribe failed: {0}")]
    UnsubscribeFailed(String),
}

/// 変更種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// 購読対象の指定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub topic: String,
    pub table: String,
    pub filter: String,
    pub kinds: Vec<ChangeKind>,
}

impl ChannelSpec {
    /// 組織スコープの jobs テーブル変更（INSERT / UPDATE / DELETE）
    pub fn jobs_for_organisation(org_id: &str) -> Self {
        Self {
            topic: format!("jobs-changes:{org_id}"),
            table: "jobs".to_string(),
            filter: format!("organisation_id=eq.{org_id}"),
            kinds: vec![ChangeKind::Update, ChangeKind::Insert, ChangeKind::Delete],
        }
    }
}

/// 変更通知。中身は差分計算に使わず「何か変わった」合図として扱う
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub table: String,
    pub record_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// チャネル接続状態の通知
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelStatus {
    Subscribed,
    ChannelError,
    TimedOut,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeMessage {
    Change(ChangeEvent),
    Status(ChannelStatus),
}

/// チャネルハンドル（unsubscribe に渡す）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle(pub u64);

/// 確立したチャネル
pub struct RealtimeChannel {
    pub handle: ChannelHandle,
    pub messages: mpsc::UnboundedReceiver<RealtimeMessage>,
}

/// リアルタイム配信プロバイダ trait
#[async_trait]
pub trait RealtimeProvider: Send + Sync {
    /// クライアントが利用可能か（未初期化なら false）
    fn is_ready(&self) -> bool {
        true
    }

    async fn subscribe(&self, spec: ChannelSpec) -> Result<RealtimeChannel, RealtimeError>;

    async fn unsubscribe(&self, handle: ChannelHandle) -> Result<(), RealtimeError>;

    fn name(&self) -> &str;
}
