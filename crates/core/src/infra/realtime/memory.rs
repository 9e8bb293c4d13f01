use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{
    ChangeEvent, ChangeKind, ChannelHandle, ChannelSpec, ChannelStatus, RealtimeChannel,
    RealtimeError, RealtimeMessage, RealtimeProvider,
};

struct ChannelEntry {
    spec: ChannelSpec,
    tx: mpsc::UnboundedSender<RealtimeMessage>,
}

/// プロセス内リアルタイムプロバイダ（ローカル動作・テスト用）
pub struct MemoryRealtime {
    ready: AtomicBool,
    fail_subscribe: AtomicBool,
    next_id: AtomicU64,
    channels: Mutex<HashMap<ChannelHandle, ChannelEntry>>,
}

impl MemoryRealtime {
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(true),
            fail_subscribe: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// 次回以降の subscribe を失敗させる
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// 受信側が生きているチャネル数
    pub fn live_channels(&self) -> usize {
        let mut channels = self.channels.lock();
        channels.retain(|_, entry| !entry.tx.is_closed());
        channels.len()
    }

    /// 購読中のトピック一覧
    pub fn topics(&self) -> Vec<String> {
        let channels = self.channels.lock();
        let mut topics: Vec<String> = channels.values().map(|e| e.spec.topic.clone()).collect();
        topics.sort();
        topics
    }

    /// 組織スコープに変更を配信する。届いたチャネル数を返す
    pub fn publish(&self, org_id: &str, kind: ChangeKind, record_id: Option<&str>) -> usize {
        let filter = format!("organisation_id=eq.{org_id}");
        let channels = self.channels.lock();
        let mut delivered = 0;
        for entry in channels.values() {
            if entry.spec.filter != filter || !entry.spec.kinds.contains(&kind) {
                continue;
            }
            let event = ChangeEvent {
                kind,
                table: entry.spec.table.clone(),
                record_id: record_id.map(str::to_string),
                received_at: chrono::Utc::now(),
            };
            if entry.tx.send(RealtimeMessage::Change(event)).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// 全チャネルに接続状態を通知する
    pub fn broadcast_status(&self, status: ChannelStatus) {
        let channels = self.channels.lock();
        for entry in channels.values() {
            let _ = entry.tx.send(RealtimeMessage::Status(status.clone()));
        }
    }
}

impl Default for MemoryRealtime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RealtimeProvider for MemoryRealtime {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn subscribe(&self, spec: ChannelSpec) -> Result<RealtimeChannel, RealtimeError> {
        if !self.is_ready() {
            return Err(RealtimeError::NotAvailable("memory provider not ready".into()));
        }
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(RealtimeError::SubscribeFailed(spec.topic));
        }

        let handle = ChannelHandle(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(RealtimeMessage::Status(ChannelStatus::Subscribed));

        self.channels.lock().insert(handle, ChannelEntry { spec, tx });

        Ok(RealtimeChannel {
            handle,
            messages: rx,
        })
    }

    async fn unsubscribe(&self, handle: ChannelHandle) -> Result<(), RealtimeError> {
        match self.channels.lock().remove(&handle) {
            Some(entry) => {
                let _ = entry.tx.send(RealtimeMessage::Status(ChannelStatus::Closed));
                Ok(())
            }
            None => Err(RealtimeError::UnsubscribeFailed(format!(
                "unknown channel {}",
                handle.0
            ))),
        }
    }

    fn name(&self) -> &str {
        "memory"
    }
}
