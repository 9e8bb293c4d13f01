use std::time::Duration;

use tokio::sync::mpsc;

use super::sync_session::SyncEvent;
use crate::infra::timer::{interval_task, TaskSlot};

/// プッシュ未確認の間だけ動く短周期ポーリング
///
/// 実イベントを一度でも受信したら disable され、セッション中は再開しない。
pub struct FallbackTimer {
    interval: Duration,
    slot: TaskSlot,
    disabled: bool,
    tx: mpsc::UnboundedSender<SyncEvent>,
}

impl FallbackTimer {
    pub fn new(interval: Duration, tx: mpsc::UnboundedSender<SyncEvent>) -> Self {
        Self {
            interval,
            slot: TaskSlot::new("fallback-poll"),
            disabled: false,
            tx,
        }
    }

    pub fn is_running(&self) -> bool {
        self.slot.is_armed()
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// 動作中または disable 済みなら何もしない
    pub fn start(&mut self) -> bool {
        if self.disabled || self.slot.is_armed() {
            return false;
        }
        let interval = self.interval;
        let tx = self.tx.clone();
        self.slot.arm(move |token| {
            interval_task(interval, tx, move || SyncEvent::FallbackTick { token })
        });
        log::debug!("Fallback polling started ({}ms)", interval.as_millis());
        true
    }

    /// 一時停止（再開可能）
    pub fn stop(&mut self) -> bool {
        let stopped = self.slot.cancel();
        if stopped {
            log::debug!("Fallback polling stopped");
        }
        stopped
    }

    /// 恒久停止
    pub fn disable(&mut self) {
        self.stop();
        self.disabled = true;
    }

    pub fn accept_tick(&self, token: u64) -> bool {
        self.slot.is_current(token)
    }
}
