use std::time::Duration;

use tokio::sync::mpsc;

use super::sync_session::SyncEvent;
use crate::domain::session::PollState;
use crate::infra::timer::{interval_task, TaskSlot};

/// ポーリング開始条件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConditions {
    pub authenticated: bool,
    pub site_known: bool,
    pub job_active: bool,
    /// 購読を試みた後はチャネルかフォールバックが更新を担う
    pub realtime_engaged: bool,
    /// 403 後、次の成功リフレッシュまで再開しない
    pub suspended: bool,
}

impl PollConditions {
    pub fn hold(&self) -> bool {
        self.authenticated
            && self.site_known
            && self.job_active
            && !self.realtime_engaged
            && !self.suspended
    }
}

/// レガシーポーリング（Idle / Polling）
pub struct PollScheduler {
    interval: Duration,
    slot: TaskSlot,
    tx: mpsc::UnboundedSender<SyncEvent>,
}

impl PollScheduler {
    pub fn new(interval: Duration, tx: mpsc::UnboundedSender<SyncEvent>) -> Self {
        Self {
            interval,
            slot: TaskSlot::new("job-poll"),
            tx,
        }
    }

    pub fn state(&self) -> PollState {
        if self.slot.is_armed() {
            PollState::Polling
        } else {
            PollState::Idle
        }
    }

    /// Polling 中なら何もしない
    pub fn start(&mut self) -> bool {
        if self.slot.is_armed() {
            return false;
        }
        let interval = self.interval;
        let tx = self.tx.clone();
        self.slot.arm(move |token| {
            interval_task(interval, tx, move || SyncEvent::PollTick { token })
        });
        log::debug!("Job polling started ({}ms)", interval.as_millis());
        true
    }

    /// Idle なら何もしない
    pub fn stop(&mut self) -> bool {
        let stopped = self.slot.cancel();
        if stopped {
            log::debug!("Job polling stopped");
        }
        stopped
    }

    pub fn evaluate(&mut self, conditions: PollConditions) {
        if conditions.hold() {
            self.start();
        } else {
            self.stop();
        }
    }

    pub fn accept_tick(&self, token: u64) -> bool {
        self.slot.is_current(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conditions() -> PollConditions {
        PollConditions {
            authenticated: true,
            site_known: true,
            job_active: true,
            realtime_engaged: false,
            suspended: false,
        }
    }

    #[test]
    fn test_conditions() {
        assert!(conditions().hold());
        assert!(!PollConditions { authenticated: false, ..conditions() }.hold());
        assert!(!PollConditions { site_known: false, ..conditions() }.hold());
        assert!(!PollConditions { job_active: false, ..conditions() }.hold());
        assert!(!PollConditions { realtime_engaged: true, ..conditions() }.hold());
        assert!(!PollConditions { suspended: true, ..conditions() }.hold());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut poll = PollScheduler::new(Duration::from_millis(6000), tx);
        assert!(poll.start());
        assert!(!poll.start());
        assert_eq!(poll.state(), PollState::Polling);

        tokio::time::sleep(Duration::from_millis(6500)).await;
        let mut ticks = 0;
        while let Ok(SyncEvent::PollTick { token }) = rx.try_recv() {
            assert!(poll.accept_tick(token));
            ticks += 1;
        }
        assert_eq!(ticks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_when_idle_is_safe() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut poll = PollScheduler::new(Duration::from_millis(6000), tx);
        assert!(!poll.stop());
        poll.evaluate(conditions());
        assert_eq!(poll.state(), PollState::Polling);
        poll.evaluate(PollConditions { job_active: false, ..conditions() });
        assert_eq!(poll.state(), PollState::Idle);
        assert!(!poll.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_tick_rejected_after_restart() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut poll = PollScheduler::new(Duration::from_millis(6000), tx);
        poll.start();
        tokio::time::sleep(Duration::from_millis(6500)).await;
        let old = match rx.try_recv() {
            Ok(SyncEvent::PollTick { token }) => token,
            other => panic!("Expected poll tick, got {other:?}"),
        };
        assert!(poll.accept_tick(old));
        poll.stop();
        poll.start();
        assert!(!poll.accept_tick(old));
    }
}
