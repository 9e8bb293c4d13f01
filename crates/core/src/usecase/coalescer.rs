use std::time::Duration;

use tokio::time::Instant;

/// signal に対する判定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDecision {
    /// 直ちにリフレッシュする（保留中の遅延タイマーは破棄）
    RunNow,
    /// 指定時間後に一度だけリフレッシュする
    Schedule(Duration),
    /// 実行中か遅延タイマー保留中のため吸収
    Absorbed,
}

/// リフレッシュ合流器（I/O なし、時刻は呼び出し側から渡す）
///
/// 実行中に届いた signal は dirty として記録し、finish 時に
/// 追いリフレッシュを一度だけ要求する。
#[derive(Debug, Clone)]
pub struct RefreshCoalescer {
    window: Duration,
    min_delay: Duration,
    last_started: Option<Instant>,
    in_flight: bool,
    timer_pending: bool,
    dirty: bool,
}

impl RefreshCoalescer {
    pub fn new(window: Duration, min_delay: Duration) -> Self {
        Self {
            window,
            min_delay,
            last_started: None,
            in_flight: false,
            timer_pending: false,
            dirty: false,
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn timer_pending(&self) -> bool {
        self.timer_pending
    }

    pub fn signal(&mut self, now: Instant) -> SignalDecision {
        if self.in_flight {
            self.dirty = true;
            return SignalDecision::Absorbed;
        }

        let elapsed = self.last_started.map(|t| now.saturating_duration_since(t));
        match elapsed {
            Some(elapsed) if elapsed < self.window => {
                if self.timer_pending {
                    SignalDecision::Absorbed
                } else {
                    self.timer_pending = true;
                    SignalDecision::Schedule((self.window - elapsed).max(self.min_delay))
                }
            }
            _ => {
                self.timer_pending = false;
                SignalDecision::RunNow
            }
        }
    }

    /// 遅延タイマー発火。リフレッシュを開始すべきなら true
    pub fn timer_fired(&mut self) -> bool {
        self.timer_pending = false;
        if self.in_flight {
            self.dirty = true;
            return false;
        }
        true
    }

    pub fn begin(&mut self, now: Instant) {
        self.in_flight = true;
        self.timer_pending = false;
        self.dirty = false;
        self.last_started = Some(now);
    }

    /// リフレッシュ完了。実行中に signal があれば true
    pub fn finish(&mut self) -> bool {
        self.in_flight = false;
        std::mem::take(&mut self.dirty)
    }

    /// 遅延タイマーを破棄した。次の signal は通常どおり判定される
    pub fn cancel_timer(&mut self) {
        self.timer_pending = false;
    }

    pub fn reset(&mut self) {
        self.last_started = None;
        self.in_flight = false;
        self.timer_pending = false;
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coalescer() -> RefreshCoalescer {
        RefreshCoalescer::new(Duration::from_millis(250), Duration::from_millis(100))
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_first_signal_runs_immediately() {
        let mut c = coalescer();
        assert_eq!(c.signal(Instant::now()), SignalDecision::RunNow);
    }

    #[test]
    fn test_burst_within_window_schedules_once() {
        let mut c = coalescer();
        let t0 = Instant::now();
        c.begin(t0);
        assert!(!c.finish());

        assert_eq!(c.signal(t0 + ms(50)), SignalDecision::Schedule(ms(200)));
        for n in 0..10 {
            assert_eq!(c.signal(t0 + ms(60 + n)), SignalDecision::Absorbed);
        }
        assert!(c.timer_fired());
    }

    #[test]
    fn test_schedule_respects_min_delay() {
        let mut c = coalescer();
        let t0 = Instant::now();
        c.begin(t0);
        c.finish();
        assert_eq!(c.signal(t0 + ms(200)), SignalDecision::Schedule(ms(100)));
    }

    #[test]
    fn test_signal_after_window_runs_now() {
        let mut c = coalescer();
        let t0 = Instant::now();
        c.begin(t0);
        c.finish();
        assert_eq!(c.signal(t0 + ms(250)), SignalDecision::RunNow);
    }

    #[test]
    fn test_run_now_supersedes_pending_timer() {
        let mut c = coalescer();
        let t0 = Instant::now();
        c.begin(t0);
        c.finish();
        assert_eq!(c.signal(t0 + ms(10)), SignalDecision::Schedule(ms(240)));
        assert!(c.timer_pending());
        assert_eq!(c.signal(t0 + ms(300)), SignalDecision::RunNow);
        assert!(!c.timer_pending());
    }

    #[test]
    fn test_signal_during_flight_requests_one_follow_up() {
        let mut c = coalescer();
        let t0 = Instant::now();
        c.begin(t0);
        assert_eq!(c.signal(t0 + ms(10)), SignalDecision::Absorbed);
        assert_eq!(c.signal(t0 + ms(20)), SignalDecision::Absorbed);
        assert!(c.finish());
        assert!(!c.finish());
    }

    #[test]
    fn test_timer_firing_during_flight_defers_to_finish() {
        let mut c = coalescer();
        let t0 = Instant::now();
        c.begin(t0);
        c.finish();
        c.signal(t0 + ms(10));
        c.begin(t0 + ms(20));
        assert!(!c.timer_fired());
        assert!(c.finish());
    }

    #[test]
    fn test_cancelled_timer_allows_new_schedule() {
        let mut c = coalescer();
        let t0 = Instant::now();
        c.begin(t0);
        c.finish();
        assert_eq!(c.signal(t0 + ms(10)), SignalDecision::Schedule(ms(240)));
        c.cancel_timer();
        assert!(!c.timer_pending());
        assert_eq!(c.signal(t0 + ms(20)), SignalDecision::Schedule(ms(230)));
    }

    #[test]
    fn test_reset_forgets_history() {
        let mut c = coalescer();
        let t0 = Instant::now();
        c.begin(t0);
        c.reset();
        assert!(!c.in_flight());
        assert_eq!(c.signal(t0), SignalDecision::RunNow);
    }
}
