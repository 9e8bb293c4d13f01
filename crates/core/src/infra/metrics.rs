use parking_lot::Mutex;
use serde::Serialize;

use crate::domain::error::ApiError;

const MAX_LATENCY_RECORDS: usize = 1000;

/// 同期コアのローカルメトリクス収集器
pub struct Metrics {
    counters: Mutex<MetricsCounters>,
    latencies: Mutex<Vec<LatencyRecord>>,
}

#[derive(Debug, Default)]
struct MetricsCounters {
    signals_received: u64,
    signals_coalesced: u64,
    refreshes_started: u64,
    refreshes_completed: u64,
    push_events: u64,
    subscribe_attempts: u64,
    subscribe_retries: u64,
    fallback_ticks: u64,
    poll_ticks: u64,
    errors_transport: u64,
    errors_auth: u64,
    errors_protocol: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencyRecord {
    pub duration_ms: u64,
    pub ok: bool,
    pub timestamp: String,
}

/// メトリクスサマリー（CLI の status 出力用）
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub signals_received: u64,
    pub signals_coalesced: u64,
    pub refreshes_started: u64,
    pub refreshes_completed: u64,
    pub push_events: u64,
    pub subscribe_attempts: u64,
    pub subscribe_retries: u64,
    pub fallback_ticks: u64,
    pub poll_ticks: u64,
    pub error_counts: ErrorCounts,
    pub avg_refresh_latency_ms: Option<f64>,
    pub recent_latencies: Vec<LatencyRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorCounts {
    pub transport: u64,
    pub auth: u64,
    pub protocol: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(MetricsCounters::default()),
            latencies: Mutex::new(Vec::new()),
        }
    }

    pub fn inc_signals_received(&self) {
        self.counters.lock().signals_received += 1;
    }

    pub fn inc_signals_coalesced(&self) {
        self.counters.lock().signals_coalesced += 1;
    }

    pub fn inc_refreshes_started(&self) {
        self.counters.lock().refreshes_started += 1;
    }

    pub fn inc_push_events(&self) {
        self.counters.lock().push_events += 1;
    }

    pub fn inc_subscribe_attempts(&self) {
        self.counters.lock().subscribe_attempts += 1;
    }

    pub fn inc_subscribe_retries(&self) {
        self.counters.lock().subscribe_retries += 1;
    }

    pub fn inc_fallback_ticks(&self) {
        self.counters.lock().fallback_ticks += 1;
    }

    pub fn inc_poll_ticks(&self) {
        self.counters.lock().poll_ticks += 1;
    }

    pub fn inc_error(&self, err: &ApiError) {
        let mut c = self.counters.lock();
        match err {
            ApiError::Transport(_) | ApiError::Timeout => c.errors_transport += 1,
            ApiError::Http {
                status: 401 | 403, ..
            } => c.errors_auth += 1,
            _ => c.errors_protocol += 1,
        }
    }

    /// リフレッシュ完了を記録する（失敗も含む）
    pub fn record_refresh(&self, duration_ms: u64, ok: bool) {
        self.counters.lock().refreshes_completed += 1;
        let record = LatencyRecord {
            duration_ms,
            ok,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let mut latencies = self.latencies.lock();
        latencies.push(record);
        // 最新1000件のみ保持
        if latencies.len() > MAX_LATENCY_RECORDS {
            let excess = latencies.len() - MAX_LATENCY_RECORDS;
            latencies.drain(0..excess);
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        let c = self.counters.lock();
        let latencies = self.latencies.lock();

        let avg = if latencies.is_empty() {
            None
        } else {
            let total: f64 = latencies.iter().map(|r| r.duration_ms as f64).sum();
            Some(total / latencies.len() as f64)
        };

        let recent: Vec<LatencyRecord> = latencies.iter().rev().take(20).cloned().collect();

        MetricsSummary {
            signals_received: c.signals_received,
            signals_coalesced: c.signals_coalesced,
            refreshes_started: c.refreshes_started,
            refreshes_completed: c.refreshes_completed,
            push_events: c.push_events,
            subscribe_attempts: c.subscribe_attempts,
            subscribe_retries: c.subscribe_retries,
            fallback_ticks: c.fallback_ticks,
            poll_ticks: c.poll_ticks,
            error_counts: ErrorCounts {
                transport: c.errors_transport,
                auth: c.errors_auth,
                protocol: c.errors_protocol,
            },
            avg_refresh_latency_ms: avg,
            recent_latencies: recent,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let m = Metrics::new();
        m.inc_signals_received();
        m.inc_signals_received();
        m.inc_signals_coalesced();
        m.inc_subscribe_retries();
        m.inc_error(&ApiError::Timeout);
        m.inc_error(&ApiError::Http {
            status: 401,
            message: "Unauthorized".into(),
            body: String::new(),
        });
        m.inc_error(&ApiError::Parse("bad".into()));

        let s = m.summary();
        assert_eq!(s.signals_received, 2);
        assert_eq!(s.signals_coalesced, 1);
        assert_eq!(s.subscribe_retries, 1);
        assert_eq!(s.error_counts.transport, 1);
        assert_eq!(s.error_counts.auth, 1);
        assert_eq!(s.error_counts.protocol, 1);
    }

    #[test]
    fn test_latency_recording() {
        let m = Metrics::new();
        m.record_refresh(120, true);
        m.record_refresh(80, false);

        let s = m.summary();
        assert_eq!(s.refreshes_completed, 2);
        assert!((s.avg_refresh_latency_ms.unwrap() - 100.0).abs() < f64::EPSILON);
        assert_eq!(s.recent_latencies.len(), 2);
        assert!(!s.recent_latencies[0].ok);
    }

    #[test]
    fn test_latency_cap() {
        let m = Metrics::new();
        for i in 0..1100 {
            m.record_refresh(i, true);
        }
        assert_eq!(m.latencies.lock().len(), 1000);
        assert_eq!(m.summary().refreshes_completed, 1100);
    }
}
