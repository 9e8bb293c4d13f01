use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 同期コアの設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// API のベースURL（末尾スラッシュなし）
    pub api_base_url: String,
    /// GET /jobs の limit
    pub job_list_limit: u32,
    /// レガシーポーリング間隔
    pub job_poll_interval_ms: u64,
    /// リフレッシュ合流ウィンドウ
    pub debounce_window_ms: u64,
    /// 遅延リフレッシュの最小待ち時間
    pub debounce_min_delay_ms: u64,
    /// 購読リトライ間隔
    pub subscribe_retry_interval_ms: u64,
    /// 購読リトライ上限
    pub max_subscribe_retries: u32,
    /// フォールバックポーリング間隔
    pub fallback_poll_interval_ms: u64,
    /// HTTP リクエストタイムアウト
    pub request_timeout_ms: u64,
}

impl SyncSettings {
    pub fn job_poll_interval(&self) -> Duration {
        Duration::from_millis(self.job_poll_interval_ms)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }

    pub fn debounce_min_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_min_delay_ms)
    }

    pub fn subscribe_retry_interval(&self) -> Duration {
        Duration::from_millis(self.subscribe_retry_interval_ms)
    }

    pub fn fallback_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fallback_poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// 0 が設定されている間隔の項目名（タイマーは正の周期が必要）
    pub fn zero_intervals(&self) -> Vec<&'static str> {
        [
            ("job_poll_interval_ms", self.job_poll_interval_ms),
            ("debounce_window_ms", self.debounce_window_ms),
            ("debounce_min_delay_ms", self.debounce_min_delay_ms),
            ("subscribe_retry_interval_ms", self.subscribe_retry_interval_ms),
            ("fallback_poll_interval_ms", self.fallback_poll_interval_ms),
            ("request_timeout_ms", self.request_timeout_ms),
        ]
        .into_iter()
        .filter(|(_, ms)| *ms == 0)
        .map(|(name, _)| name)
        .collect()
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            api_base_url: "https://adapt-pr-255.fly.dev".to_string(),
            job_list_limit: 50,
            job_poll_interval_ms: 6000,
            debounce_window_ms: 250,
            debounce_min_delay_ms: 100,
            subscribe_retry_interval_ms: 1000,
            max_subscribe_retries: 15,
            fallback_poll_interval_ms: 1000,
            request_timeout_ms: 15_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_have_no_zero_intervals() {
        assert!(SyncSettings::default().zero_intervals().is_empty());
    }

    #[test]
    fn test_zero_intervals_are_named() {
        let settings = SyncSettings {
            job_poll_interval_ms: 0,
            fallback_poll_interval_ms: 0,
            ..SyncSettings::default()
        };
        assert_eq!(
            settings.zero_intervals(),
            vec!["job_poll_interval_ms", "fallback_poll_interval_ms"]
        );
    }
}
