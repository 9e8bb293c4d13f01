use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::types::null_as_default;

/// ジョブ状態（サーバー文字列を正規化したもの）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobStatus {
    Pending,
    Queued,
    Initializing,
    Running,
    InProgress,
    Processing,
    Completed,
    Cancelled,
    Error,
    /// 未知のステータス（終端扱い）
    Other(String),
}

impl JobStatus {
    /// trim + lowercase してから分類する
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "pending" => Self::Pending,
            "queued" => Self::Queued,
            "initializing" => Self::Initializing,
            "running" => Self::Running,
            "in_progress" => Self::InProgress,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "cancelled" => Self::Cancelled,
            "error" | "failed" => Self::Error,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::InProgress => "in_progress",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
            Self::Other(raw) => raw,
        }
    }

    /// まだ変化中のステータスか（ポーリング/購読の対象）
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Pending
                | Self::Queued
                | Self::Initializing
                | Self::Running
                | Self::InProgress
                | Self::Processing
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// 表示ラベル
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed => "DONE",
            Self::Running | Self::Initializing | Self::InProgress | Self::Processing => {
                "IN PROGRESS"
            }
            Self::Pending | Self::Queued => "QUEUED",
            Self::Cancelled => "CANCELLED",
            Self::Error | Self::Other(_) => "ERROR",
        }
    }

    pub fn tone(&self) -> StatusTone {
        match self {
            Self::Completed => StatusTone::Success,
            s if s.is_active() => StatusTone::Warning,
            _ => StatusTone::Danger,
        }
    }
}

impl From<String> for JobStatus {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<JobStatus> for String {
    fn from(status: JobStatus) -> Self {
        status.as_str().to_string()
    }
}

/// ステータス表示色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusTone {
    Success,
    Warning,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDomain {
    pub name: String,
}

/// サイト監査ジョブ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_tasks: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub completed_tasks: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub failed_tasks: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub skipped_tasks: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub progress: f64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub avg_time_per_task_seconds: Option<f64>,
    #[serde(default)]
    pub domains: Option<JobDomain>,
}

impl Job {
    pub fn new(id: impl Into<String>, status: JobStatus, domain: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status,
            total_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            skipped_tasks: 0,
            progress: 0.0,
            created_at: None,
            started_at: None,
            completed_at: None,
            duration_seconds: None,
            avg_time_per_task_seconds: None,
            domains: Some(JobDomain {
                name: domain.into(),
            }),
        }
    }

    pub fn domain_name(&self) -> &str {
        self.domains.as_ref().map_or("", |d| d.name.as_str())
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// 処理済みタスク数（completed + failed + skipped）
    pub fn processed_tasks(&self) -> u64 {
        self.completed_tasks + self.failed_tasks + self.skipped_tasks
    }

    /// 処理済みが total を超えている（表示上の異常。エラーにはしない）
    pub fn has_count_anomaly(&self) -> bool {
        self.processed_tasks() > self.total_tasks
    }

    /// 所要時間（秒）。サーバー値優先、無ければ started/completed から算出
    pub fn duration(&self) -> Option<f64> {
        if let Some(secs) = self.duration_seconds {
            return Some(secs);
        }
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) if end >= start => {
                Some((end - start).num_milliseconds() as f64 / 1000.0)
            }
            _ => None,
        }
    }

    /// タスクあたり平均時間（秒）
    pub fn avg_time_per_task(&self) -> Option<f64> {
        if let Some(avg) = self.avg_time_per_task_seconds {
            return Some(avg);
        }
        if self.completed_tasks == 0 {
            return None;
        }
        self.duration()
            .map(|secs| secs / self.completed_tasks as f64)
    }
}
