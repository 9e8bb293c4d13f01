use std::io::Write;

use serde::Serialize;

use dashboard_core::domain::error::ErrorCode;
use dashboard_core::domain::job::{Job, StatusTone};
use dashboard_core::domain::types::{Organisation, UsageStats};
use dashboard_core::infra::output::{DashboardView, ViewUpdate};
use dashboard_core::usecase::sync_session::SyncSnapshot;

/// イベント名定数
pub const AUTH_STATE_CHANGED: &str = "auth_state_changed";
pub const JOB_UPDATED: &str = "job_updated";
pub const RECENT_JOBS: &str = "recent_jobs";
pub const USAGE_UPDATED: &str = "usage_updated";
pub const ORGANISATIONS: &str = "organisations";
pub const STATUS: &str = "status";
pub const SESSION_STATE_CHANGED: &str = "session_state_changed";
pub const METRICS: &str = "metrics";
pub const ERROR: &str = "error";

#[derive(Serialize)]
struct EventLine<'a, S: Serialize> {
    event: &'a str,
    timestamp: String,
    payload: S,
}

/// 統一イベント送信関数（stdout に JSON 1行）
pub fn emit_event<S: Serialize>(event_name: &str, payload: S) {
    let line = EventLine {
        event: event_name,
        timestamp: chrono::Utc::now().to_rfc3339(),
        payload,
    };
    let json = match serde_json::to_string(&line) {
        Ok(json) => json,
        Err(e) => {
            log::error!("イベント変換失敗 [{event_name}]: {e}");
            return;
        }
    };
    let mut stdout = std::io::stdout().lock();
    if let Err(e) = writeln!(stdout, "{json}") {
        log::error!("イベント送信失敗 [{event_name}]: {e}");
    }
}

/// auth_state_changed ペイロード
#[derive(Debug, Clone, Serialize)]
pub struct AuthStatePayload {
    pub authenticated: bool,
}

/// job_updated ペイロード（表示用の派生値込み）
#[derive(Debug, Clone, Serialize)]
pub struct JobPayload {
    pub id: String,
    pub domain: String,
    pub status: String,
    pub label: String,
    pub tone: StatusTone,
    pub active: bool,
    pub progress: f64,
    pub total_tasks: u64,
    pub processed_tasks: u64,
    pub failed_tasks: u64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub count_anomaly: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_time_per_task_seconds: Option<f64>,
}

impl From<&Job> for JobPayload {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            domain: job.domain_name().to_string(),
            status: job.status.as_str().to_string(),
            label: job.status.label().to_string(),
            tone: job.status.tone(),
            active: job.is_active(),
            progress: job.progress,
            total_tasks: job.total_tasks,
            processed_tasks: job.processed_tasks(),
            failed_tasks: job.failed_tasks,
            count_anomaly: job.has_count_anomaly(),
            duration_seconds: job.duration(),
            avg_time_per_task_seconds: job.avg_time_per_task(),
        }
    }
}

/// recent_jobs ペイロード
#[derive(Debug, Clone, Serialize)]
pub struct RecentJobsPayload {
    pub jobs: Vec<JobPayload>,
}

/// usage_updated ペイロード
#[derive(Debug, Clone, Serialize)]
pub struct UsagePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageStats>,
}

/// organisations ペイロード
#[derive(Debug, Clone, Serialize)]
pub struct OrganisationsPayload {
    pub organisations: Vec<Organisation>,
    pub active_organisation_id: Option<String>,
}

/// status ペイロード
#[derive(Debug, Clone, Serialize)]
pub struct StatusPayload {
    pub message: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

/// session_state_changed ペイロード
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatePayload {
    pub session_id: String,
    pub org_id: String,
    pub push_state: String,
    pub poll_state: String,
    pub fallback_running: bool,
    pub refresh_in_flight: bool,
    pub active: bool,
}

impl From<&SyncSnapshot> for SessionStatePayload {
    fn from(s: &SyncSnapshot) -> Self {
        Self {
            session_id: s.session_id.clone(),
            org_id: s.org_id.clone(),
            push_state: s.push_state.as_str().to_string(),
            poll_state: s.poll_state.as_str().to_string(),
            fallback_running: s.fallback_running,
            refresh_in_flight: s.refresh_in_flight,
            active: s.active,
        }
    }
}

/// error ペイロード
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: Option<ErrorCode>,
    pub message: String,
    pub recoverable: bool,
}

/// ViewUpdate を stdout イベントに変換するビュー
pub struct StdoutView;

impl DashboardView for StdoutView {
    fn render(&self, update: ViewUpdate) {
        match update {
            ViewUpdate::AuthState { authenticated } => {
                emit_event(AUTH_STATE_CHANGED, AuthStatePayload { authenticated })
            }
            ViewUpdate::Job { job } => {
                emit_event(JOB_UPDATED, job.as_ref().map(JobPayload::from))
            }
            ViewUpdate::RecentJobs { jobs } => emit_event(
                RECENT_JOBS,
                RecentJobsPayload {
                    jobs: jobs.iter().map(JobPayload::from).collect(),
                },
            ),
            ViewUpdate::Usage { usage } => emit_event(USAGE_UPDATED, UsagePayload { usage }),
            ViewUpdate::Organisations {
                organisations,
                active_organisation_id,
            } => emit_event(
                ORGANISATIONS,
                OrganisationsPayload {
                    organisations,
                    active_organisation_id,
                },
            ),
            ViewUpdate::Status { message, detail } => {
                emit_event(STATUS, StatusPayload { message, detail })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashboard_core::domain::job::JobStatus;

    #[test]
    fn test_job_payload_derives_display_fields() {
        let mut job = Job::new("j1", JobStatus::Running, "a.com");
        job.total_tasks = 10;
        job.completed_tasks = 3;
        job.failed_tasks = 1;

        let payload = JobPayload::from(&job);
        assert_eq!(payload.processed_tasks, 4);
        assert!(payload.active);
        assert!(!payload.count_anomaly);

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["status"], "running");
        assert!(json.get("count_anomaly").is_none());
        assert!(json.get("duration_seconds").is_none());
    }

    #[test]
    fn test_event_line_shape() {
        let line = EventLine {
            event: STATUS,
            timestamp: "2025-01-01T00:00:00Z".to_string(),
            payload: StatusPayload {
                message: "Scan started.".into(),
                detail: String::new(),
            },
        };
        let json = serde_json::to_value(&line).unwrap();
        assert_eq!(json["event"], "status");
        assert_eq!(json["payload"]["message"], "Scan started.");
        assert!(json["payload"].get("detail").is_none());
    }
}
