use serde::{Deserialize, Deserializer, Serialize};

use super::job::Job;

/// 成功レスポンスのエンベロープ `{status: "success", data, message?}`
///
/// data はキーが無いときだけ None。`"data": null` は Some(null) になる。
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Envelope<T> {
    pub status: String,
    #[serde(default, deserialize_with = "present")]
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// null を既定値として読む（サーバーが数値欄に null を返すことがある）
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// 利用状況（日次上限）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub daily_limit: u64,
    pub daily_used: u64,
    pub daily_remaining: u64,
    #[serde(default)]
    pub usage_percentage: f64,
    #[serde(default)]
    pub plan_name: String,
    #[serde(default)]
    pub plan_display_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UsageResponse {
    pub usage: Option<UsageStats>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobListResponse {
    #[serde(default)]
    pub jobs: Vec<Job>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organisation {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrganisationsResponse {
    #[serde(default)]
    pub organisations: Vec<Organisation>,
    #[serde(default)]
    pub active_organisation_id: Option<String>,
}

/// POST /jobs リクエスト
#[derive(Debug, Clone, Serialize)]
pub struct CreateJobRequest {
    pub domain: String,
    pub source_type: String,
    pub source_detail: String,
}

impl CreateJobRequest {
    /// Designer 拡張からのサイトチェック
    pub fn from_extension(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            source_type: "extension".to_string(),
            source_detail: "webflow_designer_check".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SwitchOrganisationRequest {
    pub organisation_id: String,
}

// ─── Designer site info ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainStage {
    Staging,
    Production,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteDomain {
    pub url: String,
    #[serde(default)]
    pub last_published: Option<String>,
    #[serde(default)]
    pub default: bool,
    pub stage: DomainStage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteInfo {
    pub site_id: String,
    pub site_name: String,
    pub short_name: String,
    #[serde(default)]
    pub domains: Vec<SiteDomain>,
}
