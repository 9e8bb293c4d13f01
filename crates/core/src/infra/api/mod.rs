mod http;

pub use http::{parse_envelope, HttpJobApi};

use async_trait::async_trait;

use crate::domain::error::ApiError;
use crate::domain::job::Job;
use crate::domain::types::{CreateJobRequest, OrganisationsResponse, UsageStats};

/// リモートジョブAPI trait（同期コアが必要とする範囲のみ）
#[async_trait]
pub trait JobApi: Send + Sync {
    /// GET /jobs?limit=N（サーバー順 = 新しい順が前提）
    async fn list_jobs(&self, limit: u32) -> Result<Vec<Job>, ApiError>;

    /// POST /jobs
    async fn create_job(&self, request: &CreateJobRequest) -> Result<Job, ApiError>;

    /// GET /usage
    async fn usage(&self) -> Result<Option<UsageStats>, ApiError>;

    /// GET /organisations
    async fn organisations(&self) -> Result<OrganisationsResponse, ApiError>;

    /// POST /organisations/switch
    async fn switch_organisation(&self, organisation_id: &str) -> Result<(), ApiError>;
}
