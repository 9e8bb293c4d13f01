use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Method;
use serde::de::DeserializeOwned;

use super::JobApi;
use crate::domain::error::ApiError;
use crate::domain::job::Job;
use crate::domain::types::{
    CreateJobRequest, Envelope, JobListResponse, OrganisationsResponse, SwitchOrganisationRequest,
    UsageResponse, UsageStats,
};
use crate::infra::credentials::CredentialStore;

const API_PREFIX: &str = "/v1";

/// HTTP 実装の Fetch Client
pub struct HttpJobApi {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialStore>,
}

impl HttpJobApi {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(format!("HTTP client init failed: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// 認証付きリクエストを発行し、成功エンベロープの data を取り出す
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, ApiError> {
        let url = format!("{}{}{}", self.base_url, API_PREFIX, path);
        let mut request = self
            .client
            .request(method, &url)
            .header(ACCEPT, "application/json");

        if let Some(token) = self.credentials.token() {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Http {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("Request failed")
                    .to_string(),
                body,
            });
        }

        let bytes = response.bytes().await.map_err(transport_error)?;
        parse_envelope(&bytes)
    }
}

fn transport_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Transport(e.to_string())
    }
}

/// `{status:"success", data, message?}` を検証して data を返す
pub fn parse_envelope<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| ApiError::Parse(e.to_string()))?;

    let envelope: Envelope<serde_json::Value> = serde_json::from_value(value)
        .map_err(|_| ApiError::Protocol("Unexpected response format".to_string()))?;

    if envelope.status != "success" {
        return Err(ApiError::Protocol(
            envelope
                .message
                .unwrap_or_else(|| "Unexpected response format".to_string()),
        ));
    }

    let data = envelope
        .data
        .ok_or_else(|| ApiError::Protocol("Missing response data".to_string()))?;

    let decoded = match data {
        // null の data は空オブジェクトとして読めれば受け入れる
        serde_json::Value::Null => serde_json::from_value(serde_json::Value::Null).or_else(|_| {
            serde_json::from_value(serde_json::Value::Object(serde_json::Map::new()))
        }),
        data => serde_json::from_value(data),
    };
    decoded.map_err(|e| ApiError::Protocol(format!("Unexpected response data: {e}")))
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn list_jobs(&self, limit: u32) -> Result<Vec<Job>, ApiError> {
        let resp: JobListResponse = self
            .request(Method::GET, &format!("/jobs?limit={limit}"), None)
            .await?;
        Ok(resp.jobs)
    }

    async fn create_job(&self, request: &CreateJobRequest) -> Result<Job, ApiError> {
        let body = serde_json::to_value(request)
            .map_err(|e| ApiError::Protocol(format!("Request encode error: {e}")))?;
        self.request(Method::POST, "/jobs", Some(body)).await
    }

    async fn usage(&self) -> Result<Option<UsageStats>, ApiError> {
        let resp: UsageResponse = self.request(Method::GET, "/usage", None).await?;
        Ok(resp.usage)
    }

    async fn organisations(&self) -> Result<OrganisationsResponse, ApiError> {
        self.request(Method::GET, "/organisations", None).await
    }

    async fn switch_organisation(&self, organisation_id: &str) -> Result<(), ApiError> {
        let body = serde_json::to_value(SwitchOrganisationRequest {
            organisation_id: organisation_id.to_string(),
        })
        .map_err(|e| ApiError::Protocol(format!("Request encode error: {e}")))?;
        let _: serde_json::Value = self
            .request(Method::POST, "/organisations/switch", Some(body))
            .await?;
        Ok(())
    }
}
