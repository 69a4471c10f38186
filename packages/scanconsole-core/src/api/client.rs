use super::{ConsoleConfig, EntityKind, InventoryApi, ScanApi};
use crate::error::ApiError;
use crate::scan::{ScanTask, ScanTaskRequest, Scanner};
use crate::target::TargetValidation;
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// reqwest-backed implementation of the console API traits.
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    base_url: String,
    token: Option<String>,
    http: reqwest::Client,
}

impl HttpApiClient {
    pub fn new(config: &ConsoleConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ApiError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            token: config.api_token.clone(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.token {
            Some(ref token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, ApiError> {
        let resp = self.authorize(builder).send().await?;
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        let detail = error_detail(&body).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });
        tracing::debug!("API request failed: {} - {}", status, body);
        Err(ApiError::Status {
            status: status.as_u16(),
            detail,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let resp = self.send(self.http.get(self.url(path))).await?;
        decode(resp).await
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, ApiError> {
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
}

/// FastAPI-style error body: `detail` is either a string or a list of
/// validation entries with a `msg` field.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

fn error_detail(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    match parsed.detail {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Array(items) => {
            let messages: Vec<String> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                .map(String::from)
                .collect();
            if messages.is_empty() {
                None
            } else {
                Some(messages.join("; "))
            }
        }
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[derive(Debug, Serialize)]
struct ValidateTargetRequest<'a> {
    target: &'a str,
}

#[async_trait]
impl ScanApi for HttpApiClient {
    async fn create_scan_task(&self, request: &ScanTaskRequest) -> Result<ScanTask, ApiError> {
        tracing::info!(
            "Creating scan task '{}' for {} ({})",
            request.name,
            request.target,
            request.scan_type
        );
        let resp = self
            .send(self.http.post(self.url("/scan-tasks")).json(request))
            .await?;
        decode(resp).await
    }

    async fn active_scan_task(&self) -> Result<Option<ScanTask>, ApiError> {
        let resp = match self.send(self.http.get(self.url("/scan-tasks/active"))).await {
            Ok(resp) => resp,
            Err(ApiError::Status { status: 404, .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        if resp.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let bytes = resp.bytes().await?;
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(None);
        }
        serde_json::from_slice::<Option<ScanTask>>(&bytes)
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn scan_task(&self, task_id: i64) -> Result<ScanTask, ApiError> {
        self.get_json(&format!("/scan-tasks/{}", task_id)).await
    }

    async fn cancel_scan_task(&self, task_id: i64) -> Result<(), ApiError> {
        self.send(
            self.http
                .post(self.url(&format!("/scan-tasks/{}/cancel", task_id))),
        )
        .await?;
        tracing::info!("Cancel request accepted for scan task {}", task_id);
        Ok(())
    }

    async fn list_scanners(&self) -> Result<Vec<Scanner>, ApiError> {
        self.get_json("/scanners").await
    }

    async fn scan_results(&self, task_id: i64) -> Result<serde_json::Value, ApiError> {
        self.get_json(&format!("/scan-tasks/{}/results", task_id))
            .await
    }

    async fn download_results(&self, task_id: i64) -> Result<Vec<u8>, ApiError> {
        let resp = self
            .send(
                self.http
                    .get(self.url(&format!("/scan-tasks/{}/download", task_id))),
            )
            .await?;
        Ok(resp.bytes().await?.to_vec())
    }

    async fn validate_target(&self, target: &str) -> Result<TargetValidation, ApiError> {
        let resp = self
            .send(
                self.http
                    .post(self.url("/network-ranges/validate"))
                    .json(&ValidateTargetRequest { target }),
            )
            .await?;
        decode(resp).await
    }
}

#[async_trait]
impl InventoryApi for HttpApiClient {
    async fn delete_entity(&self, kind: EntityKind, id: i64) -> Result<(), ApiError> {
        let path = format!("/{}/{}", kind.path_segment(), id);
        self.send(self.http.delete(self.url(&path))).await?;
        tracing::debug!("Deleted {} {}", kind.noun(1), id);
        Ok(())
    }

    async fn convert_device(&self, device_id: i64) -> Result<(), ApiError> {
        let path = format!("/devices/{}/convert", device_id);
        self.send(self.http.post(self.url(&path))).await?;
        tracing::debug!("Converted device {} to managed asset", device_id);
        Ok(())
    }
}
