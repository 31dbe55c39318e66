//! reqwest implementation of the upload host.

use std::sync::Arc;
use std::time::Duration;

use partflow_jobs::{JobConnector, WsConnector};
use partflow_protocol::UploadInfo;
use partflow_protocol::constants::FILE_UPLOADS_PATH;
use partflow_transfer::{BoxFuture, PartPayload, PartUploader, TransferError, UploadOutcome};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::multipart::{Form, Part as FormPart};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::HostError;
use crate::host::{HostFuture, ProcessedItem, UploadHost};

/// Longest `Retry-After` the server may ask for, in seconds.
const MAX_RETRY_AFTER_SECS: u64 = 180;

/// Maps an HTTP response to an upload outcome.
///
/// A `Retry-After` of 1 to 180 seconds makes any failure retryable with
/// that floor. Otherwise only 429, 502, 503 and 504 are retryable.
pub fn classify_response(status: StatusCode, retry_after: Option<&str>) -> UploadOutcome {
    if status.is_success() {
        return UploadOutcome::Success;
    }

    if let Some(secs) = retry_after.and_then(|v| v.trim().parse::<u64>().ok())
        && (1..=MAX_RETRY_AFTER_SECS).contains(&secs)
    {
        return UploadOutcome::RetryableError {
            min_retry: Duration::from_secs(secs),
        };
    }

    match status {
        StatusCode::TOO_MANY_REQUESTS
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => UploadOutcome::RetryableError {
            min_retry: Duration::ZERO,
        },
        _ => UploadOutcome::NonRetryableError,
    }
}

/// Turns a non-success response into a [`HostError`].
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, HostError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let retry_after = resp
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let body = resp.text().await.unwrap_or_default();
    let reason = format!("{}: {body}", status.as_u16());

    match classify_response(status, retry_after.as_deref()) {
        UploadOutcome::RetryableError { min_retry } => {
            Err(HostError::Retryable { min_retry, reason })
        }
        _ => Err(HostError::NonRetryable(reason)),
    }
}

// ---------------------------------------------------------------------------
// Part uploads
// ---------------------------------------------------------------------------

/// Uploads parts of one file upload as multipart forms.
#[derive(Clone)]
pub struct HttpPartUploader {
    http: reqwest::Client,
    /// `<base>/api/1/file_uploads/<uid>`
    upload_url: String,
    authorization: String,
}

impl HttpPartUploader {
    pub fn new(http: reqwest::Client, base_url: &str, info: &UploadInfo) -> Self {
        Self {
            http,
            upload_url: format!(
                "{}{FILE_UPLOADS_PATH}/{}",
                base_url.trim_end_matches('/'),
                info.uid
            ),
            authorization: format!("bearer {}", info.jwt),
        }
    }

    pub fn part_url(&self, number: u32) -> String {
        format!("{}/{number}", self.upload_url)
    }
}

impl PartUploader for HttpPartUploader {
    fn try_upload(&self, payload: PartPayload) -> BoxFuture<Result<UploadOutcome, TransferError>> {
        let http = self.http.clone();
        let url = self.part_url(payload.part.number);
        let authorization = self.authorization.clone();

        Box::pin(async move {
            let number = payload.part.number;
            let len = payload.data.len() as u64;
            let form = Form::new().part(
                "file",
                FormPart::stream_with_length(payload.data, len).file_name("file"),
            );

            let resp = match http
                .post(&url)
                .header(AUTHORIZATION, authorization)
                .multipart(form)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(part = number, error = %e, "part upload request failed");
                    return Ok(UploadOutcome::RetryableError {
                        min_retry: Duration::ZERO,
                    });
                }
            };

            let status = resp.status();
            let retry_after = resp.headers().get(RETRY_AFTER).and_then(|v| v.to_str().ok());
            let outcome = classify_response(status, retry_after);
            if outcome != UploadOutcome::Success {
                debug!(part = number, status = status.as_u16(), ?outcome, "part rejected");
            }
            Ok(outcome)
        })
    }
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<ProcessedItem>,
}

/// [`UploadHost`] backed by a REST API and the live jobs WebSocket.
pub struct HttpHost {
    http: reqwest::Client,
    base_url: String,
    start_path: String,
    search_path: String,
    jobs: Arc<WsConnector>,
}

impl HttpHost {
    /// `start_path` creates uploads and `search_path` looks up processed
    /// files by hash. Both are relative to `base_url`. `access_token`, if
    /// given, is sent as a bearer token on those two endpoints.
    pub fn new(
        base_url: &str,
        start_path: &str,
        search_path: &str,
        access_token: Option<&str>,
    ) -> Result<Self, HostError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = access_token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("bearer {token}"))
                    .map_err(|_| HostError::NonRetryable("invalid access token".into()))?,
            );
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        let base_url = base_url.trim_end_matches('/').to_string();
        Ok(Self {
            http,
            jobs: Arc::new(WsConnector::new(&base_url)),
            base_url,
            start_path: start_path.to_string(),
            search_path: search_path.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

impl UploadHost for HttpHost {
    fn start_upload<'a>(
        &'a self,
        file_size: u64,
        extra: &'a Map<String, Value>,
    ) -> HostFuture<'a, Result<UploadInfo, HostError>> {
        Box::pin(async move {
            let mut body = extra.clone();
            body.insert("file_size".into(), Value::from(file_size));

            let resp = self
                .http
                .post(self.url(&self.start_path))
                .json(&body)
                .send()
                .await?;
            let bytes = check_status(resp).await?.bytes().await?;
            let info: UploadInfo = serde_json::from_slice(&bytes)?;
            debug!(uid = %info.uid, parts = info.parts.len(), "upload authorized");
            Ok(info)
        })
    }

    fn poll_processed<'a>(
        &'a self,
        sha512: &'a str,
    ) -> HostFuture<'a, Result<Option<ProcessedItem>, HostError>> {
        Box::pin(async move {
            let body = json!({
                "filters": {
                    "original_file_sha512": { "operator": "eq", "value": sha512 }
                },
                "limit": 1,
            });

            let resp = self
                .http
                .post(self.url(&self.search_path))
                .json(&body)
                .send()
                .await?;
            let bytes = check_status(resp).await?.bytes().await?;
            let found: SearchResponse = serde_json::from_slice(&bytes)?;
            Ok(found.items.into_iter().next())
        })
    }

    fn part_uploader(&self, info: &UploadInfo) -> Arc<dyn PartUploader> {
        Arc::new(HttpPartUploader::new(self.http.clone(), &self.base_url, info))
    }

    fn job_connector(&self) -> Arc<dyn JobConnector> {
        self.jobs.clone()
    }
}
