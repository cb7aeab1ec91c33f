//! Object store sink - path-style HTTP PUT against an S3-compatible
//! endpoint (MinIO in the reference deployment).
//!
//! Keys are write-once: the store is configured to reject overwrites with
//! 409, which we treat as an idempotent ack since the key embeds the batch
//! sequence number and the payload for a sequence never changes.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, info};

use super::{Sink, SinkError, WriteAck};
use crate::config::ObjectStoreSinkConfig;
use crate::types::TierRecord;

pub struct ObjectStoreSink {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    token: Option<String>,
}

impl ObjectStoreSink {
    pub fn new(config: &ObjectStoreSinkConfig) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SinkError::Permanent(format!("http client: {e}")))?;

        info!(
            endpoint = %config.endpoint,
            bucket = %config.bucket,
            "Object store sink ready"
        );
        let token = config.access_token();
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
            token: (!token.is_empty()).then_some(token),
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }
}

#[async_trait]
impl Sink for ObjectStoreSink {
    async fn write(&self, key: &str, record: &TierRecord) -> Result<WriteAck, SinkError> {
        let body = serde_json::to_vec(record)
            .map_err(|e| SinkError::Permanent(format!("serialize {key}: {e}")))?;

        let mut request = self
            .client
            .put(self.object_url(key))
            .header("Content-Type", "application/json")
            .body(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(classify_reqwest_error)?;
        let status = response.status();

        if status.is_success() {
            debug!(key, %status, "Object stored");
            return Ok(WriteAck {
                sink: "object_store",
                key: key.to_string(),
            });
        }

        // Key already durable from a prior attempt
        if status == StatusCode::CONFLICT {
            debug!(key, "Object already present, skipping");
            return Ok(WriteAck {
                sink: "object_store",
                key: key.to_string(),
            });
        }

        let detail = response.text().await.unwrap_or_default();
        Err(classify_status(status, key, &detail))
    }

    fn sink_name(&self) -> &'static str {
        "object_store"
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> SinkError {
    if e.is_timeout() || e.is_connect() {
        SinkError::Transient(e.to_string())
    } else {
        SinkError::Permanent(e.to_string())
    }
}

/// 5xx and throttling are retryable; other 4xx (auth, missing bucket,
/// malformed request) would fail identically on every attempt.
fn classify_status(status: StatusCode, key: &str, detail: &str) -> SinkError {
    let message = format!("PUT {key}: {status} {detail}");
    if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        SinkError::Transient(message)
    } else {
        SinkError::Permanent(message)
    }
}
