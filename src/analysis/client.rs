use std::time::Duration;

use anyhow::Context;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use serde_json::Value;

use crate::{
    errors::AnalysisError,
    models::{AnalysisResult, HealthStatus, SensorReading},
    settings::ServerSettings,
};

use super::{
    payloads::{RecordingSummary, RecordingUpload, SampleRequest, StrokeRequest},
    AnalysisService, StrokeParams,
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

pub const HEALTH_PATH: &str = "/api/health";
pub const ANALYZE_SIMPLE_PATH: &str = "/api/analyze/simple";
pub const ANALYZE_STROKES_PATH: &str = "/api/analyze/tennis";
pub const UPLOAD_PATH: &str = "/api/recordings/upload";
pub const RECORDINGS_LIST_PATH: &str = "/api/recordings/list";
const RECORDINGS_PREFIX: &str = "/api/recordings/";

/// HTTP client for the analysis server.
#[derive(Debug, Clone)]
pub struct AnalysisClient {
    http: Client,
    base_url: String,
    health_timeout: Duration,
    sample_timeout: Duration,
    bulk_timeout: Duration,
}

impl AnalysisClient {
    pub fn new(settings: &ServerSettings) -> anyhow::Result<Self> {
        let http = Client::builder()
            .connect_timeout(settings.health_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            health_timeout: settings.health_timeout(),
            sample_timeout: settings.sample_timeout(),
            bulk_timeout: settings.bulk_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
        timeout: Duration,
    ) -> Result<Value, AnalysisError> {
        let url = self.endpoint(path);
        log_debug!("POST {}", url);
        let response = self
            .http
            .post(&url)
            .timeout(timeout)
            .json(body)
            .send()
            .await?;
        read_envelope(response).await
    }

    async fn get_json(&self, path: &str, timeout: Duration) -> Result<Value, AnalysisError> {
        let url = self.endpoint(path);
        log_debug!("GET {}", url);
        let response = self.http.get(&url).timeout(timeout).send().await?;
        read_envelope(response).await
    }

    /// Recordings the server has stored, as it reports them.
    pub async fn list_recordings(&self) -> Result<Vec<RecordingSummary>, AnalysisError> {
        let body = self
            .get_json(RECORDINGS_LIST_PATH, self.sample_timeout)
            .await?;

        let list = body
            .get("recordings")
            .or_else(|| body.get("data"))
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));

        serde_json::from_value(list).map_err(|err| AnalysisError::MalformedResponse {
            status: StatusCode::OK.as_u16(),
            reason: format!("recording list: {err}"),
        })
    }

    /// One stored recording together with the server's analysis of it.
    pub async fn fetch_recording(&self, session_id: &str) -> Result<AnalysisResult, AnalysisError> {
        let id = session_id.trim();
        if id.is_empty() || id.contains('/') {
            return Err(AnalysisError::ServerRejected {
                message: format!("invalid recording id '{session_id}'"),
            });
        }

        let path = format!("{RECORDINGS_PREFIX}{id}");
        let body = self.get_json(&path, self.sample_timeout).await?;
        Ok(AnalysisResult::from_server(body))
    }
}

impl AnalysisService for AnalysisClient {
    async fn health_check(&self) -> HealthStatus {
        let url = self.endpoint(HEALTH_PATH);
        match self
            .http
            .get(&url)
            .timeout(self.health_timeout)
            .send()
            .await
        {
            Ok(response) if response.status() == StatusCode::OK => {
                log_info!("analysis server reachable at {}", self.base_url);
                HealthStatus {
                    reachable: true,
                    message: "server reachable".into(),
                }
            }
            Ok(response) => {
                let status = response.status();
                log_warn!("health check returned HTTP {}", status.as_u16());
                HealthStatus {
                    reachable: false,
                    message: format!("server responded with HTTP {}", status.as_u16()),
                }
            }
            Err(err) => {
                log_warn!("health check failed: {}", err);
                HealthStatus {
                    reachable: false,
                    message: format!("connection failed: {err}"),
                }
            }
        }
    }

    async fn analyze_sample(&self, reading: &SensorReading) -> Result<AnalysisResult, AnalysisError> {
        let body = SampleRequest::from_reading(reading);
        let response = self
            .post_json(ANALYZE_SIMPLE_PATH, &body, self.sample_timeout)
            .await?;
        Ok(AnalysisResult::from_server(response))
    }

    async fn analyze_strokes(
        &self,
        csv_content: &str,
        params: StrokeParams,
    ) -> Result<AnalysisResult, AnalysisError> {
        let body = StrokeRequest::new(csv_content, params);
        let response = self
            .post_json(ANALYZE_STROKES_PATH, &body, self.bulk_timeout)
            .await?;
        Ok(AnalysisResult::from_server(response))
    }

    async fn upload_recording(
        &self,
        upload: &RecordingUpload,
    ) -> Result<AnalysisResult, AnalysisError> {
        log_info!(
            "uploading {} rows ({:.1}s) from {}",
            upload.data_points,
            upload.recording_duration,
            upload.device_name
        );
        let response = self
            .post_json(UPLOAD_PATH, upload, self.bulk_timeout)
            .await?;
        Ok(AnalysisResult::from_server(response))
    }
}

async fn read_envelope(response: Response) -> Result<Value, AnalysisError> {
    let status = response.status().as_u16();
    let text = response.text().await?;
    let body: Value = serde_json::from_str(&text).map_err(|err| {
        log_error!("undecodable response (HTTP {}): {}", status, err);
        AnalysisError::MalformedResponse {
            status,
            reason: err.to_string(),
        }
    })?;
    check_envelope(status, body)
}

/// Every server answer carries a boolean `success`; on `false` the reason is
/// in `error`, whatever the HTTP status says.
fn check_envelope(status: u16, body: Value) -> Result<Value, AnalysisError> {
    match body.get("success").and_then(Value::as_bool) {
        Some(true) => Ok(body),
        Some(false) => Err(AnalysisError::ServerRejected {
            message: body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
        }),
        None => Err(AnalysisError::MalformedResponse {
            status,
            reason: "missing boolean 'success' field".into(),
        }),
    }
}
