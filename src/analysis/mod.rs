pub mod client;
pub mod offline;
pub mod payloads;

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::{
    errors::AnalysisError,
    models::{AnalysisResult, HealthStatus, SensorReading},
};

pub use client::AnalysisClient;
pub use offline::{analyze_offline, MotionState};
pub use payloads::{RecordingSummary, RecordingUpload};

/// Tunables of the server-side stroke detector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StrokeParams {
    /// Minimum acceleration magnitude for a sample to count as a stroke event
    pub threshold: f64,
    /// Window length, in samples, used to segment the series
    pub slice_len: usize,
}

impl Default for StrokeParams {
    fn default() -> Self {
        Self {
            threshold: 300.0,
            slice_len: 200,
        }
    }
}

/// Remote analysis as the session controller sees it.
///
/// Implementations report transport and protocol failures as errors and
/// never fall back on their own; deciding on the offline path is the
/// caller's job.
pub trait AnalysisService: Send + Sync + 'static {
    /// Never fails: an unreachable server is a `reachable: false` answer.
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;

    fn analyze_sample(
        &self,
        reading: &SensorReading,
    ) -> impl Future<Output = Result<AnalysisResult, AnalysisError>> + Send;

    fn analyze_strokes(
        &self,
        csv_content: &str,
        params: StrokeParams,
    ) -> impl Future<Output = Result<AnalysisResult, AnalysisError>> + Send;

    fn upload_recording(
        &self,
        upload: &RecordingUpload,
    ) -> impl Future<Output = Result<AnalysisResult, AnalysisError>> + Send;
}
