// Error types for swingtrack

use thiserror::Error;

use crate::device::ConfigStep;

/// Failures reported by the device SDK seam.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to open device: {reason}")]
    Open { reason: String },
    #[error("device is not open")]
    NotOpen,
    #[error("device rejected {command}: {reason}")]
    Command { command: String, reason: String },
}

/// Failures talking to the analysis server. The session controller turns
/// any of these into an offline result for uploads.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("transport error: {reason}")]
    Transport { reason: String },
    #[error("server rejected request: {message}")]
    ServerRejected { message: String },
    #[error("malformed response (HTTP {status}): {reason}")]
    MalformedResponse { status: u16, reason: String },
}

impl From<reqwest::Error> for AnalysisError {
    fn from(err: reqwest::Error) -> Self {
        AnalysisError::Transport {
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Precondition {
    #[error("no device connected")]
    NotConnected,
    #[error("a device is already connected")]
    AlreadyConnected,
    #[error("no recording in progress")]
    NotRecording,
    #[error("a recording is still in progress")]
    StillRecording,
    #[error("no recorded data")]
    NoData,
    #[error("an upload is already in flight")]
    UploadInFlight,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("precondition failed: {0}")]
    PreconditionFailed(Precondition),
    #[error("configuration step '{step}' failed: {source}")]
    DeviceConfigStepFailed {
        step: ConfigStep,
        #[source]
        source: DeviceError,
    },
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl SessionError {
    pub fn precondition(&self) -> Option<Precondition> {
        match self {
            SessionError::PreconditionFailed(precondition) => Some(*precondition),
            _ => None,
        }
    }
}

impl From<Precondition> for SessionError {
    fn from(value: Precondition) -> Self {
        SessionError::PreconditionFailed(value)
    }
}

/// Problems reading a recording back from its CSV text.
#[derive(Debug, Error, PartialEq)]
pub enum CsvError {
    #[error("missing or unexpected header")]
    MissingHeader,
    #[error("line {line}: expected {expected} fields, found {found}")]
    FieldCount {
        line: usize,
        expected: usize,
        found: usize,
    },
    #[error("line {line}: invalid number in column {column}: '{value}'")]
    InvalidNumber {
        line: usize,
        column: &'static str,
        value: String,
    },
    #[error("line {line}: invalid timestamp '{value}'")]
    InvalidTimestamp { line: usize, value: String },
}
