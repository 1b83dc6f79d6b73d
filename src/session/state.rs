use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{AnalysisOutcome, DeviceInfo};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Recording,
    Uploading,
}

impl SessionStatus {
    /// Whether a device is open in this status.
    pub fn has_device(&self) -> bool {
        matches!(
            self,
            SessionStatus::Connected | SessionStatus::Recording | SessionStatus::Uploading
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub status: SessionStatus,
    pub device: Option<DeviceInfo>,
    /// Id of the current or last recording
    pub recording_id: Option<String>,
    pub recording_started_at: Option<DateTime<Utc>>,
    pub last_outcome: Option<AnalysisOutcome>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_connecting(&mut self) {
        self.status = SessionStatus::Connecting;
    }

    pub fn connected(&mut self, device: DeviceInfo) {
        self.status = SessionStatus::Connected;
        self.device = Some(device);
    }

    pub fn begin_recording(&mut self, recording_id: String, started_at: DateTime<Utc>) {
        self.status = SessionStatus::Recording;
        self.recording_id = Some(recording_id);
        self.recording_started_at = Some(started_at);
        self.last_outcome = None;
    }

    /// Back to Connected once the recording has been handed off.
    pub fn recording_finished(&mut self) {
        if self.status == SessionStatus::Recording {
            self.status = SessionStatus::Connected;
        }
    }

    pub fn begin_uploading(&mut self) {
        self.status = SessionStatus::Uploading;
    }

    /// Returns to Connected unless a disconnect happened while the upload
    /// was in flight.
    pub fn upload_finished(&mut self, outcome: AnalysisOutcome) {
        if self.status == SessionStatus::Uploading {
            self.status = SessionStatus::Connected;
        }
        self.last_outcome = Some(outcome);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Read-only view of the controller for presentation layers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub recorded_rows: usize,
    pub recording_ms: u64,
    pub sampling: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnalysisResult;
    use serde_json::json;

    #[test]
    fn upload_after_disconnect_stays_disconnected() {
        let mut state = SessionState::new();
        state.connected(DeviceInfo::synthetic());
        state.begin_recording("r1".into(), Utc::now());
        state.begin_uploading();
        state.reset();

        state.upload_finished(AnalysisOutcome::from_server(AnalysisResult::from_server(
            json!({"success": true}),
        )));

        assert_eq!(state.status, SessionStatus::Disconnected);
        assert!(state.last_outcome.is_some());
    }

    #[test]
    fn status_serializes_camel_case() {
        assert_eq!(
            serde_json::to_value(SessionStatus::Uploading).unwrap(),
            json!("uploading")
        );
        assert!(SessionStatus::Recording.has_device());
        assert!(!SessionStatus::Connecting.has_device());
    }
}
