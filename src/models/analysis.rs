use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ResultOrigin {
    Server,
    Offline,
}

impl ResultOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultOrigin::Server => "Server",
            ResultOrigin::Offline => "Offline",
        }
    }
}

/// Result of a remote or offline analysis. The payload is whatever the
/// analyzer produced: motion classification, magnitude, stroke counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub success: bool,
    pub origin: ResultOrigin,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn from_server(payload: Value) -> Self {
        Self {
            success: true,
            origin: ResultOrigin::Server,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn offline(payload: Value) -> Self {
        Self {
            success: true,
            origin: ResultOrigin::Offline,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Looks a field up in the payload, then in its `data` object, which is
    /// where the server nests most of its results.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload
            .get(key)
            .or_else(|| self.payload.get("data").and_then(|data| data.get(key)))
    }
}

/// What a user-facing analysis action ended with. `fallback_reason` is set
/// when the server could not be used and the offline approximation stands in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutcome {
    pub result: AnalysisResult,
    pub fallback_reason: Option<String>,
}

impl AnalysisOutcome {
    pub fn from_server(result: AnalysisResult) -> Self {
        Self {
            result,
            fallback_reason: None,
        }
    }

    pub fn fallback(result: AnalysisResult, reason: impl Into<String>) -> Self {
        Self {
            result,
            fallback_reason: Some(reason.into()),
        }
    }

    pub fn is_offline(&self) -> bool {
        self.fallback_reason.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub reachable: bool,
    pub message: String,
}
