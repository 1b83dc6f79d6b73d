use chrono::Utc;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::models::{AnalysisResult, SensorReading};

/// Magnitudes below this are "at rest".
pub const AT_REST_BELOW: f64 = 0.2;
/// Magnitudes below this (and not at rest) are "slight motion".
pub const SLIGHT_MOTION_BELOW: f64 = 1.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MotionState {
    AtRest,
    SlightMotion,
    InMotion,
}

impl MotionState {
    pub fn classify(magnitude: f64) -> Self {
        if magnitude < AT_REST_BELOW {
            MotionState::AtRest
        } else if magnitude < SLIGHT_MOTION_BELOW {
            MotionState::SlightMotion
        } else {
            MotionState::InMotion
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MotionState::AtRest => "at-rest",
            MotionState::SlightMotion => "slight-motion",
            MotionState::InMotion => "in-motion",
        }
    }
}

/// Local stand-in for the server's analysis: classifies the reading by the
/// magnitude of its acceleration vector. Pure; never touches the network.
pub fn analyze_offline(reading: &SensorReading) -> AnalysisResult {
    let magnitude = reading.acceleration_magnitude();
    let state = MotionState::classify(magnitude);
    warn!(
        "Using offline analysis: |a| = {:.4} g, {}",
        magnitude,
        state.as_str()
    );

    AnalysisResult::offline(json!({
        "success": true,
        "acceleration_magnitude": magnitude,
        "motion_state": state.as_str(),
        "analysis_type": "offline",
        "device": reading.device,
        "timestamp": Utc::now().to_rfc3339(),
        "note": "approximate result, analysis server unavailable",
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeviceInfo, ResultOrigin, Vector3};

    fn reading_with(acc: Vector3) -> SensorReading {
        let mut reading = SensorReading::resting(DeviceInfo::synthetic(), Utc::now());
        reading.acceleration = acc;
        reading
    }

    #[test]
    fn classification_boundaries() {
        assert_eq!(MotionState::classify(0.0), MotionState::AtRest);
        assert_eq!(MotionState::classify(0.199), MotionState::AtRest);
        assert_eq!(MotionState::classify(0.2), MotionState::SlightMotion);
        assert_eq!(MotionState::classify(0.999), MotionState::SlightMotion);
        assert_eq!(MotionState::classify(1.0), MotionState::InMotion);
        assert_eq!(MotionState::classify(12.5), MotionState::InMotion);
    }

    #[test]
    fn zero_acceleration_is_at_rest() {
        let result = analyze_offline(&reading_with(Vector3::new(0.0, 0.0, 0.0)));

        assert!(result.success);
        assert_eq!(result.origin, ResultOrigin::Offline);
        assert_eq!(result.payload["motion_state"], "at-rest");
        assert_eq!(result.payload["acceleration_magnitude"], 0.0);
    }

    #[test]
    fn one_g_on_z_is_in_motion() {
        let result = analyze_offline(&reading_with(Vector3::new(0.0, 0.0, 1.0)));

        assert_eq!(result.payload["motion_state"], "in-motion");
        assert_eq!(result.payload["acceleration_magnitude"], 1.0);
    }

    #[test]
    fn small_vector_is_slight_motion() {
        let result = analyze_offline(&reading_with(Vector3::new(0.3, 0.4, 0.0)));
        assert_eq!(result.payload["motion_state"], "slight-motion");
    }
}
