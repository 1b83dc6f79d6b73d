use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    models::{DeviceInfo, SensorReading},
    recorder::RecordingStats,
};

use super::StrokeParams;

/// Body of `POST /api/analyze/simple`. The server wants every sensor value
/// as a string with three decimals.
#[derive(Debug, Clone, Serialize)]
pub struct SampleRequest {
    pub sensor_data: SensorFields,
    pub device_info: DeviceFields,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SensorFields {
    pub acc_x: String,
    pub acc_y: String,
    pub acc_z: String,
    pub gyro_x: String,
    pub gyro_y: String,
    pub gyro_z: String,
    pub angle_x: String,
    pub angle_y: String,
    pub angle_z: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceFields {
    pub name: String,
    pub mac: String,
    pub connected: bool,
}

impl SampleRequest {
    pub fn from_reading(reading: &SensorReading) -> Self {
        let fmt = |value: f64| format!("{value:.3}");
        Self {
            sensor_data: SensorFields {
                acc_x: fmt(reading.acceleration.x),
                acc_y: fmt(reading.acceleration.y),
                acc_z: fmt(reading.acceleration.z),
                gyro_x: fmt(reading.angular_velocity.x),
                gyro_y: fmt(reading.angular_velocity.y),
                gyro_z: fmt(reading.angular_velocity.z),
                angle_x: fmt(reading.angle.x),
                angle_y: fmt(reading.angle.y),
                angle_z: fmt(reading.angle.z),
            },
            device_info: DeviceFields {
                name: reading.device.name.clone(),
                mac: reading.device.mac.clone(),
                connected: true,
            },
            timestamp: reading.timestamp.to_rfc3339(),
        }
    }
}

/// Body of `POST /api/analyze/tennis`.
#[derive(Debug, Clone, Serialize)]
pub struct StrokeRequest<'a> {
    pub csv_content: &'a str,
    pub threshold: f64,
    pub slice_len: usize,
}

impl<'a> StrokeRequest<'a> {
    pub fn new(csv_content: &'a str, params: StrokeParams) -> Self {
        Self {
            csv_content,
            threshold: params.threshold,
            slice_len: params.slice_len,
        }
    }
}

/// Body of `POST /api/recordings/upload`.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingUpload {
    pub device_name: String,
    pub device_mac: String,
    /// Seconds
    pub recording_duration: f64,
    pub data_points: usize,
    pub csv_content: String,
    pub timestamp: String,
    pub stats: RecordingStats,
    pub threshold: f64,
    pub slice_len: usize,
}

impl RecordingUpload {
    pub fn new(
        device: &DeviceInfo,
        stats: RecordingStats,
        csv_content: String,
        params: StrokeParams,
        uploaded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            device_name: device.name.clone(),
            device_mac: device.mac.clone(),
            recording_duration: stats.duration,
            data_points: stats.data_points,
            csv_content,
            timestamp: uploaded_at.to_rfc3339(),
            stats,
            threshold: params.threshold,
            slice_len: params.slice_len,
        }
    }
}

/// One entry of `GET /api/recordings/list`. The server has changed this
/// shape before, so every field is optional.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RecordingSummary {
    pub session_id: Option<String>,
    pub device_name: Option<String>,
    pub recording_duration: Option<f64>,
    pub data_points: Option<u64>,
    pub timestamp: Option<String>,
    pub strokes_detected: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Vector3;
    use serde_json::json;

    #[test]
    fn sample_request_uses_three_decimal_strings() {
        let mut reading = SensorReading::resting(DeviceInfo::synthetic(), Utc::now());
        reading.angular_velocity = Vector3::new(-12.34567, 0.0, 1.5);

        let body = serde_json::to_value(SampleRequest::from_reading(&reading)).unwrap();

        assert_eq!(body["sensor_data"]["acc_z"], "1.000");
        assert_eq!(body["sensor_data"]["gyro_x"], "-12.346");
        assert_eq!(body["sensor_data"]["angle_z"], "1.200");
        assert_eq!(body["device_info"]["connected"], true);
        assert_eq!(body["device_info"]["mac"], "00:00:00:00:00:00");
    }

    #[test]
    fn upload_carries_stats_and_detector_params() {
        let stats = RecordingStats {
            data_points: 2,
            duration: 0.01,
            csv_size: 120,
        };
        let upload = RecordingUpload::new(
            &DeviceInfo::new("WT901", "AA:BB"),
            stats,
            "csv".into(),
            StrokeParams::default(),
            Utc::now(),
        );

        let body = serde_json::to_value(&upload).unwrap();

        assert_eq!(body["device_name"], "WT901");
        assert_eq!(body["data_points"], 2);
        assert_eq!(body["recording_duration"], 0.01);
        assert_eq!(
            body["stats"],
            json!({"data_points": 2, "duration": 0.01, "csv_size": 120})
        );
        assert_eq!(body["threshold"], 300.0);
        assert_eq!(body["slice_len"], 200);
    }
}
