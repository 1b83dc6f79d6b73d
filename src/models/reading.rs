use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Identity of the IMU a reading came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub name: String,
    pub mac: String,
}

impl DeviceInfo {
    pub fn new(name: impl Into<String>, mac: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mac: mac.into(),
        }
    }

    pub fn synthetic() -> Self {
        Self::new(SYNTHETIC_DEVICE_NAME, SYNTHETIC_DEVICE_MAC)
    }
}

pub const SYNTHETIC_DEVICE_NAME: &str = "Synthetic IMU";
pub const SYNTHETIC_DEVICE_MAC: &str = "00:00:00:00:00:00";

/// One IMU sample. Built once per tick and never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub timestamp: DateTime<Utc>,
    pub device: DeviceInfo,
    /// Acceleration in g
    pub acceleration: Vector3,
    /// Angular velocity in °/s
    pub angular_velocity: Vector3,
    /// Orientation angle in °
    pub angle: Vector3,
    pub magnetic_field: Vector3,
    /// Battery charge, 0-100
    pub battery: f64,
    /// Temperature in °C
    pub temperature: f64,
}

impl SensorReading {
    /// The reading of a device lying flat and still. Used whenever no live
    /// device backs the pipeline.
    pub fn resting(device: DeviceInfo, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            device,
            acceleration: Vector3::new(0.01, 0.02, 1.00),
            angular_velocity: Vector3::default(),
            angle: Vector3::new(0.5, -0.3, 1.2),
            magnetic_field: Vector3::default(),
            battery: 100.0,
            temperature: 25.0,
        }
    }

    pub fn acceleration_magnitude(&self) -> f64 {
        self.acceleration.magnitude()
    }
}
