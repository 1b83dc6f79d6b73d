use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use log::info;

use crate::{
    device::{ConfigStep, ImuDevice, SensorKey},
    errors::DeviceError,
    models::{DeviceInfo, SensorReading, Vector3},
};

use super::SampleSource;

const UNKNOWN_DEVICE: &str = "Unknown";

/// Samples a device reached through the SDK.
pub struct LiveSource<D: ImuDevice> {
    device: D,
}

impl<D: ImuDevice> LiveSource<D> {
    pub fn new(device: D) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    fn value(&self, key: SensorKey) -> f64 {
        self.device
            .device_data(key)
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .unwrap_or(0.0)
    }

    fn vector(&self, x: SensorKey, y: SensorKey, z: SensorKey) -> Vector3 {
        Vector3::new(self.value(x), self.value(y), self.value(z))
    }
}

impl<D: ImuDevice> SampleSource for LiveSource<D> {
    fn open(&self) -> Result<DeviceInfo, DeviceError> {
        self.device.open_device()?;
        let info = self.device_info();
        info!("Opened device {} ({})", info.name, info.mac);
        Ok(info)
    }

    fn close(&self) {
        self.device.close_device();
    }

    fn is_open(&self) -> bool {
        self.device.is_open()
    }

    fn device_info(&self) -> DeviceInfo {
        DeviceInfo::new(
            self.device
                .name()
                .unwrap_or_else(|| UNKNOWN_DEVICE.to_string()),
            self.device
                .mac()
                .unwrap_or_else(|| UNKNOWN_DEVICE.to_string()),
        )
    }

    fn snapshot(&self) -> SensorReading {
        let timestamp = Utc::now();
        if !self.device.is_open() {
            return SensorReading::resting(self.device_info(), timestamp);
        }

        SensorReading {
            timestamp,
            device: self.device_info(),
            acceleration: self.vector(SensorKey::AccX, SensorKey::AccY, SensorKey::AccZ),
            angular_velocity: self.vector(SensorKey::GyroX, SensorKey::GyroY, SensorKey::GyroZ),
            angle: self.vector(SensorKey::AngleX, SensorKey::AngleY, SensorKey::AngleZ),
            magnetic_field: self.vector(SensorKey::MagX, SensorKey::MagY, SensorKey::MagZ),
            battery: self.value(SensorKey::ElectricQuantityPercentage),
            temperature: self.value(SensorKey::Temperature),
        }
    }

    fn apply_config_step(&self, step: ConfigStep) -> Result<(), DeviceError> {
        if !self.device.is_open() {
            return Err(DeviceError::NotOpen);
        }
        step.apply(&self.device)
    }
}

/// Always reports a device lying still. Lets the whole pipeline run
/// without hardware.
pub struct SyntheticSource {
    device: DeviceInfo,
    open: AtomicBool,
}

impl SyntheticSource {
    pub fn new() -> Self {
        Self::with_device(DeviceInfo::synthetic())
    }

    pub fn with_device(device: DeviceInfo) -> Self {
        Self {
            device,
            open: AtomicBool::new(false),
        }
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SampleSource for SyntheticSource {
    fn open(&self) -> Result<DeviceInfo, DeviceError> {
        self.open.store(true, Ordering::SeqCst);
        Ok(self.device.clone())
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn device_info(&self) -> DeviceInfo {
        self.device.clone()
    }

    fn snapshot(&self) -> SensorReading {
        SensorReading::resting(self.device.clone(), Utc::now())
    }
}
