//! Seam over the vendor BLE SDK.
//!
//! The SDK owns discovery, connection and protocol framing. This crate only
//! needs the handful of primitives below: register snapshots for sampling and
//! the register commands used by the connect-time configuration sequence.

pub mod events;
pub mod simulated;

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::errors::DeviceError;

pub use events::{discover, DeviceEvent, DeviceRegistry, DEFAULT_SCAN_WINDOW};
pub use simulated::{MotionProfile, SimulatedDevice};

/// Register write that sets the output rate to 200 Hz.
pub const OUTPUT_RATE_200HZ_COMMAND: [u8; 5] = [0xFF, 0xAA, 0x03, 0x0A, 0x00];
/// How long the SDK waits after the output-rate write.
pub const OUTPUT_RATE_WRITE_WAIT: Duration = Duration::from_millis(10);

/// Keys of the values the SDK keeps for the latest packet it decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKey {
    AccX,
    AccY,
    AccZ,
    GyroX,
    GyroY,
    GyroZ,
    AngleX,
    AngleY,
    AngleZ,
    MagX,
    MagY,
    MagZ,
    ElectricQuantityPercentage,
    Temperature,
}

/// Primitives of an IMU handle as exposed by the SDK. Register values come
/// back as the strings the SDK decoded; reads never block on the radio.
pub trait ImuDevice: Send + Sync + 'static {
    fn name(&self) -> Option<String>;
    fn mac(&self) -> Option<String>;
    fn open_device(&self) -> Result<(), DeviceError>;
    fn close_device(&self);
    fn is_open(&self) -> bool;
    fn device_data(&self, key: SensorKey) -> Option<String>;

    fn unlock_reg(&self) -> Result<(), DeviceError>;
    fn save_reg(&self) -> Result<(), DeviceError>;
    fn applied_calibration(&self) -> Result<(), DeviceError>;
    fn start_field_calibration(&self) -> Result<(), DeviceError>;
    fn end_field_calibration(&self) -> Result<(), DeviceError>;
    fn write_reg(&self, command: &[u8], wait: Duration) -> Result<(), DeviceError>;
}

/// One step of the configuration sequence run right after connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConfigStep {
    AccelerometerCalibration,
    SetOutputRate,
    BeginFieldCalibration,
    EndFieldCalibration,
}

impl ConfigStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigStep::AccelerometerCalibration => "accelerometer calibration",
            ConfigStep::SetOutputRate => "set output rate",
            ConfigStep::BeginFieldCalibration => "begin magnetic field calibration",
            ConfigStep::EndFieldCalibration => "end magnetic field calibration",
        }
    }

    /// Runs the step against a device: unlock, act, save.
    pub fn apply(&self, device: &dyn ImuDevice) -> Result<(), DeviceError> {
        device.unlock_reg()?;
        match self {
            ConfigStep::AccelerometerCalibration => device.applied_calibration()?,
            ConfigStep::SetOutputRate => {
                device.write_reg(&OUTPUT_RATE_200HZ_COMMAND, OUTPUT_RATE_WRITE_WAIT)?
            }
            ConfigStep::BeginFieldCalibration => device.start_field_calibration()?,
            ConfigStep::EndFieldCalibration => device.end_field_calibration()?,
        }
        device.save_reg()
    }
}

impl fmt::Display for ConfigStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
