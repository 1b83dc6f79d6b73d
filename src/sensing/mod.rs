pub mod controller;
pub mod loop_worker;
pub mod source;

use crate::{
    device::ConfigStep,
    errors::DeviceError,
    models::{DeviceInfo, SensorReading},
};

pub use controller::SamplingController;
pub use source::{LiveSource, SyntheticSource};

/// Anything that can hand out IMU snapshots at tick cadence.
///
/// `snapshot` is called from the sampling task every tick, so it must be a
/// cheap read of already-decoded values and must never wait on the radio or
/// the network. Sources are shared between the controller and its sampling
/// task, hence `&self` everywhere.
pub trait SampleSource: Send + Sync + 'static {
    fn open(&self) -> Result<DeviceInfo, DeviceError>;
    fn close(&self);
    fn is_open(&self) -> bool;
    fn device_info(&self) -> DeviceInfo;
    fn snapshot(&self) -> SensorReading;

    /// Sources without registers accept every configuration step.
    fn apply_config_step(&self, step: ConfigStep) -> Result<(), DeviceError> {
        let _ = step;
        Ok(())
    }
}
