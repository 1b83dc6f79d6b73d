pub mod analysis;
pub mod reading;

pub use analysis::{AnalysisOutcome, AnalysisResult, HealthStatus, ResultOrigin};
pub use reading::{DeviceInfo, SensorReading, Vector3};
