use std::{
    collections::{HashMap, HashSet},
    f64::consts::PI,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard,
    },
    time::{Duration, Instant},
};

use log::debug;
use rand::Rng;

use crate::errors::DeviceError;

use super::{ImuDevice, SensorKey};

/// Seconds between two simulated swings.
const SWING_PERIOD_SECS: f64 = 2.0;
/// Width of the acceleration pulse of a swing.
const SWING_PULSE_SECS: f64 = 0.15;
const SWING_PEAK_G: f64 = 3.5;
const SWING_PEAK_DPS: f64 = 900.0;
const NOISE_G: f64 = 0.03;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionProfile {
    /// Lying flat on a table.
    Resting,
    /// A racket swung every couple of seconds.
    Swinging,
}

/// In-process stand-in for an IMU reached through the SDK.
pub struct SimulatedDevice {
    name: String,
    mac: String,
    profile: MotionProfile,
    open: AtomicBool,
    fail_open: AtomicBool,
    opened_at: Mutex<Option<Instant>>,
    overrides: Mutex<HashMap<SensorKey, String>>,
    failing_commands: Mutex<HashSet<&'static str>>,
    command_log: Mutex<Vec<&'static str>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl SimulatedDevice {
    pub fn new(name: impl Into<String>, mac: impl Into<String>, profile: MotionProfile) -> Self {
        Self {
            name: name.into(),
            mac: mac.into(),
            profile,
            open: AtomicBool::new(false),
            fail_open: AtomicBool::new(false),
            opened_at: Mutex::new(None),
            overrides: Mutex::new(HashMap::new()),
            failing_commands: Mutex::new(HashSet::new()),
            command_log: Mutex::new(Vec::new()),
        }
    }

    /// Pins a register to a fixed value, as the SDK would report it.
    pub fn set_register(&self, key: SensorKey, value: impl Into<String>) {
        lock(&self.overrides).insert(key, value.into());
    }

    pub fn clear_register(&self, key: SensorKey) {
        lock(&self.overrides).remove(&key);
    }

    /// Makes every later call of `command` (e.g. `"write_reg"`) fail.
    pub fn fail_command(&self, command: &'static str) {
        lock(&self.failing_commands).insert(command);
    }

    pub fn fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Register commands received so far, in order.
    pub fn commands(&self) -> Vec<&'static str> {
        lock(&self.command_log).clone()
    }

    fn command(&self, command: &'static str) -> Result<(), DeviceError> {
        if !self.is_open() {
            return Err(DeviceError::NotOpen);
        }
        lock(&self.command_log).push(command);
        if lock(&self.failing_commands).contains(command) {
            return Err(DeviceError::Command {
                command: command.to_string(),
                reason: "simulated failure".to_string(),
            });
        }
        Ok(())
    }

    fn elapsed_secs(&self) -> f64 {
        let opened_at = *lock(&self.opened_at);
        opened_at
            .map(|opened| opened.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn generated(&self, key: SensorKey) -> f64 {
        let resting = resting_value(key);
        if self.profile == MotionProfile::Resting {
            return resting;
        }

        // Gaussian pulse centred in each swing period.
        let phase = self.elapsed_secs() % SWING_PERIOD_SECS - SWING_PERIOD_SECS / 2.0;
        let pulse = (-(phase * phase) / (2.0 * SWING_PULSE_SECS * SWING_PULSE_SECS)).exp();
        let noise = rand::thread_rng().gen_range(-NOISE_G..NOISE_G);

        match key {
            SensorKey::AccX => resting + SWING_PEAK_G * pulse + noise,
            SensorKey::AccY => resting + 0.4 * SWING_PEAK_G * pulse * (PI * phase).cos() + noise,
            SensorKey::AccZ => resting + noise,
            SensorKey::GyroZ => SWING_PEAK_DPS * pulse + noise * 100.0,
            SensorKey::GyroX | SensorKey::GyroY => noise * 100.0,
            SensorKey::AngleZ => resting + 90.0 * pulse,
            _ => resting,
        }
    }
}

fn resting_value(key: SensorKey) -> f64 {
    match key {
        SensorKey::AccX => 0.01,
        SensorKey::AccY => 0.02,
        SensorKey::AccZ => 1.00,
        SensorKey::AngleX => 0.5,
        SensorKey::AngleY => -0.3,
        SensorKey::AngleZ => 1.2,
        SensorKey::ElectricQuantityPercentage => 100.0,
        SensorKey::Temperature => 25.0,
        _ => 0.0,
    }
}

impl ImuDevice for SimulatedDevice {
    fn name(&self) -> Option<String> {
        Some(self.name.clone())
    }

    fn mac(&self) -> Option<String> {
        Some(self.mac.clone())
    }

    fn open_device(&self) -> Result<(), DeviceError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(DeviceError::Open {
                reason: format!("{} did not answer", self.mac),
            });
        }
        *lock(&self.opened_at) = Some(Instant::now());
        self.open.store(true, Ordering::SeqCst);
        debug!("Simulated device {} opened", self.mac);
        Ok(())
    }

    fn close_device(&self) {
        self.open.store(false, Ordering::SeqCst);
        *lock(&self.opened_at) = None;
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn device_data(&self, key: SensorKey) -> Option<String> {
        if !self.is_open() {
            return None;
        }
        if let Some(value) = lock(&self.overrides).get(&key) {
            return Some(value.clone());
        }
        Some(format!("{:.3}", self.generated(key)))
    }

    fn unlock_reg(&self) -> Result<(), DeviceError> {
        self.command("unlock_reg")
    }

    fn save_reg(&self) -> Result<(), DeviceError> {
        self.command("save_reg")
    }

    fn applied_calibration(&self) -> Result<(), DeviceError> {
        self.command("applied_calibration")
    }

    fn start_field_calibration(&self) -> Result<(), DeviceError> {
        self.command("start_field_calibration")
    }

    fn end_field_calibration(&self) -> Result<(), DeviceError> {
        self.command("end_field_calibration")
    }

    fn write_reg(&self, _command: &[u8], wait: Duration) -> Result<(), DeviceError> {
        self.command("write_reg")?;
        std::thread::sleep(wait);
        Ok(())
    }
}
