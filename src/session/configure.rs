use std::sync::Arc;

use serde::Serialize;
use tokio::time::{self, Duration};

use crate::{
    device::ConfigStep,
    errors::SessionError,
    sensing::SampleSource,
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Steps run before the settle wait; `EndFieldCalibration` follows it.
const STEPS_BEFORE_SETTLE: [ConfigStep; 3] = [
    ConfigStep::AccelerometerCalibration,
    ConfigStep::SetOutputRate,
    ConfigStep::BeginFieldCalibration,
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFailure {
    pub step: ConfigStep,
    pub message: String,
}

/// What the post-connect configuration managed to do.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigReport {
    pub completed: Vec<ConfigStep>,
    pub failures: Vec<ConfigFailure>,
}

impl ConfigReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs the configuration sequence against an open source.
///
/// Failed steps are logged and recorded in the report, and the sequence
/// moves on. With `abort_on_failure` the first failure is returned instead.
/// `on_failure` sees every failure as it happens.
pub async fn auto_configure<S, F>(
    source: Arc<S>,
    settle: Duration,
    abort_on_failure: bool,
    mut on_failure: F,
) -> Result<ConfigReport, SessionError>
where
    S: SampleSource,
    F: FnMut(&ConfigFailure),
{
    let mut report = ConfigReport::default();

    for step in STEPS_BEFORE_SETTLE {
        run_step(&source, step, abort_on_failure, &mut report, &mut on_failure).await?;
    }

    log_info!("waiting {:?} for the magnetometer to settle", settle);
    time::sleep(settle).await;

    run_step(
        &source,
        ConfigStep::EndFieldCalibration,
        abort_on_failure,
        &mut report,
        &mut on_failure,
    )
    .await?;

    log_info!(
        "configuration finished: {} ok, {} failed",
        report.completed.len(),
        report.failures.len()
    );
    Ok(report)
}

async fn run_step<S, F>(
    source: &Arc<S>,
    step: ConfigStep,
    abort_on_failure: bool,
    report: &mut ConfigReport,
    on_failure: &mut F,
) -> Result<(), SessionError>
where
    S: SampleSource,
    F: FnMut(&ConfigFailure),
{
    // Register writes block inside the SDK for a few milliseconds.
    let worker = source.clone();
    let outcome = tokio::task::spawn_blocking(move || worker.apply_config_step(step))
        .await
        .map_err(|err| anyhow::anyhow!("configuration step '{step}' panicked: {err}"))?;

    match outcome {
        Ok(()) => {
            log_info!("{} done", step);
            report.completed.push(step);
            Ok(())
        }
        Err(err) => {
            let error = SessionError::DeviceConfigStepFailed { step, source: err };
            log_warn!("{}", error);

            let failure = ConfigFailure {
                step,
                message: failure_message(&error),
            };
            on_failure(&failure);
            report.failures.push(failure);

            if abort_on_failure {
                Err(error)
            } else {
                Ok(())
            }
        }
    }
}

fn failure_message(error: &SessionError) -> String {
    match error {
        SessionError::DeviceConfigStepFailed { source, .. } => source.to_string(),
        other => other.to_string(),
    }
}
