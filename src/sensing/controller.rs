use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::info;
use tokio::{task::JoinHandle, time::Duration};
use tokio_util::sync::CancellationToken;

use super::{
    loop_worker::{sampling_loop, TickSink},
    SampleSource,
};

/// Owns the sampling task. At most one loop runs at a time, and `stop`
/// only returns once the task has exited.
#[derive(Default)]
pub struct SamplingController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl SamplingController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start<S: SampleSource>(
        &mut self,
        source: Arc<S>,
        sink: TickSink,
        interval: Duration,
    ) -> Result<()> {
        if self.handle.is_some() {
            bail!("sampling already active");
        }
        if interval.is_zero() {
            bail!("sampling interval must be greater than zero");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(sampling_loop(source, sink, interval, cancel_token.clone()));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        info!("Sampling started every {:?}", interval);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("sampling loop task failed to join")?;
            info!("Sampling stopped");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{recorder::Recorder, sensing::SyntheticSource};
    use tokio::sync::{watch, Mutex};

    fn sink() -> TickSink {
        TickSink {
            recorder: Arc::new(Mutex::new(Recorder::new())),
            latest: watch::channel(None).0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refuses_a_second_loop() {
        let source = Arc::new(SyntheticSource::new());
        let mut controller = SamplingController::new();

        controller
            .start(source.clone(), sink(), Duration::from_millis(5))
            .unwrap();
        assert!(controller
            .start(source, sink(), Duration::from_millis(5))
            .is_err());
        assert!(controller.is_running());

        controller.stop().await.unwrap();
        assert!(!controller.is_running());
    }

    #[tokio::test]
    async fn rejects_zero_interval() {
        let mut controller = SamplingController::new();
        assert!(controller
            .start(Arc::new(SyntheticSource::new()), sink(), Duration::ZERO)
            .is_err());
        assert!(!controller.is_running());
    }

    #[tokio::test]
    async fn stop_without_start_is_fine() {
        let mut controller = SamplingController::new();
        controller.stop().await.unwrap();
    }
}
