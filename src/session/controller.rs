use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::anyhow;
use chrono::Utc;
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::{
    sync::{broadcast, mpsc, watch, Mutex},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::{
    analysis::{analyze_offline, AnalysisService, RecordingUpload, StrokeParams},
    device::{ConfigStep, DeviceEvent},
    errors::{Precondition, SessionError},
    models::{AnalysisOutcome, AnalysisResult, DeviceInfo, HealthStatus, SensorReading},
    recorder::{Recorder, RecordingStore},
    sensing::{loop_worker::TickSink, SampleSource, SamplingController},
    settings::{SamplingSettings, UserSettings},
};

use super::{
    configure::{auto_configure, ConfigReport},
    SessionSnapshot, SessionState, SessionStatus,
};

const EVENT_CAPACITY: usize = 64;

/// Notifications for presentation layers. Missing a `StateChanged` is
/// harmless; `snapshot()` always has the current truth.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum SessionEvent {
    StateChanged { status: SessionStatus },
    ConfigStepFailed { step: ConfigStep, message: String },
    AnalysisCompleted { outcome: AnalysisOutcome },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectOutcome {
    pub device: DeviceInfo,
    pub config: ConfigReport,
}

/// Drives one device through connect, record, upload and disconnect.
///
/// Locks are always taken in the order state, recorder, sampler, and the
/// recorder lock is never held while waiting on the sampling task.
pub struct SessionController<S: SampleSource, A: AnalysisService> {
    source: Arc<S>,
    analysis: Arc<A>,
    sampling: SamplingSettings,
    stroke: StrokeParams,
    state: Arc<Mutex<SessionState>>,
    recorder: Arc<Mutex<Recorder>>,
    sampler: Arc<Mutex<SamplingController>>,
    upload_in_flight: Arc<AtomicBool>,
    events: broadcast::Sender<SessionEvent>,
    latest: watch::Sender<Option<SensorReading>>,
}

impl<S: SampleSource, A: AnalysisService> Clone for SessionController<S, A> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            analysis: self.analysis.clone(),
            sampling: self.sampling.clone(),
            stroke: self.stroke,
            state: self.state.clone(),
            recorder: self.recorder.clone(),
            sampler: self.sampler.clone(),
            upload_in_flight: self.upload_in_flight.clone(),
            events: self.events.clone(),
            latest: self.latest.clone(),
        }
    }
}

impl<S: SampleSource, A: AnalysisService> SessionController<S, A> {
    pub fn new(source: Arc<S>, analysis: Arc<A>, settings: &UserSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (latest, _) = watch::channel(None);

        Self {
            source,
            analysis,
            sampling: settings.sampling.clone(),
            stroke: settings.stroke,
            state: Arc::new(Mutex::new(SessionState::new())),
            recorder: Arc::new(Mutex::new(Recorder::new())),
            sampler: Arc::new(Mutex::new(SamplingController::new())),
            upload_in_flight: Arc::new(AtomicBool::new(false)),
            events,
            latest,
        }
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock().await.clone();
        let (recorded_rows, recording_ms) = {
            let recorder = self.recorder.lock().await;
            (recorder.row_count(), recorder.duration().as_millis() as u64)
        };
        let sampling = self.sampler.lock().await.is_running();

        SessionSnapshot {
            state,
            recorded_rows,
            recording_ms,
            sampling,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn latest_reading(&self) -> Option<SensorReading> {
        self.latest.borrow().clone()
    }

    pub fn watch_readings(&self) -> watch::Receiver<Option<SensorReading>> {
        self.latest.subscribe()
    }

    pub async fn check_server(&self) -> HealthStatus {
        self.analysis.health_check().await
    }

    /// Opens the device, configures it and starts sampling.
    pub async fn connect(&self) -> Result<ConnectOutcome, SessionError> {
        {
            let mut state = self.state.lock().await;
            if state.status != SessionStatus::Disconnected {
                return Err(Precondition::AlreadyConnected.into());
            }
            state.begin_connecting();
        }
        self.emit_state(SessionStatus::Connecting);

        let source = self.source.clone();
        let opened = match tokio::task::spawn_blocking(move || source.open()).await {
            Ok(opened) => opened,
            Err(err) => {
                error!("Device open task failed: {}", err);
                self.source.close();
                self.abort_connect().await;
                return Err(anyhow!("device open task failed: {err}").into());
            }
        };
        let device = match opened {
            Ok(device) => device,
            Err(err) => {
                warn!("Failed to open device: {}", err);
                self.abort_connect().await;
                return Err(err.into());
            }
        };
        info!("Device {} ({}) open", device.name, device.mac);

        let config = if self.sampling.configure_on_connect {
            let events = self.events.clone();
            let configured = auto_configure(
                self.source.clone(),
                self.sampling.calibration_settle(),
                self.sampling.abort_on_config_failure,
                |failure| {
                    let _ = events.send(SessionEvent::ConfigStepFailed {
                        step: failure.step,
                        message: failure.message.clone(),
                    });
                },
            )
            .await;
            match configured {
                Ok(report) => report,
                Err(err) => {
                    self.source.close();
                    self.abort_connect().await;
                    return Err(err);
                }
            }
        } else {
            ConfigReport::default()
        };

        {
            let mut state = self.state.lock().await;
            if state.status != SessionStatus::Connecting {
                // disconnect() ran while we were opening or configuring, and
                // its close() may have come before our open().
                self.source.close();
                return Err(Precondition::NotConnected.into());
            }
            state.connected(device.clone());
            self.ensure_sampling().await?;
        }
        self.emit_state(SessionStatus::Connected);

        Ok(ConnectOutcome { device, config })
    }

    /// Starts a new recording and returns its id. Calling it again while
    /// recording returns the running recording's id.
    pub async fn start_recording(&self) -> Result<String, SessionError> {
        let mut state = self.state.lock().await;
        match state.status {
            SessionStatus::Recording => {
                return Ok(state.recording_id.clone().unwrap_or_default());
            }
            SessionStatus::Uploading => return Err(Precondition::UploadInFlight.into()),
            SessionStatus::Connected => {}
            SessionStatus::Disconnected | SessionStatus::Connecting => {
                return Err(Precondition::NotConnected.into())
            }
        }

        let started_at = {
            let mut recorder = self.recorder.lock().await;
            recorder.start();
            recorder.started_at().unwrap_or_else(Utc::now)
        };
        let recording_id = Uuid::new_v4().to_string();
        state.begin_recording(recording_id.clone(), started_at);
        self.ensure_sampling().await?;
        drop(state);

        info!("Recording {} started", recording_id);
        self.emit_state(SessionStatus::Recording);
        Ok(recording_id)
    }

    /// Stops the recording and uploads it. Any upload failure is answered
    /// with the offline analysis of the last recorded reading.
    ///
    /// The upload runs on its own task: dropping the returned future does not
    /// cancel it, and the controller still returns to Connected when it ends.
    pub async fn stop_recording_and_upload(&self) -> Result<AnalysisOutcome, SessionError> {
        let (upload, last_reading) = {
            let mut state = self.state.lock().await;
            match state.status {
                SessionStatus::Recording => {}
                SessionStatus::Uploading => return Err(Precondition::UploadInFlight.into()),
                _ => return Err(Precondition::NotRecording.into()),
            }
            // An upload from before a reconnect may still be running. Keep
            // recording so the caller can retry or save instead.
            if self.upload_in_flight.load(Ordering::SeqCst) {
                return Err(Precondition::UploadInFlight.into());
            }

            let (csv, stats, last_reading) = {
                let mut recorder = self.recorder.lock().await;
                recorder.stop();
                (
                    recorder.serialize(),
                    recorder.stats(),
                    recorder.last_reading().cloned(),
                )
            };

            let Some(csv) = csv else {
                state.recording_finished();
                drop(state);
                self.emit_state(SessionStatus::Connected);
                return Err(Precondition::NoData.into());
            };

            // Only this method sets the flag, and it holds the state lock.
            self.upload_in_flight.store(true, Ordering::SeqCst);
            state.begin_uploading();
            let device = state
                .device
                .clone()
                .unwrap_or_else(|| self.source.device_info());
            (
                RecordingUpload::new(&device, stats, csv, self.stroke, Utc::now()),
                last_reading,
            )
        };
        self.emit_state(SessionStatus::Uploading);

        let controller = self.clone();
        let task = tokio::spawn(async move { controller.finish_upload(upload, last_reading).await });
        let outcome = task
            .await
            .map_err(|err| anyhow!("upload task failed to join: {err}"))?;
        Ok(outcome)
    }

    async fn finish_upload(
        &self,
        upload: RecordingUpload,
        last_reading: Option<SensorReading>,
    ) -> AnalysisOutcome {
        let outcome = match self.analysis.upload_recording(&upload).await {
            Ok(result) => {
                info!("Upload of {} rows accepted", upload.data_points);
                AnalysisOutcome::from_server(result)
            }
            Err(err) => {
                warn!("Upload failed, falling back to offline analysis: {}", err);
                let reading = last_reading.unwrap_or_else(|| self.source.snapshot());
                AnalysisOutcome::fallback(analyze_offline(&reading), err.to_string())
            }
        };

        let status = {
            let mut state = self.state.lock().await;
            state.upload_finished(outcome.clone());
            state.status
        };
        self.upload_in_flight.store(false, Ordering::SeqCst);

        self.emit(SessionEvent::AnalysisCompleted {
            outcome: outcome.clone(),
        });
        self.emit_state(status);
        outcome
    }

    /// Stops the recording and writes it to `store` instead of uploading.
    pub async fn stop_recording_and_save(
        &self,
        store: &RecordingStore,
    ) -> Result<PathBuf, SessionError> {
        let (csv, started_at) = {
            let mut state = self.state.lock().await;
            if state.status != SessionStatus::Recording {
                return Err(Precondition::NotRecording.into());
            }

            let mut recorder = self.recorder.lock().await;
            recorder.stop();
            state.recording_finished();
            (
                recorder.serialize(),
                recorder.started_at().unwrap_or_else(Utc::now),
            )
        };
        self.emit_state(SessionStatus::Connected);

        let csv = csv.ok_or(Precondition::NoData)?;
        let store = store.clone();
        let path = tokio::task::spawn_blocking(move || store.save(&csv, started_at))
            .await
            .map_err(|err| anyhow!("save task failed to join: {err}"))??;
        Ok(path)
    }

    /// Server-side stroke detection over the last stopped recording.
    pub async fn analyze_strokes(
        &self,
        params: Option<StrokeParams>,
    ) -> Result<AnalysisResult, SessionError> {
        let csv = {
            let state = self.state.lock().await;
            if state.status == SessionStatus::Recording {
                return Err(Precondition::StillRecording.into());
            }
            self.recorder.lock().await.serialize()
        };
        let csv = csv.ok_or(Precondition::NoData)?;

        let result = self
            .analysis
            .analyze_strokes(&csv, params.unwrap_or(self.stroke))
            .await?;
        Ok(result)
    }

    /// Single-sample analysis of the newest reading, offline when the server
    /// cannot be used.
    pub async fn analyze_current_reading(&self) -> Result<AnalysisOutcome, SessionError> {
        if !self.state.lock().await.status.has_device() {
            return Err(Precondition::NotConnected.into());
        }

        let latest = self.latest_reading();
        let reading = latest.unwrap_or_else(|| self.source.snapshot());

        let outcome = match self.analysis.analyze_sample(&reading).await {
            Ok(result) => AnalysisOutcome::from_server(result),
            Err(err) => {
                warn!("Sample analysis failed, using offline analysis: {}", err);
                AnalysisOutcome::fallback(analyze_offline(&reading), err.to_string())
            }
        };

        self.emit(SessionEvent::AnalysisCompleted {
            outcome: outcome.clone(),
        });
        Ok(outcome)
    }

    /// Stops sampling, closes the device and drops everything buffered.
    /// Safe to call in any state.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        let previous = state.status;

        let stopped = self.sampler.lock().await.stop().await;
        self.source.close();
        self.recorder.lock().await.clear();
        state.reset();
        drop(state);

        self.latest.send_replace(None);
        if previous != SessionStatus::Disconnected {
            info!("Disconnected (was {:?})", previous);
            self.emit_state(SessionStatus::Disconnected);
        }

        stopped.map_err(SessionError::from)
    }

    /// Follows the SDK's Bluetooth events. Losing the active device
    /// disconnects the session.
    pub fn spawn_device_listener(&self, mut events: mpsc::Receiver<DeviceEvent>) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let DeviceEvent::Disconnected(lost) = &event else {
                    debug!("Device event: {:?}", event);
                    continue;
                };

                let active = controller
                    .state
                    .lock()
                    .await
                    .device
                    .as_ref()
                    .map(|device| device.mac == lost.mac)
                    .unwrap_or(false);
                if !active {
                    continue;
                }

                warn!("Device {} went away, disconnecting", lost.mac);
                if let Err(err) = controller.disconnect().await {
                    error!("Disconnect after device loss failed: {}", err);
                }
            }
        })
    }

    /// Caller holds the state lock.
    async fn ensure_sampling(&self) -> Result<(), SessionError> {
        let mut sampler = self.sampler.lock().await;
        if sampler.is_running() {
            return Ok(());
        }

        // Reap a loop that ended on its own before starting a new one.
        sampler.stop().await?;
        sampler.start(
            self.source.clone(),
            TickSink {
                recorder: self.recorder.clone(),
                latest: self.latest.clone(),
            },
            self.sampling.tick_interval(),
        )?;
        Ok(())
    }

    async fn abort_connect(&self) {
        self.state.lock().await.reset();
        self.emit_state(SessionStatus::Disconnected);
    }

    fn emit_state(&self, status: SessionStatus) {
        self.emit(SessionEvent::StateChanged { status });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::{MotionProfile, SimulatedDevice},
        errors::{AnalysisError, DeviceError},
        models::ResultOrigin,
        sensing::{LiveSource, SyntheticSource},
    };
    use serde_json::json;
    use std::{
        sync::atomic::AtomicUsize,
        time::Duration,
    };
    use tokio::sync::Notify;

    #[derive(Default)]
    struct FakeAnalysis {
        fail: bool,
        gate: Option<Arc<Notify>>,
        calls: AtomicUsize,
        uploads: std::sync::Mutex<Vec<RecordingUpload>>,
    }

    impl FakeAnalysis {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        fn gated(gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        async fn respond(&self) -> Result<AnalysisResult, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                Err(AnalysisError::Transport {
                    reason: "connection refused".into(),
                })
            } else {
                Ok(AnalysisResult::from_server(
                    json!({"success": true, "data": {"strokes_detected": 3}}),
                ))
            }
        }
    }

    impl AnalysisService for FakeAnalysis {
        async fn health_check(&self) -> HealthStatus {
            HealthStatus {
                reachable: !self.fail,
                message: "fake".into(),
            }
        }

        async fn analyze_sample(
            &self,
            _reading: &SensorReading,
        ) -> Result<AnalysisResult, AnalysisError> {
            self.respond().await
        }

        async fn analyze_strokes(
            &self,
            _csv_content: &str,
            _params: StrokeParams,
        ) -> Result<AnalysisResult, AnalysisError> {
            self.respond().await
        }

        async fn upload_recording(
            &self,
            upload: &RecordingUpload,
        ) -> Result<AnalysisResult, AnalysisError> {
            self.uploads.lock().unwrap().push(upload.clone());
            self.respond().await
        }
    }

    /// Opens slowly, or not at all, to widen the window between
    /// `begin_connecting` and the end of `open`.
    struct SlowSource {
        inner: SyntheticSource,
        open_delay: Duration,
        panic_on_open: bool,
    }

    impl SlowSource {
        fn new(open_delay: Duration) -> Self {
            Self {
                inner: SyntheticSource::new(),
                open_delay,
                panic_on_open: false,
            }
        }
    }

    impl SampleSource for SlowSource {
        fn open(&self) -> Result<DeviceInfo, DeviceError> {
            std::thread::sleep(self.open_delay);
            if self.panic_on_open {
                panic!("radio driver crashed");
            }
            self.inner.open()
        }

        fn close(&self) {
            self.inner.close()
        }

        fn is_open(&self) -> bool {
            self.inner.is_open()
        }

        fn device_info(&self) -> DeviceInfo {
            self.inner.device_info()
        }

        fn snapshot(&self) -> SensorReading {
            self.inner.snapshot()
        }
    }

    fn settings(tick_ms: u64) -> UserSettings {
        let mut settings = UserSettings::default();
        settings.sampling.tick_interval_ms = tick_ms;
        settings.sampling.calibration_settle_ms = 0;
        settings
    }

    fn controller(
        analysis: FakeAnalysis,
        tick_ms: u64,
    ) -> (
        SessionController<SyntheticSource, FakeAnalysis>,
        Arc<SyntheticSource>,
        Arc<FakeAnalysis>,
    ) {
        let source = Arc::new(SyntheticSource::new());
        let analysis = Arc::new(analysis);
        let controller =
            SessionController::new(source.clone(), analysis.clone(), &settings(tick_ms));
        (controller, source, analysis)
    }

    async fn wait_for_status<S: SampleSource, A: AnalysisService>(
        controller: &SessionController<S, A>,
        status: SessionStatus,
    ) {
        for _ in 0..200 {
            if controller.snapshot().await.state.status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("controller never reached {status:?}");
    }

    #[tokio::test]
    async fn connect_configures_and_starts_sampling() {
        let source = Arc::new(LiveSource::new(SimulatedDevice::new(
            "WT901BLE68",
            "AA:BB:CC:DD:EE:FF",
            MotionProfile::Resting,
        )));
        let controller = SessionController::new(
            source.clone(),
            Arc::new(FakeAnalysis::default()),
            &settings(5),
        );

        let outcome = controller.connect().await.unwrap();

        assert_eq!(outcome.device.mac, "AA:BB:CC:DD:EE:FF");
        assert!(outcome.config.is_clean());
        assert_eq!(outcome.config.completed.len(), 4);
        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.state.status, SessionStatus::Connected);
        assert!(snapshot.sampling);

        controller.disconnect().await.unwrap();

        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.state.status, SessionStatus::Disconnected);
        assert!(!snapshot.sampling);
        assert!(!source.is_open());
        assert!(controller.latest_reading().is_none());
    }

    #[tokio::test]
    async fn failing_config_step_is_reported_not_fatal() {
        let device = SimulatedDevice::new("WT901BLE68", "AA", MotionProfile::Resting);
        device.fail_command("write_reg");
        let controller = SessionController::new(
            Arc::new(LiveSource::new(device)),
            Arc::new(FakeAnalysis::default()),
            &settings(5),
        );
        let mut events = controller.subscribe();

        let outcome = controller.connect().await.unwrap();

        assert_eq!(outcome.config.failures.len(), 1);
        assert_eq!(outcome.config.failures[0].step, ConfigStep::SetOutputRate);
        let mut saw_failure = false;
        while let Ok(event) = events.try_recv() {
            if let SessionEvent::ConfigStepFailed { step, .. } = event {
                assert_eq!(step, ConfigStep::SetOutputRate);
                saw_failure = true;
            }
        }
        assert!(saw_failure);
        controller.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn aborting_config_leaves_device_closed() {
        let device = SimulatedDevice::new("WT901BLE68", "AA", MotionProfile::Resting);
        device.fail_command("write_reg");
        let source = Arc::new(LiveSource::new(device));
        let mut settings = settings(5);
        settings.sampling.abort_on_config_failure = true;
        let controller =
            SessionController::new(source.clone(), Arc::new(FakeAnalysis::default()), &settings);

        let err = controller.connect().await.unwrap_err();

        assert!(matches!(err, SessionError::DeviceConfigStepFailed { .. }));
        assert!(!source.is_open());
        assert_eq!(
            controller.snapshot().await.state.status,
            SessionStatus::Disconnected
        );
    }

    #[tokio::test]
    async fn open_failure_surfaces_device_error() {
        let device = SimulatedDevice::new("WT901BLE68", "AA", MotionProfile::Resting);
        device.fail_open(true);
        let controller = SessionController::new(
            Arc::new(LiveSource::new(device)),
            Arc::new(FakeAnalysis::default()),
            &settings(5),
        );

        assert!(matches!(
            controller.connect().await,
            Err(SessionError::Device(_))
        ));
        assert_eq!(
            controller.snapshot().await.state.status,
            SessionStatus::Disconnected
        );
    }

    #[tokio::test]
    async fn disconnect_while_opening_leaves_device_closed() {
        let source = Arc::new(SlowSource::new(Duration::from_millis(150)));
        let controller = SessionController::new(
            source.clone(),
            Arc::new(FakeAnalysis::default()),
            &settings(5),
        );

        let connecting = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.connect().await })
        };
        wait_for_status(&controller, SessionStatus::Connecting).await;
        controller.disconnect().await.unwrap();

        let err = connecting.await.unwrap().unwrap_err();
        assert_eq!(err.precondition(), Some(Precondition::NotConnected));
        assert!(!source.is_open());
        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.state.status, SessionStatus::Disconnected);
        assert!(!snapshot.sampling);
    }

    #[tokio::test]
    async fn crashed_open_task_does_not_wedge_connect() {
        let source = Arc::new(SlowSource {
            panic_on_open: true,
            ..SlowSource::new(Duration::ZERO)
        });
        let controller =
            SessionController::new(source, Arc::new(FakeAnalysis::default()), &settings(5));

        assert!(matches!(
            controller.connect().await,
            Err(SessionError::Internal(_))
        ));
        assert_eq!(
            controller.snapshot().await.state.status,
            SessionStatus::Disconnected
        );
        // Not AlreadyConnected: the failed attempt released the session.
        assert!(matches!(
            controller.connect().await,
            Err(SessionError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn second_connect_is_rejected() {
        let (controller, _, _) = controller(FakeAnalysis::default(), 5);
        controller.connect().await.unwrap();

        let err = controller.connect().await.unwrap_err();

        assert_eq!(err.precondition(), Some(Precondition::AlreadyConnected));
        controller.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn recording_requires_a_connection() {
        let (controller, _, _) = controller(FakeAnalysis::default(), 5);

        let err = controller.start_recording().await.unwrap_err();
        assert_eq!(err.precondition(), Some(Precondition::NotConnected));

        let err = controller.stop_recording_and_upload().await.unwrap_err();
        assert_eq!(err.precondition(), Some(Precondition::NotRecording));
    }

    #[tokio::test]
    async fn start_recording_is_idempotent() {
        let (controller, _, _) = controller(FakeAnalysis::default(), 5);
        controller.connect().await.unwrap();

        let first = controller.start_recording().await.unwrap();
        let second = controller.start_recording().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            controller.snapshot().await.state.status,
            SessionStatus::Recording
        );
        controller.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn empty_recording_is_no_data_without_network() {
        // The first tick fires on connect; the next one is an hour away.
        let (controller, _, analysis) = controller(FakeAnalysis::default(), 3_600_000);
        controller.connect().await.unwrap();
        controller.start_recording().await.unwrap();

        let err = controller.stop_recording_and_upload().await.unwrap_err();

        assert_eq!(err.precondition(), Some(Precondition::NoData));
        assert_eq!(analysis.calls(), 0);
        assert_eq!(
            controller.snapshot().await.state.status,
            SessionStatus::Connected
        );
        controller.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn upload_sends_every_recorded_row() {
        let (controller, _, analysis) = controller(FakeAnalysis::default(), 5);
        controller.connect().await.unwrap();
        controller.start_recording().await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let outcome = controller.stop_recording_and_upload().await.unwrap();

        assert!(!outcome.is_offline());
        assert_eq!(outcome.result.origin, ResultOrigin::Server);
        let uploads = analysis.uploads.lock().unwrap().clone();
        assert_eq!(uploads.len(), 1);
        let upload = &uploads[0];
        assert!(upload.data_points > 0);
        assert_eq!(upload.csv_content.lines().count(), upload.data_points + 1);
        assert_eq!(upload.device_mac, "00:00:00:00:00:00");

        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.state.status, SessionStatus::Connected);
        assert!(snapshot.state.last_outcome.is_some());
        controller.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn transport_failure_falls_back_to_offline() {
        let (controller, _, analysis) = controller(FakeAnalysis::failing(), 5);
        controller.connect().await.unwrap();
        controller.start_recording().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let outcome = controller.stop_recording_and_upload().await.unwrap();

        assert_eq!(analysis.calls(), 1);
        assert!(outcome.is_offline());
        assert!(outcome.result.success);
        assert_eq!(outcome.result.origin, ResultOrigin::Offline);
        // A resting device still measures 1 g.
        assert_eq!(outcome.result.payload["motion_state"], "in-motion");
        assert_eq!(
            controller.snapshot().await.state.status,
            SessionStatus::Connected
        );
        controller.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn second_stop_while_uploading_is_rejected() {
        let gate = Arc::new(Notify::new());
        let (controller, _, _) = controller(FakeAnalysis::gated(gate.clone()), 5);
        controller.connect().await.unwrap();
        controller.start_recording().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let first = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.stop_recording_and_upload().await })
        };
        wait_for_status(&controller, SessionStatus::Uploading).await;

        let err = controller.stop_recording_and_upload().await.unwrap_err();
        assert_eq!(err.precondition(), Some(Precondition::UploadInFlight));
        let err = controller.start_recording().await.unwrap_err();
        assert_eq!(err.precondition(), Some(Precondition::UploadInFlight));

        gate.notify_one();
        assert!(first.await.unwrap().is_ok());
        assert_eq!(
            controller.snapshot().await.state.status,
            SessionStatus::Connected
        );
        controller.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn stop_during_previous_sessions_upload_keeps_recording() {
        let gate = Arc::new(Notify::new());
        let (controller, _, analysis) = controller(FakeAnalysis::gated(gate.clone()), 5);
        controller.connect().await.unwrap();
        controller.start_recording().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let first = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.stop_recording_and_upload().await })
        };
        wait_for_status(&controller, SessionStatus::Uploading).await;
        controller.disconnect().await.unwrap();
        controller.connect().await.unwrap();
        controller.start_recording().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = controller.stop_recording_and_upload().await.unwrap_err();
        assert_eq!(err.precondition(), Some(Precondition::UploadInFlight));
        let snapshot = controller.snapshot().await;
        assert_eq!(snapshot.state.status, SessionStatus::Recording);
        assert!(snapshot.recorded_rows > 0);

        gate.notify_one();
        assert!(first.await.unwrap().is_ok());
        assert_eq!(
            controller.snapshot().await.state.status,
            SessionStatus::Recording
        );

        gate.notify_one();
        let outcome = controller.stop_recording_and_upload().await.unwrap();
        assert!(!outcome.is_offline());
        assert_eq!(analysis.uploads.lock().unwrap().len(), 2);
        assert_eq!(
            controller.snapshot().await.state.status,
            SessionStatus::Connected
        );
        controller.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn upload_finishes_after_caller_is_dropped() {
        let gate = Arc::new(Notify::new());
        let (controller, _, analysis) = controller(FakeAnalysis::gated(gate.clone()), 5);
        let mut events = controller.subscribe();
        controller.connect().await.unwrap();
        controller.start_recording().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let caller = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.stop_recording_and_upload().await })
        };
        wait_for_status(&controller, SessionStatus::Uploading).await;
        caller.abort();
        gate.notify_one();

        wait_for_status(&controller, SessionStatus::Connected).await;
        assert_eq!(analysis.uploads.lock().unwrap().len(), 1);
        let mut completed = false;
        while let Ok(event) = events.try_recv() {
            completed |= matches!(event, SessionEvent::AnalysisCompleted { .. });
        }
        assert!(completed);

        // The in-flight flag was released: a new recording can be uploaded.
        controller.start_recording().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.notify_one();
        assert!(controller.stop_recording_and_upload().await.is_ok());
        controller.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn saved_recording_can_be_analyzed_for_strokes() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordingStore::new(dir.path());
        let (controller, _, analysis) = controller(FakeAnalysis::default(), 5);
        controller.connect().await.unwrap();
        controller.start_recording().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let err = controller.analyze_strokes(None).await.unwrap_err();
        assert_eq!(err.precondition(), Some(Precondition::StillRecording));

        let path = controller.stop_recording_and_save(&store).await.unwrap();
        assert!(path.exists());
        assert_eq!(store.list().unwrap(), vec![path]);

        let result = controller.analyze_strokes(None).await.unwrap();
        assert_eq!(result.field("strokes_detected"), Some(&json!(3)));
        assert_eq!(analysis.calls(), 1);
        controller.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn strokes_without_recording_is_no_data() {
        let (controller, _, analysis) = controller(FakeAnalysis::default(), 5);

        let err = controller.analyze_strokes(None).await.unwrap_err();

        assert_eq!(err.precondition(), Some(Precondition::NoData));
        assert_eq!(analysis.calls(), 0);
    }

    #[tokio::test]
    async fn current_reading_falls_back_offline() {
        let (controller, _, _) = controller(FakeAnalysis::failing(), 5);

        let err = controller.analyze_current_reading().await.unwrap_err();
        assert_eq!(err.precondition(), Some(Precondition::NotConnected));

        controller.connect().await.unwrap();
        let mut readings = controller.watch_readings();
        readings.changed().await.unwrap();

        let outcome = controller.analyze_current_reading().await.unwrap();
        assert!(outcome.is_offline());
        assert_eq!(outcome.fallback_reason.as_deref(), Some("transport error: connection refused"));
        assert!(!controller.check_server().await.reachable);
        controller.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn losing_the_active_device_disconnects() {
        let (controller, source, _) = controller(FakeAnalysis::default(), 5);
        let (tx, rx) = mpsc::channel(8);
        let listener = controller.spawn_device_listener(rx);
        controller.connect().await.unwrap();
        controller.start_recording().await.unwrap();

        tx.send(DeviceEvent::Disconnected(DeviceInfo::new("Other", "11:22")))
            .await
            .unwrap();
        tx.send(DeviceEvent::Disconnected(DeviceInfo::synthetic()))
            .await
            .unwrap();

        wait_for_status(&controller, SessionStatus::Disconnected).await;
        assert!(!source.is_open());
        assert_eq!(controller.snapshot().await.recorded_rows, 0);

        drop(tx);
        listener.await.unwrap();
    }
}
