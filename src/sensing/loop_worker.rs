use std::sync::Arc;

use tokio::{
    sync::{watch, Mutex},
    time::{Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{models::SensorReading, recorder::Recorder};

use super::SampleSource;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Where each tick's reading goes: the recorder, and a watch channel that
/// always holds the newest reading for display.
#[derive(Clone)]
pub struct TickSink {
    pub recorder: Arc<Mutex<Recorder>>,
    pub latest: watch::Sender<Option<SensorReading>>,
}

pub async fn sampling_loop<S: SampleSource>(
    source: Arc<S>,
    sink: TickSink,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    // A late tick is sampled once; stale snapshots are never replayed.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut ticks: u64 = 0;
    let mut recorded: u64 = 0;

    log_info!("sampling loop started, interval {:?}", interval);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                log_info!("sampling loop shutting down after {} ticks ({} recorded)", ticks, recorded);
                break;
            }
            _ = ticker.tick() => {
                ticks = ticks.wrapping_add(1);
                if sample_tick(&*source, &sink).await {
                    recorded = recorded.wrapping_add(1);
                }
                if ticks % 1000 == 0 {
                    log_debug!("sampling loop at tick {} ({} recorded)", ticks, recorded);
                }
            }
        }
    }
}

/// Takes one snapshot and hands it to the sink. Returns whether the recorder
/// kept it.
pub async fn sample_tick<S: SampleSource + ?Sized>(source: &S, sink: &TickSink) -> bool {
    let reading = source.snapshot();
    let recorded = sink.recorder.lock().await.add_record(&reading);
    sink.latest.send_replace(Some(reading));
    recorded
}
