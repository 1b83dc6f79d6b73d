pub mod csv;
pub mod storage;

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::models::SensorReading;

pub use self::csv::{format_row, parse_csv, CSV_HEADER};
pub use storage::{RecordingFile, RecordingStore};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum RecorderState {
    #[default]
    Idle,
    Recording,
    Stopped,
}

/// Figures derived from the buffer. Field names are the ones the analysis
/// server expects in an upload's `stats` object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordingStats {
    pub data_points: usize,
    /// Seconds
    pub duration: f64,
    /// Bytes of the serialized CSV
    pub csv_size: usize,
}

/// In-memory recording buffer.
///
/// Rows accumulate for the whole session and are only released by the next
/// `start()` or by `clear()`. Sessions last seconds to minutes, so memory is
/// not bounded here.
#[derive(Debug, Default)]
pub struct Recorder {
    state: RecorderState,
    started_at: Option<DateTime<Utc>>,
    started_instant: Option<Instant>,
    recorded_for: Option<Duration>,
    rows: Vec<String>,
    row_bytes: usize,
    last_reading: Option<SensorReading>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fresh recording. Returns false, and keeps the current buffer,
    /// if one is already running.
    pub fn start(&mut self) -> bool {
        if self.state == RecorderState::Recording {
            return false;
        }

        self.clear();
        self.state = RecorderState::Recording;
        self.started_at = Some(Utc::now());
        self.started_instant = Some(Instant::now());
        info!("Recording started");
        true
    }

    /// Appends a row while recording. Readings arriving in any other state
    /// are dropped.
    pub fn add_record(&mut self, reading: &SensorReading) -> bool {
        if self.state != RecorderState::Recording {
            return false;
        }

        let row = format_row(reading);
        self.row_bytes += row.len() + 1;
        self.rows.push(row);
        self.last_reading = Some(reading.clone());
        true
    }

    pub fn stop(&mut self) {
        if self.state != RecorderState::Recording {
            return;
        }

        self.recorded_for = self.started_instant.map(|started| started.elapsed());
        self.state = RecorderState::Stopped;
        info!(
            "Recording stopped: {} rows over {:.2}s",
            self.rows.len(),
            self.duration().as_secs_f64()
        );
    }

    /// Header plus one line per row, or `None` if nothing was recorded.
    pub fn serialize(&self) -> Option<String> {
        if self.rows.is_empty() {
            return None;
        }

        let mut text = String::with_capacity(self.csv_size());
        text.push_str(CSV_HEADER);
        for row in &self.rows {
            text.push('\n');
            text.push_str(row);
        }
        Some(text)
    }

    pub fn stats(&self) -> RecordingStats {
        RecordingStats {
            data_points: self.rows.len(),
            duration: self.duration().as_secs_f64(),
            csv_size: self.csv_size(),
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecorderState::Recording
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn last_reading(&self) -> Option<&SensorReading> {
        self.last_reading.as_ref()
    }

    pub fn duration(&self) -> Duration {
        match (self.state, self.started_instant) {
            (RecorderState::Recording, Some(started)) => started.elapsed(),
            (RecorderState::Stopped, _) => self.recorded_for.unwrap_or_default(),
            _ => Duration::ZERO,
        }
    }

    fn csv_size(&self) -> usize {
        if self.rows.is_empty() {
            0
        } else {
            CSV_HEADER.len() + self.row_bytes
        }
    }
}
