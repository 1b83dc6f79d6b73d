use std::{
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use log::info;
use serde::Serialize;

const FILE_PREFIX: &str = "sensor_data_";
const FILE_EXTENSION: &str = "csv";
/// Recordings started within the same second get `_2`, `_3`, ... suffixes.
const MAX_NAME_SUFFIX: u32 = 1000;

/// A recording saved on disk.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingFile {
    pub path: PathBuf,
    pub name: String,
    pub size_bytes: u64,
    pub size_label: String,
    /// Rows below the header
    pub data_rows: usize,
}

/// Directory of CSV recordings kept when uploading is not wanted.
#[derive(Debug, Clone)]
pub struct RecordingStore {
    dir: PathBuf,
}

impl RecordingStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `csv` as `sensor_data_<start time>.csv` and returns its path.
    /// Existing recordings are never overwritten.
    pub fn save(&self, csv: &str, started_at: DateTime<Utc>) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;

        let stamp = started_at.with_timezone(&Local).format("%Y%m%d_%H%M%S");
        for attempt in 1..=MAX_NAME_SUFFIX {
            let name = if attempt == 1 {
                format!("{FILE_PREFIX}{stamp}.{FILE_EXTENSION}")
            } else {
                format!("{FILE_PREFIX}{stamp}_{attempt}.{FILE_EXTENSION}")
            };
            let path = self.dir.join(name);

            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("Failed to create {}", path.display()))
                }
            };
            file.write_all(csv.as_bytes())
                .with_context(|| format!("Failed to write recording to {}", path.display()))?;

            info!("Recording saved to {}", path.display());
            return Ok(path);
        }

        bail!(
            "Too many recordings named {FILE_PREFIX}{stamp} in {}",
            self.dir.display()
        )
    }

    /// CSV files in the store, newest first.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list {}", self.dir.display()))?;

        let mut files: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(FILE_EXTENSION) {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((modified, path));
        }

        // Newest first; names carry the start time, so they break ties.
        files.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
        Ok(files.into_iter().map(|(_, path)| path).collect())
    }

    pub fn read(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path)
            .with_context(|| format!("Failed to read recording {}", path.display()))
    }

    /// Deletes a CSV recording that lives directly in this store.
    pub fn delete(&self, path: &Path) -> Result<()> {
        if path.extension().and_then(|ext| ext.to_str()) != Some(FILE_EXTENSION) {
            bail!("{} is not a CSV recording", path.display());
        }
        let in_store = match (path.parent().map(fs::canonicalize), fs::canonicalize(&self.dir)) {
            (Some(Ok(parent)), Ok(dir)) => parent == dir,
            _ => false,
        };
        if !in_store {
            bail!(
                "{} is not in the recordings directory {}",
                path.display(),
                self.dir.display()
            );
        }

        fs::remove_file(path)
            .with_context(|| format!("Failed to delete recording {}", path.display()))
    }

    pub fn info(&self, path: &Path) -> Result<RecordingFile> {
        let size_bytes = fs::metadata(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?
            .len();
        let content = self.read(path)?;
        let lines = content.lines().filter(|line| !line.is_empty()).count();

        Ok(RecordingFile {
            path: path.to_path_buf(),
            name: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size_bytes,
            size_label: size_label(size_bytes),
            data_rows: lines.saturating_sub(1),
        })
    }
}

fn size_label(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{} KB", bytes / 1024)
    } else {
        format!("{} MB", bytes / (1024 * 1024))
    }
}
