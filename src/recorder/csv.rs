//! The recording text format: one header line, then one comma-joined row per
//! reading. Device names, MACs and numbers never contain commas, so fields
//! are not quoted or escaped.

use chrono::{Local, NaiveDateTime, TimeZone, Utc};

use crate::{
    errors::CsvError,
    models::{DeviceInfo, SensorReading, Vector3},
};

pub const CSV_HEADER: &str =
    "Timestamp,DeviceName,Mac,AX,AY,AZ,GX,GY,GZ,AngX,AngY,AngZ,HX,HY,HZ,Electric,Temp";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

const COLUMNS: [&str; 17] = [
    "Timestamp",
    "DeviceName",
    "Mac",
    "AX",
    "AY",
    "AZ",
    "GX",
    "GY",
    "GZ",
    "AngX",
    "AngY",
    "AngZ",
    "HX",
    "HY",
    "HZ",
    "Electric",
    "Temp",
];

/// Formats one reading as a CSV row. Timestamps use the local wall clock.
pub fn format_row(reading: &SensorReading) -> String {
    let timestamp = reading.timestamp.with_timezone(&Local).format(TIMESTAMP_FORMAT);
    let acc = reading.acceleration;
    let gyro = reading.angular_velocity;
    let angle = reading.angle;
    let mag = reading.magnetic_field;

    format!(
        "{timestamp},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
        reading.device.name,
        reading.device.mac,
        acc.x,
        acc.y,
        acc.z,
        gyro.x,
        gyro.y,
        gyro.z,
        angle.x,
        angle.y,
        angle.z,
        mag.x,
        mag.y,
        mag.z,
        reading.battery,
        reading.temperature,
    )
}

/// Reads recording text back into readings.
pub fn parse_csv(text: &str) -> Result<Vec<SensorReading>, CsvError> {
    let mut lines = text.lines();
    match lines.next() {
        Some(header) if header.trim_end() == CSV_HEADER => {}
        _ => return Err(CsvError::MissingHeader),
    }

    lines
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        // Line numbers are 1-based and the header is line 1.
        .map(|(index, line)| parse_row(index + 2, line))
        .collect()
}

fn parse_row(line: usize, row: &str) -> Result<SensorReading, CsvError> {
    let fields: Vec<&str> = row.trim_end().split(',').collect();
    if fields.len() != COLUMNS.len() {
        return Err(CsvError::FieldCount {
            line,
            expected: COLUMNS.len(),
            found: fields.len(),
        });
    }

    let naive = NaiveDateTime::parse_from_str(fields[0], TIMESTAMP_FORMAT).map_err(|_| {
        CsvError::InvalidTimestamp {
            line,
            value: fields[0].to_string(),
        }
    })?;
    let timestamp = Local
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| CsvError::InvalidTimestamp {
            line,
            value: fields[0].to_string(),
        })?
        .with_timezone(&Utc);

    let number = |column: usize| -> Result<f64, CsvError> {
        fields[column]
            .trim()
            .parse::<f64>()
            .map_err(|_| CsvError::InvalidNumber {
                line,
                column: COLUMNS[column],
                value: fields[column].to_string(),
            })
    };

    Ok(SensorReading {
        timestamp,
        device: DeviceInfo::new(fields[1], fields[2]),
        acceleration: Vector3::new(number(3)?, number(4)?, number(5)?),
        angular_velocity: Vector3::new(number(6)?, number(7)?, number(8)?),
        angle: Vector3::new(number(9)?, number(10)?, number(11)?),
        magnetic_field: Vector3::new(number(12)?, number(13)?, number(14)?),
        battery: number(15)?,
        temperature: number(16)?,
    })
}
