//! Turns an exported CSV of interval readings into durational measurement
//! events ready for batch upload.

use std::fs::File;
use std::path::Path;

use anyhow::Context;
use csv::StringRecord;

use crate::entity::EntityRef;
use crate::event::{DurMeasurement, Event};
use crate::rfc3339;
use crate::units::{Quantity, Unit};

/// Reads a headered CSV of interval readings and pairs consecutive rows into
/// durational measurements.
///
/// Expected columns (by name): `ts` (RFC 3339 timestamp) and `kwh` (energy
/// used since the previous row). The first row only anchors the first
/// interval and contributes no measurement of its own.
pub fn read_measurements(
    path: &Path,
    subject: EntityRef<'_>,
    uncertainty: Quantity,
    time_uncertainty: f64,
) -> anyhow::Result<Vec<Event>> {
    let file =
        File::open(path).with_context(|| format!("cannot open CSV file {}", path.display()))?;
    let mut reader = csv::Reader::from_reader(file);
    let headers = reader.headers().context("cannot read CSV headers")?.clone();
    let ts_column = column(&headers, "ts")?;
    let kwh_column = column(&headers, "kwh")?;

    let subject_path = subject.path().to_string();
    let mut measurements = Vec::new();
    let mut previous: Option<f64> = None;
    for (index, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("cannot read CSV record {}", index + 1))?;
        let ts = rfc3339::from_timestamp(record.get(ts_column).unwrap_or(""))?;

        if let Some(start) = previous {
            let raw = record.get(kwh_column).unwrap_or("").trim();
            let kwh: f64 = raw
                .parse()
                .with_context(|| format!("invalid kwh value {raw:?} in record {}", index + 1))?;
            measurements.push(Event::Durational(DurMeasurement::new(
                subject_path.as_str(),
                start,
                ts,
                Quantity::new(kwh, Unit::KilowattHour),
                time_uncertainty,
                time_uncertainty,
                uncertainty,
            )));
        }
        previous = Some(ts);
    }
    Ok(measurements)
}

fn column(headers: &StringRecord, name: &str) -> anyhow::Result<usize> {
    headers
        .iter()
        .position(|header| header.trim() == name)
        .with_context(|| format!("missing column '{name}' in CSV header"))
}
