// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of GridScope.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Shared loader for the extracted-readings CSV.
//!
//! Loads and validates the extract, normalizes timestamps, filters rows to
//! the configured analysis window, and groups them per device/parameter for
//! the analyzers.

use crate::error::{AnalysisError, Result};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use gridscope_types::AnalysisConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

const REQUIRED_COLUMNS: [&str; 5] = ["device_id", "device_name", "param_key", "timestamp", "value"];

/// One normalized row of the extract.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub client_name: String,
    pub device_id: i64,
    pub device_name: String,
    pub param_key: String,
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

/// The filtered, window-bounded dataset an analyzer works on.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub records: Vec<Record>,
    pub window_start: NaiveDateTime,
    pub window_end: NaiveDateTime,
}

#[derive(Debug, Deserialize)]
struct RawRow {
    client_name: Option<String>,
    device_id: i64,
    device_name: String,
    param_key: String,
    timestamp: String,
    value: f64,
}

/// Load the extract at `csv_path`, keeping only rows inside the config's
/// date window. Missing required columns and unparseable timestamps are
/// fatal; the dataset is unusable without them.
pub fn load_dataset(config: &AnalysisConfig, csv_path: &Path) -> Result<Dataset> {
    let window_start = config.window_start()?;
    let window_end = config.window_end()?;

    let mut reader = csv::Reader::from_path(csv_path)?;

    let headers = reader.headers()?.clone();
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .filter(|col| !headers.iter().any(|h| h == **col))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(AnalysisError::MissingColumns(missing.join(", ")));
    }

    let mut records = Vec::new();
    let mut total_rows = 0usize;
    for row in reader.deserialize::<RawRow>() {
        let row = row?;
        total_rows += 1;

        let timestamp = normalize_timestamp(&row.timestamp)?;
        if timestamp < window_start || timestamp > window_end {
            continue;
        }

        records.push(Record {
            client_name: row.client_name.unwrap_or_else(|| "Unknown".to_string()),
            device_id: row.device_id,
            device_name: row.device_name,
            param_key: row.param_key,
            timestamp,
            value: row.value,
        });
    }

    records.sort_by(|a, b| {
        (a.device_id, &a.param_key, a.timestamp).cmp(&(b.device_id, &b.param_key, b.timestamp))
    });

    info!(
        "Loaded {} of {} rows inside the analysis window {} to {}",
        records.len(),
        total_rows,
        window_start,
        window_end
    );

    Ok(Dataset {
        records,
        window_start,
        window_end,
    })
}

/// Normalize one raw timestamp to the naive local-equivalent representation
/// used by every analyzer.
///
/// The extract carries UTC instants while the working-hours and per-day
/// grouping logic operates on wall-clock time one hour ahead of UTC, so a
/// fixed one-hour offset is applied before dropping the zone. The offset is
/// deliberately not DST-aware.
// TODO: confirm with the data source owner whether this offset should track
// CET/CEST instead of a fixed +1h.
fn normalize_timestamp(raw: &str) -> Result<NaiveDateTime> {
    let utc = parse_as_utc(raw)?;
    Ok((utc + Duration::hours(1)).naive_utc())
}

fn parse_as_utc(raw: &str) -> Result<DateTime<Utc>> {
    let cleaned = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(cleaned) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(cleaned, format) {
            return Ok(naive.and_utc());
        }
    }

    Err(AnalysisError::Timestamp(raw.to_string()))
}

/// Group the dataset per (device_id, param_key), dropping groups that have
/// no matching entry in the configuration.
pub fn configured_groups<'a>(
    dataset: &'a Dataset,
    config: &AnalysisConfig,
) -> BTreeMap<(i64, String), Vec<&'a Record>> {
    let mut groups: BTreeMap<(i64, String), Vec<&Record>> = BTreeMap::new();
    for record in &dataset.records {
        groups
            .entry((record.device_id, record.param_key.clone()))
            .or_default()
            .push(record);
    }

    groups.retain(|(device_id, param_key), records| {
        if config.has_device(*device_id, param_key) {
            true
        } else {
            warn!(
                "Device {} with parameter {} not found in configuration, dropping {} readings",
                device_id,
                param_key,
                records.len()
            );
            false
        }
    });

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use gridscope_types::{ApiKey, DeviceConfig, RequestType};
    use std::io::Write;

    fn test_config(start: &str, end: &str) -> AnalysisConfig {
        AnalysisConfig {
            api_keys: vec![ApiKey {
                token: "tok".to_string(),
                client_name: "Acme".to_string(),
            }],
            params: vec!["EACTIVE".to_string()],
            request_type: RequestType::Hourly,
            start_date: start.to_string(),
            end_date: end.to_string(),
            devices: vec![DeviceConfig {
                device_id: 101,
                name: "Main Incomer".to_string(),
                param: "EACTIVE".to_string(),
            }],
        }
    }

    fn write_csv(rows: &[(&str, i64, &str, &str, &str, f64)]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "client_name,device_id,device_name,param_key,timestamp,value,extraction_date"
        )
        .unwrap();
        for (client, id, name, param, ts, value) in rows {
            writeln!(file, "{client},{id},{name},{param},{ts},{value},2024-03-16T00:00:00Z").unwrap();
        }
        file
    }

    #[test]
    fn test_timestamps_get_fixed_offset() {
        let file = write_csv(&[(
            "Acme",
            101,
            "Main Incomer",
            "EACTIVE",
            "2024-03-01T10:00:00Z",
            5.0,
        )]);
        let config = test_config("2024-03-01T00:00:00", "2024-03-02T00:00:00");

        let dataset = load_dataset(&config, file.path()).unwrap();
        assert_eq!(dataset.records.len(), 1);
        assert_eq!(
            dataset.records[0].timestamp,
            NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(11, 0, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_window_filter_is_inclusive_and_config_driven() {
        let file = write_csv(&[
            // Lands at 2024-02-29T23:00 after the offset: outside.
            ("Acme", 101, "Main Incomer", "EACTIVE", "2024-02-29T22:00:00Z", 1.0),
            // Lands exactly on the window start: kept.
            ("Acme", 101, "Main Incomer", "EACTIVE", "2024-02-29T23:00:00Z", 2.0),
            // Lands exactly on the window end: kept.
            ("Acme", 101, "Main Incomer", "EACTIVE", "2024-03-01T23:00:00Z", 3.0),
            // One hour past the end: dropped.
            ("Acme", 101, "Main Incomer", "EACTIVE", "2024-03-02T00:00:00Z", 4.0),
        ]);
        let config = test_config("2024-03-01T00:00:00", "2024-03-02T00:00:00");

        let dataset = load_dataset(&config, file.path()).unwrap();
        let values: Vec<f64> = dataset.records.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![2.0, 3.0]);
    }

    #[test]
    fn test_missing_columns_are_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "device_id,device_name,value").unwrap();
        writeln!(file, "101,Main Incomer,5.0").unwrap();

        let config = test_config("2024-03-01", "2024-03-02");
        let result = load_dataset(&config, file.path());

        match result {
            Err(AnalysisError::MissingColumns(cols)) => {
                assert!(cols.contains("param_key"));
                assert!(cols.contains("timestamp"));
            }
            other => panic!("expected MissingColumns, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_client_name_column_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "device_id,device_name,param_key,timestamp,value").unwrap();
        writeln!(
            file,
            "101,Main Incomer,EACTIVE,2024-03-01T10:00:00Z,5.0"
        )
        .unwrap();

        let config = test_config("2024-03-01", "2024-03-02");
        let dataset = load_dataset(&config, file.path()).unwrap();
        assert_eq!(dataset.records[0].client_name, "Unknown");
    }

    #[test]
    fn test_unconfigured_groups_are_dropped() {
        let file = write_csv(&[
            ("Acme", 101, "Main Incomer", "EACTIVE", "2024-03-01T10:00:00Z", 5.0),
            ("Acme", 999, "Rogue Meter", "EACTIVE", "2024-03-01T10:00:00Z", 7.0),
        ]);
        let config = test_config("2024-03-01", "2024-03-02");
        let dataset = load_dataset(&config, file.path()).unwrap();

        let groups = configured_groups(&dataset, &config);
        assert_eq!(groups.len(), 1);
        assert!(groups.contains_key(&(101, "EACTIVE".to_string())));
    }
}
