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

//! Client configuration loading and validation.
//!
//! A configuration file is the single source of truth for a run: which API
//! tokens to use, which devices and parameters to pull, and the date window
//! every analysis is measured against.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(String),

    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid JSON in configuration file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid date in configuration: {0}")]
    Date(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

fn default_client_name() -> String {
    "Unknown Client".to_string()
}

/// One API credential and the client it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub token: String,
    #[serde(default = "default_client_name")]
    pub client_name: String,
}

/// A single configured device/parameter pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub device_id: i64,
    pub name: String,
    pub param: String,
}

/// Resolution of the readings request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Hourly,
    Monthly,
}

impl RequestType {
    /// Resolution code expected by the readings API.
    pub fn resolution(self) -> &'static str {
        match self {
            Self::Hourly => "H",
            Self::Monthly => "M",
        }
    }
}

/// Full run configuration: credentials, parameter whitelist, date window
/// and device list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub api_keys: Vec<ApiKey>,
    pub params: Vec<String>,
    pub request_type: RequestType,
    pub start_date: String,
    pub end_date: String,
    pub devices: Vec<DeviceConfig>,
}

impl AnalysisConfig {
    /// Soft validation: duplicate device ids and devices whose parameter is
    /// not in the declared whitelist are logged, not rejected.
    pub fn validate(&self) {
        let allowed: HashSet<&str> = self.params.iter().map(String::as_str).collect();
        let mut seen_ids: HashSet<i64> = HashSet::new();

        for device in &self.devices {
            if !seen_ids.insert(device.device_id) {
                warn!("Duplicate device ID found: {}", device.device_id);
            }
            if !allowed.contains(device.param.as_str()) {
                debug!(
                    "Device {} uses param {} which is not in the allowed params list",
                    device.name, device.param
                );
            }
        }
    }

    /// Parsed start of the analysis window.
    pub fn window_start(&self) -> Result<NaiveDateTime> {
        parse_config_date(&self.start_date)
    }

    /// Parsed end of the analysis window.
    pub fn window_end(&self) -> Result<NaiveDateTime> {
        parse_config_date(&self.end_date)
    }

    /// True when the given (device_id, param) pair is declared in the config.
    pub fn has_device(&self, device_id: i64, param_key: &str) -> bool {
        self.devices
            .iter()
            .any(|d| d.device_id == device_id && d.param == param_key)
    }
}

/// Load and validate a configuration file.
///
/// Structural problems (missing fields, bad JSON, unknown request type) are
/// fatal and reported before any network or file work starts.
pub fn load_config(path: &Path) -> Result<AnalysisConfig> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }

    let content = std::fs::read_to_string(path)?;
    let config: AnalysisConfig = serde_json::from_str(&content)?;
    config.validate();

    // Fail fast on unparseable window boundaries as well.
    config.window_start()?;
    config.window_end()?;

    Ok(config)
}

/// Parse a configuration date string into a naive local-equivalent datetime.
///
/// Accepts RFC 3339 (`2024-03-01T00:00:00Z`, with or without an offset),
/// a bare datetime, or a bare date (midnight). Offsets are stripped after
/// parsing; the wall-clock value is kept.
pub fn parse_config_date(raw: &str) -> Result<NaiveDateTime> {
    let cleaned = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(cleaned) {
        return Ok(dt.naive_local());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(cleaned, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(cleaned, "%Y-%m-%d %H:%M:%S") {
        return Ok(dt);
    }
    if let Ok(date) = NaiveDate::parse_from_str(cleaned, "%Y-%m-%d") {
        return Ok(date.and_hms_opt(0, 0, 0).expect("valid time"));
    }

    Err(ConfigError::Date(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn sample_json() -> &'static str {
        r#"{
            "api_keys": [{"token": "tok-1", "client_name": "Acme"}],
            "params": ["EACTIVE", "WATER"],
            "request_type": "hourly",
            "start_date": "2024-03-01T00:00:00Z",
            "end_date": "2024-03-15T00:00:00Z",
            "devices": [
                {"device_id": 101, "name": "Main Incomer", "param": "EACTIVE"},
                {"device_id": 102, "name": "Water Meter", "param": "WATER"}
            ]
        }"#
    }

    #[test]
    fn test_load_valid_config() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(sample_json().as_bytes()).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.api_keys.len(), 1);
        assert_eq!(config.api_keys[0].client_name, "Acme");
        assert_eq!(config.request_type, RequestType::Hourly);
        assert_eq!(config.devices.len(), 2);
        assert!(config.has_device(101, "EACTIVE"));
        assert!(!config.has_device(101, "WATER"));
    }

    #[test]
    fn test_missing_field_is_fatal() {
        let mut file = NamedTempFile::new().unwrap();
        // No "params" field.
        file.write_all(
            br#"{
                "api_keys": [{"token": "t"}],
                "request_type": "hourly",
                "start_date": "2024-03-01",
                "end_date": "2024-03-02",
                "devices": []
            }"#,
        )
        .unwrap();

        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_unknown_request_type_is_fatal() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(
            br#"{
                "api_keys": [{"token": "t"}],
                "params": ["EACTIVE"],
                "request_type": "weekly",
                "start_date": "2024-03-01",
                "end_date": "2024-03-02",
                "devices": []
            }"#,
        )
        .unwrap();

        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = load_config(Path::new("/nonexistent/config.json"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_client_name_defaults_when_absent() {
        let config: AnalysisConfig = serde_json::from_str(
            r#"{
                "api_keys": [{"token": "t"}],
                "params": ["EACTIVE"],
                "request_type": "monthly",
                "start_date": "2024-03-01",
                "end_date": "2024-04-01",
                "devices": []
            }"#,
        )
        .unwrap();
        assert_eq!(config.api_keys[0].client_name, "Unknown Client");
        assert_eq!(config.request_type.resolution(), "M");
    }

    #[test]
    fn test_parse_config_date_variants() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();

        assert_eq!(parse_config_date("2024-03-01").unwrap(), expected);
        assert_eq!(parse_config_date("2024-03-01T00:00:00").unwrap(), expected);
        assert_eq!(parse_config_date("2024-03-01T00:00:00Z").unwrap(), expected);
        // The wall clock of the given offset is kept, not converted.
        assert_eq!(
            parse_config_date("2024-03-01T00:00:00+02:00").unwrap(),
            expected
        );
        assert!(parse_config_date("yesterday").is_err());
    }

    #[test]
    fn test_config_roundtrip() {
        let config: AnalysisConfig = serde_json::from_str(sample_json()).unwrap();
        let encoded = serde_json::to_string(&config).unwrap();
        let decoded: AnalysisConfig = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.devices.len(), config.devices.len());
        assert_eq!(decoded.start_date, config.start_date);
        assert_eq!(decoded.request_type, config.request_type);
    }
}
