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

use serde::{Deserialize, Serialize};

/// One extracted measurement: a (device, parameter, timestamp) → value row.
///
/// Field order is the CSV column order. The timestamp is kept as the raw
/// string returned by the API; analyzers normalize it when they load the
/// extract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub client_name: String,
    pub device_id: i64,
    pub device_name: String,
    pub param_key: String,
    pub timestamp: String,
    pub value: f64,
    pub extraction_date: String,
}

/// Columns of the extracted-data CSV, in order.
pub const CSV_COLUMNS: [&str; 7] = [
    "client_name",
    "device_id",
    "device_name",
    "param_key",
    "timestamp",
    "value",
    "extraction_date",
];
