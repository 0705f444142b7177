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

//! Persists the merged reading set as a fixed-schema CSV file.

use crate::error::Result;
use gridscope_types::Reading;
use std::path::Path;
use tracing::{info, warn};

/// Write the extracted readings to `path`.
///
/// Returns `false` when there was nothing to write; in that case no file is
/// created at all, which is distinct from writing a header-only file.
pub fn write_readings_csv(readings: &[Reading], path: &Path) -> Result<bool> {
    if readings.is_empty() {
        warn!("No data to save, skipping {}", path.display());
        return Ok(false);
    }

    let mut writer = csv::Writer::from_path(path)?;
    for reading in readings {
        writer.serialize(reading)?;
    }
    writer.flush()?;

    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    info!(
        "Data saved to {} ({} rows, {} bytes)",
        path.display(),
        readings.len(),
        size
    );

    Ok(true)
}
