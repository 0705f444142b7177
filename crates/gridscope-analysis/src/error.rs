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

//! Error types for the analysis crate

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("config error: {0}")]
    Config(#[from] gridscope_types::ConfigError),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("missing required columns in CSV data: {0}")]
    MissingColumns(String),

    #[error("invalid timestamp in data: {0}")]
    Timestamp(String),

    #[error("threshold must be between 0 and 100 percent, got {0}")]
    InvalidThreshold(f64),

    #[error("data period must span at least 7 days for trend analysis, got {days} days")]
    WindowTooShort { days: i64 },

    #[error("cannot split empty device data into periods")]
    EmptyGroup,
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
