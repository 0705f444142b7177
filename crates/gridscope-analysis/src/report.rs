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

//! Small shared helpers for the text reports and result serialization.

use serde::Serializer;

pub(crate) const REPORT_WIDTH: usize = 80;

pub(crate) fn heavy_rule() -> String {
    "=".repeat(REPORT_WIDTH)
}

pub(crate) fn light_rule(width: usize) -> String {
    "-".repeat(width)
}

/// Round to two decimals, matching the precision used in the report CSVs.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Serialize a list of human-readable flags as one semicolon-joined CSV
/// field.
pub(crate) fn join_flags<S>(flags: &[String], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&flags.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round2() {
        assert_eq!(round2(100.0 / 3.0), 33.33);
        assert_eq!(round2(50.0 / 3.0), 16.67);
        assert_eq!(round2(100.0), 100.0);
    }
}
