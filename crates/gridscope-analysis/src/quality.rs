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

//! Hourly data-quality analysis: completeness, zero values and negative
//! values per device/parameter, measured against the configured window.

use crate::dataset::{Dataset, Record, configured_groups};
use crate::error::Result;
use crate::report::{heavy_rule, join_flags, light_rule, round2};
use chrono::Utc;
use gridscope_types::AnalysisConfig;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

const COMPLETENESS_FLAG_THRESHOLD: f64 = 90.0;
const ZERO_FLAG_THRESHOLD: f64 = 10.0;

/// Per-device quality metrics for one run.
#[derive(Debug, Clone, Serialize)]
pub struct QualityResult {
    pub client_name: String,
    pub device_id: i64,
    pub device_name: String,
    pub param_key: String,
    pub analysis_period_start: String,
    pub analysis_period_end: String,
    pub expected_points: i64,
    pub actual_points: u64,
    pub completeness_percentage: f64,
    pub zero_count: u64,
    pub zero_percentage: f64,
    pub negative_count: u64,
    pub negative_percentage: f64,
    #[serde(serialize_with = "join_flags")]
    pub quality_flags: Vec<String>,
    pub is_flagged: bool,
    pub analysis_date: String,
}

/// Expected hourly points for the window, both boundary hours included.
fn expected_points(dataset: &Dataset) -> i64 {
    (dataset.window_end - dataset.window_start).num_hours() + 1
}

/// Analyze data quality for every configured device/parameter pair.
///
/// Configured pairs with no in-window data still produce a result with zero
/// completeness; pairs present in the data but absent from the config are
/// dropped with a warning by the loader.
pub fn analyze_quality(config: &AnalysisConfig, dataset: &Dataset) -> Vec<QualityResult> {
    let mut groups = configured_groups(dataset, config);

    // Seed configured pairs that returned nothing so they surface as
    // zero-completeness results instead of silently disappearing.
    for device in &config.devices {
        if config.params.contains(&device.param) {
            groups
                .entry((device.device_id, device.param.clone()))
                .or_default();
        }
    }

    info!(
        "Starting hourly quality analysis for {} device/parameter combinations",
        groups.len()
    );

    let expected = expected_points(dataset);
    let fallback_client = config
        .api_keys
        .first()
        .map_or_else(|| "Unknown".to_string(), |k| k.client_name.clone());

    let mut results = Vec::with_capacity(groups.len());
    for ((device_id, param_key), records) in &groups {
        let device_name = records.first().map_or_else(
            || {
                config
                    .devices
                    .iter()
                    .find(|d| d.device_id == *device_id && d.param == *param_key)
                    .map_or_else(String::new, |d| d.name.clone())
            },
            |r| r.device_name.clone(),
        );
        let client_name = records
            .first()
            .map_or_else(|| fallback_client.clone(), |r| r.client_name.clone());

        results.push(analyze_device(
            dataset,
            expected,
            client_name,
            *device_id,
            device_name,
            param_key,
            records,
        ));
    }

    info!(
        "Completed hourly quality analysis for {} devices",
        results.len()
    );
    results
}

fn analyze_device(
    dataset: &Dataset,
    expected_points: i64,
    client_name: String,
    device_id: i64,
    device_name: String,
    param_key: &str,
    records: &[&Record],
) -> QualityResult {
    let actual_points = records.len() as u64;
    let completeness = if expected_points > 0 {
        actual_points as f64 / expected_points as f64 * 100.0
    } else {
        0.0
    };

    let zero_count = records.iter().filter(|r| r.value == 0.0).count() as u64;
    let negative_count = records.iter().filter(|r| r.value < 0.0).count() as u64;

    let zero_percentage = if actual_points > 0 {
        zero_count as f64 / actual_points as f64 * 100.0
    } else {
        0.0
    };
    let negative_percentage = if actual_points > 0 {
        negative_count as f64 / actual_points as f64 * 100.0
    } else {
        0.0
    };

    let mut quality_flags = Vec::new();
    if completeness < COMPLETENESS_FLAG_THRESHOLD {
        quality_flags.push("Poor Completeness".to_string());
    }
    if zero_percentage > ZERO_FLAG_THRESHOLD {
        quality_flags.push("High Zero Values".to_string());
    }
    if negative_count > 0 {
        quality_flags.push("Negative Values".to_string());
    }

    QualityResult {
        client_name,
        device_id,
        device_name,
        param_key: param_key.to_string(),
        analysis_period_start: dataset.window_start.to_string(),
        analysis_period_end: dataset.window_end.to_string(),
        expected_points,
        actual_points,
        completeness_percentage: round2(completeness),
        zero_count,
        zero_percentage: round2(zero_percentage),
        negative_count,
        negative_percentage: round2(negative_percentage),
        is_flagged: !quality_flags.is_empty(),
        quality_flags,
        analysis_date: Utc::now().to_rfc3339(),
    }
}

/// Write the per-device quality records as CSV. Nothing is written for an
/// empty result set.
pub fn write_quality_csv(results: &[QualityResult], path: &Path) -> Result<bool> {
    if results.is_empty() {
        warn!("No quality results to save, skipping {}", path.display());
        return Ok(false);
    }

    let mut writer = csv::Writer::from_path(path)?;
    for result in results {
        writer.serialize(result)?;
    }
    writer.flush()?;
    info!("Quality report saved to {}", path.display());
    Ok(true)
}

/// Write the human-readable quality report.
pub fn write_quality_report(
    results: &[QualityResult],
    dataset: &Dataset,
    path: &Path,
) -> Result<()> {
    let mut file = File::create(path)?;

    writeln!(file, "{}", heavy_rule())?;
    writeln!(file, "HOURLY DATA QUALITY ANALYSIS REPORT")?;
    writeln!(file, "{}", heavy_rule())?;
    writeln!(file)?;
    writeln!(
        file,
        "Analysis Date: {}",
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    )?;
    writeln!(
        file,
        "Analysis Period: {} to {}",
        dataset.window_start, dataset.window_end
    )?;
    writeln!(file, "Data Frequency: Hourly")?;
    writeln!(file, "Total Devices Analyzed: {}", results.len())?;
    writeln!(file)?;

    write_executive_summary(&mut file, results)?;
    write_flagged_devices(&mut file, results)?;
    write_detailed_findings(&mut file, results)?;

    writeln!(file, "METHODOLOGY")?;
    writeln!(file, "{}", light_rule(20))?;
    writeln!(
        file,
        "This analysis evaluates hourly data completeness by comparing actual vs expected data points."
    )?;
    writeln!(
        file,
        "Devices with <90% completeness or >10% zero values are flagged for review."
    )?;
    writeln!(
        file,
        "Quality issues may indicate sensor problems, connectivity issues, or data collection failures."
    )?;
    writeln!(file)?;
    writeln!(file, "RECOMMENDATIONS")?;
    writeln!(file, "{}", light_rule(20))?;
    writeln!(file, "- Review flagged devices for hardware or connectivity issues")?;
    writeln!(file, "- Investigate devices with high zero value percentages")?;
    writeln!(file, "- Monitor devices with negative values for sensor calibration issues")?;
    writeln!(file, "- Consider implementing automated alerts for poor data quality")?;
    writeln!(file, "- Schedule regular maintenance for devices with recurring quality issues")?;
    writeln!(file)?;
    writeln!(file, "{}", heavy_rule())?;
    writeln!(file, "End of Report")?;

    info!("Quality text report saved to {}", path.display());
    Ok(())
}

fn write_executive_summary(file: &mut File, results: &[QualityResult]) -> Result<()> {
    if results.is_empty() {
        return Ok(());
    }

    let total = results.len();
    let flagged = results.iter().filter(|r| r.is_flagged).count();
    let avg_completeness =
        results.iter().map(|r| r.completeness_percentage).sum::<f64>() / total as f64;
    let avg_zero = results.iter().map(|r| r.zero_percentage).sum::<f64>() / total as f64;

    writeln!(file, "EXECUTIVE SUMMARY")?;
    writeln!(file, "{}", light_rule(40))?;
    writeln!(file, "Total Devices Analyzed: {total}")?;
    writeln!(file, "Devices with Quality Issues: {flagged}")?;
    writeln!(file, "Average Data Completeness: {avg_completeness:.1}%")?;
    writeln!(file, "Average Zero Values: {avg_zero:.1}%")?;
    writeln!(file)?;
    Ok(())
}

fn write_flagged_devices(file: &mut File, results: &[QualityResult]) -> Result<()> {
    let mut flagged: Vec<&QualityResult> = results.iter().filter(|r| r.is_flagged).collect();

    if flagged.is_empty() {
        writeln!(file, "FLAGGED DEVICES: None")?;
        writeln!(file, "All devices show acceptable hourly data quality.")?;
        writeln!(file)?;
        return Ok(());
    }

    writeln!(
        file,
        "FLAGGED DEVICES ({} devices require attention)",
        flagged.len()
    )?;
    writeln!(file, "{}", light_rule(60))?;
    writeln!(file)?;

    // Worst completeness first.
    flagged.sort_by(|a, b| {
        a.completeness_percentage
            .partial_cmp(&b.completeness_percentage)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    for result in flagged {
        writeln!(file, "Device: {}", result.device_name)?;
        writeln!(file, "  Parameter: {}", result.param_key)?;
        writeln!(file, "  Completeness: {:.1}%", result.completeness_percentage)?;
        writeln!(file, "  Expected Points: {}", result.expected_points)?;
        writeln!(file, "  Actual Points: {}", result.actual_points)?;
        writeln!(file, "  Zero Values: {:.1}%", result.zero_percentage)?;
        writeln!(file, "  Quality Issues: {}", result.quality_flags.join(", "))?;
        writeln!(file)?;
    }
    Ok(())
}

fn write_detailed_findings(file: &mut File, results: &[QualityResult]) -> Result<()> {
    writeln!(file, "DETAILED ANALYSIS FINDINGS")?;
    writeln!(file, "{}", light_rule(40))?;

    if results.is_empty() {
        writeln!(file, "No analysis results available.")?;
        writeln!(file)?;
        return Ok(());
    }

    let total = results.len();
    let excellent = results
        .iter()
        .filter(|r| r.completeness_percentage >= 95.0)
        .count();
    let good = results
        .iter()
        .filter(|r| r.completeness_percentage >= 90.0 && r.completeness_percentage < 95.0)
        .count();
    let poor = results
        .iter()
        .filter(|r| r.completeness_percentage < 90.0)
        .count();

    writeln!(file, "Hourly Data Quality Distribution:")?;
    writeln!(
        file,
        "  Excellent Quality (>=95%): {} devices ({:.1}%)",
        excellent,
        excellent as f64 / total as f64 * 100.0
    )?;
    writeln!(
        file,
        "  Good Quality (90-95%): {} devices ({:.1}%)",
        good,
        good as f64 / total as f64 * 100.0
    )?;
    writeln!(
        file,
        "  Poor Quality (<90%): {} devices ({:.1}%)",
        poor,
        poor as f64 / total as f64 * 100.0
    )?;
    writeln!(file)?;

    let total_expected: i64 = results.iter().map(|r| r.expected_points).sum();
    let total_actual: u64 = results.iter().map(|r| r.actual_points).sum();
    let total_zero: u64 = results.iter().map(|r| r.zero_count).sum();

    writeln!(file, "Data Collection Statistics:")?;
    writeln!(file, "  Total Expected Hourly Data Points: {total_expected}")?;
    writeln!(file, "  Total Actual Hourly Data Points: {total_actual}")?;
    writeln!(file, "  Total Zero Value Points: {total_zero}")?;
    if total_expected > 0 {
        writeln!(
            file,
            "  Overall Data Completeness: {:.1}%",
            total_actual as f64 / total_expected as f64 * 100.0
        )?;
    }
    writeln!(file)?;
    Ok(())
}
