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

//! Period-over-period trend analysis.
//!
//! Each device's in-window data span is split at its own temporal midpoint
//! into two periods; the totals are compared and significant changes are
//! flagged.

use crate::dataset::{Dataset, Record, configured_groups};
use crate::error::{AnalysisError, Result};
use crate::report::{heavy_rule, light_rule, round2};
use chrono::Utc;
use gridscope_types::{AnalysisConfig, RequestType};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

pub const DEFAULT_TREND_THRESHOLD: f64 = 10.0;

/// Reported in place of an undefined ratio when the baseline period total
/// is zero.
pub const ZERO_BASELINE_SENTINEL: f64 = 999.99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Stable,
    Increasing,
    Decreasing,
    SignificantIncrease,
    Error,
}

impl TrendDirection {
    /// Human-readable label for the text report.
    pub fn label(self) -> &'static str {
        match self {
            Self::Stable => "Stable",
            Self::Increasing => "Increasing",
            Self::Decreasing => "Decreasing",
            Self::SignificantIncrease => "Significant Increase",
            Self::Error => "Error",
        }
    }
}

/// Per-device trend metrics for one run.
#[derive(Debug, Clone, Serialize)]
pub struct TrendResult {
    pub client_name: String,
    pub device_id: i64,
    pub device_name: String,
    pub param_key: String,
    pub analysis_period_start: String,
    pub analysis_period_end: String,
    pub period1_total: f64,
    pub period1_average: f64,
    pub period1_count: usize,
    pub period1_min: f64,
    pub period1_max: f64,
    pub period2_total: f64,
    pub period2_average: f64,
    pub period2_count: usize,
    pub period2_min: f64,
    pub period2_max: f64,
    pub percentage_change: f64,
    pub absolute_difference: f64,
    pub trend_direction: TrendDirection,
    pub is_flagged: bool,
    pub threshold_used: f64,
    pub total_data_points: usize,
    pub error: Option<String>,
    pub analysis_date: String,
}

#[derive(Debug, Default)]
struct PeriodStats {
    total: f64,
    average: f64,
    count: usize,
    min_value: f64,
    max_value: f64,
}

fn period_stats(records: &[&Record]) -> PeriodStats {
    if records.is_empty() {
        return PeriodStats::default();
    }

    let total: f64 = records.iter().map(|r| r.value).sum();
    let min_value = records.iter().map(|r| r.value).fold(f64::INFINITY, f64::min);
    let max_value = records
        .iter()
        .map(|r| r.value)
        .fold(f64::NEG_INFINITY, f64::max);

    PeriodStats {
        total,
        average: total / records.len() as f64,
        count: records.len(),
        min_value,
        max_value,
    }
}

/// Split a device's records at the temporal midpoint of its own data span,
/// not the configured window.
fn split_at_midpoint<'a>(records: &[&'a Record]) -> Result<(Vec<&'a Record>, Vec<&'a Record>)> {
    let first = records.first().ok_or(AnalysisError::EmptyGroup)?;
    let last = records.last().ok_or(AnalysisError::EmptyGroup)?;

    let midpoint = first.timestamp + (last.timestamp - first.timestamp) / 2;
    let (first_period, second_period) = records
        .iter()
        .copied()
        .partition(|record| record.timestamp <= midpoint);

    Ok((first_period, second_period))
}

struct TrendMetrics {
    percentage_change: f64,
    trend_direction: TrendDirection,
    is_flagged: bool,
}

fn trend_metrics(period1_total: f64, period2_total: f64, threshold: f64) -> TrendMetrics {
    if period1_total == 0.0 {
        if period2_total == 0.0 {
            return TrendMetrics {
                percentage_change: 0.0,
                trend_direction: TrendDirection::Stable,
                is_flagged: false,
            };
        }
        // A zero baseline has no defined ratio; report the sentinel value.
        return TrendMetrics {
            percentage_change: ZERO_BASELINE_SENTINEL,
            trend_direction: TrendDirection::SignificantIncrease,
            is_flagged: true,
        };
    }

    let percentage_change = (period2_total - period1_total) / period1_total * 100.0;
    let trend_direction = if percentage_change.abs() <= threshold {
        TrendDirection::Stable
    } else if percentage_change > threshold {
        TrendDirection::Increasing
    } else {
        TrendDirection::Decreasing
    };

    TrendMetrics {
        percentage_change,
        trend_direction,
        is_flagged: percentage_change.abs() > threshold,
    }
}

/// Validate the configured window for a meaningful two-period comparison.
fn validate_window(config: &AnalysisConfig, dataset: &Dataset) -> Result<()> {
    let days = (dataset.window_end - dataset.window_start).num_days();
    if days < 7 {
        return Err(AnalysisError::WindowTooShort { days });
    }
    if (days - 14).abs() > 1 {
        warn!(
            "Data period is {} days; two-week comparison works best with 14",
            days
        );
    }
    if config.request_type != RequestType::Hourly {
        warn!("Trend analysis works best with hourly data frequency");
    }
    Ok(())
}

/// Analyze trends for every configured device/parameter pair present in the
/// data. A per-device failure is recorded as an error pseudo-result and
/// never aborts the batch.
pub fn analyze_trends(
    config: &AnalysisConfig,
    dataset: &Dataset,
    threshold: f64,
) -> Result<Vec<TrendResult>> {
    if !(0.0..=100.0).contains(&threshold) {
        return Err(AnalysisError::InvalidThreshold(threshold));
    }
    validate_window(config, dataset)?;

    let groups = configured_groups(dataset, config);
    info!(
        "Starting trend analysis for {} device/parameter combinations",
        groups.len()
    );

    let mut results = Vec::with_capacity(groups.len());
    for ((device_id, param_key), records) in &groups {
        let result = analyze_device(dataset, *device_id, param_key, records, threshold)
            .unwrap_or_else(|e| error_result(dataset, *device_id, param_key, records, threshold, e));
        results.push(result);
    }

    info!("Completed trend analysis for {} devices", results.len());
    Ok(results)
}

fn analyze_device(
    dataset: &Dataset,
    device_id: i64,
    param_key: &str,
    records: &[&Record],
    threshold: f64,
) -> Result<TrendResult> {
    let (first_period, second_period) = split_at_midpoint(records)?;
    let period1 = period_stats(&first_period);
    let period2 = period_stats(&second_period);
    let metrics = trend_metrics(period1.total, period2.total, threshold);

    let first = records.first().ok_or(AnalysisError::EmptyGroup)?;

    Ok(TrendResult {
        client_name: first.client_name.clone(),
        device_id,
        device_name: first.device_name.clone(),
        param_key: param_key.to_string(),
        analysis_period_start: dataset.window_start.to_string(),
        analysis_period_end: dataset.window_end.to_string(),
        period1_total: round2(period1.total),
        period1_average: round2(period1.average),
        period1_count: period1.count,
        period1_min: round2(period1.min_value),
        period1_max: round2(period1.max_value),
        period2_total: round2(period2.total),
        period2_average: round2(period2.average),
        period2_count: period2.count,
        period2_min: round2(period2.min_value),
        period2_max: round2(period2.max_value),
        percentage_change: round2(metrics.percentage_change),
        absolute_difference: round2(period2.total - period1.total),
        trend_direction: metrics.trend_direction,
        is_flagged: metrics.is_flagged,
        threshold_used: threshold,
        total_data_points: records.len(),
        error: None,
        analysis_date: Utc::now().to_rfc3339(),
    })
}

fn error_result(
    dataset: &Dataset,
    device_id: i64,
    param_key: &str,
    records: &[&Record],
    threshold: f64,
    error: AnalysisError,
) -> TrendResult {
    TrendResult {
        client_name: records
            .first()
            .map_or_else(|| "Unknown".to_string(), |r| r.client_name.clone()),
        device_id,
        device_name: records
            .first()
            .map_or_else(String::new, |r| r.device_name.clone()),
        param_key: param_key.to_string(),
        analysis_period_start: dataset.window_start.to_string(),
        analysis_period_end: dataset.window_end.to_string(),
        period1_total: 0.0,
        period1_average: 0.0,
        period1_count: 0,
        period1_min: 0.0,
        period1_max: 0.0,
        period2_total: 0.0,
        period2_average: 0.0,
        period2_count: 0,
        period2_min: 0.0,
        period2_max: 0.0,
        percentage_change: 0.0,
        absolute_difference: 0.0,
        trend_direction: TrendDirection::Error,
        is_flagged: true,
        threshold_used: threshold,
        total_data_points: records.len(),
        error: Some(error.to_string()),
        analysis_date: Utc::now().to_rfc3339(),
    }
}

/// Write the per-device trend records as CSV. Nothing is written for an
/// empty result set.
pub fn write_trend_csv(results: &[TrendResult], path: &Path) -> Result<bool> {
    if results.is_empty() {
        warn!("No trend results to save, skipping {}", path.display());
        return Ok(false);
    }

    let mut writer = csv::Writer::from_path(path)?;
    for result in results {
        writer.serialize(result)?;
    }
    writer.flush()?;
    info!("Trend analysis report saved to {}", path.display());
    Ok(true)
}

/// Write the human-readable trend report.
pub fn write_trend_report(
    results: &[TrendResult],
    dataset: &Dataset,
    threshold: f64,
    path: &Path,
) -> Result<()> {
    let mut file = File::create(path)?;

    writeln!(file, "{}", heavy_rule())?;
    writeln!(file, "DATA TREND ANALYSIS REPORT")?;
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
    writeln!(file, "Trend Threshold: {threshold}%")?;
    writeln!(file, "Total Devices Analyzed: {}", results.len())?;
    writeln!(file)?;

    write_executive_summary(&mut file, results)?;
    write_flagged_devices(&mut file, results, dataset, threshold)?;
    write_detailed_findings(&mut file, results)?;

    writeln!(file, "METHODOLOGY")?;
    writeln!(file, "{}", light_rule(20))?;
    writeln!(
        file,
        "This analysis compares total consumption between two consecutive time periods."
    )?;
    writeln!(
        file,
        "Devices showing changes greater than {threshold}% are flagged for review."
    )?;
    writeln!(
        file,
        "Trends may indicate equipment issues, usage pattern changes, or data quality problems."
    )?;
    writeln!(file)?;
    writeln!(file, "RECOMMENDATIONS")?;
    writeln!(file, "{}", light_rule(20))?;
    writeln!(file, "- Investigate devices with significant increases for potential equipment issues")?;
    writeln!(file, "- Review devices with significant decreases for operational changes")?;
    writeln!(file, "- Monitor flagged devices for continued trend patterns")?;
    writeln!(file, "- Consider seasonal factors when interpreting trend changes")?;
    writeln!(file, "- Implement automated trend monitoring for early detection")?;
    writeln!(file)?;
    writeln!(file, "{}", heavy_rule())?;
    writeln!(file, "End of Report")?;

    info!("Trend text report saved to {}", path.display());
    Ok(())
}

fn write_executive_summary(file: &mut File, results: &[TrendResult]) -> Result<()> {
    if results.is_empty() {
        return Ok(());
    }

    let total = results.len();
    let flagged: Vec<&TrendResult> = results.iter().filter(|r| r.is_flagged).collect();
    let stable = results
        .iter()
        .filter(|r| r.trend_direction == TrendDirection::Stable)
        .count();

    writeln!(file, "EXECUTIVE SUMMARY")?;
    writeln!(file, "{}", light_rule(40))?;
    writeln!(file, "Total Devices Analyzed: {total}")?;
    writeln!(file, "Devices with Significant Trends: {}", flagged.len())?;
    writeln!(file, "Devices with Stable Consumption: {stable}")?;
    if !flagged.is_empty() {
        let avg_change = flagged
            .iter()
            .map(|r| r.percentage_change.abs())
            .sum::<f64>()
            / flagged.len() as f64;
        writeln!(file, "Average Change in Flagged Devices: {avg_change:.1}%")?;
    }
    writeln!(file)?;
    Ok(())
}

fn write_flagged_devices(
    file: &mut File,
    results: &[TrendResult],
    dataset: &Dataset,
    threshold: f64,
) -> Result<()> {
    let mut flagged: Vec<&TrendResult> = results.iter().filter(|r| r.is_flagged).collect();

    if flagged.is_empty() {
        writeln!(file, "FLAGGED DEVICES: None")?;
        writeln!(
            file,
            "All devices show stable consumption patterns within the configured threshold."
        )?;
        writeln!(file)?;
        return Ok(());
    }

    writeln!(
        file,
        "FLAGGED DEVICES ({} devices exceed {threshold}% threshold)",
        flagged.len()
    )?;
    writeln!(file, "{}", light_rule(60))?;
    writeln!(file)?;

    // Largest change first.
    flagged.sort_by(|a, b| {
        b.percentage_change
            .abs()
            .partial_cmp(&a.percentage_change.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let midpoint =
        dataset.window_start + (dataset.window_end - dataset.window_start) / 2;
    let period1_label = format!(
        "{} to {}",
        dataset.window_start.format("%d_%m_%y"),
        midpoint.format("%d_%m_%y")
    );
    let period2_label = format!(
        "{} to {}",
        midpoint.format("%d_%m_%y"),
        dataset.window_end.format("%d_%m_%y")
    );

    for result in flagged {
        writeln!(file, "Device: {}", result.device_name)?;
        writeln!(file, "  Parameter: {}", result.param_key)?;
        writeln!(
            file,
            "  Period 1 Total ({period1_label}): {:.2}",
            result.period1_total
        )?;
        writeln!(
            file,
            "  Period 2 Total ({period2_label}): {:.2}",
            result.period2_total
        )?;
        writeln!(
            file,
            "  Change: {:+.1}% ({})",
            result.percentage_change,
            result.trend_direction.label()
        )?;
        writeln!(
            file,
            "  Absolute Difference: {:+.2}",
            result.absolute_difference
        )?;
        writeln!(file)?;
    }
    Ok(())
}

fn write_detailed_findings(file: &mut File, results: &[TrendResult]) -> Result<()> {
    writeln!(file, "DETAILED ANALYSIS FINDINGS")?;
    writeln!(file, "{}", light_rule(40))?;

    if results.is_empty() {
        writeln!(file, "No analysis results available.")?;
        writeln!(file)?;
        return Ok(());
    }

    let mut directions: BTreeMap<&'static str, usize> = BTreeMap::new();
    for result in results {
        *directions.entry(result.trend_direction.label()).or_default() += 1;
    }

    writeln!(file, "Trend Direction Distribution:")?;
    let total = results.len();
    for (direction, count) in &directions {
        writeln!(
            file,
            "  {}: {} devices ({:.1}%)",
            direction,
            count,
            *count as f64 / total as f64 * 100.0
        )?;
    }

    // Sentinel values would skew the aggregate change statistics.
    let changes: Vec<f64> = results
        .iter()
        .map(|r| r.percentage_change)
        .filter(|c| *c != ZERO_BASELINE_SENTINEL)
        .collect();
    if !changes.is_empty() {
        let avg = changes.iter().sum::<f64>() / changes.len() as f64;
        let max = changes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = changes.iter().copied().fold(f64::INFINITY, f64::min);
        writeln!(file)?;
        writeln!(file, "Average Period-over-Period Change: {avg:.1}%")?;
        writeln!(file, "Largest Increase: {max:.1}%")?;
        writeln!(file, "Largest Decrease: {min:.1}%")?;
    }
    writeln!(file)?;
    Ok(())
}
