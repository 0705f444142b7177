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

//! Working-hours vs out-of-hours consumption split.
//!
//! Per device, parameter and calendar day, readings are partitioned into the
//! working-hours window (07:00-19:00, half-open) and everything else. Days
//! where out-of-hours consumption dominates or exceeds the threshold are
//! flagged; only flagged device-days are reported.

use crate::dataset::{Dataset, Record, configured_groups};
use crate::error::{AnalysisError, Result};
use crate::report::{heavy_rule, join_flags, light_rule, round2};
use chrono::{NaiveDate, NaiveTime, Utc};
use gridscope_types::AnalysisConfig;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

pub const DEFAULT_OUT_OF_HOURS_THRESHOLD: f64 = 30.0;

fn working_hours_start() -> NaiveTime {
    NaiveTime::from_hms_opt(7, 0, 0).expect("valid time")
}

fn working_hours_end() -> NaiveTime {
    NaiveTime::from_hms_opt(19, 0, 0).expect("valid time")
}

fn is_working_hours(time: NaiveTime) -> bool {
    time >= working_hours_start() && time < working_hours_end()
}

/// One flagged device-day.
#[derive(Debug, Clone, Serialize)]
pub struct OutOfHoursResult {
    pub client_name: String,
    pub analysis_date: String,
    pub device_id: i64,
    pub device_name: String,
    pub param_key: String,
    pub analysis_period_start: String,
    pub analysis_period_end: String,
    pub total_consumption: f64,
    pub working_hours_consumption: f64,
    pub out_of_hours_consumption: f64,
    pub out_of_hours_percentage: f64,
    pub data_points_working: usize,
    pub data_points_out_of_hours: usize,
    #[serde(serialize_with = "join_flags")]
    pub issues_identified: Vec<String>,
    pub is_flagged: bool,
    pub threshold_used: f64,
    pub analysis_timestamp: String,
}

struct DailySplit {
    working_hours: f64,
    out_of_hours: f64,
    total: f64,
    percentage: f64,
    points_working: usize,
    points_out_of_hours: usize,
}

fn daily_split(records: &[&Record]) -> DailySplit {
    let mut working_hours = 0.0;
    let mut out_of_hours = 0.0;
    let mut points_working = 0;
    let mut points_out_of_hours = 0;

    for record in records {
        if is_working_hours(record.timestamp.time()) {
            working_hours += record.value;
            points_working += 1;
        } else {
            out_of_hours += record.value;
            points_out_of_hours += 1;
        }
    }

    let total = working_hours + out_of_hours;
    let percentage = if total > 0.0 {
        out_of_hours / total * 100.0
    } else {
        0.0
    };

    DailySplit {
        working_hours,
        out_of_hours,
        total,
        percentage,
        points_working,
        points_out_of_hours,
    }
}

fn identify_issues(split: &DailySplit, threshold: f64) -> Vec<String> {
    let mut issues = Vec::new();
    if split.out_of_hours > split.working_hours {
        issues.push("Out-of-hours consumption exceeds working hours consumption".to_string());
    }
    if split.percentage > threshold {
        issues.push(format!(
            "Out-of-hours consumption exceeds {threshold}% threshold"
        ));
    }
    issues
}

/// Analyze every configured device-day in the dataset. Days with zero total
/// consumption are skipped entirely; only flagged device-days are returned.
pub fn analyze_out_of_hours(
    config: &AnalysisConfig,
    dataset: &Dataset,
    threshold: f64,
) -> Result<Vec<OutOfHoursResult>> {
    if !(0.0..=100.0).contains(&threshold) {
        return Err(AnalysisError::InvalidThreshold(threshold));
    }

    let groups = configured_groups(dataset, config);

    // Re-key per calendar day.
    let mut daily: BTreeMap<(NaiveDate, i64, String), Vec<&Record>> = BTreeMap::new();
    for ((device_id, param_key), records) in &groups {
        for record in records {
            daily
                .entry((record.timestamp.date(), *device_id, param_key.clone()))
                .or_default()
                .push(*record);
        }
    }

    info!(
        "Starting out-of-hours analysis for {} device/date combinations",
        daily.len()
    );

    let mut results = Vec::new();
    for ((date, device_id, param_key), records) in &daily {
        let split = daily_split(records);
        if split.total == 0.0 {
            continue;
        }

        let issues = identify_issues(&split, threshold);
        if issues.is_empty() {
            continue;
        }

        let first = records.first().expect("non-empty day group");
        results.push(OutOfHoursResult {
            client_name: first.client_name.clone(),
            analysis_date: date.to_string(),
            device_id: *device_id,
            device_name: first.device_name.clone(),
            param_key: param_key.clone(),
            analysis_period_start: dataset.window_start.to_string(),
            analysis_period_end: dataset.window_end.to_string(),
            total_consumption: round2(split.total),
            working_hours_consumption: round2(split.working_hours),
            out_of_hours_consumption: round2(split.out_of_hours),
            out_of_hours_percentage: round2(split.percentage),
            data_points_working: split.points_working,
            data_points_out_of_hours: split.points_out_of_hours,
            issues_identified: issues,
            is_flagged: true,
            threshold_used: threshold,
            analysis_timestamp: Utc::now().to_rfc3339(),
        });
    }

    info!(
        "Completed out-of-hours analysis, found {} flagged device-days",
        results.len()
    );
    Ok(results)
}

/// Write the flagged device-days as CSV. Nothing is written when no day was
/// flagged.
pub fn write_out_of_hours_csv(results: &[OutOfHoursResult], path: &Path) -> Result<bool> {
    if results.is_empty() {
        warn!(
            "No out-of-hours results to save, skipping {}",
            path.display()
        );
        return Ok(false);
    }

    let mut writer = csv::Writer::from_path(path)?;
    for result in results {
        writer.serialize(result)?;
    }
    writer.flush()?;
    info!("Out-of-hours consumption report saved to {}", path.display());
    Ok(true)
}

/// Write the human-readable out-of-hours report. An empty result set still
/// produces a report that says so explicitly.
pub fn write_out_of_hours_report(
    results: &[OutOfHoursResult],
    dataset: &Dataset,
    threshold: f64,
    path: &Path,
) -> Result<()> {
    let mut file = File::create(path)?;

    writeln!(file, "{}", heavy_rule())?;
    writeln!(file, "OUT-OF-HOURS CONSUMPTION ANALYSIS REPORT")?;
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
    writeln!(
        file,
        "Working Hours: {} - {}",
        working_hours_start().format("%H:%M"),
        working_hours_end().format("%H:%M")
    )?;
    writeln!(file, "Out-of-Hours Threshold: {threshold}%")?;
    writeln!(file, "Total Flagged Device-Days: {}", results.len())?;
    writeln!(file)?;

    write_executive_summary(&mut file, results)?;
    if !results.is_empty() {
        write_flagged_devices(&mut file, results)?;
        write_detailed_findings(&mut file, results)?;
    }

    writeln!(file, "METHODOLOGY")?;
    writeln!(file, "{}", light_rule(20))?;
    writeln!(
        file,
        "This analysis compares energy consumption during working hours (07:00 - 19:00)"
    )?;
    writeln!(
        file,
        "against out-of-hours consumption for each device on each day."
    )?;
    writeln!(file)?;
    writeln!(file, "Flagging Criteria:")?;
    writeln!(
        file,
        "- Out-of-hours consumption exceeds working hours consumption, OR"
    )?;
    writeln!(
        file,
        "- Out-of-hours consumption exceeds {threshold}% of total daily consumption"
    )?;
    writeln!(file)?;
    writeln!(file, "RECOMMENDATIONS")?;
    writeln!(file, "{}", light_rule(20))?;
    writeln!(file, "- Review flagged devices for unnecessary after-hours operation")?;
    writeln!(file, "- Investigate high out-of-hours consumption for security or efficiency issues")?;
    writeln!(file, "- Consider implementing automated shutdown procedures for non-essential equipment")?;
    writeln!(file, "- Establish baseline consumption patterns for operational comparison")?;
    writeln!(file, "- Monitor trends to identify equipment degradation or operational changes")?;
    writeln!(file)?;
    writeln!(file, "{}", heavy_rule())?;
    writeln!(file, "End of Report")?;

    info!("Out-of-hours text report saved to {}", path.display());
    Ok(())
}

fn write_executive_summary(file: &mut File, results: &[OutOfHoursResult]) -> Result<()> {
    writeln!(file, "EXECUTIVE SUMMARY")?;
    writeln!(file, "{}", light_rule(40))?;

    if results.is_empty() {
        writeln!(
            file,
            "No devices found with problematic out-of-hours consumption patterns."
        )?;
        writeln!(
            file,
            "All monitored devices show acceptable consumption during working hours."
        )?;
        writeln!(file)?;
        return Ok(());
    }

    let total_flagged = results.len();
    let unique_devices = results
        .iter()
        .map(|r| (r.device_id, r.param_key.as_str()))
        .collect::<std::collections::BTreeSet<_>>()
        .len();
    let avg_pct = results
        .iter()
        .map(|r| r.out_of_hours_percentage)
        .sum::<f64>()
        / total_flagged as f64;

    writeln!(file, "Total Flagged Device-Days: {total_flagged}")?;
    writeln!(file, "Unique Devices with Issues: {unique_devices}")?;
    writeln!(file, "Average Out-of-Hours Consumption: {avg_pct:.1}%")?;
    writeln!(file)?;

    let mut issue_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for result in results {
        for issue in &result.issues_identified {
            *issue_counts.entry(issue.as_str()).or_default() += 1;
        }
    }
    writeln!(file, "Issue Type Breakdown:")?;
    for (issue, count) in &issue_counts {
        writeln!(file, "  - {issue}: {count} occurrences")?;
    }
    writeln!(file)?;
    Ok(())
}

fn write_flagged_devices(file: &mut File, results: &[OutOfHoursResult]) -> Result<()> {
    writeln!(
        file,
        "FLAGGED DEVICES ({} device-days require attention)",
        results.len()
    )?;
    writeln!(file, "{}", light_rule(60))?;
    writeln!(file)?;

    // Highest out-of-hours share first.
    let mut sorted: Vec<&OutOfHoursResult> = results.iter().collect();
    sorted.sort_by(|a, b| {
        b.out_of_hours_percentage
            .partial_cmp(&a.out_of_hours_percentage)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    for result in sorted {
        writeln!(file, "Date: {}", result.analysis_date)?;
        writeln!(file, "Device: {}", result.device_name)?;
        writeln!(file, "Parameter: {}", result.param_key)?;
        writeln!(
            file,
            "Total Daily Consumption: {:.2}",
            result.total_consumption
        )?;
        writeln!(
            file,
            "Working Hours (07:00 - 19:00): {:.2}",
            result.working_hours_consumption
        )?;
        writeln!(
            file,
            "Out-of-Hours: {:.2} ({:.1}%)",
            result.out_of_hours_consumption, result.out_of_hours_percentage
        )?;
        writeln!(file, "Issues Identified:")?;
        for issue in &result.issues_identified {
            writeln!(file, "  - {issue}")?;
        }
        writeln!(file)?;
    }
    Ok(())
}

fn write_detailed_findings(file: &mut File, results: &[OutOfHoursResult]) -> Result<()> {
    writeln!(file, "DETAILED ANALYSIS FINDINGS")?;
    writeln!(file, "{}", light_rule(40))?;

    let total: f64 = results.iter().map(|r| r.total_consumption).sum();
    let working: f64 = results.iter().map(|r| r.working_hours_consumption).sum();
    let out_of_hours: f64 = results.iter().map(|r| r.out_of_hours_consumption).sum();
    let overall_pct = if total > 0.0 {
        out_of_hours / total * 100.0
    } else {
        0.0
    };

    writeln!(file, "Consumption Pattern Summary:")?;
    writeln!(file, "  Total Consumption (Flagged Devices): {total:.2}")?;
    writeln!(file, "  Working Hours Consumption: {working:.2}")?;
    writeln!(
        file,
        "  Out-of-Hours Consumption: {out_of_hours:.2} ({overall_pct:.1}%)"
    )?;
    writeln!(file)?;

    let high = results
        .iter()
        .filter(|r| r.out_of_hours_percentage > 50.0)
        .count();
    let medium = results
        .iter()
        .filter(|r| r.out_of_hours_percentage > 30.0 && r.out_of_hours_percentage <= 50.0)
        .count();
    let low = results
        .iter()
        .filter(|r| r.out_of_hours_percentage <= 30.0)
        .count();

    writeln!(file, "Severity Distribution:")?;
    writeln!(file, "  High Concern (>50% out-of-hours): {high} device-days")?;
    writeln!(file, "  Medium Concern (30-50% out-of-hours): {medium} device-days")?;
    writeln!(file, "  Low Concern (threshold violations): {low} device-days")?;
    writeln!(file)?;
    Ok(())
}
