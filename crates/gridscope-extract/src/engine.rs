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

//! Concurrent extraction engine.
//!
//! One task per (API key, configured device) pair, executed against a
//! bounded worker pool. Task outcomes flow back to the coordinator over a
//! channel; no shared mutable collection is involved. A failed task never
//! aborts the run.

use crate::client::{ReadingsClient, ReadingsQuery};
use chrono::Utc;
use gridscope_types::{AnalysisConfig, Reading};
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, info};

/// One unit of extraction work: a single device/parameter fetch under a
/// single API key.
#[derive(Debug, Clone)]
pub struct ExtractionTask {
    pub token: String,
    pub client_name: String,
    pub device_id: i64,
    pub device_name: String,
    pub param_key: String,
}

/// End-of-run accounting. A task counts as succeeded only when it produced
/// at least one reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub total_tasks: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_readings: usize,
}

impl ExtractionSummary {
    pub fn success_rate(&self) -> f64 {
        if self.total_tasks == 0 {
            return 0.0;
        }
        self.succeeded as f64 / self.total_tasks as f64 * 100.0
    }
}

/// Build the task list from the configuration. Devices whose parameter is
/// not in the declared whitelist are skipped up front, not attempted.
pub fn build_tasks(config: &AnalysisConfig) -> Vec<ExtractionTask> {
    let mut tasks = Vec::new();

    for api_key in &config.api_keys {
        for device in &config.devices {
            if !config.params.contains(&device.param) {
                debug!(
                    "Skipping device {} - param {} not allowed",
                    device.name, device.param
                );
                continue;
            }
            tasks.push(ExtractionTask {
                token: api_key.token.clone(),
                client_name: api_key.client_name.clone(),
                device_id: device.device_id,
                device_name: device.name.clone(),
                param_key: device.param.clone(),
            });
        }
    }

    tasks
}

/// Runs the task set and merges the results.
#[derive(Debug)]
pub struct Extractor {
    client: ReadingsClient,
    workers: usize,
}

impl Extractor {
    /// `workers` bounds the number of in-flight fetches; 1 means strictly
    /// sequential execution in task order.
    pub fn new(client: ReadingsClient, workers: usize) -> Self {
        Self {
            client,
            workers: workers.max(1),
        }
    }

    /// Execute every task and return the merged readings plus a summary.
    ///
    /// Results carry no ordering guarantee between tasks unless the pool
    /// size is 1.
    pub async fn run(&self, config: &AnalysisConfig) -> (Vec<Reading>, ExtractionSummary) {
        let tasks = build_tasks(config);
        let total_tasks = tasks.len();
        info!(
            "Starting extraction of {} tasks using {} workers",
            total_tasks, self.workers
        );

        let extraction_date = Utc::now().to_rfc3339();
        let resolution = config.request_type.resolution();

        let mut readings = Vec::new();
        let mut failed_tasks: Vec<ExtractionTask> = Vec::new();

        if self.workers == 1 {
            for task in tasks {
                let result = run_task(
                    &self.client,
                    &task,
                    resolution,
                    &config.start_date,
                    &config.end_date,
                    &extraction_date,
                )
                .await;
                if result.is_empty() {
                    failed_tasks.push(task);
                } else {
                    readings.extend(result);
                }
            }
        } else {
            let semaphore = Arc::new(Semaphore::new(self.workers));
            let (tx, mut rx) = mpsc::channel(self.workers.max(16));

            for task in tasks {
                let client = self.client.clone();
                let semaphore = Arc::clone(&semaphore);
                let tx = tx.clone();
                let from = config.start_date.clone();
                let to = config.end_date.clone();
                let stamp = extraction_date.clone();

                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.expect("semaphore open");
                    let result = run_task(&client, &task, resolution, &from, &to, &stamp).await;
                    // The receiver only drops once the run is over.
                    let _ = tx.send((task, result)).await;
                });
            }
            drop(tx);

            while let Some((task, result)) = rx.recv().await {
                if result.is_empty() {
                    failed_tasks.push(task);
                } else {
                    readings.extend(result);
                }
            }
        }

        let summary = ExtractionSummary {
            total_tasks,
            succeeded: total_tasks - failed_tasks.len(),
            failed: failed_tasks.len(),
            total_readings: readings.len(),
        };

        info!(
            "Extraction completed: {} tasks, {} succeeded, {} failed ({:.1}% success), {} readings",
            summary.total_tasks,
            summary.succeeded,
            summary.failed,
            summary.success_rate(),
            summary.total_readings
        );
        for task in failed_tasks.iter().take(5) {
            debug!("Failed task: {} ({})", task.device_name, task.client_name);
        }

        (readings, summary)
    }
}

/// Fetch one task's readings. A fetch failure degrades to an empty result;
/// the caller records the task as failed and moves on.
async fn run_task(
    client: &ReadingsClient,
    task: &ExtractionTask,
    resolution: &'static str,
    from: &str,
    to: &str,
    extraction_date: &str,
) -> Vec<Reading> {
    let query = ReadingsQuery {
        device_id: task.device_id,
        parameter_key: task.param_key.clone(),
        resolution,
        from: from.to_string(),
        to: to.to_string(),
    };

    match client.fetch_readings(&task.token, &query).await {
        Ok(points) => {
            let readings: Vec<Reading> = points
                .into_iter()
                .map(|point| Reading {
                    client_name: task.client_name.clone(),
                    device_id: task.device_id,
                    device_name: task.device_name.clone(),
                    param_key: task.param_key.clone(),
                    timestamp: point.ts,
                    value: point.v,
                    extraction_date: extraction_date.to_string(),
                })
                .collect();
            if !readings.is_empty() {
                info!(
                    "Extracted {} records for device {}",
                    readings.len(),
                    task.device_name
                );
            }
            readings
        }
        Err(failure) => {
            error!(
                "Failed to fetch data for device {}: {}",
                task.device_name, failure
            );
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RetryPolicy;
    use gridscope_types::{ApiKey, DeviceConfig, RequestType};
    use serde_json::json;
    use std::time::Duration;

    fn test_config(device_ids: &[i64]) -> AnalysisConfig {
        AnalysisConfig {
            api_keys: vec![ApiKey {
                token: "tok".to_string(),
                client_name: "Acme".to_string(),
            }],
            params: vec!["EACTIVE".to_string()],
            request_type: RequestType::Hourly,
            start_date: "2024-03-01T00:00:00Z".to_string(),
            end_date: "2024-03-02T00:00:00Z".to_string(),
            devices: device_ids
                .iter()
                .map(|id| DeviceConfig {
                    device_id: *id,
                    name: format!("Device {id}"),
                    param: "EACTIVE".to_string(),
                })
                .collect(),
        }
    }

    fn fast_client(base_url: &str) -> ReadingsClient {
        ReadingsClient::new(
            base_url,
            RetryPolicy {
                max_retries: 2,
                base_wait: Duration::from_millis(10),
                max_wait: Duration::from_millis(40),
            },
        )
        .unwrap()
    }

    async fn mock_device(
        server: &mut mockito::Server,
        device_id: i64,
        values: serde_json::Value,
    ) -> mockito::Mock {
        server
            .mock("GET", "/readings")
            .match_query(mockito::Matcher::UrlEncoded(
                "device_id".into(),
                device_id.to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "values": values }).to_string())
            .create_async()
            .await
    }

    #[test]
    fn test_build_tasks_skips_non_whitelisted_params() {
        let mut config = test_config(&[101, 102]);
        config.devices.push(DeviceConfig {
            device_id: 103,
            name: "Gas Meter".to_string(),
            param: "GASVOLUME".to_string(),
        });

        let tasks = build_tasks(&config);
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(|t| t.param_key == "EACTIVE"));
    }

    #[test]
    fn test_build_tasks_is_per_api_key() {
        let mut config = test_config(&[101]);
        config.api_keys.push(ApiKey {
            token: "tok-2".to_string(),
            client_name: "Beta".to_string(),
        });

        let tasks = build_tasks(&config);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].client_name, "Acme");
        assert_eq!(tasks[1].client_name, "Beta");
    }

    #[tokio::test]
    async fn test_sequential_run_preserves_task_order() {
        let mut server = mockito::Server::new_async().await;
        let mut mocks = Vec::new();
        for id in [101, 102, 103] {
            mocks.push(
                mock_device(
                    &mut server,
                    id,
                    json!([{"ts": format!("2024-03-01T0{}:00:00Z", id - 100), "v": id as f64}]),
                )
                .await,
            );
        }

        let extractor = Extractor::new(fast_client(&server.url()), 1);
        let (readings, summary) = extractor.run(&test_config(&[101, 102, 103])).await;

        let ids: Vec<i64> = readings.iter().map(|r| r.device_id).collect();
        assert_eq!(ids, vec![101, 102, 103]);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 0);
    }

    #[tokio::test]
    async fn test_concurrent_run_matches_sequential_result_set() {
        let mut server = mockito::Server::new_async().await;
        let device_ids: Vec<i64> = (201..=208).collect();
        let mut mocks = Vec::new();
        for id in &device_ids {
            mocks.push(
                mock_device(
                    &mut server,
                    *id,
                    json!([
                        {"ts": "2024-03-01T10:00:00Z", "v": *id as f64},
                        {"ts": "2024-03-01T11:00:00Z", "v": *id as f64 + 0.5}
                    ]),
                )
                .await,
            );
        }
        let config = test_config(&device_ids);

        let sequential = Extractor::new(fast_client(&server.url()), 1);
        let (mut seq_readings, seq_summary) = sequential.run(&config).await;

        let concurrent = Extractor::new(fast_client(&server.url()), 4);
        let (mut conc_readings, conc_summary) = concurrent.run(&config).await;

        let key = |r: &Reading| (r.device_id, r.timestamp.clone());
        seq_readings.sort_by_key(key);
        conc_readings.sort_by_key(key);

        assert_eq!(seq_summary, conc_summary);
        assert_eq!(seq_readings.len(), conc_readings.len());
        for (a, b) in seq_readings.iter().zip(conc_readings.iter()) {
            assert_eq!(a.device_id, b.device_id);
            assert_eq!(a.timestamp, b.timestamp);
            assert_eq!(a.value, b.value);
        }
    }

    #[tokio::test]
    async fn test_failed_task_does_not_abort_run() {
        let mut server = mockito::Server::new_async().await;
        let _ok_mock = mock_device(
            &mut server,
            101,
            json!([{"ts": "2024-03-01T10:00:00Z", "v": 4.2}]),
        )
        .await;
        // Device 102 only ever answers with a server error.
        let _err_mock = server
            .mock("GET", "/readings")
            .match_query(mockito::Matcher::UrlEncoded(
                "device_id".into(),
                "102".into(),
            ))
            .with_status(500)
            .create_async()
            .await;

        let extractor = Extractor::new(fast_client(&server.url()), 2);
        let (readings, summary) = extractor.run(&test_config(&[101, 102])).await;

        assert_eq!(summary.total_tasks, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].device_id, 101);
        assert!((summary.success_rate() - 50.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_empty_values_counts_as_failed_task() {
        let mut server = mockito::Server::new_async().await;
        let _mock = mock_device(&mut server, 101, json!([])).await;

        let extractor = Extractor::new(fast_client(&server.url()), 1);
        let (readings, summary) = extractor.run(&test_config(&[101])).await;

        assert!(readings.is_empty());
        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.success_rate(), 0.0);
    }
}
