//! Per-node execution profiling
//!
//! Aggregates wall-clock timings keyed by node id and surfaces the
//! slowest node plus "bottlenecks": nodes whose share of total time
//! exceeds a threshold (50% by default). Recording is safe to call from
//! parallel fork tasks.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

const DEFAULT_BOTTLENECK_THRESHOLD: f64 = 50.0;

/// Aggregated timing data for a single node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTimings {
    pub node_id: String,
    pub call_count: u64,
    pub total_duration_ms: f64,
    pub avg_duration_ms: f64,
}

impl NodeTimings {
    fn add_call(&mut self, duration_ms: f64) {
        self.call_count += 1;
        self.total_duration_ms += duration_ms;
        self.avg_duration_ms = self.total_duration_ms / self.call_count as f64;
    }
}

/// A node exceeding the bottleneck threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bottleneck {
    pub node_id: String,
    pub total_duration_ms: f64,
    pub avg_duration_ms: f64,
    pub call_count: u64,
    pub percent_of_total: f64,
}

/// Full profile of one execution, stored as `bottleneck_info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub total_time_ms: f64,
    pub node_count: usize,
    pub slowest_node: Option<NodeTimings>,
    pub bottlenecks: Vec<Bottleneck>,
}

/// Collects node timings across one workflow execution.
///
/// Interior-mutex so parallel fork tasks can record concurrently.
#[derive(Debug, Default)]
pub struct BottleneckAnalyzer {
    timings: Mutex<HashMap<String, NodeTimings>>,
}

impl BottleneckAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one execution of `node_id`.
    pub fn record_node(&self, node_id: &str, duration_ms: f64) {
        let mut timings = self.timings.lock().expect("profiler lock");
        timings
            .entry(node_id.to_string())
            .and_modify(|t| t.add_call(duration_ms))
            .or_insert_with(|| NodeTimings {
                node_id: node_id.to_string(),
                call_count: 1,
                total_duration_ms: duration_ms,
                avg_duration_ms: duration_ms,
            });
    }

    /// Nodes above `threshold_percent` of total time, largest first.
    pub fn get_bottlenecks(&self, threshold_percent: f64) -> Vec<Bottleneck> {
        let timings = self.timings.lock().expect("profiler lock");
        let total: f64 = timings.values().map(|t| t.total_duration_ms).sum();
        if total == 0.0 {
            return Vec::new();
        }

        let mut bottlenecks: Vec<Bottleneck> = timings
            .values()
            .filter_map(|t| {
                let percent = t.total_duration_ms / total * 100.0;
                (percent > threshold_percent).then(|| Bottleneck {
                    node_id: t.node_id.clone(),
                    total_duration_ms: t.total_duration_ms,
                    avg_duration_ms: t.avg_duration_ms,
                    call_count: t.call_count,
                    percent_of_total: (percent * 100.0).round() / 100.0,
                })
            })
            .collect();
        bottlenecks.sort_by(|a, b| {
            b.percent_of_total
                .partial_cmp(&a.percent_of_total)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        bottlenecks
    }

    /// The node with the highest total time, if any were recorded.
    pub fn get_slowest_node(&self) -> Option<NodeTimings> {
        let timings = self.timings.lock().expect("profiler lock");
        timings
            .values()
            .max_by(|a, b| {
                a.total_duration_ms
                    .partial_cmp(&b.total_duration_ms)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .cloned()
    }

    /// Complete summary using the default bottleneck threshold.
    pub fn get_summary(&self) -> ProfileSummary {
        let (total, count) = {
            let timings = self.timings.lock().expect("profiler lock");
            (
                timings.values().map(|t| t.total_duration_ms).sum(),
                timings.len(),
            )
        };
        ProfileSummary {
            total_time_ms: total,
            node_count: count,
            slowest_node: self.get_slowest_node(),
            bottlenecks: self.get_bottlenecks(DEFAULT_BOTTLENECK_THRESHOLD),
        }
    }
}
