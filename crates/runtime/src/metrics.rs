// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Execution profiling metrics.
//!
//! [`ExecutionMetrics`] reports how many iterations a graph completed,
//! how long they took and, with profiling enabled, where the time went
//! per task. The allocator snapshot shows what the memory managers cost.

use memory_manager::AllocationStats;
use std::time::Duration;

/// Accumulated run time of one task.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskMetrics {
    /// Name of the node the task was configured from.
    pub node_name: String,
    /// Total time spent in `run` over all iterations.
    pub total_duration: Duration,
    pub runs: usize,
}

/// Aggregate metrics for one `execute_graph` call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecutionMetrics {
    /// Completed input → tasks → output cycles.
    pub iterations: usize,
    /// Wall-clock time of the whole call.
    pub total_duration: Duration,
    /// Number of tasks in the workload.
    pub num_tasks: usize,
    /// Per-task timings, empty unless profiling is enabled.
    pub task_metrics: Vec<TaskMetrics>,
    /// Allocator statistics summed over every target, taken at the end.
    pub allocation: AllocationStats,
}

impl ExecutionMetrics {
    /// Creates an empty metrics container.
    pub fn new(num_tasks: usize) -> Self {
        Self {
            iterations: 0,
            total_duration: Duration::ZERO,
            num_tasks,
            task_metrics: Vec::new(),
            allocation: AllocationStats::default(),
        }
    }

    /// Adds one run of task `idx`.
    pub fn record_task(&mut self, idx: usize, node_name: &str, duration: Duration) {
        if self.task_metrics.len() <= idx {
            self.task_metrics.resize_with(idx + 1, || TaskMetrics {
                node_name: String::new(),
                total_duration: Duration::ZERO,
                runs: 0,
            });
        }
        let task = &mut self.task_metrics[idx];
        if task.runs == 0 {
            task.node_name = node_name.to_string();
        }
        task.total_duration += duration;
        task.runs += 1;
    }

    /// Finalises metrics with the wall-clock time and allocator snapshot.
    pub fn finalise(&mut self, total: Duration, allocation: AllocationStats) {
        self.total_duration = total;
        self.allocation = allocation;
    }

    /// Mean wall-clock time per completed iteration.
    pub fn mean_iteration_duration(&self) -> Duration {
        match u32::try_from(self.iterations) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.total_duration / n,
        }
    }

    /// The `n` tasks with the largest total run time, slowest first.
    pub fn slowest_tasks(&self, n: usize) -> Vec<&TaskMetrics> {
        let mut tasks: Vec<&TaskMetrics> = self.task_metrics.iter().collect();
        tasks.sort_by(|a, b| b.total_duration.cmp(&a.total_duration));
        tasks.truncate(n);
        tasks
    }

    /// Returns a human-readable summary suitable for CLI output.
    pub fn summary(&self) -> String {
        let peak_kb = self.allocation.peak_allocated_bytes as f64 / 1024.0;
        format!(
            "Execution: {} iterations of {} tasks in {:.2}ms ({:.3}ms/iter), \
             peak {:.1} KB over {} allocations",
            self.iterations,
            self.num_tasks,
            self.total_duration.as_secs_f64() * 1000.0,
            self.mean_iteration_duration().as_secs_f64() * 1000.0,
            peak_kb,
            self.allocation.total_allocations,
        )
    }
}
