// Copyright 2017 ETH Zurich. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Run-level aggregation: folds per-task records into per-partition
//! accumulators and run-wide placement statistics, then derives the
//! final ratios in a distinct second pass.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::descriptor::TaskSlots;
use crate::extract;
use crate::partition::{Partition, PartitionCapacity, PartitionUsage};
use crate::sandbox::{PilotSandbox, TaskFilter, TaskSandbox};
use crate::task::TaskRecord;
use crate::Result;

/// Distribution summary of a latency sample. The standard deviation is
/// the population statistic (denominator N, not N-1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySummary {
    pub mean: f64,
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
}

impl LatencySummary {
    /// `None` for an empty sample. The sample is sorted internally so
    /// the summary does not depend on accumulation order.
    pub fn of(values: &[f64]) -> Option<LatencySummary> {
        if values.is_empty() {
            return None;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let n = sorted.len() as f64;
        let mean = sorted.iter().sum::<f64>() / n;
        let variance = sorted.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        Some(LatencySummary {
            mean,
            stddev: variance.sqrt(),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
        })
    }
}

/// Run-scoped aggregation context. Owns the per-partition accumulators
/// (created lazily on first reference) and the run-wide placement
/// sample; there is no ambient module state, so contexts can be
/// sharded by partition id and merged.
#[derive(Debug, Default)]
pub struct RunAggregator {
    partitions: HashMap<u32, Partition>,
    placements: Vec<f64>,
    tasks: usize,
    skipped: usize,
    flagged: usize,
}

impl RunAggregator {
    pub fn new() -> Self {
        RunAggregator::default()
    }

    /// Fold one validated task into its partition. Commutative:
    /// folding the same task set in any order finishes to the same
    /// summary.
    pub fn fold_task(&mut self, task: &TaskRecord, capacity: PartitionCapacity) {
        if !task.placement_in_bounds() {
            warn!(
                "task {}: placement {:?} outside [0, {}], keeping unclamped",
                task.id,
                task.placement(),
                task.exec_span()
            );
            self.flagged += 1;
        }
        let partition = self
            .partitions
            .entry(task.partition_id)
            .or_insert_with(|| Partition::new(task.partition_id, capacity));
        partition.fold(task);
        if let Some(p) = task.placement() {
            self.placements.push(p);
        }
        self.tasks += 1;
    }

    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }

    pub fn task_count(&self) -> usize {
        self.tasks
    }

    /// Second pass: derive per-partition ratios and the run summary.
    pub fn finish(self) -> RunSummary {
        let mut partitions: Vec<PartitionUsage> =
            self.partitions.values().map(Partition::finish).collect();
        partitions.sort_by_key(|p| p.id);
        RunSummary {
            partition_count: partitions.len(),
            partitions,
            task_count: self.tasks,
            skipped: self.skipped,
            flagged: self.flagged,
            placement: LatencySummary::of(&self.placements),
        }
    }
}

/// The whole-run aggregate handed to consumers (report printer,
/// plotting layer).
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub partitions: Vec<PartitionUsage>,
    pub partition_count: usize,
    /// Tasks that passed all gates and entered the aggregates.
    pub task_count: usize,
    /// Sandboxes excluded by a gate or by a per-task error.
    pub skipped: usize,
    /// Tasks with a placement outside `[0, exec_span]`.
    pub flagged: usize,
    /// Run-wide placement latency distribution.
    pub placement: Option<LatencySummary>,
}

/// Scan a pilot sandbox and aggregate utilization and placement
/// statistics over its executed, filter-admitted tasks.
///
/// Per-task failures (malformed logs or descriptors, missing partition
/// config) are logged and counted as skips; only a missing sandbox
/// root is fatal.
pub fn analyze_pilot<P: Into<PathBuf>>(dir: P, filter: TaskFilter) -> Result<RunSummary> {
    let pilot = PilotSandbox::new(dir);
    let mut aggregator = RunAggregator::new();
    let mut capacities: HashMap<u32, Result<PartitionCapacity>> = HashMap::new();

    for sandbox in pilot.task_sandboxes()? {
        match fold_sandbox(&pilot, &sandbox, filter, &mut aggregator, &mut capacities) {
            Ok(true) => {}
            Ok(false) => aggregator.record_skip(),
            Err(err) => {
                warn!("task {}: {}", sandbox.task_id(), err);
                aggregator.record_skip();
            }
        }
    }
    Ok(aggregator.finish())
}

fn fold_sandbox(
    pilot: &PilotSandbox,
    sandbox: &TaskSandbox,
    filter: TaskFilter,
    aggregator: &mut RunAggregator,
    capacities: &mut HashMap<u32, Result<PartitionCapacity>>,
) -> Result<bool> {
    if !sandbox.executed() {
        debug!("task {}: not executed", sandbox.task_id());
        return Ok(false);
    }
    if !filter.admits(sandbox.succeeded()?) {
        debug!("task {}: filtered by completion status", sandbox.task_id());
        return Ok(false);
    }

    let mut lifecycle = extract::extract(sandbox.prof_path())?;
    if lifecycle.exec_start.is_none() || lifecycle.exec_stop.is_none() {
        debug!("task {}: execution endpoints unresolved", sandbox.task_id());
        return Ok(false);
    }
    extract::resolve_app_start(&mut lifecycle, &sandbox.script_path())?;

    let slots = TaskSlots::load(sandbox.descriptor_path())?;

    // resolve each partition's host list once; failed lookups are
    // cached too so every task referencing the partition skips alike
    let capacity = match capacities.entry(slots.partition_id) {
        Entry::Occupied(entry) => match entry.get() {
            Ok(capacity) => *capacity,
            Err(_) => return Ok(false),
        },
        Entry::Vacant(entry) => match entry.insert(PartitionCapacity::load(pilot, slots.partition_id)) {
            Ok(capacity) => *capacity,
            Err(err) => {
                warn!("task {}: {}", sandbox.task_id(), err);
                return Ok(false);
            }
        },
    };

    match TaskRecord::from_parts(sandbox.task_id().to_owned(), slots, &lifecycle) {
        Some(task) => {
            aggregator.fold_task(&task, capacity);
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Placement latencies of failed tasks: the success gate inverted.
/// Only the execution-start and application-start markers are needed,
/// so tasks cut down before termination still contribute.
///
/// Returns the admitted task count with the distribution summary.
pub fn placement_of_failed<P: Into<PathBuf>>(dir: P) -> Result<(usize, Option<LatencySummary>)> {
    let pilot = PilotSandbox::new(dir);
    let mut placements = Vec::new();

    for sandbox in pilot.task_sandboxes()? {
        match failed_placement(&sandbox) {
            Ok(Some(p)) => placements.push(p),
            Ok(None) => {}
            Err(err) => warn!("task {}: {}", sandbox.task_id(), err),
        }
    }
    Ok((placements.len(), LatencySummary::of(&placements)))
}

fn failed_placement(sandbox: &TaskSandbox) -> Result<Option<f64>> {
    if !sandbox.executed() || sandbox.succeeded()? {
        return Ok(None);
    }
    let lifecycle = extract::extract(sandbox.prof_path())?;
    Ok(lifecycle.placement())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, partition: u32, start: f64, stop: f64, cpus: u32, app_start: Option<f64>) -> TaskRecord {
        TaskRecord {
            id: id.to_owned(),
            partition_id: partition,
            cpus,
            gpus: 0,
            exec_start: start,
            exec_stop: stop,
            app_start,
        }
    }

    fn capacity() -> PartitionCapacity {
        PartitionCapacity {
            hosts: 2,
            cpu_slots: 8,
            gpu_slots: 12,
        }
    }

    #[test]
    fn latency_summary_reference_values() {
        let summary = LatencySummary::of(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(summary.mean, 2.5);
        assert!((summary.stddev - 1.25f64.sqrt()).abs() < 1e-12);
        assert_eq!(summary.min, 1.0);
        assert_eq!(summary.max, 4.0);
    }

    #[test]
    fn latency_summary_of_empty_sample_is_none() {
        assert_eq!(LatencySummary::of(&[]), None);
    }

    #[test]
    fn latency_summary_of_single_value() {
        let summary = LatencySummary::of(&[3.5]).unwrap();
        assert_eq!(summary.mean, 3.5);
        assert_eq!(summary.stddev, 0.0);
        assert_eq!(summary.min, 3.5);
        assert_eq!(summary.max, 3.5);
    }

    #[test]
    fn fold_order_does_not_change_the_summary() {
        let tasks = vec![
            task("task.0000", 7, 10.0, 50.0, 2, Some(11.0)),
            task("task.0001", 7, 5.0, 45.0, 2, Some(8.0)),
            task("task.0002", 3, 0.0, 60.0, 4, Some(2.0)),
        ];

        let mut forward = RunAggregator::new();
        for t in &tasks {
            forward.fold_task(t, capacity());
        }
        let mut backward = RunAggregator::new();
        for t in tasks.iter().rev() {
            backward.fold_task(t, capacity());
        }

        assert_eq!(forward.finish(), backward.finish());
    }

    #[test]
    fn partitions_are_created_lazily_and_reported_sorted() {
        let mut aggregator = RunAggregator::new();
        aggregator.fold_task(&task("task.0000", 9, 0.0, 10.0, 1, None), capacity());
        aggregator.fold_task(&task("task.0001", 2, 0.0, 10.0, 1, None), capacity());
        aggregator.fold_task(&task("task.0002", 9, 5.0, 15.0, 1, None), capacity());

        let summary = aggregator.finish();
        assert_eq!(summary.partition_count, 2);
        let ids: Vec<_> = summary.partitions.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![2, 9]);
        assert_eq!(summary.partitions[1].tasks, 2);
        assert_eq!(summary.task_count, 3);
    }

    #[test]
    fn out_of_bounds_placement_is_flagged_not_clamped() {
        let mut aggregator = RunAggregator::new();
        aggregator.fold_task(&task("task.0000", 0, 10.0, 50.0, 1, Some(5.0)), capacity());
        let summary = aggregator.finish();
        assert_eq!(summary.flagged, 1);
        // the negative value stays in the distribution
        assert_eq!(summary.placement.unwrap().min, -5.0);
    }
}
