// Copyright 2017 ETH Zurich. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Partition capacity resolution and the per-partition accumulator.

use std::fs;
use std::path::Path;

use crate::aggregate::LatencySummary;
use crate::sandbox::PilotSandbox;
use crate::task::TaskRecord;
use crate::{Error, Result};

/// Accelerators per host on the traced hardware class (Summit).
pub const GPUS_PER_HOST: u32 = 6;

/// Slot capacity of one sub-scheduler partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionCapacity {
    pub hosts: u32,
    pub cpu_slots: u32,
    pub gpu_slots: u32,
}

impl PartitionCapacity {
    /// Read the partition's host-list file (`prrte.{id:03}.hosts`):
    /// one host per line; the first line encodes CPU slots per host
    /// after an `=` delimiter, e.g. `node042=42`.
    pub fn load(pilot: &PilotSandbox, partition: u32) -> Result<PartitionCapacity> {
        let path = pilot.hosts_path(partition);
        if !path.is_file() {
            return Err(Error::PartitionConfigMissing { partition, path });
        }
        PartitionCapacity::parse(&fs::read_to_string(&path)?, &path)
    }

    fn parse(content: &str, path: &Path) -> Result<PartitionCapacity> {
        let hosts: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
        let first = hosts
            .first()
            .ok_or_else(|| Error::malformed(format!("empty host list: {}", path.display())))?;
        let slots_per_host = first
            .split('=')
            .nth(1)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .ok_or_else(|| {
                Error::malformed(format!(
                    "host line {:?} has no slot count in {}",
                    first,
                    path.display()
                ))
            })?;
        let n_hosts = hosts.len() as u32;
        Ok(PartitionCapacity {
            hosts: n_hosts,
            cpu_slots: n_hosts * slots_per_host,
            gpu_slots: n_hosts * GPUS_PER_HOST,
        })
    }
}

/// Accumulator for one partition, created lazily when the first task
/// referencing it is folded in. Totals accumulate task by task; ratio
/// derivation is a separate step ([`Partition::finish`]) so the
/// intermediate sums stay inspectable.
#[derive(Debug, Clone)]
pub struct Partition {
    id: u32,
    capacity: PartitionCapacity,
    start: f64,
    end: f64,
    cpu_busy: f64,
    gpu_busy: f64,
    placements: Vec<f64>,
    tasks: usize,
}

impl Partition {
    pub fn new(id: u32, capacity: PartitionCapacity) -> Self {
        Partition {
            id,
            capacity,
            start: f64::INFINITY,
            end: f64::NEG_INFINITY,
            cpu_busy: 0.0,
            gpu_busy: 0.0,
            placements: Vec::new(),
            tasks: 0,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn capacity(&self) -> PartitionCapacity {
        self.capacity
    }

    pub fn task_count(&self) -> usize {
        self.tasks
    }

    /// Observed wall window over the partition's tasks; widens
    /// monotonically as tasks are folded in.
    pub fn span_secs(&self) -> f64 {
        if self.tasks == 0 {
            0.0
        } else {
            self.end - self.start
        }
    }

    pub fn cpu_busy_secs(&self) -> f64 {
        self.cpu_busy
    }

    pub fn gpu_busy_secs(&self) -> f64 {
        self.gpu_busy
    }

    /// Fold one task into the accumulator (commutative).
    pub fn fold(&mut self, task: &TaskRecord) {
        if task.exec_start < self.start {
            self.start = task.exec_start;
        }
        if task.exec_stop > self.end {
            self.end = task.exec_stop;
        }
        self.cpu_busy += task.exec_span() * f64::from(task.cpus);
        self.gpu_busy += task.exec_span() * f64::from(task.gpus);
        if let Some(p) = task.placement() {
            self.placements.push(p);
        }
        self.tasks += 1;
    }

    /// Second pass: derive utilization ratios and the placement
    /// distribution from the accumulated totals.
    pub fn finish(&self) -> PartitionUsage {
        let span = self.span_secs();
        let ratio = |busy: f64, slots: u32| {
            if span > 0.0 && slots > 0 {
                Some(busy / (f64::from(slots) * span))
            } else {
                None
            }
        };
        PartitionUsage {
            id: self.id,
            tasks: self.tasks,
            hosts: self.capacity.hosts,
            cpu_slots: self.capacity.cpu_slots,
            gpu_slots: self.capacity.gpu_slots,
            span_secs: span,
            cpu_utilization: ratio(self.cpu_busy, self.capacity.cpu_slots),
            gpu_utilization: ratio(self.gpu_busy, self.capacity.gpu_slots),
            placement: LatencySummary::of(&self.placements),
        }
    }
}

/// Finalized per-partition metrics. Utilization is busy-seconds over
/// `slots * span`; `None` when undefined (zero span or zero capacity).
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionUsage {
    pub id: u32,
    pub tasks: usize,
    pub hosts: u32,
    pub cpu_slots: u32,
    pub gpu_slots: u32,
    pub span_secs: f64,
    pub cpu_utilization: Option<f64>,
    pub gpu_utilization: Option<f64>,
    pub placement: Option<LatencySummary>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn task(id: &str, start: f64, stop: f64, cpus: u32, gpus: u32) -> TaskRecord {
        TaskRecord {
            id: id.to_owned(),
            partition_id: 7,
            cpus,
            gpus,
            exec_start: start,
            exec_stop: stop,
            app_start: None,
        }
    }

    #[test]
    fn capacity_from_hosts_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join("prrte.007.hosts"),
            "node001=42\nnode002=42\nnode003=42\nnode004=42\n",
        )
        .unwrap();
        let pilot = PilotSandbox::new(tmp.path());
        let capacity = PartitionCapacity::load(&pilot, 7).unwrap();
        assert_eq!(capacity.hosts, 4);
        assert_eq!(capacity.cpu_slots, 4 * 42);
        assert_eq!(capacity.gpu_slots, 4 * GPUS_PER_HOST);
    }

    #[test]
    fn missing_hosts_file_reports_partition() {
        let tmp = TempDir::new().unwrap();
        let pilot = PilotSandbox::new(tmp.path());
        match PartitionCapacity::load(&pilot, 13) {
            Err(Error::PartitionConfigMissing { partition, path }) => {
                assert_eq!(partition, 13);
                assert!(path.ends_with("prrte.013.hosts"));
            }
            other => panic!("expected PartitionConfigMissing, got {:?}", other),
        }
    }

    #[test]
    fn bad_host_line_is_malformed() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("prrte.000.hosts"), "node-without-slots\n").unwrap();
        let pilot = PilotSandbox::new(tmp.path());
        assert!(matches!(
            PartitionCapacity::load(&pilot, 0),
            Err(Error::MalformedDescriptor(_))
        ));
    }

    #[test]
    fn window_widens_monotonically() {
        let capacity = PartitionCapacity {
            hosts: 2,
            cpu_slots: 8,
            gpu_slots: 12,
        };
        let mut partition = Partition::new(7, capacity);
        partition.fold(&task("task.0000", 10.0, 50.0, 2, 0));
        assert_eq!(partition.span_secs(), 40.0);
        partition.fold(&task("task.0001", 5.0, 45.0, 2, 0));
        assert_eq!(partition.span_secs(), 40.0);
        partition.fold(&task("task.0002", 0.0, 60.0, 4, 0));
        assert_eq!(partition.span_secs(), 60.0);
    }

    #[test]
    fn utilization_matches_reference_scenario() {
        // 3 tasks on a 2-host x 4-core partition: busy 40x2 + 40x2 + 60x4
        // over 8 slots x 60 s wall span
        let capacity = PartitionCapacity {
            hosts: 2,
            cpu_slots: 8,
            gpu_slots: 12,
        };
        let mut partition = Partition::new(7, capacity);
        partition.fold(&task("task.0000", 10.0, 50.0, 2, 0));
        partition.fold(&task("task.0001", 5.0, 45.0, 2, 0));
        partition.fold(&task("task.0002", 0.0, 60.0, 4, 0));

        assert_eq!(partition.cpu_busy_secs(), 400.0);
        let usage = partition.finish();
        assert_eq!(usage.span_secs, 60.0);
        let cpu = usage.cpu_utilization.unwrap();
        assert!((cpu - 400.0 / 480.0).abs() < 1e-12, "cpu utilization {}", cpu);
        assert_eq!(usage.gpu_utilization, Some(0.0));
    }

    #[test]
    fn zero_span_has_undefined_utilization() {
        let capacity = PartitionCapacity {
            hosts: 1,
            cpu_slots: 4,
            gpu_slots: 6,
        };
        let mut partition = Partition::new(0, capacity);
        partition.fold(&task("task.0000", 10.0, 10.0, 2, 0));
        let usage = partition.finish();
        assert_eq!(usage.cpu_utilization, None);
        assert_eq!(usage.gpu_utilization, None);
    }
}
