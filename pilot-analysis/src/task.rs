// Copyright 2017 ETH Zurich. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The validated per-task record that enters aggregation.

use crate::descriptor::TaskSlots;
use crate::extract::Lifecycle;

/// One executed task with resolved execution endpoints. Construction
/// fails (returns `None`) when either endpoint is missing, which is the
/// filtering condition for "incomplete" tasks.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: String,
    pub partition_id: u32,
    pub cpus: u32,
    pub gpus: u32,
    pub exec_start: f64,
    pub exec_stop: f64,
    pub app_start: Option<f64>,
}

impl TaskRecord {
    pub fn from_parts(id: String, slots: TaskSlots, lifecycle: &Lifecycle) -> Option<TaskRecord> {
        Some(TaskRecord {
            id,
            partition_id: slots.partition_id,
            cpus: slots.cpus,
            gpus: slots.gpus,
            exec_start: lifecycle.exec_start?,
            exec_stop: lifecycle.exec_stop?,
            app_start: lifecycle.app_start,
        })
    }

    /// Runtime-environment launch to termination, seconds.
    pub fn exec_span(&self) -> f64 {
        self.exec_stop - self.exec_start
    }

    /// Runtime-environment launch to application payload start.
    pub fn placement(&self) -> Option<f64> {
        self.app_start.map(|app| app - self.exec_start)
    }

    /// A placement outside `[0, exec_span]` indicates clock skew or a
    /// parsing defect. Callers flag such tasks; the value is never
    /// clamped.
    pub fn placement_in_bounds(&self) -> bool {
        match self.placement() {
            Some(p) => p >= 0.0 && p <= self.exec_span(),
            None => true,
        }
    }
}
