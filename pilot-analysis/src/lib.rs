// Copyright 2017 ETH Zurich. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Offline analysis of pilot-job execution traces.
//!
//! A pilot job launches many short-lived tasks across compute nodes
//! through per-partition sub-schedulers. Each task leaves an artifact
//! bundle in its own sandbox directory (profile log, stdout/stderr,
//! launch script, task descriptor); the scheduler and executor
//! components leave per-stage profile logs of their own. This crate
//! reconstructs, from those already-written artifacts:
//!
//!   - admission and launch throughput with gap-tolerant windowing
//!     ([`rates`]),
//!   - per-partition CPU/GPU utilization ([`partition`], [`aggregate`]),
//!   - the distribution of per-task placement latency ([`extract`],
//!     [`aggregate`]).
//!
//! Processing is a purely sequential, one-shot reduction: per-task
//! failures are logged and skipped so a fraction of malformed sandboxes
//! never aborts the surrounding run analysis.

#[macro_use]
extern crate log;

use std::fmt;
use std::io;
use std::path::PathBuf;

use profformat::ProfError;

pub mod aggregate;
pub mod descriptor;
pub mod extract;
pub mod partition;
pub mod rates;
pub mod sandbox;
pub mod task;

pub use crate::aggregate::{
    analyze_pilot, placement_of_failed, LatencySummary, RunAggregator, RunSummary,
};
pub use crate::descriptor::TaskSlots;
pub use crate::extract::Lifecycle;
pub use crate::partition::{Partition, PartitionCapacity, PartitionUsage, GPUS_PER_HOST};
pub use crate::rates::{measure_stage, GapConfig, RateSegment, Stage, StageRate, LAUNCHING, SCHEDULING};
pub use crate::sandbox::{PilotSandbox, TaskFilter, TaskSandbox};
pub use crate::task::TaskRecord;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Prof(ProfError),
    Json(json::Error),
    /// A task descriptor or config blob failed to decode per its
    /// expected grammar.
    MalformedDescriptor(String),
    /// Host-list file absent for a referenced partition; fatal only
    /// for tasks referencing that partition.
    PartitionConfigMissing { partition: u32, path: PathBuf },
}

impl Error {
    fn malformed<S: Into<String>>(s: S) -> Self {
        Error::MalformedDescriptor(s.into())
    }
}

impl From<io::Error> for Error {
    fn from(io: io::Error) -> Self {
        Error::Io(io)
    }
}

impl From<ProfError> for Error {
    fn from(prof: ProfError) -> Self {
        Error::Prof(prof)
    }
}

impl From<json::Error> for Error {
    fn from(json: json::Error) -> Self {
        Error::Json(json)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Io(ref io) => io.fmt(f),
            Error::Prof(ref prof) => prof.fmt(f),
            Error::Json(ref json) => json.fmt(f),
            Error::MalformedDescriptor(ref msg) => write!(f, "malformed descriptor: {}", msg),
            Error::PartitionConfigMissing { partition, ref path } => write!(
                f,
                "host list for partition {} missing: {}",
                partition,
                path.display()
            ),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
