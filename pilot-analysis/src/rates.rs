// Copyright 2017 ETH Zurich. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Stage throughput with gap-tolerant segmentation.
//!
//! A run may stall for long stretches (e.g. waiting on upstream
//! submission). Dividing the event count by the wall-clock span would
//! then understate the throughput during active periods, so the event
//! timeline is cut into segments at inactivity gaps and the rate is
//! computed over the summed segment durations only.

use std::io::BufRead;
use std::path::Path;

use profformat::ProfReader;

use crate::Result;

/// Marker sets identifying one pipeline stage in its component log.
/// All `completed` markers must occur on the same line to count.
#[derive(Debug, Clone, Copy)]
pub struct Stage {
    pub name: &'static str,
    /// First occurrence opens the observation window.
    pub pending: &'static [&'static str],
    /// Each occurrence is one stage completion event.
    pub completed: &'static [&'static str],
    /// Candidate end-of-stage lines, honored only past the global gap.
    pub finished: &'static [&'static str],
}

/// Admission of tasks into the execution queue by the scheduler
/// component (`agent_scheduling.*.prof`).
pub const SCHEDULING: Stage = Stage {
    name: "scheduling",
    pending: &["AGENT_SCHEDULING_PENDING,"],
    completed: &["put", "AGENT_EXECUTING_PENDING,"],
    finished: &["unschedule_stop"],
};

/// Hand-off of tasks to their launcher by the executor component
/// (`agent_executing.*.prof`).
pub const LAUNCHING: Stage = Stage {
    name: "launching",
    pending: &["AGENT_EXECUTING_PENDING"],
    completed: &["exec_ok"],
    finished: &["exec_stop"],
};

/// Inactivity thresholds in seconds. These are constants of the
/// analysis, never derived from the data.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GapConfig {
    /// Gap between consecutive completions that closes a segment.
    pub local: f64,
    /// Gap after the last completion at which a `finished` marker ends
    /// the stage scan.
    pub global: f64,
}

impl Default for GapConfig {
    fn default() -> Self {
        GapConfig {
            local: 20.0,
            global: 120.0,
        }
    }
}

/// A maximal gap-free span of stage completions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSegment {
    pub start: f64,
    pub end: f64,
    pub count: u64,
}

impl RateSegment {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Events per second within the segment. `None` when undefined:
    /// no events, or all events at the identical timestamp.
    pub fn rate(&self) -> Option<f64> {
        if self.count == 0 || self.duration() <= 0.0 {
            None
        } else {
            Some(self.count as f64 / self.duration())
        }
    }
}

/// Throughput of one stage over its active segments.
#[derive(Debug, Clone, PartialEq)]
pub struct StageRate {
    pub segments: Vec<RateSegment>,
    /// Total completion events, including those in zero-duration
    /// segments.
    pub events: u64,
    /// Summed duration of positive-duration segments; idle gaps and
    /// zero-duration segments contribute nothing.
    pub active_secs: f64,
}

impl StageRate {
    fn empty() -> Self {
        StageRate {
            segments: Vec::new(),
            events: 0,
            active_secs: 0.0,
        }
    }

    fn close(&mut self, segment: RateSegment) {
        self.events += segment.count;
        if segment.duration() > 0.0 {
            self.active_secs += segment.duration();
        }
        self.segments.push(segment);
    }

    /// Total events over total active time; the undefined-rate
    /// sentinel is `None`, never zero or infinity.
    pub fn overall_rate(&self) -> Option<f64> {
        if self.events == 0 || self.active_secs <= 0.0 {
            None
        } else {
            Some(self.events as f64 / self.active_secs)
        }
    }
}

/// Measure a stage's throughput from its component profile log.
pub fn measure_stage<P: AsRef<Path>>(log: P, stage: &Stage, gaps: &GapConfig) -> Result<StageRate> {
    measure_stage_from(ProfReader::open(log)?, stage, gaps)
}

pub fn measure_stage_from<R: BufRead>(
    mut reader: ProfReader<R>,
    stage: &Stage,
    gaps: &GapConfig,
) -> Result<StageRate> {
    let mut rate = StageRate::empty();

    // the first pending marker opens the observation window
    let start = match reader.scan_until(stage.pending)? {
        Some(rec) => rec.timestamp,
        None => return Ok(rate),
    };
    let mut segment = RateSegment {
        start,
        end: start,
        count: 0,
    };

    for record in reader.records() {
        let record = record?;
        if record.contains_all(stage.completed) {
            let ts = record.timestamp;
            if segment.count > 0 && ts - segment.end > gaps.local {
                // the gap event opens, and counts toward, the next segment
                rate.close(segment);
                segment = RateSegment {
                    start: ts,
                    end: ts,
                    count: 1,
                };
            } else {
                segment.end = ts;
                segment.count += 1;
            }
        } else if record.contains_all(stage.finished)
            && record.timestamp - segment.end > gaps.global
        {
            // no new work for longer than the global gap: stage is done
            break;
        }
    }

    if segment.count > 0 {
        rate.close(segment);
    }
    Ok(rate)
}
