// Copyright 2017 ETH Zurich. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Extraction of lifecycle timestamps from a task's profile log.
//!
//! Two generations of the traced system spell the execution markers
//! differently (`exec_start` vs `task_exec_start`), so each logical
//! event carries a priority-ordered marker table. Matching is
//! field-exact: `exec_start` never matches inside a `task_exec_start`
//! field.

use std::fs;
use std::io::BufRead;
use std::path::Path;

use profformat::{ProfReader, ProfRecord, Timestamp};

use crate::{Error, Result};

/// Marker spellings per logical lifecycle event, newest spelling first.
pub const SCHED_ENQUEUE_MARKERS: &[&str] = &["AGENT_SCHEDULING_PENDING"];
pub const EXEC_START_MARKERS: &[&str] = &["task_exec_start", "exec_start"];
pub const APP_START_MARKERS: &[&str] = &["app_start"];
pub const APP_STOP_MARKERS: &[&str] = &["app_stop"];
pub const EXEC_STOP_MARKERS: &[&str] = &["task_exec_stop", "exec_stop"];

/// First word of the launcher invocation line in a task launch script.
pub const LAUNCHER_MARKER: &str = "prun";

/// The lifecycle timestamps of one task, epoch seconds. Any of them
/// may be absent from the profile log.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Lifecycle {
    pub sched_enqueue: Option<Timestamp>,
    pub exec_start: Option<Timestamp>,
    pub app_start: Option<Timestamp>,
    pub app_stop: Option<Timestamp>,
    pub exec_stop: Option<Timestamp>,
}

impl Lifecycle {
    /// Runtime-environment launch to termination.
    pub fn exec_span(&self) -> Option<f64> {
        match (self.exec_start, self.exec_stop) {
            (Some(start), Some(stop)) => Some(stop - start),
            _ => None,
        }
    }

    /// Runtime-environment launch to application payload start.
    pub fn placement(&self) -> Option<f64> {
        match (self.exec_start, self.app_start) {
            (Some(start), Some(app)) => Some(app - start),
            _ => None,
        }
    }
}

/// Extract lifecycle timestamps in a single pass over a profile log.
/// The last occurrence of an event wins, matching the traced system's
/// own convention of re-emitting events on retries.
pub fn extract<P: AsRef<Path>>(prof: P) -> Result<Lifecycle> {
    extract_from(ProfReader::open(prof)?)
}

pub fn extract_from<R: BufRead>(reader: ProfReader<R>) -> Result<Lifecycle> {
    let mut lifecycle = Lifecycle::default();
    for record in reader.records() {
        let record = record?;
        mark(&record, SCHED_ENQUEUE_MARKERS, &mut lifecycle.sched_enqueue);
        mark(&record, EXEC_START_MARKERS, &mut lifecycle.exec_start);
        mark(&record, APP_START_MARKERS, &mut lifecycle.app_start);
        mark(&record, APP_STOP_MARKERS, &mut lifecycle.app_stop);
        mark(&record, EXEC_STOP_MARKERS, &mut lifecycle.exec_stop);
    }
    Ok(lifecycle)
}

fn mark(record: &ProfRecord, markers: &[&str], slot: &mut Option<Timestamp>) {
    if markers.iter().any(|m| record.has_field(m)) {
        *slot = Some(record.timestamp);
    }
}

/// Declared application runtime in seconds: the third double-quote
/// delimited field of the `prun` invocation line of the launch script.
/// `Ok(None)` when the script has no launcher line.
pub fn declared_runtime<P: AsRef<Path>>(script: P) -> Result<Option<u64>> {
    let script = script.as_ref();
    let content = fs::read_to_string(script)?;
    for line in content.lines() {
        if !line.starts_with(LAUNCHER_MARKER) {
            continue;
        }
        let field = line.split('"').nth(3).ok_or_else(|| {
            Error::malformed(format!(
                "no quoted runtime field on launcher line of {}",
                script.display()
            ))
        })?;
        let secs = field.trim().parse::<u64>().map_err(|_| {
            Error::malformed(format!(
                "runtime field {:?} is not an integer in {}",
                field,
                script.display()
            ))
        })?;
        return Ok(Some(secs));
    }
    Ok(None)
}

/// Derive a missing `app_start` as `exec_stop - declared runtime`.
///
/// This assumes the payload ran for exactly its declared duration and
/// ended at `exec_stop`, i.e. that placement and payload phases do not
/// overlap; if the launcher semantics change this derivation goes
/// silently wrong, which is why out-of-range placements are flagged
/// downstream rather than clamped.
pub fn resolve_app_start(lifecycle: &mut Lifecycle, script: &Path) -> Result<()> {
    if lifecycle.app_start.is_some() {
        return Ok(());
    }
    let stop = match lifecycle.exec_stop {
        Some(stop) => stop,
        None => return Ok(()),
    };
    if let Some(secs) = declared_runtime(script)? {
        lifecycle.app_start = Some(stop - secs as f64);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn lifecycle_of(log: &str) -> Lifecycle {
        extract_from(ProfReader::from_reader(Cursor::new(log.as_bytes().to_vec()))).unwrap()
    }

    #[test]
    fn extracts_new_generation_markers() {
        let lc = lifecycle_of(
            "100.0,task_exec_start,agent_executing\n\
             103.5,app_start,agent_executing\n\
             130.0,app_stop,agent_executing\n\
             131.0,task_exec_stop,agent_executing\n",
        );
        assert_eq!(lc.exec_start, Some(100.0));
        assert_eq!(lc.app_start, Some(103.5));
        assert_eq!(lc.app_stop, Some(130.0));
        assert_eq!(lc.exec_stop, Some(131.0));
        assert_eq!(lc.exec_span(), Some(31.0));
        assert_eq!(lc.placement(), Some(3.5));
    }

    #[test]
    fn extracts_old_generation_markers() {
        let lc = lifecycle_of("100.0,exec_start\n131.0,exec_stop\n");
        assert_eq!(lc.exec_start, Some(100.0));
        assert_eq!(lc.exec_stop, Some(131.0));
        assert_eq!(lc.app_start, None);
    }

    #[test]
    fn exec_start_does_not_shadow_task_exec_start() {
        // a field named task_exec_start must only feed exec_start via
        // its own marker, never via the shorter legacy spelling
        let lc = lifecycle_of("200.0,task_exec_startle\n");
        assert_eq!(lc.exec_start, None);
    }

    #[test]
    fn last_occurrence_wins() {
        let lc = lifecycle_of("1.0,exec_start\n2.0,exec_start\n");
        assert_eq!(lc.exec_start, Some(2.0));
    }

    #[test]
    fn scheduling_enqueue_is_captured() {
        let lc = lifecycle_of("50.0,advance,AGENT_SCHEDULING_PENDING\n100.0,task_exec_start\n");
        assert_eq!(lc.sched_enqueue, Some(50.0));
    }

    #[test]
    fn declared_runtime_reads_third_quoted_field() {
        let tmp = TempDir::new().unwrap();
        let script = tmp.path().join("task.0000.sh");
        fs::write(
            &script,
            "#!/bin/sh\nprun -n 1 --host node1 \"/bin/sleep\" \"30\" 1>out 2>err\n",
        )
        .unwrap();
        assert_eq!(declared_runtime(&script).unwrap(), Some(30));
    }

    #[test]
    fn script_without_launcher_line_yields_none() {
        let tmp = TempDir::new().unwrap();
        let script = tmp.path().join("task.0000.sh");
        fs::write(&script, "#!/bin/sh\necho hello\n").unwrap();
        assert_eq!(declared_runtime(&script).unwrap(), None);
    }

    #[test]
    fn non_numeric_runtime_field_is_malformed() {
        let tmp = TempDir::new().unwrap();
        let script = tmp.path().join("task.0000.sh");
        fs::write(&script, "prun \"/bin/sleep\" \"soon\"\n").unwrap();
        assert!(matches!(
            declared_runtime(&script),
            Err(Error::MalformedDescriptor(_))
        ));
    }

    #[test]
    fn app_start_fallback_subtracts_runtime() {
        let tmp = TempDir::new().unwrap();
        let script = tmp.path().join("task.0000.sh");
        fs::write(&script, "prun --host n1 \"/bin/sleep\" \"30\"\n").unwrap();

        let mut lc = lifecycle_of("100.0,task_exec_start\n145.0,task_exec_stop\n");
        resolve_app_start(&mut lc, &script).unwrap();
        assert_eq!(lc.app_start, Some(115.0));
        assert_eq!(lc.placement(), Some(15.0));
    }

    #[test]
    fn fallback_never_overwrites_observed_app_start() {
        let tmp = TempDir::new().unwrap();
        let script = tmp.path().join("task.0000.sh");
        fs::write(&script, "prun \"/bin/sleep\" \"30\"\n").unwrap();

        let mut lc = lifecycle_of("100.0,task_exec_start\n103.0,app_start\n145.0,task_exec_stop\n");
        resolve_app_start(&mut lc, &script).unwrap();
        assert_eq!(lc.app_start, Some(103.0));
    }
}
