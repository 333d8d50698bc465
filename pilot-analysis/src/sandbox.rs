// Copyright 2017 ETH Zurich. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Discovery of per-task sandboxes inside a pilot sandbox directory.
//!
//! A task sandbox is a `task.*` subdirectory holding the artifact
//! bundle `{id}.prof`, `{id}.out`, `{id}.err`, `{id}.sh` and `{id}.sl`,
//! where `{id}` is the sandbox directory name.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Literal substring the launcher writes to stderr on clean exit.
pub const SUCCESS_MARKER: &str = "COMPLETED WITH STATUS 0";

/// Selects which completion status admits a task into the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskFilter {
    Successful,
    /// Inverted gate, used for placement-latency-on-failure analysis.
    Failed,
}

impl TaskFilter {
    pub fn admits(self, succeeded: bool) -> bool {
        match self {
            TaskFilter::Successful => succeeded,
            TaskFilter::Failed => !succeeded,
        }
    }
}

/// The artifact bundle of one task sandbox. Paths only; nothing is
/// read until a gate or extractor asks for it.
#[derive(Debug, Clone)]
pub struct TaskSandbox {
    dir: PathBuf,
    task_id: String,
}

impl TaskSandbox {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    fn artifact(&self, ext: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", self.task_id, ext))
    }

    pub fn prof_path(&self) -> PathBuf {
        self.artifact("prof")
    }

    pub fn stdout_path(&self) -> PathBuf {
        self.artifact("out")
    }

    pub fn stderr_path(&self) -> PathBuf {
        self.artifact("err")
    }

    pub fn script_path(&self) -> PathBuf {
        self.artifact("sh")
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.artifact("sl")
    }

    /// True when both stdout and stderr were written with nonzero
    /// size. Tasks failing this gate never ran.
    pub fn executed(&self) -> bool {
        nonzero_file(&self.stdout_path()) && nonzero_file(&self.stderr_path())
    }

    /// True when stderr carries the launcher's success marker.
    pub fn succeeded(&self) -> io::Result<bool> {
        let stderr = fs::read_to_string(self.stderr_path())?;
        Ok(stderr.contains(SUCCESS_MARKER))
    }
}

fn nonzero_file(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

/// The pilot sandbox: the directory holding all task sandboxes and the
/// per-partition host-list files.
#[derive(Debug, Clone)]
pub struct PilotSandbox {
    dir: PathBuf,
}

impl PilotSandbox {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        PilotSandbox { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Host-list file for a partition id, e.g. `prrte.007.hosts`.
    pub fn hosts_path(&self, partition: u32) -> PathBuf {
        self.dir.join(format!("prrte.{:03}.hosts", partition))
    }

    /// All `task.*` sandbox subdirectories, sorted by name so a rerun
    /// visits them in the same order. A missing pilot sandbox root is
    /// a structural failure and propagates.
    pub fn task_sandboxes(&self) -> io::Result<Vec<TaskSandbox>> {
        let mut sandboxes = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with("task.") || !entry.path().is_dir() {
                continue;
            }
            sandboxes.push(TaskSandbox {
                dir: entry.path(),
                task_id: name,
            });
        }
        sandboxes.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        Ok(sandboxes)
    }
}
