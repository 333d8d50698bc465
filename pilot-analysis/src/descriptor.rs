// Copyright 2017 ETH Zurich. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Decoding of the `{id}.sl` task descriptor blob.
//!
//! The descriptor is JSON written with single quotes, so quotes are
//! normalized before decoding. It lists the node allocations the task
//! actually consumed, which may differ from what it requested; the
//! consumed counts are the ones that enter utilization.

use std::fs;
use std::path::Path;

use json::JsonValue;

use crate::{Error, Result};

trait JsonParse {
    fn parse_u32(&self) -> Result<u32> {
        self.parse_u64().and_then(|val| {
            if val > u64::from(u32::max_value()) {
                Err(Error::malformed(format!("integer too large for u32: {}", val)))
            } else {
                Ok(val as u32)
            }
        })
    }

    fn parse_u64(&self) -> Result<u64>;
}

impl JsonParse for JsonValue {
    fn parse_u64(&self) -> Result<u64> {
        if let Some(val) = self.as_u64() {
            Ok(val)
        } else if let Some(s) = self.as_str() {
            s.parse::<u64>()
                .map_err(|err| Error::malformed(err.to_string()))
        } else {
            Err(Error::malformed(format!("failed to parse number: {:?}", self)))
        }
    }
}

/// Resources one task actually consumed, and the partition it ran on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSlots {
    pub partition_id: u32,
    pub cpus: u32,
    pub gpus: u32,
}

impl TaskSlots {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<TaskSlots> {
        TaskSlots::parse(&fs::read_to_string(path)?)
    }

    /// Decode a descriptor blob. CPU count sums the per-rank core list
    /// lengths (`core_map[0]`) over all node allocations; GPU count
    /// sums the `gpu_map` lengths where present.
    pub fn parse(blob: &str) -> Result<TaskSlots> {
        let data = json::parse(&blob.replace('\'', "\""))?;

        let nodes = &data["nodes"];
        if !nodes.is_array() {
            return Err(Error::malformed("descriptor has no 'nodes' list"));
        }

        let mut cpus = 0u32;
        let mut gpus = 0u32;
        for node in nodes.members() {
            let core_map = &node["core_map"];
            if core_map[0].is_null() {
                return Err(Error::malformed("node allocation has an empty 'core_map'"));
            }
            cpus += core_map[0].len() as u32;

            let gpu_map = &node["gpu_map"];
            if !gpu_map.is_empty() {
                gpus += gpu_map.len() as u32;
            }
        }

        let partition_id = data["partition_id"].parse_u32()?;
        Ok(TaskSlots {
            partition_id,
            cpus,
            gpus,
        })
    }
}
