// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Direct-to-destination committer.
//!
//! Writes land at the final output path as they are produced; task and job
//! commit are no-ops. Saves the rename pass on stores where renames are
//! copies, at the price of idempotency: a failed attempt leaves its files
//! behind, which is why the selection policy refuses this variant under
//! append mode or speculation.

use std::fs;
use std::path::PathBuf;

use log::{debug, warn};

use super::Committer;
use crate::error::Result;
use crate::session::TaskIdentity;

/// Committer with no staging concept; not idempotent across attempts.
#[derive(Debug)]
pub struct DirectOutputCommitter {
    output_path: PathBuf,
}

impl DirectOutputCommitter {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
        }
    }
}

impl Committer for DirectOutputCommitter {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn setup_job(&self) -> Result<()> {
        fs::create_dir_all(&self.output_path)?;
        Ok(())
    }

    fn setup_task(&self, _task: &TaskIdentity) -> Result<()> {
        Ok(())
    }

    fn work_path(&self, _task: &TaskIdentity) -> PathBuf {
        self.output_path.clone()
    }

    fn commit_task(&self, task: &TaskIdentity) -> Result<()> {
        debug!(
            "direct committer: output of {} is already at its final location",
            task.attempt_ordinal()
        );
        Ok(())
    }

    fn abort_task(&self, task: &TaskIdentity) -> Result<()> {
        warn!(
            "direct committer cannot undo {}: files already written to {:?} remain",
            task.attempt_ordinal(),
            self.output_path
        );
        Ok(())
    }

    fn commit_job(&self) -> Result<()> {
        Ok(())
    }

    fn abort_job(&self) -> Result<()> {
        warn!(
            "direct committer cannot undo job output under {:?}",
            self.output_path
        );
        Ok(())
    }

    fn is_direct(&self) -> bool {
        true
    }
}
