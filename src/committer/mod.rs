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

//! Commit coordination for write jobs and task attempts.
//!
//! A committer owns the physical staging and atomic visibility of output
//! for one job. Committer instances are resolved once per task attempt and
//! never shared across attempts. Coordination between speculative attempts
//! of the same partition happens exclusively through the committer's
//! rendezvous (an atomic rename), never through in-process locks.

mod direct;
mod file_output;

pub use direct::DirectOutputCommitter;
pub use file_output::FileOutputCommitter;

use std::path::PathBuf;

use log::info;

use crate::config::WriteConfig;
use crate::error::{Result, SinkError};
use crate::session::{JobIdentity, TaskIdentity};

/// Job- and task-scope setup/commit/abort surface.
///
/// `commit_task` must guarantee that at most one attempt per partition
/// index ever becomes visible, even when speculative attempts race.
pub trait Committer: Send {
    /// Short variant name for logs.
    fn name(&self) -> &'static str;

    /// Driver-side job setup.
    fn setup_job(&self) -> Result<()>;

    /// Executor-side setup for one task attempt.
    fn setup_task(&self, task: &TaskIdentity) -> Result<()>;

    /// The directory a task attempt must write its output through. For a
    /// staging committer this is the attempt's private staging directory;
    /// for a committer with no staging concept it is the final output path.
    fn work_path(&self, task: &TaskIdentity) -> PathBuf;

    /// Promote one attempt's output. Returns
    /// [`SinkError::CommitDenied`] when another attempt of the same
    /// partition already committed.
    fn commit_task(&self, task: &TaskIdentity) -> Result<()>;

    /// Discard one attempt's output.
    fn abort_task(&self, task: &TaskIdentity) -> Result<()>;

    /// Make the whole job's output visible. Only valid after every task
    /// has committed; enforcing that ordering is the driver's job.
    fn commit_job(&self) -> Result<()>;

    /// Mark the job failed and clean up job-level state.
    fn abort_job(&self) -> Result<()>;

    /// True for committers that write directly to the final location with
    /// no staging. Such committers are not idempotent across attempts.
    fn is_direct(&self) -> bool {
        false
    }
}

/// Configurable committer variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitterKind {
    /// Staging/rename committer; the default.
    FileOutput,
    /// Direct-to-destination committer with no staging.
    Direct,
}

impl CommitterKind {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "file" | "default" => Ok(CommitterKind::FileOutput),
            "direct" => Ok(CommitterKind::Direct),
            other => Err(SinkError::Configuration(format!(
                "unknown output committer '{other}', expected 'file' or 'direct'"
            ))),
        }
    }
}

/// Resolve the committer for one task attempt (or for the driver).
///
/// Selection order:
/// 1. append mode forces the default committer: a direct committer can
///    leave partial data visible in an existing directory on failure;
/// 2. speculation forces the default committer: a non-idempotent
///    committer can corrupt output when two attempts race;
/// 3. a configured override is honored;
/// 4. otherwise the default staging committer is used.
///
/// Each decision is logged; operators rely on these lines to explain why
/// an override was ignored.
pub fn resolve_committer(
    config: &WriteConfig,
    job: &JobIdentity,
) -> Result<Box<dyn Committer>> {
    let configured = config.committer_override();

    let kind = if config.is_append_mode() {
        info!(
            "job {}: append mode forces the file-output committer (configured: {:?})",
            job.ordinal(),
            configured
        );
        CommitterKind::FileOutput
    } else if config.speculation_enabled() {
        info!(
            "job {}: speculative execution forces the file-output committer (configured: {:?})",
            job.ordinal(),
            configured
        );
        CommitterKind::FileOutput
    } else if let Some(value) = configured {
        let kind = CommitterKind::parse(value)?;
        info!("job {}: using configured committer '{value}'", job.ordinal());
        kind
    } else {
        info!("job {}: using default file-output committer", job.ordinal());
        CommitterKind::FileOutput
    };

    Ok(match kind {
        CommitterKind::FileOutput => {
            Box::new(FileOutputCommitter::new(config.output_path(), job))
        }
        CommitterKind::Direct => Box::new(DirectOutputCommitter::new(config.output_path())),
    })
}
