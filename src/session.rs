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

//! Write session: identity assignment, committer resolution and the
//! commit/abort protocol surface shared by both writer strategies.
//!
//! One session is constructed per write job on the driver and goes through
//! [`WriteSession::driver_side_setup`] once. Each worker reconstructs a
//! session from the frozen configuration and goes through
//! [`WriteSession::executor_side_setup`] once per task attempt. Committer
//! instances are never shared across attempts.

use std::fmt::{Display, Formatter};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::committer::{resolve_committer, Committer};
use crate::config::{
    WriteConfig, KESTREL_SINK_JOB_SEQUENCE, KESTREL_SINK_JOB_TIMESTAMP,
    KESTREL_SINK_WRITE_UUID,
};
use crate::error::{Result, SinkError};
use crate::format::{OutputFormat, RowWriter};

/// Identity of one write job. Immutable for the job's lifetime.
///
/// The uuid is the collision-avoidance token embedded in every output file
/// name: two jobs never overwrite each other's files, even across process
/// restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobIdentity {
    sequence: u64,
    timestamp: String,
    uuid: String,
}

impl JobIdentity {
    pub fn new(sequence: u64, timestamp: String, uuid: String) -> Self {
        Self {
            sequence,
            timestamp,
            uuid,
        }
    }

    /// Rebuild the identity a driver published into the shared
    /// configuration.
    pub fn from_config(config: &WriteConfig) -> Result<Self> {
        let uuid = config.write_uuid().ok_or_else(|| {
            SinkError::Setup(
                "configuration has not been through driver-side setup: no write uuid"
                    .to_owned(),
            )
        })?;
        let sequence = config.job_sequence().ok_or_else(|| {
            SinkError::Setup("no job sequence in configuration".to_owned())
        })?;
        let timestamp = config.job_timestamp().ok_or_else(|| {
            SinkError::Setup("no job timestamp in configuration".to_owned())
        })?;
        Ok(Self::new(sequence, timestamp.to_owned(), uuid.to_owned()))
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Job ordinal string used in staging paths and logs.
    pub fn ordinal(&self) -> String {
        format!("job_{}_{:04}", self.timestamp, self.sequence)
    }
}

/// Identity of one task attempt. Speculative execution produces several
/// attempts with the same partition index and distinct attempt numbers,
/// all racing to commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskIdentity {
    pub job: JobIdentity,
    pub stage_id: usize,
    pub partition: usize,
    pub attempt: usize,
}

impl TaskIdentity {
    pub fn new(job: JobIdentity, stage_id: usize, partition: usize, attempt: usize) -> Self {
        Self {
            job,
            stage_id,
            partition,
            attempt,
        }
    }

    /// Ordinal of the logical task: identical for every attempt of one
    /// partition.
    pub fn task_ordinal(&self) -> String {
        format!(
            "task_{}_{:04}_m_{:06}",
            self.job.timestamp, self.job.sequence, self.partition
        )
    }

    /// Ordinal of this attempt: unique per (partition, attempt).
    pub fn attempt_ordinal(&self) -> String {
        format!(
            "attempt_{}_{:04}_m_{:06}_{}",
            self.job.timestamp, self.job.sequence, self.partition, self.attempt
        )
    }
}

impl Display for TaskIdentity {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.attempt_ordinal())
    }
}

/// Per-job write session driving setup, writer-handle creation and the
/// commit/abort protocol.
pub struct WriteSession {
    format: Arc<dyn OutputFormat>,
    config: WriteConfig,
    job: Option<JobIdentity>,
    task: Option<TaskIdentity>,
    committer: Option<Box<dyn Committer>>,
}

impl WriteSession {
    pub fn new(format: Arc<dyn OutputFormat>, config: WriteConfig) -> Self {
        Self {
            format,
            config,
            job: None,
            task: None,
            committer: None,
        }
    }

    /// Driver-side setup, called exactly once per write job.
    ///
    /// Assigns the job identity, publishes it into the configuration,
    /// runs the format's job-preparation hook (before committer resolution,
    /// since committer construction may read settings published there),
    /// resolves the job-level committer and runs its job setup. After this
    /// call the configuration is frozen.
    pub fn driver_side_setup(&mut self, job_sequence: u64) -> Result<()> {
        let timestamp = Utc::now().format("%Y%m%d%H%M%S").to_string();
        let uuid = Uuid::new_v4().to_string();
        let job = JobIdentity::new(job_sequence, timestamp, uuid);

        self.config
            .set(KESTREL_SINK_WRITE_UUID, job.uuid())
            .and_then(|_| {
                self.config
                    .set(KESTREL_SINK_JOB_SEQUENCE, &job.sequence().to_string())
            })
            .and_then(|_| {
                self.config
                    .set(KESTREL_SINK_JOB_TIMESTAMP, job.timestamp())
            })?;

        // placeholder identity for driver-side committer calls
        let task = TaskIdentity::new(job.clone(), 0, 0, 0);

        let format = self.format.clone();
        format
            .prepare_job(&mut self.config)
            .map_err(|e| SinkError::Setup(format!("job preparation hook failed: {e}")))?;

        let committer = resolve_committer(&self.config, &job)?;
        committer
            .setup_job()
            .map_err(|e| SinkError::Setup(format!("committer job setup failed: {e}")))?;

        info!(
            "job {} set up with {} committer, writing to {}",
            job.ordinal(),
            committer.name(),
            self.config.output_path()
        );

        self.job = Some(job);
        self.task = Some(task);
        self.committer = Some(committer);
        Ok(())
    }

    /// Executor-side setup, called once per task attempt on a worker.
    ///
    /// Derives the task identity from the frozen configuration, rebuilds
    /// the attempt-scoped configuration, resolves a fresh committer for
    /// this attempt and runs its task setup.
    pub fn executor_side_setup(
        &mut self,
        stage_id: usize,
        partition: usize,
        attempt: usize,
    ) -> Result<()> {
        let job = JobIdentity::from_config(&self.config)?;
        let task = TaskIdentity::new(job.clone(), stage_id, partition, attempt);

        self.config = self.config.attempt_scoped(&task);

        let committer = resolve_committer(&self.config, &job)?;
        committer.setup_task(&task).map_err(|e| {
            SinkError::Setup(format!(
                "committer task setup failed for {}: {e}",
                task.attempt_ordinal()
            ))
        })?;

        info!("set up task attempt {task} with {} committer", committer.name());

        self.job = Some(job);
        self.task = Some(task);
        self.committer = Some(committer);
        Ok(())
    }

    /// The (frozen) configuration of this session.
    pub fn config(&self) -> &WriteConfig {
        &self.config
    }

    pub fn job(&self) -> Option<&JobIdentity> {
        self.job.as_ref()
    }

    pub(crate) fn task(&self) -> Result<&TaskIdentity> {
        self.task.as_ref().ok_or_else(|| {
            SinkError::Internal("session has no task identity; setup not run".to_owned())
        })
    }

    fn committer(&self) -> Result<&dyn Committer> {
        self.committer.as_deref().ok_or_else(|| {
            SinkError::Internal("session has no committer; setup not run".to_owned())
        })
    }

    /// The directory this task attempt must write through. Callers must
    /// never construct final output paths themselves.
    pub fn work_path(&self) -> Result<PathBuf> {
        Ok(self.committer()?.work_path(self.task()?))
    }

    /// Open a writer handle for this attempt, optionally under a partition
    /// subdirectory and with a bucket id appended to the file name.
    ///
    /// The file name embeds the job uuid and the partition index, so a
    /// retried attempt reproduces the name of the attempt it supersedes and
    /// the commit protocol treats both as the same logical output.
    pub fn new_output_writer(
        &self,
        partition_dir: Option<&str>,
        bucket_id: Option<u32>,
    ) -> Result<(String, Box<dyn RowWriter>)> {
        let task = self.task()?;
        let committer = self.committer()?;

        let mut dir = committer.work_path(task);
        if let Some(partition_dir) = partition_dir {
            dir = dir.join(partition_dir);
        }
        fs::create_dir_all(&dir)?;

        let bucket = bucket_id
            .map(|b| format!("_{b:05}"))
            .unwrap_or_default();
        let name = format!(
            "part-{:05}-{}{}.{}",
            task.partition,
            task.job.uuid(),
            bucket,
            self.format.file_extension()
        );
        let path = dir.join(name);

        match self.format.open_writer(&path) {
            Ok(writer) => Ok((path.to_string_lossy().into_owned(), writer)),
            Err(SinkError::IoError(e))
                if e.kind() == io::ErrorKind::AlreadyExists && committer.is_direct() =>
            {
                // under a direct committer a leftover file usually means an
                // earlier attempt failed mid-write; a raw existence error
                // would send the operator down the wrong path
                Err(SinkError::AmbiguousExistingFile(
                    path.to_string_lossy().into_owned(),
                ))
            }
            Err(e) => Err(e),
        }
    }

    /// Promote this attempt's output through the commit coordinator. At
    /// most one attempt per partition is ever allowed to succeed.
    pub fn commit_task(&mut self) -> Result<()> {
        let task = self.task()?;
        self.committer()?.commit_task(task)
    }

    /// Discard this attempt's output. Tolerant of a partially set-up
    /// session and safe to call repeatedly; never fails past its own
    /// boundary so a cleanup failure cannot mask the original cause.
    pub fn abort_task(&mut self) -> Result<()> {
        let (Some(committer), Some(task)) = (&self.committer, &self.task) else {
            return Ok(());
        };
        if let Err(e) = committer.abort_task(task) {
            warn!("failed to clean up aborted {}: {e}", task.attempt_ordinal());
        }
        Ok(())
    }

    /// Driver-only: make the whole job's output visible. Only valid after
    /// every task has committed; the caller's scheduler enforces that.
    pub fn commit_job(&mut self) -> Result<()> {
        let committer = self.committer()?;
        committer.commit_job()?;
        if let Some(job) = &self.job {
            info!("committed job {}", job.ordinal());
        }
        Ok(())
    }

    /// Driver-only: mark the job failed and run job-level cleanup. Like
    /// task abort, cleanup failures are logged, not re-signaled.
    pub fn abort_job(&mut self) -> Result<()> {
        let Some(committer) = &self.committer else {
            return Ok(());
        };
        if let Err(e) = committer.abort_job() {
            warn!("failed to clean up aborted job: {e}");
        }
        Ok(())
    }
}
