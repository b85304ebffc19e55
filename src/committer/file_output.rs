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

//! Staging/rename committer.
//!
//! Layout under the output root:
//!
//! ```text
//! <output>/_temporary/<job-sequence>/<attempt-ordinal>/...   task attempt work dirs
//! <output>/_temporary/<job-sequence>/<task-ordinal>/...      committed task output
//! ```
//!
//! Task commit is a single directory rename from the attempt dir to the
//! task dir. The rename is the cross-attempt rendezvous: when a second
//! speculative attempt tries to commit the same partition, its rename hits
//! an existing non-empty destination and fails, which is reported as a
//! duplicate-attempt rejection. Job commit merges every committed task dir
//! into the output root and removes the staging tree.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use super::Committer;
use crate::error::{Result, SinkError};
use crate::session::{JobIdentity, TaskIdentity};

const STAGING_DIR_NAME: &str = "_temporary";

/// The default committer: per-attempt staging directories promoted by
/// atomic rename, final visibility on job commit.
#[derive(Debug)]
pub struct FileOutputCommitter {
    output_path: PathBuf,
    job_sequence: u64,
}

impl FileOutputCommitter {
    pub fn new(output_path: impl Into<PathBuf>, job: &JobIdentity) -> Self {
        Self {
            output_path: output_path.into(),
            job_sequence: job.sequence(),
        }
    }

    /// Staging root for this job under the output root.
    fn staging_dir(&self) -> PathBuf {
        self.output_path
            .join(STAGING_DIR_NAME)
            .join(self.job_sequence.to_string())
    }

    fn attempt_dir(&self, task: &TaskIdentity) -> PathBuf {
        self.staging_dir().join(task.attempt_ordinal())
    }

    fn committed_task_dir(&self, task: &TaskIdentity) -> PathBuf {
        self.staging_dir().join(task.task_ordinal())
    }
}

impl Committer for FileOutputCommitter {
    fn name(&self) -> &'static str {
        "file-output"
    }

    fn setup_job(&self) -> Result<()> {
        fs::create_dir_all(self.staging_dir())?;
        debug!("created staging dir {:?}", self.staging_dir());
        Ok(())
    }

    fn setup_task(&self, task: &TaskIdentity) -> Result<()> {
        fs::create_dir_all(self.attempt_dir(task))?;
        Ok(())
    }

    fn work_path(&self, task: &TaskIdentity) -> PathBuf {
        self.attempt_dir(task)
    }

    fn commit_task(&self, task: &TaskIdentity) -> Result<()> {
        let src = self.attempt_dir(task);
        let dst = self.committed_task_dir(task);

        if !src.exists() {
            // attempt produced no output and its dir was already removed
            debug!("nothing to commit for {}", task.attempt_ordinal());
            return Ok(());
        }

        match fs::rename(&src, &dst) {
            Ok(()) => {
                info!(
                    "committed {} as {}",
                    task.attempt_ordinal(),
                    task.task_ordinal()
                );
                Ok(())
            }
            Err(e) if dst.exists() => {
                // the rename rendezvous: another attempt got there first
                debug!(
                    "commit of {} lost the rename race: {e}",
                    task.attempt_ordinal()
                );
                Err(SinkError::CommitDenied(task.partition, task.attempt))
            }
            Err(e) => Err(SinkError::IoError(e)),
        }
    }

    fn abort_task(&self, task: &TaskIdentity) -> Result<()> {
        let dir = self.attempt_dir(task);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!("aborted {}, removed {dir:?}", task.attempt_ordinal());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SinkError::IoError(e)),
        }
    }

    fn commit_job(&self) -> Result<()> {
        let staging = self.staging_dir();
        for entry in fs::read_dir(&staging)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with("task_") {
                merge_paths(&entry.path(), &self.output_path)?;
            } else {
                // leftover attempt dir from an attempt that was never
                // committed nor aborted (e.g. a killed speculative twin)
                warn!("discarding uncommitted attempt output {:?}", entry.path());
            }
        }
        fs::remove_dir_all(&staging)?;
        // remove the shared _temporary dir if this was the last job in it
        let _ = fs::remove_dir(self.output_path.join(STAGING_DIR_NAME));
        info!("job output committed to {:?}", self.output_path);
        Ok(())
    }

    fn abort_job(&self) -> Result<()> {
        let staging = self.staging_dir();
        match fs::remove_dir_all(&staging) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(SinkError::IoError(e)),
        }
        let _ = fs::remove_dir(self.output_path.join(STAGING_DIR_NAME));
        info!("job aborted, removed staging dir {staging:?}");
        Ok(())
    }
}

/// Recursively move `src` into `dst`, preserving the directory structure.
///
/// File names embed the job uuid, so two committed tasks never carry the
/// same file name and a plain rename per file is sufficient.
fn merge_paths(src: &Path, dst: &Path) -> Result<()> {
    if src.is_dir() {
        fs::create_dir_all(dst)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            merge_paths(&entry.path(), &dst.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        fs::rename(src, dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn job() -> JobIdentity {
        JobIdentity::new(0, "20260807000000".to_owned(), "test-uuid".to_owned())
    }

    fn attempt(partition: usize, attempt: usize) -> TaskIdentity {
        TaskIdentity::new(job(), 1, partition, attempt)
    }

    fn write_output(committer: &FileOutputCommitter, task: &TaskIdentity, name: &str) {
        let dir = committer.work_path(task);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), task.attempt_ordinal()).unwrap();
    }

    #[test]
    fn test_commit_task_then_job() -> Result<()> {
        let out = TempDir::new().unwrap();
        let committer = FileOutputCommitter::new(out.path(), &job());
        committer.setup_job()?;

        let task = attempt(0, 0);
        committer.setup_task(&task)?;
        write_output(&committer, &task, "part-00000");

        committer.commit_task(&task)?;
        committer.commit_job()?;

        assert!(out.path().join("part-00000").exists());
        assert!(!out.path().join(STAGING_DIR_NAME).exists());
        Ok(())
    }

    #[test]
    fn test_duplicate_commit_is_denied() -> Result<()> {
        let out = TempDir::new().unwrap();
        let committer = FileOutputCommitter::new(out.path(), &job());
        committer.setup_job()?;

        let first = attempt(0, 0);
        let second = attempt(0, 1);
        committer.setup_task(&first)?;
        committer.setup_task(&second)?;
        write_output(&committer, &first, "part-00000");
        write_output(&committer, &second, "part-00000");

        committer.commit_task(&first)?;
        let denied = committer.commit_task(&second).unwrap_err();
        assert!(denied.is_commit_denied());

        // the losing attempt aborts; its staging output disappears
        committer.abort_task(&second)?;
        committer.commit_job()?;

        let contents = fs::read_to_string(out.path().join("part-00000")).unwrap();
        assert_eq!(contents, first.attempt_ordinal());
        Ok(())
    }

    #[test]
    fn test_abort_task_is_idempotent() -> Result<()> {
        let out = TempDir::new().unwrap();
        let committer = FileOutputCommitter::new(out.path(), &job());
        committer.setup_job()?;

        let task = attempt(2, 0);
        // abort before setup: nothing to remove
        committer.abort_task(&task)?;
        committer.setup_task(&task)?;
        write_output(&committer, &task, "part-00002");
        committer.abort_task(&task)?;
        committer.abort_task(&task)?;
        assert!(!committer.attempt_dir(&task).exists());
        Ok(())
    }

    #[test]
    fn test_abort_job_removes_staging() -> Result<()> {
        let out = TempDir::new().unwrap();
        let committer = FileOutputCommitter::new(out.path(), &job());
        committer.setup_job()?;

        let task = attempt(0, 0);
        committer.setup_task(&task)?;
        write_output(&committer, &task, "part-00000");

        committer.abort_job()?;
        assert!(!out.path().join(STAGING_DIR_NAME).exists());
        assert!(!out.path().join("part-00000").exists());
        Ok(())
    }

    #[test]
    fn test_commit_job_merges_partition_dirs() -> Result<()> {
        let out = TempDir::new().unwrap();
        let committer = FileOutputCommitter::new(out.path(), &job());
        committer.setup_job()?;

        let a = attempt(0, 0);
        let b = attempt(1, 0);
        committer.setup_task(&a)?;
        committer.setup_task(&b)?;
        for (task, file) in [(&a, "part-00000"), (&b, "part-00001")] {
            let dir = committer.work_path(task).join("col=x");
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(file), "rows").unwrap();
        }

        committer.commit_task(&a)?;
        committer.commit_task(&b)?;
        committer.commit_job()?;

        // both tasks' files land under the same partition dir
        assert!(out.path().join("col=x").join("part-00000").exists());
        assert!(out.path().join("col=x").join("part-00001").exists());
        Ok(())
    }
}
