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

//! Single-file writer: one task attempt, one output file, no routing.

use futures::StreamExt;
use log::{info, warn};

use crate::error::{Result, SinkError};
use crate::row::RowBatchStream;
use crate::session::WriteSession;
use crate::writer::{OpenHandle, WriteSummary};

/// Writes the task's whole row sequence to one handle opened at the
/// session's work path, then commits; any failure aborts the attempt.
pub struct SingleFileWriter<'a> {
    session: &'a mut WriteSession,
}

impl<'a> SingleFileWriter<'a> {
    pub fn new(session: &'a mut WriteSession) -> Self {
        Self { session }
    }

    /// Consume the row stream to completion and commit the task attempt.
    ///
    /// On success the handle is closed before `commit_task`. On a failure
    /// during consumption the handle is closed best-effort, the attempt is
    /// aborted and the original cause is re-signaled wrapped as a task
    /// write failure. A failure while closing or committing after all rows
    /// were written is re-signaled as a commit failure without a local
    /// abort, leaving abort reachable for the caller's retry logic. All
    /// three exits leave no open handle behind.
    pub async fn write_rows(self, mut rows: RowBatchStream) -> Result<WriteSummary> {
        let ordinal = self.session.task()?.attempt_ordinal();
        let mut handle: Option<OpenHandle> = None;

        match Self::consume(self.session, &mut handle, &mut rows).await {
            Ok(()) => {
                let mut files = Vec::new();
                if let Some(mut h) = handle.take() {
                    if let Err(e) = h.close() {
                        return Err(SinkError::CommitFailed(ordinal, Box::new(e)));
                    }
                    files.push(h.into_output_file());
                }
                match self.session.commit_task() {
                    Ok(()) => {}
                    Err(e) if e.is_commit_denied() => return Err(e),
                    Err(e) => return Err(SinkError::CommitFailed(ordinal, Box::new(e))),
                }
                let summary = WriteSummary { files };
                info!(
                    "{ordinal} committed {} rows in {} file(s)",
                    summary.num_rows(),
                    summary.num_files()
                );
                Ok(summary)
            }
            Err(e) => {
                if let Some(mut h) = handle.take() {
                    if let Err(close_err) = h.close() {
                        warn!(
                            "failed to close {} while aborting {ordinal}: {close_err}",
                            h.path()
                        );
                    }
                }
                self.session.abort_task()?;
                Err(SinkError::TaskWriteFailed(ordinal, Box::new(e)))
            }
        }
    }

    async fn consume(
        session: &mut WriteSession,
        handle: &mut Option<OpenHandle>,
        rows: &mut RowBatchStream,
    ) -> Result<()> {
        let (path, writer) = session.new_output_writer(None, None)?;
        let open = handle.insert(OpenHandle::new(writer, path));
        while let Some(batch) = rows.next().await {
            for row in batch? {
                open.write(&row)?;
            }
        }
        Ok(())
    }
}
