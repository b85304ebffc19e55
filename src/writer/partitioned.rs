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

//! Partitioned writer: routes each row to one of up to `max_open_files`
//! output files keyed by partition/bucket columns.
//!
//! Routing is two-phase. The hash phase keeps one open handle per distinct
//! routing key; when the (`max_open_files`+1)-th key appears, the writer
//! switches to the sort phase: the triggering row and everything after it
//! go through the spill sorter, which yields all remaining rows grouped by
//! key, so one handle at a time suffices no matter how many keys exist.
//! Rows already written during the hash phase stay written; a key that
//! reappears through the sorter while its hash-phase handle is still open
//! continues on that handle instead of opening a second file.
//!
//! When sort-column ordering is configured the hash phase is skipped
//! entirely, since output must then be grouped by key in a single pass.

use futures::StreamExt;
use log::{debug, info};

use crate::error::{Result, SinkError};
use crate::row::RowBatchStream;
use crate::session::WriteSession;
use crate::sorter::SpillSorter;
use crate::writer::routing::{partition_path, routing_key, spill_key, RoutingKey};
use crate::writer::{OpenHandle, WriteDescription, WriteSummary, WriterRegistry};

/// Writes one task attempt's rows into per-partition (and per-bucket)
/// output files, then commits; any failure aborts the attempt.
pub struct PartitionedWriter<'a> {
    session: &'a mut WriteSession,
    description: WriteDescription,
    registry: WriterRegistry,
}

impl<'a> PartitionedWriter<'a> {
    pub fn new(session: &'a mut WriteSession, description: WriteDescription) -> Self {
        Self {
            session,
            description,
            registry: WriterRegistry::new(),
        }
    }

    /// Consume the row stream to completion and commit the task attempt.
    ///
    /// Success closes every still-open handle before `commit_task`; any
    /// failure closes them best-effort, aborts the attempt and re-signals
    /// the original cause wrapped as a task write failure. The registry is
    /// fully closed on every exit.
    pub async fn write_rows(mut self, mut rows: RowBatchStream) -> Result<WriteSummary> {
        let ordinal = self.session.task()?.attempt_ordinal();

        match self.consume(&mut rows).await {
            Ok(()) => {
                if let Err(e) = self.registry.release_all(false) {
                    return Err(SinkError::CommitFailed(ordinal, Box::new(e)));
                }
                match self.session.commit_task() {
                    Ok(()) => {}
                    Err(e) if e.is_commit_denied() => return Err(e),
                    Err(e) => return Err(SinkError::CommitFailed(ordinal, Box::new(e))),
                }
                let summary = self.registry.take_summary();
                info!(
                    "{ordinal} committed {} rows across {} file(s)",
                    summary.num_rows(),
                    summary.num_files()
                );
                Ok(summary)
            }
            Err(e) => {
                // best-effort close; failures are logged, never re-signaled
                let _ = self.registry.release_all(true);
                self.session.abort_task()?;
                Err(SinkError::TaskWriteFailed(ordinal, Box::new(e)))
            }
        }
    }

    async fn consume(&mut self, rows: &mut RowBatchStream) -> Result<()> {
        if !self.description.sort_column_indices.is_empty() {
            // grouped output is required, skip the hash phase entirely
            let mut sorter = self.new_sorter()?;
            while let Some(batch) = rows.next().await {
                for row in batch? {
                    let data = self.description.project_data(&row);
                    sorter.insert(spill_key(&row, &self.description), data)?;
                }
            }
            return self.write_sorted(sorter);
        }

        let max_open_files = self.session.config().max_open_files();
        let mut sorter: Option<SpillSorter> = None;

        while let Some(batch) = rows.next().await {
            for row in batch? {
                let data = self.description.project_data(&row);

                if let Some(active) = sorter.as_mut() {
                    active.insert(spill_key(&row, &self.description), data)?;
                    continue;
                }

                let key = routing_key(&row, &self.description);
                if let Some(handle) = self.registry.get_mut(&key) {
                    handle.write(&data)?;
                    continue;
                }

                if self.registry.len() < max_open_files {
                    let mut handle = self.open_for_key(&key)?;
                    handle.write(&data)?;
                    self.registry.insert(key, handle);
                } else {
                    info!(
                        "distinct routing keys exceeded the open file budget of \
                        {max_open_files}, switching to sort-based writing"
                    );
                    let mut fallback = self.new_sorter()?;
                    fallback.insert(spill_key(&row, &self.description), data)?;
                    sorter = Some(fallback);
                }
            }
        }

        if let Some(sorter) = sorter {
            self.write_sorted(sorter)?;
        }
        Ok(())
    }

    /// Single linear pass over the sorted sequence with one active handle.
    ///
    /// A new handle is opened only when the routing key changes; each key
    /// transition closes the previous handle first, so memory stays bounded
    /// to one open handle regardless of key cardinality. Sort-column values
    /// never open a new file.
    fn write_sorted(&mut self, sorter: SpillSorter) -> Result<()> {
        debug!(
            "sort phase over {} rows ({} spilled runs)",
            sorter.inserted_rows(),
            sorter.spilled_runs()
        );

        let mut active: Option<(RoutingKey, OpenHandle)> = None;
        for item in sorter.sorted_sequence()? {
            let (key, row) = item?;

            let same_key = matches!(&active, Some((current, _)) if *current == key.routing);
            if same_key {
                if let Some((_, handle)) = active.as_mut() {
                    handle.write(&row)?;
                }
                continue;
            }

            if let Some((_, mut handle)) = active.take() {
                handle.close()?;
                self.registry.record_finished(handle.into_output_file());
            }
            // a key seen during the hash phase continues on its still-open
            // handle instead of getting a second file
            let mut handle = match self.registry.remove(&key.routing) {
                Some(handle) => {
                    debug!("continuing hash-phase handle {}", handle.path());
                    handle
                }
                None => self.open_for_key(&key.routing)?,
            };
            handle.write(&row)?;
            active = Some((key.routing, handle));
        }

        if let Some((_, mut handle)) = active.take() {
            handle.close()?;
            self.registry.record_finished(handle.into_output_file());
        }
        Ok(())
    }

    fn open_for_key(&mut self, key: &RoutingKey) -> Result<OpenHandle> {
        let partition_dir = if self.description.partition_columns.is_empty() {
            None
        } else {
            Some(partition_path(
                &self.description.partition_columns,
                &key.partition_values,
                self.session.config().default_partition_name(),
            ))
        };
        let (path, writer) = self
            .session
            .new_output_writer(partition_dir.as_deref(), key.bucket_id)?;
        debug!("opened output file {path}");
        Ok(OpenHandle::new(writer, path))
    }

    fn new_sorter(&self) -> Result<SpillSorter> {
        let spill_dir = self.session.work_path()?.join(".spill");
        SpillSorter::try_new(spill_dir, self.session.config().spill_buffer_rows())
    }
}
