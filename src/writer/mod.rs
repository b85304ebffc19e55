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

//! Writer strategies: one file per task, or one file per partition/bucket.
//!
//! Both strategies consume the task's row stream to completion, then call
//! exactly one of commit or abort on the session. Every open handle is
//! owned by the current task attempt and is closed before control returns,
//! on every exit path.

pub mod partitioned;
pub mod routing;
pub mod single;

pub use partitioned::PartitionedWriter;
pub use single::SingleFileWriter;

use std::collections::HashMap;

use log::warn;

use crate::error::Result;
use crate::format::RowWriter;
use crate::row::Row;
use routing::RoutingKey;

/// Bucketing configuration: which columns feed the bucket hash and how
/// many buckets a partition's output is subdivided into.
#[derive(Debug, Clone)]
pub struct BucketSpec {
    pub column_indices: Vec<usize>,
    pub num_buckets: u32,
}

/// Describes how rows map onto output files: partition columns (name plus
/// column index, in declared order), optional bucketing, optional
/// sort-column ordering within each file, and the projection of columns
/// that actually land in the output.
#[derive(Debug, Clone, Default)]
pub struct WriteDescription {
    pub partition_columns: Vec<(String, usize)>,
    pub bucket_spec: Option<BucketSpec>,
    pub sort_column_indices: Vec<usize>,
    /// Columns written to the output file; `None` writes the full row.
    pub data_column_indices: Option<Vec<usize>>,
}

impl WriteDescription {
    pub fn partitioned_by(columns: Vec<(String, usize)>) -> Self {
        Self {
            partition_columns: columns,
            ..Default::default()
        }
    }

    pub fn with_bucketing(mut self, spec: BucketSpec) -> Self {
        self.bucket_spec = Some(spec);
        self
    }

    pub fn with_sort_columns(mut self, indices: Vec<usize>) -> Self {
        self.sort_column_indices = indices;
        self
    }

    pub fn with_data_columns(mut self, indices: Vec<usize>) -> Self {
        self.data_column_indices = Some(indices);
        self
    }

    pub(crate) fn project_data(&self, row: &Row) -> Row {
        match &self.data_column_indices {
            Some(indices) => Row::new(row.project(indices)),
            None => row.clone(),
        }
    }
}

/// One finished output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFile {
    pub path: String,
    pub num_rows: u64,
}

/// Result of one task attempt's write: the files it produced.
#[derive(Debug, Clone, Default)]
pub struct WriteSummary {
    pub files: Vec<OutputFile>,
}

impl WriteSummary {
    pub fn num_files(&self) -> usize {
        self.files.len()
    }

    pub fn num_rows(&self) -> u64 {
        self.files.iter().map(|f| f.num_rows).sum()
    }
}

/// An open writer handle plus its bookkeeping.
pub(crate) struct OpenHandle {
    writer: Box<dyn RowWriter>,
    path: String,
    rows: u64,
}

impl OpenHandle {
    pub(crate) fn new(writer: Box<dyn RowWriter>, path: String) -> Self {
        Self {
            writer,
            path,
            rows: 0,
        }
    }

    pub(crate) fn write(&mut self, row: &Row) -> Result<()> {
        self.writer.write(row)?;
        self.rows += 1;
        Ok(())
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        self.writer.close()
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }

    pub(crate) fn into_output_file(self) -> OutputFile {
        OutputFile {
            path: self.path,
            num_rows: self.rows,
        }
    }
}

/// Owned collection of the task attempt's open writer handles, keyed by
/// routing key, plus the files already finished. A single `cleared` flag
/// makes releasing idempotent: the success path and a later abort can both
/// call [`WriterRegistry::release_all`] safely.
#[derive(Default)]
pub(crate) struct WriterRegistry {
    open: HashMap<RoutingKey, OpenHandle>,
    finished: Vec<OutputFile>,
    cleared: bool,
}

impl WriterRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.open.len()
    }

    pub(crate) fn get_mut(&mut self, key: &RoutingKey) -> Option<&mut OpenHandle> {
        self.open.get_mut(key)
    }

    pub(crate) fn insert(&mut self, key: RoutingKey, handle: OpenHandle) {
        self.open.insert(key, handle);
    }

    /// Remove a handle so the caller can continue writing through it
    /// outside the registry (sort-phase reuse of a hash-phase handle).
    pub(crate) fn remove(&mut self, key: &RoutingKey) -> Option<OpenHandle> {
        self.open.remove(key)
    }

    /// Record a file that was closed outside the registry.
    pub(crate) fn record_finished(&mut self, file: OutputFile) {
        self.finished.push(file);
    }

    /// Close every still-open handle. With `best_effort`, close failures
    /// are logged and swallowed (abort path); otherwise the first failure
    /// is returned after all handles have still been closed.
    pub(crate) fn release_all(&mut self, best_effort: bool) -> Result<()> {
        if self.cleared {
            return Ok(());
        }
        self.cleared = true;

        let mut first_error = None;
        for (_, mut handle) in self.open.drain() {
            match handle.close() {
                Ok(()) => self.finished.push(handle.into_output_file()),
                Err(e) => {
                    if best_effort {
                        warn!("failed to close {} during abort: {e}", handle.path());
                    } else if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// The finished files, ordered by path for deterministic results.
    pub(crate) fn take_summary(&mut self) -> WriteSummary {
        let mut files = std::mem::take(&mut self.finished);
        files.sort_by(|a, b| a.path.cmp(&b.path));
        WriteSummary { files }
    }
}
