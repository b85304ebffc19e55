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

//! Kestrel sink error types

use std::{
    error::Error,
    fmt::{Display, Formatter},
    io, result,
};

/// Result type alias for sink operations.
pub type Result<T> = result::Result<T, SinkError>;

/// Error types for the output write and commit protocol.
#[derive(Debug)]
pub enum SinkError {
    /// General error with a descriptive message.
    General(String),
    /// Internal error indicating a bug or unexpected state.
    Internal(String),
    /// Configuration error with invalid settings.
    Configuration(String),
    /// Driver- or executor-side setup failed; fatal to the job or task attempt.
    Setup(String),
    /// A row write failed and the task attempt was aborted:
    /// (task ordinal, original cause). Never retried locally.
    TaskWriteFailed(String, Box<SinkError>),
    /// All rows were written but closing the output or committing the task
    /// failed: (task ordinal, original cause). Distinct from
    /// [`SinkError::TaskWriteFailed`] so callers can tell "no output produced"
    /// from "output produced but not finalized".
    CommitFailed(String, Box<SinkError>),
    /// The commit coordinator rejected a duplicate speculative attempt:
    /// (partition index, attempt number). Benign for the losing attempt.
    CommitDenied(usize, usize),
    /// An output file already exists under a non-idempotent committer.
    /// Usually left behind by an earlier failed attempt of the same task.
    AmbiguousExistingFile(String),
    /// I/O operation error.
    IoError(io::Error),
    /// Row encoding or decoding error.
    SerdeError(serde_json::Error),
}

impl SinkError {
    /// True if this error is the commit coordinator rejecting a duplicate
    /// speculative attempt.
    pub fn is_commit_denied(&self) -> bool {
        matches!(self, SinkError::CommitDenied(_, _))
    }
}

#[allow(clippy::from_over_into)]
impl<T> Into<Result<T>> for SinkError {
    fn into(self) -> Result<T> {
        Err(self)
    }
}

impl From<String> for SinkError {
    fn from(e: String) -> Self {
        SinkError::General(e)
    }
}

impl From<io::Error> for SinkError {
    fn from(e: io::Error) -> Self {
        SinkError::IoError(e)
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(e: serde_json::Error) -> Self {
        SinkError::SerdeError(e)
    }
}

impl Display for SinkError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            SinkError::General(desc) => write!(f, "General error: {desc}"),
            SinkError::Internal(desc) => {
                write!(f, "Internal Kestrel sink error: {desc}")
            }
            SinkError::Configuration(desc) => {
                write!(f, "Configuration error: {desc}")
            }
            SinkError::Setup(desc) => write!(f, "Setup failed: {desc}"),
            SinkError::TaskWriteFailed(task, cause) => {
                write!(f, "Task {task} failed while writing rows: {cause}")
            }
            SinkError::CommitFailed(task, cause) => {
                write!(f, "Task {task} wrote all rows but failed to commit: {cause}")
            }
            SinkError::CommitDenied(partition, attempt) => {
                write!(
                    f,
                    "Commit denied for attempt {attempt} of partition {partition}: \
                    another attempt already committed"
                )
            }
            SinkError::AmbiguousExistingFile(path) => {
                write!(
                    f,
                    "Output file {path} already exists; a previous attempt of this \
                    task may have failed after creating it, inspect prior task \
                    attempt logs before retrying"
                )
            }
            SinkError::IoError(desc) => write!(f, "IO error: {desc}"),
            SinkError::SerdeError(desc) => write!(f, "Row codec error: {desc}"),
        }
    }
}

impl Error for SinkError {}
