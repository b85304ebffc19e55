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

#![doc = include_str!("../README.md")]

/// The current version of the Kestrel sink, derived from the Cargo package version.
pub const KESTREL_SINK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Commit coordination: the committer trait and its variants.
pub mod committer;
/// Configuration options and settings for write jobs.
pub mod config;
/// Error types and result definitions for sink operations.
pub mod error;
/// The data-sink boundary: output formats and writer handles.
pub mod format;
/// Row and value model consumed at the sink boundary.
pub mod row;
/// Write session: identities, setup and the commit/abort surface.
pub mod session;
/// Memory-bounded external sorter used by the sort-phase write path.
pub mod sorter;
/// Writer strategies and key routing.
pub mod writer;

pub use config::WriteConfig;
pub use error::{Result, SinkError};
pub use format::{JsonLineFormat, OutputFormat, RowWriter};
pub use row::{batch_stream, Row, RowBatch, RowBatchStream, Value};
pub use session::{JobIdentity, TaskIdentity, WriteSession};
pub use writer::{
    BucketSpec, OutputFile, PartitionedWriter, SingleFileWriter, WriteDescription,
    WriteSummary,
};
