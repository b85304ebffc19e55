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

//! Data-sink boundary: the output format and its writer handles.
//!
//! The physical byte layout of output files belongs to the format, not to
//! the write engine. The engine only opens handles, feeds them one row at a
//! time and closes them.

use std::fmt::Debug;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::config::WriteConfig;
use crate::error::{Result, SinkError};
use crate::row::Row;

/// An open output file accepting one row at a time.
///
/// `close` must be idempotent: the error paths of the write engine may
/// close a handle that the commit path already closed.
pub trait RowWriter: Debug + Send {
    fn write(&mut self, row: &Row) -> Result<()>;

    /// Flush and close the underlying file. Calling `close` twice is a no-op.
    fn close(&mut self) -> Result<()>;
}

/// An output format: the factory for writer handles plus a job-preparation
/// hook that runs on the driver before the committer is resolved.
pub trait OutputFormat: Debug + Send + Sync {
    /// File extension for output files of this format, without the dot.
    fn file_extension(&self) -> &str;

    /// Driver-side job preparation. May decorate the configuration; runs
    /// before committer resolution so committer construction can read
    /// settings published here.
    fn prepare_job(&self, _config: &mut WriteConfig) -> Result<()> {
        Ok(())
    }

    /// Open a writer handle at the given path. The file must not already
    /// exist; a pre-existing file surfaces as an `AlreadyExists` I/O error.
    fn open_writer(&self, path: &Path) -> Result<Box<dyn RowWriter>>;
}

/// Newline-delimited JSON output, one row per line.
#[derive(Debug, Default)]
pub struct JsonLineFormat;

impl OutputFormat for JsonLineFormat {
    fn file_extension(&self) -> &str {
        "jsonl"
    }

    fn open_writer(&self, path: &Path) -> Result<Box<dyn RowWriter>> {
        let file = File::options().write(true).create_new(true).open(path)?;
        Ok(Box::new(JsonLineWriter {
            out: Some(BufWriter::new(file)),
        }))
    }
}

#[derive(Debug)]
struct JsonLineWriter {
    out: Option<BufWriter<File>>,
}

impl RowWriter for JsonLineWriter {
    fn write(&mut self, row: &Row) -> Result<()> {
        let Some(out) = self.out.as_mut() else {
            return Err(SinkError::Internal(
                "write on a closed writer handle".to_owned(),
            ));
        };
        serde_json::to_writer(&mut *out, row)?;
        out.write_all(b"\n")?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut out) = self.out.take() {
            out.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Value;
    use std::io::ErrorKind;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_close() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.jsonl");

        let format = JsonLineFormat;
        let mut writer = format.open_writer(&path)?;
        writer.write(&Row::new(vec![Value::Int64(1), Value::Utf8("a".to_owned())]))?;
        writer.write(&Row::new(vec![Value::Int64(2), Value::Null]))?;
        writer.close()?;
        // second close is a no-op
        writer.close()?;

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        Ok(())
    }

    #[test]
    fn test_existing_file_surfaces_already_exists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.jsonl");
        std::fs::write(&path, b"leftover").unwrap();

        let format = JsonLineFormat;
        match format.open_writer(&path) {
            Err(crate::error::SinkError::IoError(e)) => {
                assert_eq!(e.kind(), ErrorKind::AlreadyExists)
            }
            other => panic!("expected AlreadyExists, got {other:?}"),
        }
    }
}
