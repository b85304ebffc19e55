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

//! End-to-end write-and-commit scenarios over a local filesystem.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use kestrel_sink::config::{
    KESTREL_SINK_DEFAULT_PARTITION_NAME, KESTREL_SINK_MAX_OPEN_FILES,
    KESTREL_SINK_SPECULATION,
};
use kestrel_sink::{
    batch_stream, JsonLineFormat, PartitionedWriter, Result, Row, SingleFileWriter,
    Value, WriteConfig, WriteDescription, WriteSession,
};

fn driver_session(out: &TempDir, settings: &[(&str, &str)]) -> WriteSession {
    let mut config = WriteConfig::new(out.path().to_string_lossy().into_owned());
    for (key, value) in settings {
        config.set(key, value).unwrap();
    }
    let mut driver = WriteSession::new(Arc::new(JsonLineFormat), config);
    driver.driver_side_setup(0).unwrap();
    driver
}

fn worker_session(driver: &WriteSession, partition: usize, attempt: usize) -> WriteSession {
    let mut worker = WriteSession::new(Arc::new(JsonLineFormat), driver.config().clone());
    worker.executor_side_setup(1, partition, attempt).unwrap();
    worker
}

/// Files visible outside the staging area, sorted.
fn visible_files(root: &Path) -> Vec<PathBuf> {
    fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
        for entry in std::fs::read_dir(dir).unwrap().flatten() {
            let path = entry.path();
            if entry.file_name().to_string_lossy() == "_temporary" {
                continue;
            }
            if path.is_dir() {
                walk(&path, out);
            } else {
                out.push(path);
            }
        }
    }
    let mut files = Vec::new();
    walk(root, &mut files);
    files.sort();
    files
}

fn row2(partition: Value, payload: i64) -> Row {
    Row::new(vec![partition, Value::Int64(payload)])
}

// Scenario A: no partition columns, no bucketing -> all rows land in
// exactly one output file for the task.
#[tokio::test]
async fn scenario_a_single_file_per_task() -> Result<()> {
    let out = TempDir::new().unwrap();
    let mut driver = driver_session(&out, &[]);
    let mut worker = worker_session(&driver, 0, 0);

    let batches = vec![
        vec![row2(Value::Utf8("x".to_owned()), 1), row2(Value::Null, 2)],
        vec![row2(Value::Utf8("y".to_owned()), 3)],
    ];
    let summary = SingleFileWriter::new(&mut worker)
        .write_rows(batch_stream(batches))
        .await?;
    driver.commit_job()?;

    assert_eq!(summary.num_files(), 1);
    assert_eq!(summary.num_rows(), 3);

    let files = visible_files(out.path());
    assert_eq!(files.len(), 1);
    let contents = std::fs::read_to_string(&files[0]).unwrap();
    assert_eq!(contents.lines().count(), 3);
    Ok(())
}

// Scenario B: one partition column with values {"a","a","b",null} and a
// configured default partition name -> four rows route to three files named
// col=a, col=b, col=__HIVE_DEFAULT_PARTITION__.
#[tokio::test]
async fn scenario_b_null_partition_uses_default_name() -> Result<()> {
    let out = TempDir::new().unwrap();
    let mut driver = driver_session(
        &out,
        &[(KESTREL_SINK_DEFAULT_PARTITION_NAME, "__HIVE_DEFAULT_PARTITION__")],
    );
    let mut worker = worker_session(&driver, 0, 0);

    let rows = vec![
        row2(Value::Utf8("a".to_owned()), 1),
        row2(Value::Utf8("a".to_owned()), 2),
        row2(Value::Utf8("b".to_owned()), 3),
        row2(Value::Null, 4),
    ];
    let description = WriteDescription::partitioned_by(vec![("col".to_owned(), 0)]);
    let summary = PartitionedWriter::new(&mut worker, description)
        .write_rows(batch_stream(vec![rows]))
        .await?;
    driver.commit_job()?;

    assert_eq!(summary.num_files(), 3);
    assert_eq!(summary.num_rows(), 4);

    let files = visible_files(out.path());
    assert_eq!(files.len(), 3);
    let dirs: Vec<String> = files
        .iter()
        .map(|p| {
            p.parent()
                .unwrap()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    assert!(dirs.contains(&"col=a".to_owned()));
    assert!(dirs.contains(&"col=b".to_owned()));
    assert!(dirs.contains(&"col=__HIVE_DEFAULT_PARTITION__".to_owned()));

    let a_file = files
        .iter()
        .find(|p| p.to_string_lossy().contains("col=a"))
        .unwrap();
    let contents = std::fs::read_to_string(a_file).unwrap();
    assert_eq!(contents.lines().count(), 2);
    Ok(())
}

// Scenario C: maxOpenFiles=2 and three distinct keys arriving A,B,C,A,B,C:
// the third key triggers the sort fallback and the final output still
// groups all rows per key into one file each.
#[tokio::test]
async fn scenario_c_overflow_still_groups_per_key() -> Result<()> {
    let out = TempDir::new().unwrap();
    let mut driver = driver_session(&out, &[(KESTREL_SINK_MAX_OPEN_FILES, "2")]);
    let mut worker = worker_session(&driver, 0, 0);

    let keys = ["a", "b", "c", "a", "b", "c"];
    let rows: Vec<Row> = keys
        .iter()
        .enumerate()
        .map(|(i, k)| row2(Value::Utf8((*k).to_owned()), i as i64))
        .collect();
    let description = WriteDescription::partitioned_by(vec![("col".to_owned(), 0)]);
    let summary = PartitionedWriter::new(&mut worker, description)
        .write_rows(batch_stream(vec![rows]))
        .await?;
    driver.commit_job()?;

    assert_eq!(summary.num_files(), 3);
    assert_eq!(summary.num_rows(), 6);

    let files = visible_files(out.path());
    assert_eq!(files.len(), 3, "one file per key, never two");
    for file in &files {
        let contents = std::fs::read_to_string(file).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
    Ok(())
}

// Scenario D: two attempts for the same partition both finish writing and
// both call commit -> exactly one output is visible after job commit, and
// the loser's output is discarded on abort.
#[tokio::test]
async fn scenario_d_speculative_duplicate_commits_once() -> Result<()> {
    let out = TempDir::new().unwrap();
    let mut driver = driver_session(&out, &[(KESTREL_SINK_SPECULATION, "true")]);

    // both attempts are set up before either commits
    let mut first = worker_session(&driver, 0, 0);
    let mut second = worker_session(&driver, 0, 1);

    let payload = |marker: i64| vec![vec![row2(Value::Utf8("k".to_owned()), marker)]];

    SingleFileWriter::new(&mut first)
        .write_rows(batch_stream(payload(1)))
        .await?;

    let denied = SingleFileWriter::new(&mut second)
        .write_rows(batch_stream(payload(2)))
        .await
        .unwrap_err();
    assert!(denied.is_commit_denied());
    second.abort_task()?;

    driver.commit_job()?;

    let files = visible_files(out.path());
    assert_eq!(files.len(), 1, "exactly one attempt's output is visible");
    let contents = std::fs::read_to_string(&files[0]).unwrap();
    // the winner's marker, not the loser's
    assert!(contents.contains("\"Int64\":1"));
    assert!(!out.path().join("_temporary").exists());
    Ok(())
}

// A full job: several partitions' tasks commit, one failed task aborts and
// retries, then job commit publishes everything at once.
#[tokio::test]
async fn multi_task_job_with_retry() -> Result<()> {
    let out = TempDir::new().unwrap();
    let mut driver = driver_session(&out, &[]);
    let description = WriteDescription::partitioned_by(vec![("col".to_owned(), 0)]);

    for partition in 0..3usize {
        let rows = vec![
            row2(Value::Utf8("a".to_owned()), partition as i64),
            row2(Value::Utf8("b".to_owned()), partition as i64),
        ];

        if partition == 1 {
            // first attempt dies mid-stream, a second attempt replaces it
            let mut worker = worker_session(&driver, partition, 0);
            let failing: kestrel_sink::RowBatchStream =
                Box::pin(futures::stream::iter(vec![
                    Ok(rows.clone()),
                    Err(kestrel_sink::SinkError::General("executor lost".to_owned())),
                ]));
            let err = PartitionedWriter::new(&mut worker, description.clone())
                .write_rows(failing)
                .await
                .unwrap_err();
            assert!(matches!(err, kestrel_sink::SinkError::TaskWriteFailed(_, _)));

            let mut retry = worker_session(&driver, partition, 1);
            PartitionedWriter::new(&mut retry, description.clone())
                .write_rows(batch_stream(vec![rows]))
                .await?;
        } else {
            let mut worker = worker_session(&driver, partition, 0);
            PartitionedWriter::new(&mut worker, description.clone())
                .write_rows(batch_stream(vec![rows]))
                .await?;
        }
    }

    driver.commit_job()?;

    // one file per (partition column value, task partition)
    let files = visible_files(out.path());
    assert_eq!(files.len(), 6);
    let total_rows: usize = files
        .iter()
        .map(|f| std::fs::read_to_string(f).unwrap().lines().count())
        .sum();
    assert_eq!(total_rows, 6);
    assert!(!out.path().join("_temporary").exists());
    Ok(())
}

// Aborting the whole job leaves no partially-visible output.
#[tokio::test]
async fn job_abort_leaves_no_output() -> Result<()> {
    let out = TempDir::new().unwrap();
    let mut driver = driver_session(&out, &[]);
    let mut worker = worker_session(&driver, 0, 0);

    SingleFileWriter::new(&mut worker)
        .write_rows(batch_stream(vec![vec![row2(Value::Null, 1)]]))
        .await?;

    driver.abort_job()?;
    assert!(visible_files(out.path()).is_empty());
    Ok(())
}

// Partition values containing the path separator are escaped into a single
// path segment.
#[tokio::test]
async fn partition_value_with_separator_is_escaped() -> Result<()> {
    let out = TempDir::new().unwrap();
    let mut driver = driver_session(&out, &[]);
    let mut worker = worker_session(&driver, 0, 0);

    let rows = vec![row2(Value::Utf8("2026/08/07".to_owned()), 1)];
    let description = WriteDescription::partitioned_by(vec![("day".to_owned(), 0)]);
    PartitionedWriter::new(&mut worker, description)
        .write_rows(batch_stream(vec![rows]))
        .await?;
    driver.commit_job()?;

    let files = visible_files(out.path());
    assert_eq!(files.len(), 1);
    let dir = files[0].parent().unwrap().file_name().unwrap().to_string_lossy().into_owned();
    assert_eq!(dir, "day=2026%2F08%2F07");
    Ok(())
}
