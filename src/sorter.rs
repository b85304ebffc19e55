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

//! Memory-bounded external sorter for the sort-phase write path.
//!
//! Rows are buffered in memory up to a row budget; each full buffer is
//! sorted and written to disk as one run. Reading the sorted sequence
//! merges the final in-memory buffer with all runs through a k-way heap
//! merge. The sequence is lazy and single-pass: it cannot be restarted.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::row::{Row, Value};
use crate::writer::routing::RoutingKey;

/// Ordering key for spilled rows: the routing key, then the sort-column
/// values. Sort-column values order rows within one output file and never
/// influence which file a row lands in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpillKey {
    pub routing: RoutingKey,
    pub sort_values: Vec<Value>,
}

impl SpillKey {
    pub fn new(routing: RoutingKey, sort_values: Vec<Value>) -> Self {
        Self {
            routing,
            sort_values,
        }
    }

    /// Routing equality: partition values and bucket id only.
    pub fn routing_equal(&self, other: &SpillKey) -> bool {
        self.routing == other.routing
    }
}

/// Accepts `(key, row)` pairs, spilling sorted runs to disk under a bounded
/// in-memory row budget.
pub struct SpillSorter {
    spill_dir: PathBuf,
    buffer: Vec<(SpillKey, Row)>,
    buffer_limit: usize,
    runs: Vec<PathBuf>,
    inserted_rows: u64,
    /// Ownership of the spill dir was handed to a [`SortedSequence`].
    released: bool,
}

impl SpillSorter {
    /// Create a sorter spilling into `spill_dir` (created if missing),
    /// buffering at most `buffer_limit` rows in memory.
    pub fn try_new(spill_dir: PathBuf, buffer_limit: usize) -> Result<Self> {
        std::fs::create_dir_all(&spill_dir)?;
        Ok(Self {
            spill_dir,
            buffer: Vec::new(),
            buffer_limit: buffer_limit.max(1),
            runs: Vec::new(),
            inserted_rows: 0,
            released: false,
        })
    }

    pub fn insert(&mut self, key: SpillKey, row: Row) -> Result<()> {
        self.buffer.push((key, row));
        self.inserted_rows += 1;
        if self.buffer.len() >= self.buffer_limit {
            self.spill_run()?;
        }
        Ok(())
    }

    pub fn inserted_rows(&self) -> u64 {
        self.inserted_rows
    }

    pub fn spilled_runs(&self) -> usize {
        self.runs.len()
    }

    fn spill_run(&mut self) -> Result<()> {
        // stable sort keeps arrival order for equal keys
        self.buffer.sort_by(|a, b| a.0.cmp(&b.0));

        let path = self.spill_dir.join(format!("run-{}.jsonl", self.runs.len()));
        debug!("spilling {} rows to {path:?}", self.buffer.len());

        let file = File::create(&path)?;
        let mut out = BufWriter::new(file);
        for pair in self.buffer.drain(..) {
            serde_json::to_writer(&mut out, &pair)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;

        self.runs.push(path);
        Ok(())
    }

    /// Consume the sorter and produce the globally key-ordered sequence of
    /// `(key, row)` pairs. Lazy, single-pass, not restartable.
    pub fn sorted_sequence(mut self) -> Result<SortedSequence> {
        self.buffer.sort_by(|a, b| a.0.cmp(&b.0));

        let mut sources = Vec::with_capacity(self.runs.len() + 1);
        sources.push(RunSource::Memory(
            std::mem::take(&mut self.buffer).into_iter(),
        ));
        for path in &self.runs {
            let file = File::open(path)?;
            sources.push(RunSource::File(BufReader::new(file)));
        }

        let mut heap = BinaryHeap::with_capacity(sources.len());
        for (index, source) in sources.iter_mut().enumerate() {
            if let Some((key, row)) = source.next_pair()? {
                heap.push(Reverse(HeapItem { key, row, index }));
            }
        }

        self.released = true;
        Ok(SortedSequence {
            spill_dir: std::mem::take(&mut self.spill_dir),
            sources,
            heap,
        })
    }
}

impl Drop for SpillSorter {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Best-effort cleanup when the sorter is dropped on an abort path
        if let Err(e) = std::fs::remove_dir_all(&self.spill_dir) {
            debug!("failed to clean up spill dir {:?}: {e:?}", self.spill_dir);
        }
    }
}

enum RunSource {
    Memory(std::vec::IntoIter<(SpillKey, Row)>),
    File(BufReader<File>),
}

impl RunSource {
    fn next_pair(&mut self) -> Result<Option<(SpillKey, Row)>> {
        match self {
            RunSource::Memory(iter) => Ok(iter.next()),
            RunSource::File(reader) => {
                let mut line = String::new();
                if reader.read_line(&mut line)? == 0 {
                    return Ok(None);
                }
                let pair = serde_json::from_str(line.trim_end())?;
                Ok(Some(pair))
            }
        }
    }
}

struct HeapItem {
    key: SpillKey,
    row: Row,
    index: usize,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.index == other.index
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // tie-break on source index so merge order is deterministic
        self.key
            .cmp(&other.key)
            .then_with(|| self.index.cmp(&other.index))
    }
}

/// Lazy key-ordered sequence over the sorter's buffered and spilled rows.
pub struct SortedSequence {
    spill_dir: PathBuf,
    sources: Vec<RunSource>,
    heap: BinaryHeap<Reverse<HeapItem>>,
}

impl Iterator for SortedSequence {
    type Item = Result<(SpillKey, Row)>;

    fn next(&mut self) -> Option<Self::Item> {
        let Reverse(item) = self.heap.pop()?;
        match self.sources[item.index].next_pair() {
            Ok(Some((key, row))) => self.heap.push(Reverse(HeapItem {
                key,
                row,
                index: item.index,
            })),
            Ok(None) => {}
            // the task aborts on any read error, so dropping the popped
            // row here is fine
            Err(e) => return Some(Err(e)),
        }
        Some(Ok((item.key, item.row)))
    }
}

impl Drop for SortedSequence {
    fn drop(&mut self) {
        self.sources.clear();
        if let Err(e) = std::fs::remove_dir_all(&self.spill_dir) {
            debug!("failed to clean up spill dir {:?}: {e:?}", self.spill_dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Value;
    use tempfile::TempDir;

    fn key(partition: &str, sort: i64) -> SpillKey {
        SpillKey::new(
            RoutingKey {
                partition_values: vec![Value::Utf8(partition.to_owned())],
                bucket_id: None,
            },
            vec![Value::Int64(sort)],
        )
    }

    fn row(v: i64) -> Row {
        Row::new(vec![Value::Int64(v)])
    }

    #[test]
    fn test_in_memory_sort() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let mut sorter = SpillSorter::try_new(dir.path().join("spill"), 100)?;
        sorter.insert(key("b", 1), row(1))?;
        sorter.insert(key("a", 2), row(2))?;
        sorter.insert(key("a", 1), row(3))?;

        assert_eq!(sorter.spilled_runs(), 0);
        let keys: Vec<_> = sorter
            .sorted_sequence()?
            .map(|r| r.unwrap().0)
            .collect();
        assert_eq!(keys, vec![key("a", 1), key("a", 2), key("b", 1)]);
        Ok(())
    }

    #[test]
    fn test_spilled_runs_merge_globally_ordered() -> Result<()> {
        let dir = TempDir::new().unwrap();
        // tiny budget so nearly every insert spills a run
        let mut sorter = SpillSorter::try_new(dir.path().join("spill"), 2)?;
        for (p, s) in [("c", 1), ("a", 3), ("b", 1), ("a", 1), ("b", 2), ("a", 2)] {
            sorter.insert(key(p, s), row(s))?;
        }
        assert!(sorter.spilled_runs() >= 2);
        assert_eq!(sorter.inserted_rows(), 6);

        let keys: Vec<_> = sorter
            .sorted_sequence()?
            .map(|r| r.unwrap().0)
            .collect();
        let mut expected = keys.clone();
        expected.sort();
        assert_eq!(keys, expected);
        assert_eq!(keys.len(), 6);
        Ok(())
    }

    #[test]
    fn test_rows_for_one_routing_key_are_contiguous() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let mut sorter = SpillSorter::try_new(dir.path().join("spill"), 3)?;
        for (p, s) in [("b", 2), ("a", 9), ("b", 1), ("a", 5), ("b", 3)] {
            sorter.insert(key(p, s), row(s))?;
        }

        let mut seen = Vec::new();
        for item in sorter.sorted_sequence()? {
            let (k, _) = item?;
            if seen.last() != Some(&k.routing) {
                seen.push(k.routing.clone());
            }
        }
        // every routing key appears exactly once in the transition list
        assert_eq!(seen.len(), 2);
        Ok(())
    }

    #[test]
    fn test_spill_dir_removed_after_sequence_drop() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let spill = dir.path().join("spill");
        let mut sorter = SpillSorter::try_new(spill.clone(), 1)?;
        sorter.insert(key("a", 1), row(1))?;
        let sequence = sorter.sorted_sequence()?;
        drop(sequence);
        assert!(!spill.exists());
        Ok(())
    }

    #[test]
    fn test_spill_dir_removed_when_sorter_dropped_unconsumed() -> Result<()> {
        let dir = TempDir::new().unwrap();
        let spill = dir.path().join("spill");
        let mut sorter = SpillSorter::try_new(spill.clone(), 1)?;
        sorter.insert(key("a", 1), row(1))?;
        drop(sorter);
        assert!(!spill.exists());
        Ok(())
    }
}
