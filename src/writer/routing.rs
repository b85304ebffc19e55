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

//! Key routing: partition path construction, bucket hashing and the
//! routing-equality rules shared by the hash phase and the sort fallback.

use serde::{Deserialize, Serialize};

use crate::row::{Row, Value};
use crate::sorter::SpillKey;
use crate::writer::{BucketSpec, WriteDescription};

/// Seed for the bucket hash. Changing it reshuffles every bucketed table,
/// so it is part of the on-disk contract.
const BUCKET_HASH_SEED: u64 = 0x9e37_79b9_7f4a_7c15;

/// Determines which physical file a row belongs to: the partition-column
/// values in declared order, plus the bucket id when bucketing is
/// configured. Sort-column values never participate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoutingKey {
    pub partition_values: Vec<Value>,
    pub bucket_id: Option<u32>,
}

/// Routing key for one row under the given description.
pub fn routing_key(row: &Row, description: &WriteDescription) -> RoutingKey {
    RoutingKey {
        partition_values: description
            .partition_columns
            .iter()
            .map(|(_, index)| row.value(*index).clone())
            .collect(),
        bucket_id: description.bucket_spec.as_ref().map(|spec| bucket_id(row, spec)),
    }
}

/// Spill-ordering key for one row: the routing key plus the sort-column
/// values.
pub fn spill_key(row: &Row, description: &WriteDescription) -> SpillKey {
    SpillKey::new(
        routing_key(row, description),
        row.project(&description.sort_column_indices),
    )
}

/// Bucket id for one row: a seeded multiplicative hash over the bucket
/// columns, reduced modulo the bucket count. Stable across processes and
/// independent of execution order.
pub fn bucket_id(row: &Row, spec: &BucketSpec) -> u32 {
    let mut h = BUCKET_HASH_SEED;
    for index in &spec.column_indices {
        h = h.wrapping_mul(31).wrapping_add(row.value(*index).stable_hash());
    }
    (h % u64::from(spec.num_buckets)) as u32
}

/// Build the partition directory path for one routing key:
/// `name=value` segments in declared column order, joined by `/`.
///
/// Values are escaped so the result is safe as path segments; null (and
/// empty) values render as the configured default partition name literal.
pub fn partition_path(
    partition_columns: &[(String, usize)],
    partition_values: &[Value],
    default_partition_name: &str,
) -> String {
    partition_columns
        .iter()
        .zip(partition_values)
        .map(|((name, _), value)| {
            let rendered = match value.to_partition_string() {
                Some(v) if !v.is_empty() => escape_path_name(&v),
                _ => default_partition_name.to_owned(),
            };
            format!("{}={}", escape_path_name(name), rendered)
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Percent-escape a string so it is safe as a single path segment.
pub fn escape_path_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        if needs_escaping(c) {
            // the escapable set is all ASCII, one byte per char
            escaped.push('%');
            escaped.push_str(&format!("{:02X}", c as u32));
        } else {
            escaped.push(c);
        }
    }
    escaped
}

fn needs_escaping(c: char) -> bool {
    c < '\u{20}'
        || c == '\u{7F}'
        || matches!(
            c,
            '"' | '#' | '%' | '\'' | '*' | '/' | ':' | '=' | '?' | '\\' | '{' | '[' | ']'
                | '^'
        )
}
