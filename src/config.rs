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

//! Write job configuration
//!
//! The configuration is resolved once on the driver, then serialized and
//! shared read-only with every worker. Workers rebuild an attempt-scoped
//! view of it per task attempt but never mutate the job-scope settings.

use std::collections::HashMap;
use std::result;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SinkError};
use crate::session::TaskIdentity;

/// Committer variant override; see the selection policy in
/// [`crate::committer::resolve_committer`].
pub const KESTREL_SINK_OUTPUT_COMMITTER: &str = "kestrel.sink.output.committer";
/// Whether speculative task execution is enabled for this write job.
pub const KESTREL_SINK_SPECULATION: &str = "kestrel.sink.speculation.enabled";
/// Whether output is appended into an existing directory.
pub const KESTREL_SINK_APPEND: &str = "kestrel.sink.append.mode";
/// Hash-phase capacity: maximum concurrently open output files per task.
pub const KESTREL_SINK_MAX_OPEN_FILES: &str = "kestrel.sink.max.open.files";
/// Literal used for null partition values in partition path segments.
pub const KESTREL_SINK_DEFAULT_PARTITION_NAME: &str =
    "kestrel.sink.default.partition.name";
/// Number of rows the spill sorter buffers in memory before writing a run.
pub const KESTREL_SINK_SPILL_BUFFER_ROWS: &str = "kestrel.sink.spill.buffer.rows";
/// Collision-avoidance token embedded in every output file name. Published
/// by driver-side setup; never set by users.
pub const KESTREL_SINK_WRITE_UUID: &str = "kestrel.sink.write.uuid";
/// Job sequence number assigned by the driver.
pub const KESTREL_SINK_JOB_SEQUENCE: &str = "kestrel.sink.job.sequence";
/// Job creation timestamp ordinal assigned by the driver.
pub const KESTREL_SINK_JOB_TIMESTAMP: &str = "kestrel.sink.job.timestamp";

/// Prefix for attempt-scoped keys added by executor-side setup.
const TASK_SCOPE_PREFIX: &str = "kestrel.sink.task.";

pub type ParseResult<T> = result::Result<T, String>;

/// Value type expected for a configuration option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptionType {
    Boolean,
    UInt,
    Text,
}

static CONFIG_ENTRIES: LazyLock<HashMap<String, ConfigEntry>> = LazyLock::new(|| {
    let entries = vec![
        ConfigEntry::new(
            KESTREL_SINK_OUTPUT_COMMITTER.to_string(),
            "Committer variant to use when neither append mode nor speculation forces the default"
                .to_string(),
            OptionType::Text,
            None,
        ),
        ConfigEntry::new(
            KESTREL_SINK_SPECULATION.to_string(),
            "Whether speculative task execution is enabled".to_string(),
            OptionType::Boolean,
            Some("false".to_string()),
        ),
        ConfigEntry::new(
            KESTREL_SINK_APPEND.to_string(),
            "Whether output is appended into an existing directory".to_string(),
            OptionType::Boolean,
            Some("false".to_string()),
        ),
        ConfigEntry::new(
            KESTREL_SINK_MAX_OPEN_FILES.to_string(),
            "Maximum concurrently open output files per task before falling back to a sorted single pass"
                .to_string(),
            OptionType::UInt,
            Some("100".to_string()),
        ),
        ConfigEntry::new(
            KESTREL_SINK_DEFAULT_PARTITION_NAME.to_string(),
            "Partition path literal used for null partition values".to_string(),
            OptionType::Text,
            Some("__DEFAULT_PARTITION__".to_string()),
        ),
        ConfigEntry::new(
            KESTREL_SINK_SPILL_BUFFER_ROWS.to_string(),
            "Rows buffered in memory by the spill sorter before a run is written to disk"
                .to_string(),
            OptionType::UInt,
            Some("8192".to_string()),
        ),
        ConfigEntry::new(
            KESTREL_SINK_WRITE_UUID.to_string(),
            "Unique write job token embedded in output file names".to_string(),
            OptionType::Text,
            None,
        ),
        ConfigEntry::new(
            KESTREL_SINK_JOB_SEQUENCE.to_string(),
            "Job sequence number assigned by the driver".to_string(),
            OptionType::UInt,
            None,
        ),
        ConfigEntry::new(
            KESTREL_SINK_JOB_TIMESTAMP.to_string(),
            "Job creation timestamp ordinal assigned by the driver".to_string(),
            OptionType::Text,
            None,
        ),
    ];
    entries
        .into_iter()
        .map(|e| (e.name.clone(), e))
        .collect::<HashMap<_, _>>()
});

/// Configuration option meta-data
#[derive(Debug, Clone)]
struct ConfigEntry {
    name: String,
    #[allow(dead_code)]
    description: String,
    option_type: OptionType,
    default_value: Option<String>,
}

impl ConfigEntry {
    fn new(
        name: String,
        description: String,
        option_type: OptionType,
        default_value: Option<String>,
    ) -> Self {
        Self {
            name,
            description,
            option_type,
            default_value,
        }
    }
}

/// Write job configuration: the output root plus validated string settings.
///
/// Frozen by driver-side setup and shared read-only with every worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteConfig {
    /// Root of the final, visible output location
    output_path: String,
    /// Settings stored in a map for easy serde
    settings: HashMap<String, String>,
}

impl WriteConfig {
    /// Create a configuration for the given output root with default settings.
    pub fn new(output_path: impl Into<String>) -> Self {
        Self {
            output_path: output_path.into(),
            settings: HashMap::new(),
        }
    }

    /// Create a configuration from key-value pairs, validating every
    /// recognized key against its expected type.
    pub fn with_settings(
        output_path: impl Into<String>,
        settings: HashMap<String, String>,
    ) -> Result<Self> {
        for (name, value) in &settings {
            Self::validate(name, value)?;
        }
        Ok(Self {
            output_path: output_path.into(),
            settings,
        })
    }

    /// Set a single recognized option, validating the value.
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        Self::validate(name, value)?;
        self.settings.insert(name.to_owned(), value.to_owned());
        Ok(())
    }

    fn validate(name: &str, value: &str) -> Result<()> {
        if name.starts_with(TASK_SCOPE_PREFIX) {
            // attempt-scoped keys are free-form
            return Ok(());
        }
        let entry = CONFIG_ENTRIES.get(name).ok_or_else(|| {
            SinkError::Configuration(format!("unknown configuration setting '{name}'"))
        })?;
        Self::parse_value(value, entry.option_type).map_err(|e| {
            SinkError::Configuration(format!(
                "failed to parse value '{value}' for configuration setting '{name}': {e}"
            ))
        })
    }

    fn parse_value(val: &str, option_type: OptionType) -> ParseResult<()> {
        match option_type {
            OptionType::UInt => {
                val.parse::<usize>().map_err(|e| format!("{e:?}"))?;
            }
            OptionType::Boolean => {
                val.parse::<bool>().map_err(|e| format!("{e:?}"))?;
            }
            OptionType::Text => {}
        }
        Ok(())
    }

    /// Root of the final, visible output location.
    pub fn output_path(&self) -> &str {
        &self.output_path
    }

    pub fn settings(&self) -> &HashMap<String, String> {
        &self.settings
    }

    pub fn is_append_mode(&self) -> bool {
        self.get_bool_setting(KESTREL_SINK_APPEND)
    }

    pub fn speculation_enabled(&self) -> bool {
        self.get_bool_setting(KESTREL_SINK_SPECULATION)
    }

    /// User committer override, if one was configured.
    pub fn committer_override(&self) -> Option<&str> {
        self.settings
            .get(KESTREL_SINK_OUTPUT_COMMITTER)
            .map(|s| s.as_str())
    }

    pub fn max_open_files(&self) -> usize {
        self.get_usize_setting(KESTREL_SINK_MAX_OPEN_FILES)
    }

    pub fn default_partition_name(&self) -> &str {
        self.settings
            .get(KESTREL_SINK_DEFAULT_PARTITION_NAME)
            .map(|s| s.as_str())
            .unwrap_or_else(|| {
                // infallible because the entry declares a default
                CONFIG_ENTRIES
                    .get(KESTREL_SINK_DEFAULT_PARTITION_NAME)
                    .unwrap()
                    .default_value
                    .as_ref()
                    .unwrap()
            })
    }

    pub fn spill_buffer_rows(&self) -> usize {
        self.get_usize_setting(KESTREL_SINK_SPILL_BUFFER_ROWS)
    }

    /// The write job token published by driver-side setup, or `None` if this
    /// configuration has not been through driver-side setup yet.
    pub fn write_uuid(&self) -> Option<&str> {
        self.settings
            .get(KESTREL_SINK_WRITE_UUID)
            .map(|s| s.as_str())
    }

    pub fn job_sequence(&self) -> Option<u64> {
        self.settings
            .get(KESTREL_SINK_JOB_SEQUENCE)
            .and_then(|s| s.parse().ok())
    }

    pub fn job_timestamp(&self) -> Option<&str> {
        self.settings
            .get(KESTREL_SINK_JOB_TIMESTAMP)
            .map(|s| s.as_str())
    }

    /// Rebuild an attempt-scoped view of this configuration for one task
    /// attempt. Job-scope settings are carried over untouched; the task id,
    /// partition index, attempt number and map-task flag are added under
    /// attempt-scoped keys.
    pub fn attempt_scoped(&self, task: &TaskIdentity) -> WriteConfig {
        let mut settings = self.settings.clone();
        settings.insert(format!("{TASK_SCOPE_PREFIX}id"), task.attempt_ordinal());
        settings.insert(
            format!("{TASK_SCOPE_PREFIX}stage"),
            task.stage_id.to_string(),
        );
        settings.insert(
            format!("{TASK_SCOPE_PREFIX}partition"),
            task.partition.to_string(),
        );
        settings.insert(
            format!("{TASK_SCOPE_PREFIX}attempt"),
            task.attempt.to_string(),
        );
        settings.insert(format!("{TASK_SCOPE_PREFIX}is.map"), "true".to_string());
        WriteConfig {
            output_path: self.output_path.clone(),
            settings,
        }
    }

    fn get_usize_setting(&self, key: &str) -> usize {
        if let Some(v) = self.settings.get(key) {
            // infallible because we validate all configs on insertion
            v.parse().unwrap()
        } else {
            // infallible because we validate all defaults at declaration
            let v = CONFIG_ENTRIES.get(key).unwrap().default_value.as_ref().unwrap();
            v.parse().unwrap()
        }
    }

    fn get_bool_setting(&self, key: &str) -> bool {
        if let Some(v) = self.settings.get(key) {
            v.parse::<bool>().unwrap()
        } else {
            let v = CONFIG_ENTRIES.get(key).unwrap().default_value.as_ref().unwrap();
            v.parse::<bool>().unwrap()
        }
    }
}
