// Copyright 2023 RisingWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
//! Runtime configuration is a closed set of named fields (no open-ended "set anything" map),
//! mirroring the upstream `DBConfig::getOptionByName` registry but as a compile-time struct.

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Define every configurable option once: field identifier, type and default.
///
/// This is the registry the upstream source keeps as a static array of
/// `(name, type, setter, getter)` tuples, replicated here as a macro so `DBConfig`,
/// its `Default` impl and the option-name list stay in sync by construction.
macro_rules! for_all_options {
    ($macro:ident) => {
        $macro! {
            { threads, usize, 4 },
            { enable_multi_writes, bool, false },
            { auto_checkpoint, bool, true },
            { checkpoint_threshold_bytes, u64, 16 * 1024 * 1024 },
            { force_checkpoint_on_close, bool, true },
            { enable_compression, bool, true },
            { buffer_pool_size_bytes, u64, 256 * 1024 * 1024 },
            { read_only, bool, false },
            { enable_spilling_to_disk, bool, false },
            { checkpoint_wait_timeout_micros, u64, 5_000_000 },
        }
    };
}

macro_rules! define_config_struct {
    ($({ $field:ident, $ty:ty, $default:expr },)*) => {
        #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
        #[serde(default)]
        pub struct DBConfig {
            $(pub $field: $ty,)*
            /// Present only so `max_db_size_bytes` (which has no sensible non-`Option` default)
            /// can be threaded through without another macro arm.
            pub max_db_size_bytes: Option<u64>,
        }

        impl Default for DBConfig {
            fn default() -> Self {
                DBConfig {
                    $($field: $default,)*
                    max_db_size_bytes: None,
                }
            }
        }
    };
}

macro_rules! define_option_names {
    ($({ $field:ident, $ty:ty, $default:expr },)*) => {
        /// Names recognized by the TOML loader, used to validate against typos and to detect
        /// duplicate assignments before `toml` silently folds them together.
        pub const CONFIG_OPTION_NAMES: &[&str] = &[
            $(stringify!($field),)*
            "max_db_size_bytes",
        ];
    };
}

for_all_options!(define_config_struct);
for_all_options!(define_option_names);

impl DBConfig {
    /// Parse a TOML configuration file, rejecting unknown keys and duplicate key assignment.
    ///
    /// The upstream source once let `S3EndPoint` silently land in `UnityCatalogToken`'s slot
    /// because nothing rejected the duplicate table key at config-construction time; this loader
    /// refuses that shape outright instead of trusting `serde`'s last-one-wins behavior.
    pub fn from_toml_str(source: &str) -> StorageResult<DBConfig> {
        let mut seen = std::collections::HashSet::new();
        for line in source.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('[') {
                continue;
            }
            let Some((key, _)) = trimmed.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if !CONFIG_OPTION_NAMES.contains(&key) {
                return Err(StorageError::UnknownConfigKey(key.to_string()));
            }
            if !seen.insert(key.to_string()) {
                return Err(StorageError::DuplicateConfigKey(key.to_string()));
            }
        }
        Ok(toml::from_str(source)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let cfg = DBConfig::default();
        let serialized = toml::to_string(&cfg).unwrap();
        let parsed = DBConfig::from_toml_str(&serialized).unwrap();
        assert_eq!(cfg, parsed);
    }

    #[test]
    fn rejects_duplicate_key() {
        let source = "threads = 4\nthreads = 8\n";
        let err = DBConfig::from_toml_str(source).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateConfigKey(_)));
    }

    #[test]
    fn rejects_unknown_key() {
        let source = "s3_end_point = \"https://example.com\"\n";
        let err = DBConfig::from_toml_str(source).unwrap_err();
        assert!(matches!(err, StorageError::UnknownConfigKey(_)));
    }

    #[test]
    fn overrides_single_field() {
        let source = "threads = 16\nenable_multi_writes = true\n";
        let cfg = DBConfig::from_toml_str(source).unwrap();
        assert_eq!(cfg.threads, 16);
        assert!(cfg.enable_multi_writes);
        assert!(cfg.auto_checkpoint);
    }
}
