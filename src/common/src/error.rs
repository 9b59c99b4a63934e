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

use thiserror::Error;

/// A specialized Result type used throughout the storage core.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// The error taxonomy for the storage and transaction core. Every fallible core operation
/// resolves its `Result` to this type (or a narrower error that converts into it via `#[from]`).
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("primary key column '{0}' cannot be null")]
    NullPrimaryKey(String),

    #[error("primary key {0} already exists")]
    DuplicatePrimaryKey(String),

    #[error("primary key {0} does not exist")]
    PrimaryKeyNotFound(String),

    #[error("write-write conflict: row {row_idx} was already modified by transaction {other_txn}")]
    WriteWriteConflict { row_idx: u64, other_txn: u64 },

    #[error("only one write transaction is allowed at a time unless enable_multi_writes is set")]
    TooManyWriteTransactions,

    #[error("timed out waiting {waited_micros}us for active transactions to leave before checkpointing")]
    CheckpointTimeout { waited_micros: u64 },

    #[error("database is open read-only")]
    ReadOnly,

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("table '{0}' not found")]
    TableNotFound(String),

    #[error("table '{0}' already exists")]
    TableAlreadyExists(String),

    #[error("column '{0}' not found")]
    ColumnNotFound(String),

    #[error("value does not match the declared column type: {0}")]
    TypeMismatch(String),

    #[error("on-disk corruption detected: {0}")]
    Corruption(String),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("buffer pool exhausted")]
    BufferPoolExhausted,

    #[error("duplicate configuration key '{0}'")]
    DuplicateConfigKey(String),

    #[error("unknown configuration key '{0}'")]
    UnknownConfigKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] toml::de::Error),
}
