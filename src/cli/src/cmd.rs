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

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};

use kuzu_common::types::{LogicalType, Value};
use kuzu_storage::catalog::ColumnDef;
use kuzu_storage::index::PkValue;
use kuzu_storage::transaction::TransactionType;
use kuzu_storage::{BoundInsert, BoundScan, Database};

#[derive(Subcommand)]
pub enum Cmd {
    /// Create a node table: `--schema id:int64,name:string --pk 0`.
    CreateTable(CreateTable),
    /// Insert one row: `--values 1,30`.
    Insert(Insert),
    /// Scan every visible row for the given columns.
    Scan(Scan),
    /// Delete the row with the given primary key.
    Delete(Delete),
    /// Count every visible row.
    Count(Count),
    /// Force a checkpoint, truncating the WAL.
    Checkpoint(Checkpoint),
}

impl Cmd {
    pub fn run(self, db: &Database) -> Result<()> {
        match self {
            Cmd::CreateTable(cmd) => cmd.run(db),
            Cmd::Insert(cmd) => cmd.run(db),
            Cmd::Scan(cmd) => cmd.run(db),
            Cmd::Delete(cmd) => cmd.run(db),
            Cmd::Count(cmd) => cmd.run(db),
            Cmd::Checkpoint(cmd) => cmd.run(db),
        }
    }
}

fn parse_logical_type(s: &str) -> Result<LogicalType> {
    match s {
        "bool" => Ok(LogicalType::Bool),
        "int64" => Ok(LogicalType::Int64),
        "double" => Ok(LogicalType::Double),
        "string" => Ok(LogicalType::String),
        other => Err(anyhow!("unknown column type '{other}' (want bool|int64|double|string)")),
    }
}

fn parse_schema(schema: &str) -> Result<Vec<ColumnDef>> {
    schema
        .split(',')
        .map(|col| {
            let (name, ty) = col
                .split_once(':')
                .ok_or_else(|| anyhow!("column '{col}' must be NAME:TYPE"))?;
            Ok(ColumnDef {
                name: name.to_string(),
                data_type: parse_logical_type(ty)?,
            })
        })
        .collect()
}

fn parse_value(raw: &str, data_type: LogicalType) -> Result<Value> {
    if raw == "null" {
        return Ok(Value::Null);
    }
    Ok(match data_type {
        LogicalType::Bool => Value::Bool(raw.parse().context("expected bool")?),
        LogicalType::Int64 => Value::Int64(raw.parse().context("expected int64")?),
        LogicalType::Double => Value::Double(raw.parse().context("expected double")?),
        LogicalType::String => Value::String(raw.to_string()),
        LogicalType::InternalId => return Err(anyhow!("internal id columns aren't CLI-settable")),
    })
}

fn parse_pk(raw: &str, data_type: LogicalType) -> Result<PkValue> {
    match data_type {
        LogicalType::Int64 => Ok(PkValue::Int64(raw.parse().context("expected int64 key")?)),
        LogicalType::String => Ok(PkValue::String(raw.to_string())),
        other => Err(anyhow!("{other:?} cannot be a primary key")),
    }
}

#[derive(Parser)]
pub struct CreateTable {
    table: String,
    #[arg(long)]
    schema: String,
    #[arg(long, default_value_t = 0)]
    pk: usize,
}

impl CreateTable {
    fn run(self, db: &Database) -> Result<()> {
        let columns = parse_schema(&self.schema)?;
        let txn = db.begin_transaction(TransactionType::Write)?;
        let table_id = db.create_node_table(&txn, &self.table, columns, self.pk)?;
        db.commit(txn)?;
        println!("created table '{}' (id {table_id})", self.table);
        Ok(())
    }
}

#[derive(Parser)]
pub struct Insert {
    table: String,
    /// Comma-separated values, one per column, in schema order.
    #[arg(long)]
    values: String,
}

impl Insert {
    fn run(self, db: &Database) -> Result<()> {
        let table_id = db.catalog().get_table_id_by_name(&self.table)?;
        let entry = db.catalog().get_table(table_id)?;
        let raw: Vec<&str> = self.values.split(',').collect();
        if raw.len() != entry.columns.len() {
            return Err(anyhow!(
                "expected {} values for table '{}', got {}",
                entry.columns.len(),
                self.table,
                raw.len()
            ));
        }
        let values: Vec<Vec<Value>> = raw
            .iter()
            .zip(&entry.columns)
            .map(|(v, col)| parse_value(v, col.data_type).map(|value| vec![value]))
            .collect::<Result<_>>()?;

        let txn = db.begin_transaction(TransactionType::Write)?;
        let offsets = db.insert(&txn, BoundInsert { table_id, values })?;
        db.commit(txn)?;
        println!("inserted row at offset {}", offsets[0]);
        Ok(())
    }
}

#[derive(Parser)]
pub struct Scan {
    table: String,
    /// Column names to project, defaults to every column.
    #[arg(long)]
    columns: Option<String>,
}

impl Scan {
    fn run(self, db: &Database) -> Result<()> {
        let table_id = db.catalog().get_table_id_by_name(&self.table)?;
        let entry = db.catalog().get_table(table_id)?;
        let column_ids: Vec<usize> = match &self.columns {
            Some(names) => names
                .split(',')
                .map(|name| {
                    entry
                        .columns
                        .iter()
                        .position(|c| c.name == name)
                        .ok_or_else(|| anyhow!("no such column '{name}' on table '{}'", self.table))
                })
                .collect::<Result<_>>()?,
            None => (0..entry.columns.len()).collect(),
        };

        let txn = db.begin_transaction(TransactionType::ReadOnly)?;
        let rows = db.scan(&txn, BoundScan { table_id, column_ids })?;
        for row in rows {
            let rendered: Vec<String> = row.iter().map(|v| format!("{v:?}")).collect();
            println!("{}", rendered.join(", "));
        }
        Ok(())
    }
}

#[derive(Parser)]
pub struct Delete {
    table: String,
    key: String,
}

impl Delete {
    fn run(self, db: &Database) -> Result<()> {
        let table_id = db.catalog().get_table_id_by_name(&self.table)?;
        let entry = db.catalog().get_table(table_id)?;
        let key = parse_pk(&self.key, entry.pk_column().data_type)?;

        let txn = db.begin_transaction(TransactionType::Write)?;
        db.delete_by_pk(&txn, table_id, key)?;
        db.commit(txn)?;
        println!("deleted row with key {}", self.key);
        Ok(())
    }
}

#[derive(Parser)]
pub struct Count {
    table: String,
}

impl Count {
    fn run(self, db: &Database) -> Result<()> {
        let table_id = db.catalog().get_table_id_by_name(&self.table)?;
        let txn = db.begin_transaction(TransactionType::ReadOnly)?;
        println!("{}", db.row_count(&txn, table_id)?);
        Ok(())
    }
}

#[derive(Parser)]
pub struct Checkpoint;

impl Checkpoint {
    fn run(self, db: &Database) -> Result<()> {
        db.checkpoint()?;
        println!("checkpoint complete");
        Ok(())
    }
}
