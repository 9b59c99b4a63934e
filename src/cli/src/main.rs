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

//! A small demo binary over `kuzu_storage::Database`: one subcommand per operation, each opening
//! the database at `--data-dir`, running in its own transaction, and committing before exiting.
//! Schemas and bound plans are the kind of thing a real embedding API would build from a parsed
//! query; here they come straight off the command line, the way the storage core's own tests
//! construct `BoundInsert`/`BoundScan` by hand.

mod cmd;

use std::path::PathBuf;

use clap::Parser;
use kuzu_common::config::DBConfig;

#[derive(Parser)]
#[command(name = "kuzu", about = "Demo CLI over the embedded storage core")]
struct Cli {
    /// Directory holding this database's WAL and data file.
    #[arg(long, global = true, default_value = "./kuzu-data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    cmd: cmd::Cmd,
}

fn main() -> anyhow::Result<()> {
    kuzu_common::logging::init_tracing();
    let cli = Cli::parse();
    let db = kuzu_storage::Database::open(&cli.data_dir, DBConfig::default())?;
    cli.cmd.run(&db)
}
