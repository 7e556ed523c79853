// EDB - Ethereum Debugger
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! edb-trace - source-level traces of Ethereum transactions
//!
//! Replays nothing: the node's `debug_traceTransaction` log is correlated with
//! a local solc output so that every executed instruction points at the
//! source range that produced it.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use eyre::Result;

mod cmd;

/// Command line interface
#[derive(Debug, Parser)]
#[command(name = "edb-trace")]
#[command(about = "Source-level traces of Ethereum transactions", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Ethereum RPC endpoint (must expose `debug_traceTransaction`)
    #[arg(long, env = "ETH_RPC_URL", default_value = "http://localhost:8545", global = true)]
    pub rpc_url: String,

    /// Cache directory for RPC responses (default: ~/.edb-trace/cache)
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Disable caching of RPC responses
    #[arg(long, global = true)]
    pub disable_cache: bool,

    /// Also write logs to a daily-rotated file in the system temp directory
    #[arg(long, global = true)]
    pub log_file: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Correlate a transaction's execution with its sources and write the result
    Dump(DumpArgs),
    /// Disassemble EVM bytecode
    Disasm {
        /// Bytecode as hex, with or without 0x prefix
        code: String,
    },
}

/// Arguments of the `dump` command
#[derive(Debug, Args)]
pub struct DumpArgs {
    /// Transaction hash
    pub tx_hash: String,

    /// solc output JSON (combined-json or standard-JSON output)
    #[arg(long)]
    pub solc_output: PathBuf,

    /// Standard-JSON input whose `sources.*.content` supply source contents
    #[arg(long)]
    pub solc_input: Option<PathBuf>,

    /// Directory that source paths of the compiler output are resolved against
    #[arg(long)]
    pub sources: Option<PathBuf>,

    /// Source file to include, keyed by the path as given
    #[arg(long = "source-file")]
    pub source_files: Vec<PathBuf>,

    /// Output file (default: <TX_HASH>.json, or <TX_HASH>.html with --template)
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Template in which `$DEBUGDATA` and `$TXHASH` are substituted
    #[arg(long)]
    pub template: Option<PathBuf>,

    /// Give up correlating after this many seconds and write the partial trace
    #[arg(long)]
    pub deadline: Option<u64>,

    /// Seconds a cached deployed code stays valid (0 keeps it forever)
    #[arg(long)]
    pub code_cache_ttl: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    edb_trace_common::logging::init_logging("edb-trace", cli.log_file)?;

    match &cli.command {
        Commands::Dump(args) => {
            tracing::info!("Dumping trace of transaction: {}", args.tx_hash);
            cmd::dump(&cli, args).await
        }
        Commands::Disasm { code } => cmd::disasm(code),
    }
}
