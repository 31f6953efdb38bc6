mod decode;
mod info;

use std::io::stderr;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode packet fields using JSON schema definitions.
    ///
    /// Each schema file may contain a single schema definition or a list of them. The
    /// decoded tables, one per APID, and a report of any problems are written as JSON.
    Decode {
        /// Schema definition file. May be given more than once.
        #[arg(short, long, value_name = "path", required = true)]
        schema: Vec<PathBuf>,

        /// Drop a packet's row when any of its fields extends past the end of the packet,
        /// rather than keeping the row with the field missing.
        #[arg(long, action)]
        strict: bool,

        /// What to do with packets with an APID no schema applies to.
        #[arg(short, long, default_value = "skip")]
        unmatched: decode::Unmatched,

        /// Read the whole input into memory and decode packets in parallel.
        #[arg(long, action)]
        parallel: bool,

        /// Output file path. Defaults to stdout.
        #[arg(short, long, value_name = "path")]
        output: Option<PathBuf>,

        /// Delete output file if it already exists
        #[arg(long, action)]
        clobber: bool,

        /// Input spacepacket file.
        input: PathBuf,
    },
    /// Show packet counts and sequence gaps per APID
    Info {
        /// Input spacepacket file
        input: PathBuf,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: info::Format,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(stderr)
        .with_ansi(false)
        .without_time()
        .with_env_filter(
            EnvFilter::try_from_env("TLM_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Decode {
            schema,
            strict,
            unmatched,
            parallel,
            output,
            clobber,
            input,
        } => {
            if let Some(output) = output {
                if !clobber && output.exists() {
                    bail!("{output:?} exists; use --clobber");
                }
            }
            let opts = decode::Opts {
                strict: *strict,
                unmatched: unmatched.clone(),
                parallel: *parallel,
            };
            decode::decode(input, schema, &opts, output.as_deref())
        }
        Commands::Info { input, format } => info::info(input, format),
    }
}
