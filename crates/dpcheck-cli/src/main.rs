//! `dpcheck`: prove or refute the privacy budget a program claims.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::helpers::OutputFormat;

const CLI_LONG_ABOUT: &str =
    "Checks that a noisy query program satisfies the differential-privacy \
    bound its annotations claim, by aligning the random choices of two runs \
    on adjacent inputs.\n\n\
    Typical use:\n  \
    1. dpcheck contract demos/sparsevector.c\n  \
    2. dpcheck paths demos/sparsevector.c --size 2\n  \
    3. dpcheck verify demos/sparsevector.c --size 3\n\n\
    Exit codes of verify: 0 proven, 1 disproven, 2 inconclusive.";

#[derive(Parser)]
#[command(name = "dpcheck")]
#[command(about = "Verifier for differentially private query programs")]
#[command(long_about = CLI_LONG_ABOUT)]
#[command(version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command that explores a program.
#[derive(clap::Args, Debug, Clone)]
pub(crate) struct ExploreArgs {
    /// Path to the annotated program
    pub(crate) file: PathBuf,

    /// Function to check when the file defines several
    #[arg(long)]
    pub(crate) function: Option<String>,

    /// Length of the query array
    #[arg(long, default_value_t = 5)]
    pub(crate) size: usize,

    /// Value of the privacy parameter epsilon
    #[arg(long, default_value_t = 1)]
    pub(crate) epsilon: i64,

    /// Loop unrolling bound
    #[arg(long, default_value_t = 32)]
    pub(crate) max_unroll: usize,

    /// Wall-clock limit in seconds (0 disables)
    #[arg(long, default_value_t = 300)]
    pub(crate) timeout: u64,

    /// Per-query solver timeout in seconds
    #[arg(long, default_value_t = 30)]
    pub(crate) solver_timeout: u64,

    /// Output format: text | json
    #[arg(long, default_value = "text")]
    pub(crate) format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify the claimed privacy bound
    #[command(display_order = 10)]
    Verify {
        #[command(flatten)]
        explore: ExploreArgs,

        /// Worker threads for pair checking (default: available cores, at most 8)
        #[arg(long)]
        workers: Option<usize>,

        /// Write every solver query as SMT-LIB into this directory
        #[arg(long)]
        dump_smt: Option<PathBuf>,
    },

    /// List the symbolic paths of both runs without checking them
    #[command(display_order = 11)]
    Paths {
        #[command(flatten)]
        explore: ExploreArgs,
    },

    /// Parse the annotations and print the contract
    #[command(display_order = 12)]
    Contract {
        /// Path to the annotated program
        file: PathBuf,

        /// Function to show when the file defines several
        #[arg(long)]
        function: Option<String>,

        /// Output format: text | json
        #[arg(long, default_value = "text")]
        format: String,
    },
}

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Verify {
            explore,
            workers,
            dump_smt,
        } => {
            let code = commands::verify::run_verify_command(explore, workers, dump_smt)?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Paths { explore } => {
            commands::paths::run_paths_command(explore)?;
        }
        Commands::Contract {
            file,
            function,
            format,
        } => {
            let format = OutputFormat::parse(&format)?;
            commands::contract::run_contract_command(file, function, format)?;
        }
    }
    Ok(())
}
