use anyhow::Result;
use clap::{Parser, Subcommand};
use sigmer::error::SigmerError;
use sigmer::{build, call, distance};

#[derive(Parser)]
#[command(name = "sigmer")]
#[command(version = "0.1.0")]
#[command(about = "Protein function annotation with signature k-mers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a signature k-mer index from curated training data
    BuildSignatures(build::BuildArgs),

    /// Call protein functions for query sequences
    CallFunctions(call::CallArgs),

    /// Annotate a directory of fasta files, separating uncalled ids
    AnnotateSeqs(call::annotate::AnnotateArgs),

    /// Compute all-pairs shared-signature distances
    DistanceMatrix(distance::DistanceArgs),
}

fn main() {
    env_logger::Builder::from_default_env().init();

    let cli = Cli::parse();
    let result: Result<()> = match cli.command {
        Commands::BuildSignatures(args) => build::run(args),
        Commands::CallFunctions(args) => call::run(args),
        Commands::AnnotateSeqs(args) => call::annotate::run(args),
        Commands::DistanceMatrix(args) => distance::run(args),
    };

    if let Err(err) = result {
        eprintln!("sigmer: {:#}", err);
        std::process::exit(exit_code(&err));
    }
}

/// Usage and configuration failures exit 1, I/O and corruption exit 2.
fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<SigmerError>())
        .map(|e| e.exit_code())
        .unwrap_or(2)
}
