//! kvgram CLI binary.

use std::process;

use clap::Parser;
use kvgram::cli::{args::KvgramArgs, commands::execute_command};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() {
    // Parse command line arguments using clap
    let args = KvgramArgs::parse();

    // RUST_LOG wins over the verbosity flags
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_level().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = execute_command(args) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
