//! litmus CLI entry point

use clap::Parser;

fn main() {
    let cli = litmus::cli::Cli::parse();

    // Logs go to stderr so machine output on stdout stays parseable
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log_filter())),
        )
        .try_init();

    litmus::cli::run(cli);
}
