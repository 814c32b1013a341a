use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
pub mod exit_codes;

use cli::args::Cli;
use cli::commands::dispatch;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_codes::for_error(&e)
        }
    };
    std::process::exit(code);
}

/// Logs go to stderr; stdout carries the per-image progress lines.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
