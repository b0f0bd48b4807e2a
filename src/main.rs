#![warn(clippy::all, rust_2018_idioms)]

use clap::Parser;

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cloudtracker=info"));

    // Reports go to stdout; keep diagnostics on stderr so output stays
    // pipeable.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    tracing::debug!(
        "cloudtracker {} ({} {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_BRANCH"),
        env!("GIT_COMMIT")
    );

    let args = cloudtracker::app::args::Args::parse();
    cloudtracker::app::run(args).await
}
