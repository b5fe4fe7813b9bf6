use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("allocsim=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = allocsim::api::Cli::parse();
    if let Err(e) = allocsim::api::run(cli).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}
