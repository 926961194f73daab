use anyhow::Result;
use clap::Parser;
use request_pipeline::config::{self, Config};
use request_pipeline::server;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// HTTP API host running the middleware pipeline.
#[derive(Parser)]
#[command(name = "request-pipeline")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Bind address, overrides LISTEN
    #[arg(long)]
    listen: Option<String>,

    /// Log output format (text or json), overrides LOG_FORMAT
    #[arg(long)]
    log_format: Option<String>,

    /// Print the configuration summary and exit
    #[arg(long)]
    print_config: bool,
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    let registry = tracing_subscriber::registry().with(filter);

    if config.log_format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let mut config = config::load_from_env()?;
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }
    config.validate()?;

    init_tracing(&config);
    config.print_summary();

    if cli.print_config {
        return Ok(());
    }

    server::run(config).await
}
