use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use viewcount::config::{CacheBackend, CliArgs, Config};

#[derive(Parser)]
#[command(name = "viewcount")]
#[command(about = "Flush worker that reconciles buffered view counts into the durable store")]
struct Cli {
    #[arg(short, long, help = "Path to a TOML or JSON config file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Cache backend (redis or memory)")]
    cache_backend: Option<CacheBackend>,

    #[arg(long, env = "VIEWCOUNT_CACHE_URL", help = "Redis connection URL")]
    cache_url: Option<String>,

    #[arg(long, env = "VIEWCOUNT_STORE_URL", help = "Durable store base URL")]
    store_url: Option<String>,

    #[arg(long, help = "Seconds between flush cycles")]
    flush_interval: Option<u64>,

    #[arg(short, long, help = "Increase verbosity")]
    verbose: bool,
}

impl Cli {
    fn to_args(&self) -> CliArgs {
        CliArgs {
            config_file: self.config.clone(),
            cache_backend: self.cache_backend,
            cache_url: self.cache_url.clone(),
            store_url: self.store_url.clone(),
            flush_interval_secs: self.flush_interval,
            log_level: self.verbose.then(|| "debug".to_string()),
            ..CliArgs::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_with_cli(&cli.to_args()).context("Failed to load configuration")?;

    let level: tracing::Level = config
        .logging
        .level
        .parse()
        .unwrap_or(tracing::Level::INFO);
    let subscriber = tracing_subscriber::fmt().with_max_level(level).finish();

    tracing::subscriber::set_global_default(subscriber)?;

    viewcount::run(config).await
}
