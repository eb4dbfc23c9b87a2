use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use opsmedic::config::{EngineConfig, LogFormat};
use opsmedic::correlate::Alert;

#[derive(Parser)]
#[command(
    name = "opsmedic",
    about = "Incident lifecycle and remediation orchestration engine",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + reconcile sweep)
    Serve {
        /// Config file (defaults to $OPSMEDIC_CONFIG, then /etc/opsmedic/opsmedic.toml)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Bind address, overrides [server] bind
        #[arg(long)]
        bind: Option<String>,

        /// Log output format, overrides [logging] format
        #[arg(long, value_enum)]
        log_format: Option<LogFormat>,
    },

    /// Parse and validate an alert payload
    ValidateAlert {
        /// JSON file holding the alert
        #[arg(long)]
        file: PathBuf,
    },

    /// Print the effective configuration as TOML
    ShowConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            bind,
            log_format,
        } => {
            let mut cfg = EngineConfig::resolve(config.as_deref())?;
            init_tracing(log_format.unwrap_or(cfg.logging.format));
            if let Some(bind) = bind {
                cfg.server.bind = bind;
            }
            cfg.validate()?;
            tracing::info!(bind = %cfg.server.bind, "Starting OpsMedic daemon");
            opsmedic::serve(cfg).await?;
        }
        Commands::ValidateAlert { file } => {
            init_tracing(LogFormat::Text);
            let body = std::fs::read(&file)
                .with_context(|| format!("failed to read alert file: {}", file.display()))?;
            let alert = Alert::from_slice(&body)
                .with_context(|| format!("invalid alert: {}", file.display()))?;
            println!("{}", serde_json::to_string_pretty(&alert)?);
        }
        Commands::ShowConfig { config } => {
            init_tracing(LogFormat::Text);
            let cfg = EngineConfig::resolve(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
        }
    }

    Ok(())
}
