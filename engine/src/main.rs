// Hive multi-agent engine
// Main entry point for the hive binary

use clap::Parser;
use hive_engine::cli::{Cli, Command, ConfigAction};
use hive_engine::config::Config;
use hive_engine::handlers::{handle_config_show, handle_run, handle_status, OutputFormat};
use hive_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the configured level; RUST_LOG wins over both
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(log_level);

    tracing::info!("Hive Engine v{}", env!("CARGO_PKG_VERSION"));

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    match cli.command {
        Command::Run {
            title,
            description,
            priority,
            meta,
        } => {
            tracing::info!("Executing task: {}", title);
            handle_run(title, description, priority, meta, &config, format).await
        }

        Command::Status => handle_status(&config, format).await,

        Command::Config { action } => match action {
            ConfigAction::Show => handle_config_show(&config, format),
        },
    }
}
