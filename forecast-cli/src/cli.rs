use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use forecast_core::{
    Config, FileQueryStore, ForecastController, MIN_QUERY_LEN, MemoryQueryStore, QueryStore,
    model::is_searchable,
};
use inquire::{CustomType, InquireError, Select, Text};

use crate::render;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "forecast", version, about = "Daily weather forecast for any place")]
pub struct Cli {
    /// Use this config file instead of the platform default.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Do not read or write the last searched location.
    #[arg(long, global = true)]
    pub ephemeral: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show the forecast for a location (defaults to the last one searched).
    Show {
        /// Location name, e.g. "kashan".
        location: Option<String>,
    },

    /// Type locations at a prompt; every entry replaces the previous search.
    Interactive,

    /// Interactively edit endpoints, timeout and log level.
    Configure,

    /// Print the path of the config file.
    ConfigPath,
}

impl Cli {
    pub fn load_config(&self) -> Result<Config> {
        match &self.config {
            Some(path) => Config::load_from(path),
            None => Config::load(),
        }
    }

    fn config_path(&self) -> Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => Config::config_file_path(),
        }
    }

    fn query_store(&self, config: &Config) -> Result<Box<dyn QueryStore>> {
        if self.ephemeral {
            return Ok(Box::new(MemoryQueryStore::default()));
        }
        let path = config.query_store_path()?;
        tracing::debug!(path = %path.display(), "using query store");
        Ok(Box::new(FileQueryStore::new(path)))
    }

    pub async fn run(self, config: Config) -> Result<()> {
        match &self.command {
            Command::Show { location } => {
                let controller =
                    ForecastController::open_meteo(&config, self.query_store(&config)?)?;
                show(&controller, location.clone()).await
            }
            Command::Interactive => {
                let controller =
                    ForecastController::open_meteo(&config, self.query_store(&config)?)?;
                interactive(&controller).await
            }
            Command::Configure => configure(config, &self.config_path()?),
            Command::ConfigPath => {
                println!("{}", self.config_path()?.display());
                Ok(())
            }
        }
    }
}

async fn show(controller: &ForecastController, location: Option<String>) -> Result<()> {
    match location {
        Some(location) if location != controller.snapshot().query => {
            controller.set_query(location)
        }
        _ => controller.resume(),
    }

    let query = controller.snapshot().query;
    if !is_searchable(&query) {
        return Err(anyhow!(
            "Type a location of at least {MIN_QUERY_LEN} characters, e.g. `forecast show kashan`"
        ));
    }

    eprintln!("{}", render::loading(&query));
    let state = controller.settled().await;

    if let Some(err) = &state.last_error {
        return Err(anyhow!(err.clone()));
    }

    print!("{}", render::state(&state));
    Ok(())
}

async fn interactive(controller: &ForecastController) -> Result<()> {
    let mut current = controller.snapshot().query;
    if is_searchable(&current) {
        controller.resume();
        print!("{}", render::state(&controller.settled().await));
    }

    loop {
        let initial = current.clone();
        let answer = tokio::task::spawn_blocking(move || {
            Text::new("Search location:")
                .with_initial_value(&initial)
                .with_help_message("Esc or Ctrl-C to quit")
                .prompt()
        })
        .await
        .context("Prompt task failed")?;

        let line = match answer {
            Ok(line) => line,
            Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => {
                return Ok(());
            }
            Err(err) => return Err(err).context("Failed to read location"),
        };

        controller.set_query(line.trim());
        current = controller.snapshot().query;

        if controller.snapshot().is_loading {
            println!("{}", render::loading(&current));
        }
        print!("{}", render::state(&controller.settled().await));
    }
}

fn configure(mut config: Config, path: &std::path::Path) -> Result<()> {
    config.geocoding_url = Text::new("Geocoding endpoint:")
        .with_default(&config.geocoding_url)
        .prompt()
        .context("Failed to read geocoding endpoint")?;

    config.forecast_url = Text::new("Forecast endpoint:")
        .with_default(&config.forecast_url)
        .prompt()
        .context("Failed to read forecast endpoint")?;

    config.timeout_secs = CustomType::<u64>::new("Request timeout (seconds):")
        .with_default(config.timeout_secs)
        .with_error_message("Please type a whole number of seconds")
        .prompt()
        .context("Failed to read timeout")?;

    let levels = vec!["error", "warn", "info", "debug", "trace"];
    let start = levels
        .iter()
        .position(|l| *l == config.log_level)
        .unwrap_or(1);
    config.log_level = Select::new("Log level:", levels)
        .with_starting_cursor(start)
        .prompt()
        .context("Failed to read log level")?
        .to_string();

    config.validate()?;
    config.save_to(path)?;

    println!("Saved configuration to {}", path.display());
    Ok(())
}
