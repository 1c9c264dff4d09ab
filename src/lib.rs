mod commands;
pub mod config;
pub mod controller;
pub mod error;
pub mod models;
pub mod services;

use clap::{Parser, Subcommand};
use config::Settings;
use services::classifier::model_manager::ModelType;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "photo-predict", version, about = "Pick a photo and see what the model thinks it is")]
pub struct Cli {
    /// Settings file (defaults to ./photo-predict.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// mobilenet_v2, convnext_base or convnext_large
    #[arg(long, global = true)]
    model_type: Option<ModelType>,

    #[arg(long, global = true)]
    gpu: bool,

    #[arg(long, global = true)]
    top_k: Option<usize>,

    /// Fail instead of downloading missing model files
    #[arg(long, global = true)]
    no_download: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive screen; type image paths or URLs to classify them
    Screen,
    /// Classify the given images, URLs or folders in order
    Classify {
        #[arg(required = true)]
        inputs: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Download the configured model files
    Download,
    /// Show where the model lives and whether it is downloaded
    Status,
}

impl Cli {
    fn settings(&self) -> anyhow::Result<Settings> {
        let mut settings = config::load_settings(self.config.as_deref())?;
        if let Some(dir) = &self.model_dir {
            settings.model_dir = dir.clone();
        }
        if let Some(model_type) = self.model_type {
            settings.model_type = model_type;
        }
        if self.gpu {
            settings.use_gpu = true;
        }
        if let Some(top_k) = self.top_k {
            settings.top_k = top_k;
        }
        if self.no_download {
            settings.auto_download = false;
        }
        settings.validate()?;
        Ok(settings)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    let settings = cli.settings()?;
    tracing::debug!(?settings, "settings loaded");

    match cli.command {
        Command::Screen => commands::screen::interactive(&settings).await,
        Command::Classify { inputs, json } => commands::screen::scripted(&settings, &inputs, json).await,
        Command::Download => commands::model::download(&settings).await,
        Command::Status => commands::model::status(&settings),
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // One logical thread drives the screen; model work uses the blocking pool.
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(dispatch(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
