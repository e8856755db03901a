use anyhow::{bail, Result};
use clap::Parser;
use radiodesk::{config::Config, context::RadioContext, ui::App};
use std::path::PathBuf;
use tokio::runtime::Handle;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt::writer::MakeWriterExt, EnvFilter};

#[derive(Parser)]
#[command(name = "radiodesk")]
#[command(about = "Listen to an internet radio station and follow what is on air")]
struct Args {
    /// Config file to use instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the stream URL
    #[arg(long)]
    stream_url: Option<String>,

    /// Override the status API URL
    #[arg(long)]
    status_url: Option<String>,

    /// Initial volume, 0.0 to 1.0
    #[arg(long)]
    volume: Option<f32>,

    /// Seconds between status polls
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Start playing right away
    #[arg(long)]
    autoplay: bool,

    /// Enable developer logging (stderr + debug output)
    #[arg(long)]
    dev: bool,

    /// Write the default config file and exit
    #[arg(long)]
    init_config: bool,
}

fn init_logging(dev: bool) -> Result<WorkerGuard> {
    let log_dir = Config::log_dir();
    std::fs::create_dir_all(&log_dir)?;

    // Daily rotating file appender
    let file_appender = tracing_appender::rolling::daily(&log_dir, "radiodesk.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let base_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,radiodesk=debug"));

    if dev {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(file_writer.and(std::io::stderr))
            .with_target(true)
            .with_ansi(false)
            .with_env_filter(base_filter)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
        eprintln!("🔧 Dev mode: logging to stderr + {}", log_dir.display());
    } else {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(file_writer)
            .with_target(true)
            .with_ansi(false)
            .with_env_filter(base_filter)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    Ok(guard)
}

fn apply_overrides(config: &mut Config, args: &Args) {
    if let Some(url) = &args.stream_url {
        config.stream_url = url.clone();
    }
    if let Some(url) = &args.status_url {
        config.status_url = url.clone();
    }
    if let Some(volume) = args.volume {
        config.audio.initial_volume = volume;
    }
    if let Some(secs) = args.poll_interval {
        config.poll_interval_secs = secs;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // held until main returns so buffered log lines get flushed
    let _guard = init_logging(args.dev)?;

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => Config::config_path()?,
    };

    if args.init_config {
        if config_path.exists() {
            bail!("{} already exists, not overwriting", config_path.display());
        }
        Config::default().save_to(&config_path)?;
        println!("Wrote default config to {}", config_path.display());
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    apply_overrides(&mut config, &args);
    debug!(?config, "configuration loaded");

    info!(stream = %config.stream_url, status = %config.status_url, "radiodesk starting up");
    println!("📻 radiodesk - {}", config.stream_url);

    let context = RadioContext::new(Handle::current(), &config.network)?;
    let mut app = App::new(config, context);
    app.run(args.autoplay).await?;

    println!("👋 Bye!");
    Ok(())
}
