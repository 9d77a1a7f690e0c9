use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use stock_meta::ai::{Constraints, GeminiService};
use stock_meta::batch::{self, Event, ImageItem, LogLevel};
use stock_meta::config::Config;
use stock_meta::export::{self, ExportPreset};

#[derive(Parser, Debug)]
#[command(
    name = "stock-meta",
    version,
    about = "AI-powered stock photography metadata — batch titles, categories, and keywords with platform CSV export"
)]
struct Cli {
    /// Image files or directories to process
    #[arg(value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Initialize a default config.json and exit
    #[arg(long)]
    init: bool,

    /// Target platform preset (adobe_stock, shutterstock, freepik)
    #[arg(long, value_name = "PLATFORM")]
    platform: Option<String>,

    /// Concurrency limit (in-flight model requests per group)
    #[arg(long, value_name = "N")]
    concurrency: Option<usize>,

    /// Write the CSV export to this file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    out: Option<PathBuf>,

    /// Output the successful results as JSON instead of CSV
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Handle --init
    if cli.init {
        let config = Config::default();
        let path = cli.config.as_deref();
        config.save(path)?;
        let save_path = match path {
            Some(p) => p.to_path_buf(),
            None => Config::config_path()?,
        };
        println!("Default config written to {}", save_path.display());
        return Ok(());
    }

    // Load config and apply CLI overrides
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(ref platform) = cli.platform {
        config.processing.platform = ExportPreset::parse(platform);
    }
    if let Some(concurrency) = cli.concurrency {
        config.processing.max_workers = concurrency.max(1);
    }

    // Validate inputs
    if cli.paths.is_empty() {
        anyhow::bail!("No input files or directories specified. Use --help for usage.");
    }
    if config.gemini.api_key.is_empty() {
        anyhow::bail!(
            "No Gemini API key configured. Run `stock-meta-cli --init` to create a config file, then add your API key."
        );
    }

    // Collect images
    let images = batch::collect_images(&cli.paths);
    if images.is_empty() {
        anyhow::bail!("No supported image files found in the specified paths.");
    }
    log::info!("Found {} image(s) to process", images.len());

    let mut items = Vec::with_capacity(images.len());
    for path in &images {
        match ImageItem::from_file(path) {
            Ok(item) => items.push(item),
            Err(e) => log::error!("Skipping {}: {e}", path.display()),
        }
    }
    if items.is_empty() {
        anyhow::bail!("None of the image files could be read.");
    }

    let constraints = Constraints::from_config(&config.processing);
    let service = GeminiService::new(
        config.gemini.api_key.clone(),
        config.gemini.model.clone(),
        Duration::from_secs(config.gemini.timeout_secs),
    );

    // Drain progress events into the log while the batch runs
    let (tx, mut rx) = tokio::sync::mpsc::channel(32);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                Event::Log { message, level } => match level {
                    LogLevel::Error => log::error!("{message}"),
                    _ => log::info!("{message}"),
                },
                Event::Progress { percent, counters } => {
                    log::info!(
                        "Progress: {percent:.0}% ({} processed, {} failed)",
                        counters.total,
                        counters.failed
                    );
                }
                Event::FatalError { message } => log::error!("{message}"),
                Event::Complete { .. } => {}
            }
        }
    });

    let report = batch::run_batch(
        &service,
        items,
        &constraints,
        config.processing.max_workers,
        config.processing.batch_size,
        &tx,
    )
    .await;
    drop(tx);
    printer.await?;

    // Render the export
    let output = if cli.json {
        export::render_json(&report.outcomes)?
    } else {
        report.export_text.unwrap_or_default()
    };

    match cli.out {
        Some(ref path) => {
            std::fs::write(path, &output)?;
            log::info!("Export written to {}", path.display());
        }
        None => println!("{output}"),
    }

    // Summary
    let c = report.counters;
    log::info!(
        "Done: {} optimal, {} short, {} failed out of {} images",
        c.optimal,
        c.short,
        c.failed,
        c.total
    );

    Ok(())
}
