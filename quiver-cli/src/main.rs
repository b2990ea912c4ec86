use anyhow::{bail, Context, Result};
use clap::Parser;
use quiver_engine::{Engine, EngineConfig, PixelLayout};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

mod http;
mod report;

use http::HttpTransport;
use report::{Outcome, Report};

#[derive(Parser, Debug)]
#[command(name = "quiver")]
#[command(author, version, about = "Load and decode images through the quiver engine", long_about = None)]
struct Args {
    /// Image URIs: http(s)://, file://, absolute paths, asset://, resource://
    #[arg(value_name = "URI", required = true)]
    uris: Vec<String>,

    /// Engine configuration file (TOML)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Decode to fit this width
    #[arg(long, requires = "height")]
    width: Option<u32>,

    /// Decode to fit this height
    #[arg(long, requires = "width")]
    height: Option<u32>,

    /// Output channel layout
    #[arg(long, value_enum, default_value_t = LayoutArg::Rgba8)]
    layout: LayoutArg,

    /// Directory asset:// URIs are resolved against
    #[arg(long, value_name = "DIR")]
    asset_root: Option<PathBuf>,

    /// Do not read or write the disk cache
    #[arg(long)]
    no_disk_cache: bool,

    /// Number of worker threads (overrides the config file)
    #[arg(short, long)]
    workers: Option<usize>,

    /// HTTP timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Print results and statistics as JSON
    #[arg(long)]
    json: bool,

    /// Verbose logging level (repeat for more verbosity: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum LayoutArg {
    Rgba8,
    Rgb8,
    Luma8,
}

impl From<LayoutArg> for PixelLayout {
    fn from(arg: LayoutArg) -> Self {
        match arg {
            LayoutArg::Rgba8 => PixelLayout::Rgba8,
            LayoutArg::Rgb8 => PixelLayout::Rgb8,
            LayoutArg::Luma8 => PixelLayout::Luma8,
        }
    }
}

fn log_directive(level: u8) -> &'static str {
    match level {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

fn init_logging(level: u8) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    tracing_subscriber::registry()
        .with(EnvFilter::new(log_directive(level)))
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}

fn build_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if args.no_disk_cache {
        config.enable_disk_cache = false;
    }
    if let Some(workers) = args.workers {
        config.worker_pool_size = workers;
    }
    if args.verbose > 0 {
        config.debug_logging = true;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose);

    let config = build_config(&args)?;
    let mut builder = Engine::builder(config)
        .transport(Arc::new(HttpTransport::new(Duration::from_secs(args.timeout))));
    if let Some(root) = &args.asset_root {
        builder = builder.asset_root(root);
    }
    let engine = builder.build().context("Failed to start image engine")?;

    info!(count = args.uris.len(), "Loading images");

    let handles: Vec<_> = args
        .uris
        .iter()
        .map(|uri| {
            let mut request = engine.load(uri.as_str()).layout(args.layout.into());
            if let (Some(width), Some(height)) = (args.width, args.height) {
                request = request.size(width, height);
            }
            (uri, request.fire())
        })
        .collect();

    let results = handles
        .into_iter()
        .map(|(uri, handle)| Outcome::new(uri.as_str(), &handle.wait()))
        .collect();

    let report = Report {
        results,
        stats: engine.stats(),
    };
    engine.shutdown();

    let mut stdout = io::stdout().lock();
    if args.json {
        report.write_json(&mut stdout)?;
    } else {
        report.write_text(&mut stdout)?;
    }

    let failures = report.failures();
    if failures > 0 {
        bail!("{failures} of {} images failed to load", report.results.len());
    }
    Ok(())
}
