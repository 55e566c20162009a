//! blurchain - run the image blur pipeline against in-memory storage.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use blurchain_core::domain::ChainStatus;
use blurchain_core::impls::{BoxBlur, InMemoryArtifactStore, RawCodec};
use blurchain_core::ports::{
    ChannelSink, EnvSnapshot, ImageCodec, ImageFormat, RasterImage, StaticEnvironment, SystemClock,
};
use blurchain_core::stages::{self, BlurCapabilities, PipelineConstraints, keys};
use blurchain_core::typed::TaskRegistry;
use blurchain_core::{Chain, ChainResult, Executor, ExecutorConfig, ProgressEvent, RetryPolicy};
use clap::Parser;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// URI the source image is seeded under.
const SOURCE_URI: &str = "res://source";

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// Blur an image through the cleanup -> blur -> save pipeline.
#[derive(Parser, Debug)]
#[command(name = "blurchain")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Source image in raw `BLR` format. A generated test pattern is used
    /// when omitted.
    #[arg(long)]
    source: Option<PathBuf>,

    /// Blur passes per blur stage.
    #[arg(long, default_value_t = 1)]
    intensity: u32,

    /// Number of blur stages.
    #[arg(long, default_value_t = 1)]
    blur_stages: usize,

    /// Executor config (TOML).
    #[arg(long, env = "BLURCHAIN_CONFIG")]
    config: Option<PathBuf>,

    /// Start unplugged; the save stage waits until charging.
    #[arg(long)]
    unplugged: bool,

    /// Plug the device in after this many milliseconds (with --unplugged).
    #[arg(long)]
    plug_in_after_ms: Option<u64>,

    /// Simulated work time per stage.
    #[arg(long, default_value_t = 0)]
    stage_delay_ms: u64,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Report<'a> {
    #[serde(flatten)]
    result: &'a ChainResult,
    events: &'a [ProgressEvent],
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "blurchain_core=debug,blurchain=debug,info"
    } else {
        "blurchain_core=info,blurchain=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(cli.verbose)
        .with_writer(std::io::stderr)
        .init();

    if cli.intensity == 0 {
        bail!("--intensity must be positive");
    }

    let config = load_config(cli.config.as_ref())?;
    let artifacts = Arc::new(InMemoryArtifactStore::new());
    artifacts.insert(SOURCE_URI, source_bytes(cli.source.as_ref())?).await;

    let caps = BlurCapabilities {
        artifacts: artifacts.clone(),
        codec: Arc::new(RawCodec),
        blur: Arc::new(BoxBlur),
        clock: Arc::new(SystemClock),
        stage_delay: Duration::from_millis(cli.stage_delay_ms),
    };
    let mut registry = TaskRegistry::new();
    stages::register_blur_tasks(&mut registry, &caps)?;

    let env = Arc::new(StaticEnvironment::new(EnvSnapshot {
        charging: !cli.unplugged,
        ..EnvSnapshot::default()
    }));
    let (sink, events) = ChannelSink::new();
    let executor = Executor::builder(config)
        .environment(env.clone())
        .sink(Arc::new(sink))
        .build()?;

    let constraints = PipelineConstraints {
        battery_not_low: true,
        storage_not_low: true,
        charging: true,
    };
    let chain = Chain::build(
        stages::blur_pipeline(cli.blur_stages, constraints),
        keys::IMAGE_MANIPULATION_WORK_NAME,
        stages::blur_input(SOURCE_URI, cli.intensity),
        &registry,
    )?;

    if cli.unplugged {
        match cli.plug_in_after_ms {
            Some(ms) => {
                let env = env.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    info!("device plugged in");
                    env.update(|snapshot| snapshot.charging = true);
                });
            }
            None => warn!("device is unplugged; save will wait until charging (Ctrl-C to cancel)"),
        }
    }

    let printer = tokio::spawn(print_progress(events, !cli.json));
    let handle = executor.start(chain).await?;

    let result = tokio::select! {
        result = handle.wait() => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, cancelling");
            executor.cancel(handle.name()).await;
            handle.wait().await?
        }
    };
    executor.shutdown().await;
    drop(executor);
    let events = printer.await.context("progress printer failed")?;

    if cli.json {
        let report = Report {
            result: &result,
            events: &events,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_result(&result, &artifacts).await;
    }

    if result.status != ChainStatus::Succeeded {
        std::process::exit(1);
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn load_config(path: Option<&PathBuf>) -> Result<ExecutorConfig> {
    match path {
        Some(path) => ExecutorConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(ExecutorConfig::new(RetryPolicy::exponential(
            3,
            Duration::from_millis(200),
            2.0,
            Duration::from_secs(5),
        ))),
    }
}

fn source_bytes(path: Option<&PathBuf>) -> Result<Vec<u8>> {
    if let Some(path) = path {
        return std::fs::read(path).with_context(|| format!("reading {}", path.display()));
    }

    // 16x16 checkerboard of 4px squares.
    let (width, height) = (16u32, 16u32);
    let pixels = (0..height)
        .flat_map(|y| (0..width).map(move |x| if (x / 4 + y / 4) % 2 == 0 { 0 } else { 255 }))
        .collect();
    let image = RasterImage::new(width, height, pixels).context("test pattern has wrong size")?;
    Ok(RawCodec.encode(&image, ImageFormat::Png)?)
}

/// Print events as they arrive and hand them all back once the executor is gone.
async fn print_progress(
    mut events: mpsc::UnboundedReceiver<ProgressEvent>,
    print: bool,
) -> Vec<ProgressEvent> {
    let mut seen = Vec::new();
    while let Some(event) = events.recv().await {
        if print {
            match &event {
                ProgressEvent::Stage {
                    stage_index,
                    stage,
                    state,
                    ..
                } => println!("  [{stage_index}] {stage:<10} {state:?}"),
                ProgressEvent::Chain {
                    chain_name, status, ..
                } => println!("{chain_name}: {status:?}"),
            }
        }
        seen.push(event);
    }
    seen
}

async fn print_result(result: &ChainResult, artifacts: &InMemoryArtifactStore) {
    match result.status {
        ChainStatus::Succeeded => {
            let uri = result
                .output
                .as_ref()
                .and_then(|o| o.get_str(keys::FINAL_IMAGE_REFERENCE))
                .unwrap_or("<missing>");
            println!("saved {uri}");
            if let Some(meta) = artifacts.metadata(uri).await {
                println!("  {} ({})", meta.display_name, meta.mime_type);
            }
        }
        ChainStatus::Failed => {
            if let Some(failure) = &result.failure {
                println!(
                    "failed at stage {} ({}): {}",
                    failure.stage_index, failure.stage, failure.reason
                );
            }
        }
        status => println!("finished: {status:?}"),
    }
}
