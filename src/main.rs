// Example runner: plays a directory of frames through the engine and prints one
// JSON `FrameReport` per line on stdout. Logs go to stderr.

use anyhow::{Context, Result, bail};
use clap::Parser;
use hazard_vision::{
    FeatureDataset, ImageSequenceSource, Label, ParallelPipeline, PipelineConfig,
    VisionPipeline,
};
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Running-light / hazard-light inspection over an image sequence.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory of frames, played in file-name order
    frames_dir: PathBuf,

    /// YAML pipeline config; defaults are used when omitted
    config: Option<PathBuf>,

    /// Capture rate in Hz, overriding the config
    #[arg(long)]
    frame_rate: Option<f64>,

    /// Segmentation workers (defaults to one per CPU)
    #[arg(long)]
    workers: Option<usize>,

    /// Write training samples instead of reports: LABEL (RUNNING or BLINKING) and output file
    #[arg(long, num_args = 2, value_names = ["LABEL", "OUT"])]
    export: Option<Vec<String>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hazard_vision=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(rate) = args.frame_rate {
        config.frame_rate = rate;
    }

    let mut source = ImageSequenceSource::open(&args.frames_dir)?;
    if source.is_empty() {
        warn!(dir = %args.frames_dir.display(), "no frames found");
        return Ok(());
    }
    if config.image_width == 0 || config.image_height == 0 {
        let (width, height) = source
            .probe_dimensions()?
            .context("frame directory is empty")?;
        config.image_width = width;
        config.image_height = height;
        info!(width, height, "frame size taken from first frame");
    }

    match args.export.as_deref() {
        Some([label, out]) => {
            let label: Label = label.parse().map_err(anyhow::Error::msg)?;
            if label == Label::Analyzing {
                bail!("export label must be RUNNING or BLINKING");
            }
            export_samples(config, &mut source, label, Path::new(out)).await
        }
        Some(_) => bail!("--export takes exactly LABEL and OUT"),
        None => run_reports(config, &mut source, args.workers).await,
    }
}

async fn run_reports(
    config: PipelineConfig,
    source: &mut ImageSequenceSource,
    workers: Option<usize>,
) -> Result<()> {
    let mut pipeline = ParallelPipeline::new(config)?;
    if let Some(workers) = workers {
        pipeline = pipeline.with_workers(workers);
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping after in-flight frames");
            let _ = cancel_tx.send(true);
        }
    });

    let (report_tx, mut report_rx) = mpsc::channel(64);
    let printer = tokio::spawn(async move {
        while let Some(report) = report_rx.recv().await {
            match serde_json::to_string(&report) {
                Ok(line) => println!("{line}"),
                Err(err) => warn!(error = %err, "cannot serialize report"),
            }
        }
    });

    let stats = pipeline.run(source, cancel_rx, report_tx).await?;
    printer.await?;
    info!(
        frames = stats.frames_processed,
        skipped = stats.frames_skipped,
        fps = stats.fps(),
        "done"
    );
    Ok(())
}

async fn export_samples(
    config: PipelineConfig,
    source: &mut ImageSequenceSource,
    label: Label,
    out: &Path,
) -> Result<()> {
    let mut pipeline = VisionPipeline::new(config)?;
    let mut dataset = FeatureDataset::new();

    dataset.record(&mut pipeline, source, label).await?;

    dataset
        .save(out)
        .with_context(|| format!("writing samples to {}", out.display()))?;
    info!(samples = dataset.len(), %label, out = %out.display(), "training samples written");
    pipeline.finish();
    Ok(())
}
