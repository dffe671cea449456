//! Lookout live analysis demo: a synthetic camera feeding the frame pipeline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use lookout::capture::SyntheticSource;
use lookout::diagnostics::TracingDiagnostics;
use lookout::display::{headline, LabelMailbox, OverlaySlot, VisualList};
use lookout::inference::builtin::{ColourRegionDetector, DominantColourClassifier};
use lookout::pipeline::{FramePipeline, FrameWorker, PipelineParts};
use lookout::Config;

const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lookout=debug")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Lookout launching...");

    // Load configuration
    let config_path = std::env::var_os("LOOKOUT_CONFIG").map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    lookout::CONFIG.store(Arc::new(config.clone()));
    info!("Configuration: {:?}", config);

    let mailbox = LabelMailbox::new();
    let surface = VisualList::with_base((0..config.overlay.base_children).map(|i| format!("base-{i}")));
    let parts = PipelineParts {
        classifier: Box::new(DominantColourClassifier::new(config.model.input_size)),
        detector: Box::new(ColourRegionDetector::new(
            config.detector.confidence_threshold,
        )),
        surface: Box::new(surface),
        sink: Arc::new(mailbox.clone()),
        diagnostics: Arc::new(TracingDiagnostics),
    };
    let pipeline = Arc::new(FramePipeline::new(&config, parts)?);
    let worker = FrameWorker::spawn(pipeline.clone(), &config.pipeline)?;

    // Spawn capture task
    let sender = worker.sender();
    let mut source = SyntheticSource::new(&config.capture);
    let frame_period = Duration::from_secs(1) / config.capture.fps.max(1);
    let capture_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(frame_period);
        loop {
            ticker.tick().await;
            if !sender.offer(source.next_frame()) {
                info!("Frame queue closed, capture stopping");
                break;
            }
        }
    });

    // Display task: render the newest label headline at its own cadence
    let mut labels = mailbox.subscribe();
    let overlay = pipeline.overlay().clone();
    let display_handle = tokio::spawn(async move {
        while labels.changed().await.is_ok() {
            let Some(result) = labels.borrow_and_update().clone() else {
                continue;
            };
            let boxed = match overlay.slot() {
                OverlaySlot::Occupied(visual) => format!("{} at {:?}", visual.label, visual.rect),
                OverlaySlot::Empty => "none".to_string(),
            };
            info!(
                "Frame {}: {} (box: {})",
                result.sequence,
                headline(&result).unwrap_or_default(),
                boxed
            );
        }
    });

    let stats_pipeline = pipeline.clone();
    let stats_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATS_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            info!("Pipeline stats: {:?}", stats_pipeline.metrics());
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, shutting down");

    capture_handle.abort();
    stats_handle.abort();
    let grace = config.shutdown_grace();
    match tokio::task::spawn_blocking(move || worker.shutdown(grace)).await? {
        Ok(()) => {}
        Err(e) => warn!("{}", e),
    }
    display_handle.abort();

    info!("Final stats: {:?}", pipeline.metrics());
    info!("Lookout shutting down");
    Ok(())
}
