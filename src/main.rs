//! Pivot: real-time PIV frame pairing and block matching

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use flume::bounded;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pivot::capture::FrameSource;
use pivot::pipeline::{EstimationWorker, FlowEstimate, IngestOutcome, PivSession};
use pivot::{export, BlockMatcher, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pivot=info")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Pivot launching...");

    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    info!(
        "Matcher: window {} px, margin {} px, {:?}; target dt {:.3} ms @ {} Hz",
        config.matcher.window_size,
        config.matcher.search_margin,
        config.matcher.method,
        config.pipeline.target_dt_sec * 1000.0,
        config.pipeline.viz_hz
    );

    // Estimation worker and session
    let matcher = BlockMatcher::new(config.matcher)?;
    let (results_tx, results_rx) = bounded::<Arc<FlowEstimate>>(config.pipeline.result_queue);
    let worker = EstimationWorker::spawn(matcher, Some(results_tx))?;
    let mut session = PivSession::new(&config.pipeline, worker.dispatcher())?;
    let buffer = Arc::clone(session.buffer());

    let mut source = FrameSource::open(&config.capture)?;
    info!("Using frame source: {}", source.describe());

    // Spawn result reporter
    let reporter = tokio::spawn(async move {
        while let Ok(estimate) = results_rx.recv_async().await {
            let (mean_dx, mean_dy) = estimate.field.mean_displacement().unwrap_or((0.0, 0.0));
            info!(
                "Flow #{}: {} vectors over dt {:.3} ms, mean ({:.2}, {:.2}) px, max {:.2} px, {} us",
                estimate.sequence,
                estimate.field.len(),
                estimate.dt * 1000.0,
                mean_dx,
                mean_dy,
                estimate.field.max_magnitude(),
                estimate.compute_time.as_micros()
            );
        }
    });

    // Spawn capture task
    let capture_handle = tokio::spawn(async move {
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);
        let (mut dispatched, mut skipped) = (0u64, 0u64);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Interrupt received, stopping capture");
                    break;
                }
                next = source.next_frame() => match next {
                    Ok(Some(captured)) => {
                        match session.ingest(&captured.frame, captured.timestamp) {
                            Ok(IngestOutcome::Dispatched) => dispatched += 1,
                            Ok(IngestOutcome::SkippedBusy) => skipped += 1,
                            Ok(IngestOutcome::WorkerClosed) => {
                                error!("Estimation worker gone, stopping capture");
                                break;
                            }
                            Ok(_) => {}
                            Err(e) => warn!("Dropping frame {}: {}", captured.sequence, e),
                        }
                    }
                    Ok(None) => {
                        info!("Frame source exhausted");
                        break;
                    }
                    Err(e) => {
                        error!("Capture error: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }

        info!(
            "Capture finished: {} estimations dispatched, {} skipped while busy",
            dispatched, skipped
        );
        session
    });

    let session = capture_handle.await?;
    if let Some(summary) = session.history().summary() {
        info!(
            "Luminance over last {} frames: mean {:.2}, min {:.2}, max {:.2}",
            summary.count, summary.mean, summary.min, summary.max
        );
    }
    drop(session);

    worker.shutdown();
    reporter.await?;

    if config.export.enabled {
        match buffer.snapshot() {
            Some(snapshot) => {
                let paths = export::spawn_raw_dump(snapshot, config.export.out_dir.clone()).await??;
                info!(
                    "Raw frames written to {} ({})",
                    paths.raw.display(),
                    paths.meta.display()
                );
            }
            None => warn!("No frames captured, nothing to export"),
        }
    }

    let stats = buffer.stats();
    info!(
        "Pivot shutting down: {} frames written, {} evicted",
        stats.frames_written, stats.frames_evicted
    );
    Ok(())
}
