//! dmaview: zero-copy DMA-BUF video presenter.
//!
//! Runs the synthetic decoder on a producer thread and the render loop on
//! this one, against the software GPU driver and a headless display.

mod config;

use anyhow::{Context, Result};
use config::AppConfig;
use crossbeam_channel::bounded;
use dmaview_core::DmaBufPool;
use dmaview_gpu::{
    GpuSession, HeadlessDisplay, NativeWindow, RenderStats, Renderer, SoftwareDriver,
};
use dmaview_media::{FrameMailbox, Producer, ProducerStats, TestPatternSource};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// What a finished run left behind.
#[derive(Debug, Clone, Copy)]
struct RunSummary {
    render: RenderStats,
    producer: ProducerStats,
    mailbox_dropped: u64,
    /// Conversion target rebuilds, one per frame size change.
    reallocations: u64,
    live_textures: u64,
    live_buffers: usize,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("dmaview starting...");

    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => AppConfig::load_from_file(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AppConfig::default(),
    };
    info!(
        width = config.surface_width,
        height = config.surface_height,
        tick_hz = config.tick_hz,
        stages = config.stages.len(),
        "configuration loaded"
    );

    let summary = run(&config)?;
    info!(
        ticks = summary.render.ticks,
        converted = summary.render.converted,
        reused = summary.render.reused,
        skipped = summary.render.skipped,
        present_failures = summary.render.present_failures,
        published = summary.producer.published,
        mailbox_dropped = summary.mailbox_dropped,
        producer_errors = summary.producer.errors,
        reallocations = summary.reallocations,
        live_textures = summary.live_textures,
        live_buffers = summary.live_buffers,
        "dmaview finished"
    );
    Ok(())
}

/// Wire producer, mailbox and renderer, run until the tick limit (or
/// forever without one), then tear down in order.
fn run(config: &AppConfig) -> Result<RunSummary> {
    let pool = DmaBufPool::new();
    let mailbox = Arc::new(FrameMailbox::new());

    let source = TestPatternSource::new(pool.clone(), config.stages.clone())
        .paced(config.source_fps)
        .repeating(config.repeat_stages);
    let producer = Producer::spawn(source, mailbox.clone(), config.producer_config())
        .context("starting producer")?;

    let driver = Rc::new(SoftwareDriver::new().with_pool(pool.clone()));
    let display = Box::new(HeadlessDisplay::new(driver.clone()));
    let window = NativeWindow::headless(config.surface_width, config.surface_height);
    let session = GpuSession::establish(driver.clone(), display, window)
        .context("setting up display")?;
    let mut renderer = Renderer::new(session, mailbox.clone(), config.renderer_config())
        .context("setting up renderer")?;

    // Held for the whole run; without max_ticks the loop runs until killed.
    let (_stop_tx, stop_rx) = bounded::<()>(1);
    let render = renderer.run(&stop_rx);

    // Producer first so nothing new lands in the mailbox, then the GPU
    // objects, then whatever frame was still waiting.
    let producer = producer.stop();
    let reallocations = renderer.converter().reallocations();
    drop(renderer);
    mailbox.clear();

    Ok(RunSummary {
        render,
        producer,
        mailbox_dropped: mailbox.stats().dropped,
        reallocations,
        live_textures: driver.counters().live_textures(),
        live_buffers: pool.live_count(),
    })
}
