//! Decoder to screen, through the mailbox and the render loop.

use crossbeam_channel::bounded;
use dmaview_core::{DmaBufPool, PixelLayout};
use dmaview_gpu::{
    GpuSession, HeadlessDisplay, NativeWindow, Presented, Renderer, RendererConfig,
    SoftwareDriver, TickOutcome,
};
use dmaview_media::decoder::UNSUPPORTED_TEST_FOURCC;
use dmaview_media::{
    FrameMailbox, FrameSource, PatternStage, Producer, ProducerConfig, TestPatternSource,
};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

struct Pipeline {
    pool: DmaBufPool,
    driver: Rc<SoftwareDriver>,
    mailbox: Arc<FrameMailbox>,
    renderer: Renderer,
}

fn pipeline(config: RendererConfig) -> Pipeline {
    let pool = DmaBufPool::new();
    let driver = Rc::new(SoftwareDriver::new().with_pool(pool.clone()));
    let display = Box::new(HeadlessDisplay::new(driver.clone()));
    // The window stays small; frame size only affects the conversion target.
    let session =
        GpuSession::establish(driver.clone(), display, NativeWindow::headless(32, 18)).unwrap();
    let mailbox = Arc::new(FrameMailbox::new());
    let renderer = Renderer::new(session, mailbox.clone(), config).unwrap();
    Pipeline {
        pool,
        driver,
        mailbox,
        renderer,
    }
}

fn presented_texture(p: &Pipeline) -> Option<(u32, u32, u32)> {
    match p.renderer.last_presented() {
        Presented::Frame {
            texture,
            width,
            height,
        } => Some((texture.0, width, height)),
        _ => None,
    }
}

#[test]
fn resolution_changes_reallocate_once_and_bad_format_keeps_last_frame() {
    let mut p = pipeline(RendererConfig::default());
    let mut source = TestPatternSource::new(
        p.pool.clone(),
        vec![
            PatternStage::new(1920, 1080, PixelLayout::Nv12, 2),
            PatternStage::new(3840, 2160, PixelLayout::Nv12, 2),
            PatternStage::new(640, 360, PixelLayout::Unknown(UNSUPPORTED_TEST_FOURCC), 1),
        ],
    );
    let mut step = |p: &mut Pipeline| {
        let frame = source.try_pull_frame(Duration::ZERO).unwrap().unwrap();
        p.mailbox.publish(frame);
        p.renderer.tick()
    };

    assert_eq!(
        step(&mut p),
        TickOutcome::Converted {
            width: 1920,
            height: 1080
        }
    );
    assert_eq!(p.renderer.converter().reallocations(), 1);
    step(&mut p);
    assert_eq!(p.renderer.converter().reallocations(), 1);

    assert_eq!(
        step(&mut p),
        TickOutcome::Converted {
            width: 3840,
            height: 2160
        }
    );
    assert_eq!(p.renderer.converter().reallocations(), 2);
    let uhd = presented_texture(&p).unwrap();
    assert_eq!((uhd.1, uhd.2), (3840, 2160));

    step(&mut p);
    assert_eq!(p.renderer.converter().reallocations(), 2);
    assert_eq!(presented_texture(&p), Some(uhd), "4K target must be reused");

    assert!(matches!(step(&mut p), TickOutcome::Skipped { .. }));
    assert_eq!(p.renderer.converter().reallocations(), 2);
    assert_eq!(presented_texture(&p), Some(uhd));

    // Nothing new: the last good frame keeps being shown.
    assert_eq!(p.renderer.tick(), TickOutcome::Reused);
    assert_eq!(presented_texture(&p), Some(uhd));

    let stats = p.renderer.stats();
    assert_eq!((stats.converted, stats.skipped, stats.reused), (4, 1, 1));
    assert_eq!(stats.present_failures, 0);
    assert_eq!(p.pool.live_count(), 0, "every lease released after its tick");
    assert_eq!(p.driver.counters().live_images(), 0);
}

#[test]
fn converted_pattern_reaches_the_screen() {
    let mut p = pipeline(RendererConfig::default());
    let mut source = TestPatternSource::new(
        p.pool.clone(),
        vec![PatternStage::new(64, 36, PixelLayout::Nv12, 1)],
    );
    p.mailbox
        .publish(source.try_pull_frame(Duration::ZERO).unwrap().unwrap());
    p.renderer.tick();

    let screen = p.driver.front_buffer();
    // Leftmost bar is white.
    let left = screen.pixel(0, 9).unwrap();
    assert!(left.iter().all(|&c| c >= 240), "left bar {left:?}");
    // Rightmost bar is black.
    let right = screen.pixel(31, 9).unwrap();
    assert!(right[..3].iter().all(|&c| c <= 15), "right bar {right:?}");
    assert_eq!(right[3], 255);
}

#[test]
fn threaded_producer_and_render_loop_shut_down_clean() {
    let mut p = pipeline(RendererConfig {
        tick_hz: 500,
        max_ticks: Some(40),
        ..RendererConfig::default()
    });
    let source = TestPatternSource::new(
        p.pool.clone(),
        vec![
            PatternStage::new(160, 90, PixelLayout::Nv12, 5),
            PatternStage::new(96, 96, PixelLayout::Gray8, 5),
        ],
    )
    .repeating(true);
    let producer = Producer::spawn(
        source,
        p.mailbox.clone(),
        ProducerConfig {
            poll_interval: Duration::from_millis(1),
            pull_timeout: Duration::from_millis(1),
        },
    )
    .unwrap();

    let (_stop_tx, stop_rx) = bounded::<()>(1);
    let stats = p.renderer.run(&stop_rx);
    assert_eq!(stats.ticks, 40);
    assert!(stats.converted > 0);
    assert_eq!(stats.skipped, 0);

    let produced = producer.stop();
    assert!(produced.published > 0);
    assert_eq!(produced.errors, 0);

    let Pipeline {
        pool,
        driver,
        mailbox,
        renderer,
    } = p;
    drop(renderer);
    mailbox.clear();

    let c = driver.counters();
    assert_eq!(
        (c.live_textures(), c.live_framebuffers(), c.live_programs(), c.live_images()),
        (0, 0, 0, 0)
    );
    assert_eq!(pool.live_count(), 0);
    assert_eq!(pool.allocated(), pool.released());
}
