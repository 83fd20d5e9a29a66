//! Presentation policy, binding-state isolation and GPU object lifetimes
//! across the gpu crate's public surface.

use dmaview_core::{
    BufferLease, DecodedFrame, DmaBufPool, FrameDescriptor, PixelLayout, YuvMatrix,
};
use dmaview_gpu::{
    ColorConverter, GpuDriver, GpuSession, HeadlessDisplay, NativeWindow, PlaneImporter,
    Presented, Renderer, RendererConfig, SoftwareDriver, TickOutcome, Viewport,
};
use dmaview_media::FrameMailbox;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

fn nv12_frame(pool: &DmaBufPool, width: u32, height: u32, yuv: [u8; 3], seq: u64) -> DecodedFrame {
    let luma_size = (width * height) as usize;
    let chroma_size = (width * height / 2) as usize;
    let buf = pool.allocate_with(luma_size + chroma_size, |bytes| {
        let (luma, chroma) = bytes.split_at_mut(luma_size);
        luma.fill(yuv[0]);
        for pair in chroma.chunks_exact_mut(2) {
            pair.copy_from_slice(&[yuv[1], yuv[2]]);
        }
    });
    let descriptor = FrameDescriptor::new(width, height, PixelLayout::Nv12)
        .with_plane(buf.handle(), 0, width)
        .with_plane(buf.handle(), luma_size as u32, width)
        .with_timing(Duration::from_millis(seq * 33), seq);
    DecodedFrame::new(descriptor, BufferLease::new(buf))
}

fn renderer(
    pool: &DmaBufPool,
    window: (u32, u32),
) -> (Rc<SoftwareDriver>, Arc<FrameMailbox>, Renderer) {
    let driver = Rc::new(SoftwareDriver::new().with_pool(pool.clone()));
    let display = Box::new(HeadlessDisplay::new(driver.clone()));
    let session = GpuSession::establish(
        driver.clone(),
        display,
        NativeWindow::headless(window.0, window.1),
    )
    .unwrap();
    let mailbox = Arc::new(FrameMailbox::new());
    let renderer = Renderer::new(session, mailbox.clone(), RendererConfig::default()).unwrap();
    (driver, mailbox, renderer)
}

#[test]
fn only_the_newest_frame_is_presented() {
    let pool = DmaBufPool::new();
    let (driver, mailbox, mut renderer) = renderer(&pool, (8, 8));

    // Studio-range red, then studio-range blue; only blue should ever draw.
    mailbox.publish(nv12_frame(&pool, 8, 8, [63, 102, 240], 0));
    mailbox.publish(nv12_frame(&pool, 8, 8, [32, 240, 118], 1));
    assert_eq!(pool.live_count(), 1, "overwritten frame released on publish");

    assert!(matches!(renderer.tick(), TickOutcome::Converted { .. }));
    let px = driver.front_buffer().pixel(4, 4).unwrap();
    assert!(px[2] > 240 && px[0] < 15, "expected blue, got {px:?}");
    assert_eq!(mailbox.stats().dropped, 1);
    assert_eq!(pool.live_count(), 0);
}

#[test]
fn placeholder_until_first_frame_then_frame_forever() {
    let pool = DmaBufPool::new();
    let (_driver, mailbox, mut renderer) = renderer(&pool, (4, 4));
    for _ in 0..3 {
        assert_eq!(renderer.tick(), TickOutcome::Reused);
        assert_eq!(renderer.last_presented(), Presented::Placeholder);
    }

    mailbox.publish(nv12_frame(&pool, 16, 8, [128, 128, 128], 0));
    renderer.tick();
    for _ in 0..3 {
        renderer.tick();
        assert!(matches!(
            renderer.last_presented(),
            Presented::Frame {
                width: 16,
                height: 8,
                ..
            }
        ));
    }
    assert_eq!(renderer.surface().presents(), 7);
}

#[test]
fn conversion_leaves_host_binding_state_untouched() {
    let pool = DmaBufPool::new();
    let driver = Rc::new(SoftwareDriver::new().with_pool(pool.clone()));
    let gpu: Rc<dyn GpuDriver> = driver.clone();

    // Some other renderer's state sharing the context.
    let foreign = driver.create_texture().unwrap();
    let fb = driver.create_framebuffer().unwrap();
    driver.bind_framebuffer(Some(fb));
    driver.active_texture(2);
    driver.bind_texture(Some(foreign));
    driver.enable_vertex_attrib(5);
    driver.viewport(Viewport {
        x: 3,
        y: 7,
        width: 100,
        height: 50,
    });
    let before = driver.binding_state();

    let importer = PlaneImporter::new(gpu.clone());
    let mut converter = ColorConverter::new(gpu, YuvMatrix::Bt709Limited).unwrap();
    for (seq, size) in [(0, 16), (1, 16), (2, 32)] {
        let frame = nv12_frame(&pool, size, size, [180, 90, 200], seq);
        let planes = importer.import_frame(&frame.descriptor).unwrap();
        converter.convert(&planes, size, size).unwrap();
        assert_eq!(driver.binding_state(), before, "after frame {seq}");
    }

    // A failed conversion restores state too.
    let frame = nv12_frame(&pool, 16, 16, [0, 0, 0], 3);
    let planes = importer.import_frame(&frame.descriptor).unwrap();
    assert!(converter.convert(&planes, 32, 32).is_err());
    assert_eq!(driver.binding_state(), before);
    assert_eq!(converter.reallocations(), 2);
}

#[test]
fn gpu_objects_balance_over_many_ticks() {
    let pool = DmaBufPool::new();
    let (driver, mailbox, mut renderer) = renderer(&pool, (8, 8));
    let baseline = driver.counters();

    for seq in 0..50u64 {
        let size = if seq % 10 < 5 { 16 } else { 24 };
        mailbox.publish(nv12_frame(&pool, size, size, [100, 120, 140], seq));
        renderer.tick();
        let c = driver.counters();
        assert_eq!(c.live_images(), 0, "imports released within the tick");
        // Placeholder and conversion target, plus the target's framebuffer.
        assert_eq!(c.live_textures(), baseline.live_textures() + 1);
        assert_eq!(c.live_framebuffers(), 1);
    }
    assert_eq!(renderer.converter().reallocations(), 10);
    assert_eq!(renderer.importer().imported(), 100);

    drop(renderer);
    let c = driver.counters();
    assert_eq!(
        (c.live_textures(), c.live_framebuffers(), c.live_programs(), c.live_images()),
        (0, 0, 0, 0)
    );
    assert_eq!(pool.live_count(), 0);
}
