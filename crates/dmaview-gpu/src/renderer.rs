//! The render loop: adopt, import, convert, present.

use crate::converter::ColorConverter;
use crate::importer::PlaneImporter;
use crate::presenter::{PresentationSurface, Presented};
use crate::session::GpuSession;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use dmaview_core::{cadence, DecodedFrame, Result, YuvMatrix};
use dmaview_media::FrameMailbox;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RendererConfig {
    pub tick_hz: u32,
    pub yuv_matrix: YuvMatrix,
    /// Stop `run` after this many ticks.
    pub max_ticks: Option<u64>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            tick_hz: cadence::DEFAULT_TICK_HZ,
            yuv_matrix: YuvMatrix::default(),
            max_ticks: None,
        }
    }
}

impl RendererConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.tick_hz.max(1)
    }
}

/// What a tick did with the mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing new; the previous image was shown again.
    Reused,
    /// A frame was adopted and converted.
    Converted { width: u32, height: u32 },
    /// A frame was adopted but could not be converted.
    Skipped { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderStats {
    pub ticks: u64,
    pub converted: u64,
    pub reused: u64,
    pub skipped: u64,
    pub present_failures: u64,
}

/// Owns every GPU object and runs on the thread that owns the context.
pub struct Renderer {
    // Field order is teardown order: conversion target and importer go
    // before the surface, whose session ends the context last.
    converter: ColorConverter,
    importer: PlaneImporter,
    surface: PresentationSurface,
    mailbox: Arc<FrameMailbox>,
    config: RendererConfig,
    stats: RenderStats,
}

impl Renderer {
    pub fn new(
        session: GpuSession,
        mailbox: Arc<FrameMailbox>,
        config: RendererConfig,
    ) -> Result<Self> {
        let driver = session.driver().clone();
        let importer = PlaneImporter::new(driver.clone());
        let converter = ColorConverter::new(driver, config.yuv_matrix)?;
        let surface = PresentationSurface::new(session)?;
        info!(tick_hz = config.tick_hz, "renderer ready");
        Ok(Self {
            converter,
            importer,
            surface,
            mailbox,
            config,
            stats: RenderStats::default(),
        })
    }

    /// One render step. Never fails: frame errors skip the frame and
    /// present errors are counted, both logged.
    pub fn tick(&mut self) -> TickOutcome {
        let outcome = match self.mailbox.adopt_latest() {
            None => TickOutcome::Reused,
            Some(frame) => self.convert(frame),
        };
        match &outcome {
            TickOutcome::Reused => self.stats.reused += 1,
            TickOutcome::Converted { .. } => self.stats.converted += 1,
            TickOutcome::Skipped { .. } => self.stats.skipped += 1,
        }

        if let Err(e) = self.surface.present(self.converter.latest()) {
            self.stats.present_failures += 1;
            warn!(error = %e, "present failed");
        }
        self.stats.ticks += 1;
        outcome
    }

    fn convert(&mut self, frame: DecodedFrame) -> TickOutcome {
        let (descriptor, lease) = frame.into_parts();
        let (width, height) = descriptor.dimensions();
        debug!(
            seq = descriptor.sequence,
            pts_ms = descriptor.pts.as_millis() as u64,
            layout = %descriptor.layout,
            width,
            height,
            "adopted frame"
        );

        let result = self.importer.import_frame(&descriptor).and_then(|planes| {
            self.converter
                .convert(&planes, width, height)
                .map(|target| target.size())
        });
        // Planes are gone; the decoder may have its buffer back.
        drop(lease);

        match result {
            Ok((width, height)) => TickOutcome::Converted { width, height },
            Err(e) => {
                if e.is_per_frame() {
                    warn!(seq = descriptor.sequence, error = %e, "frame skipped");
                } else {
                    error!(seq = descriptor.sequence, error = %e, "frame skipped");
                }
                TickOutcome::Skipped {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Tick at the configured rate until `stop` fires or disconnects, or
    /// `max_ticks` is reached.
    pub fn run(&mut self, stop: &Receiver<()>) -> RenderStats {
        let interval = self.config.tick_interval();
        let mut deadline = Instant::now();
        loop {
            self.tick();
            if self
                .config
                .max_ticks
                .is_some_and(|max| self.stats.ticks >= max)
            {
                break;
            }

            deadline += interval;
            let now = Instant::now();
            if deadline < now {
                // Behind schedule: start over instead of bursting.
                deadline = now;
            }
            match stop.recv_deadline(deadline) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!(
            ticks = self.stats.ticks,
            converted = self.stats.converted,
            skipped = self.stats.skipped,
            "render loop stopped"
        );
        self.stats
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    pub fn last_presented(&self) -> Presented {
        self.surface.last_presented()
    }

    pub fn converter(&self) -> &ColorConverter {
        &self.converter
    }

    pub fn importer(&self) -> &PlaneImporter {
        &self.importer
    }

    pub fn surface(&self) -> &PresentationSurface {
        &self.surface
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::NativeWindow;
    use crate::software::{HeadlessDisplay, SoftwareDriver};
    use crossbeam_channel::bounded;
    use dmaview_core::{BufferLease, DmaBufPool, Fourcc, FrameDescriptor, PixelLayout};
    use parking_lot::Mutex;
    use std::io;
    use std::rc::Rc;
    use tracing_subscriber::fmt::MakeWriter;

    /// Collects formatted log output in memory.
    #[derive(Clone, Default)]
    struct LogCapture(Arc<Mutex<Vec<u8>>>);

    impl LogCapture {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for LogCapture {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    struct Rig {
        pool: DmaBufPool,
        sw: Rc<SoftwareDriver>,
        mailbox: Arc<FrameMailbox>,
        renderer: Renderer,
    }

    fn rig(config: RendererConfig) -> Rig {
        let pool = DmaBufPool::new();
        let sw = Rc::new(SoftwareDriver::new().with_pool(pool.clone()));
        let display = Box::new(HeadlessDisplay::new(sw.clone()));
        let session =
            GpuSession::establish(sw.clone(), display, NativeWindow::headless(8, 8)).unwrap();
        let mailbox = Arc::new(FrameMailbox::new());
        let renderer = Renderer::new(session, mailbox.clone(), config).unwrap();
        Rig {
            pool,
            sw,
            mailbox,
            renderer,
        }
    }

    fn gray_frame(pool: &DmaBufPool, size: u32, luma: u8, seq: u64) -> DecodedFrame {
        let buf = pool.allocate_with((size * size) as usize, |b| b.fill(luma));
        let descriptor = FrameDescriptor::new(size, size, PixelLayout::Gray8)
            .with_plane(buf.handle(), 0, size)
            .with_timing(Duration::ZERO, seq);
        DecodedFrame::new(descriptor, BufferLease::new(buf))
    }

    #[test]
    fn test_tick_without_frames_shows_placeholder() {
        let mut rig = rig(RendererConfig::default());
        assert_eq!(rig.renderer.tick(), TickOutcome::Reused);
        assert_eq!(rig.renderer.last_presented(), Presented::Placeholder);
        assert_eq!(rig.renderer.stats().reused, 1);
    }

    #[test]
    fn test_tick_converts_then_reuses() {
        let mut rig = rig(RendererConfig::default());
        rig.mailbox.publish(gray_frame(&rig.pool, 8, 235, 0));
        assert_eq!(
            rig.renderer.tick(),
            TickOutcome::Converted {
                width: 8,
                height: 8
            }
        );
        // The frame's buffer went back as soon as the tick finished.
        assert_eq!(rig.pool.live_count(), 0);

        let shown = rig.renderer.last_presented();
        assert!(matches!(shown, Presented::Frame { width: 8, .. }));
        assert_eq!(rig.renderer.tick(), TickOutcome::Reused);
        assert_eq!(rig.renderer.last_presented(), shown);
        let screen = rig.sw.front_buffer();
        assert_eq!(screen.pixel(4, 4).map(|p| p[3]), Some(255));
        assert!(screen.pixel(4, 4).unwrap()[0] >= 253);
    }

    #[test]
    fn test_bad_frame_is_skipped_and_last_good_kept() {
        let mut rig = rig(RendererConfig::default());
        rig.mailbox.publish(gray_frame(&rig.pool, 8, 235, 0));
        rig.renderer.tick();
        let good = rig.renderer.last_presented();

        let xr24 = PixelLayout::Unknown(Fourcc::from_bytes(*b"XR24"));
        let bad = DecodedFrame::new(FrameDescriptor::new(8, 8, xr24), BufferLease::none());
        rig.mailbox.publish(bad);
        assert!(matches!(rig.renderer.tick(), TickOutcome::Skipped { .. }));
        assert_eq!(rig.renderer.last_presented(), good);
        assert_eq!(rig.renderer.stats().skipped, 1);
    }

    #[test]
    fn test_skipped_frame_logs_warning() {
        let mut rig = rig(RendererConfig::default());
        let xr24 = PixelLayout::Unknown(Fourcc::from_bytes(*b"XR24"));
        let bad = DecodedFrame::new(
            FrameDescriptor::new(8, 8, xr24).with_timing(Duration::ZERO, 7),
            BufferLease::none(),
        );
        rig.mailbox.publish(bad);

        let capture = LogCapture::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        let outcome = tracing::subscriber::with_default(subscriber, || rig.renderer.tick());

        assert!(matches!(outcome, TickOutcome::Skipped { .. }));
        let logs = capture.contents();
        let line = logs
            .lines()
            .find(|l| l.contains("frame skipped"))
            .unwrap_or_else(|| panic!("no skip warning in {logs:?}"));
        assert!(line.contains("WARN"), "{line}");
        assert!(line.contains("seq=7"), "{line}");
        assert!(line.contains("XR24"), "{line}");
    }

    #[test]
    fn test_present_failure_does_not_stop_ticks() {
        let pool = DmaBufPool::new();
        let sw = Rc::new(SoftwareDriver::new().with_pool(pool));
        let display = HeadlessDisplay::new(sw.clone());
        let controls = display.controls();
        let session =
            GpuSession::establish(sw, Box::new(display), NativeWindow::headless(4, 4)).unwrap();
        let mailbox = Arc::new(FrameMailbox::new());
        let mut renderer = Renderer::new(session, mailbox, RendererConfig::default()).unwrap();

        controls.set_fail_swaps(true);
        renderer.tick();
        renderer.tick();
        assert_eq!(renderer.stats().present_failures, 2);
        assert_eq!(renderer.stats().ticks, 2);
    }

    #[test]
    fn test_run_honours_max_ticks_and_stop() {
        let mut bounded_rig = rig(RendererConfig {
            tick_hz: 1000,
            max_ticks: Some(3),
            ..RendererConfig::default()
        });
        let (_tx, rx) = bounded::<()>(1);
        assert_eq!(bounded_rig.renderer.run(&rx).ticks, 3);

        let mut open_rig = rig(RendererConfig {
            tick_hz: 1000,
            ..RendererConfig::default()
        });
        let (tx, rx) = bounded::<()>(1);
        tx.send(()).unwrap();
        assert_eq!(open_rig.renderer.run(&rx).ticks, 1);
    }

    #[test]
    fn test_teardown_releases_everything() {
        let rig = rig(RendererConfig::default());
        rig.mailbox.publish(gray_frame(&rig.pool, 8, 100, 0));
        let Rig {
            pool,
            sw,
            mailbox,
            mut renderer,
        } = rig;
        renderer.tick();
        drop(renderer);
        let c = sw.counters();
        assert_eq!(c.live_textures(), 0);
        assert_eq!(c.live_framebuffers(), 0);
        assert_eq!(c.live_programs(), 0);
        assert_eq!(c.live_images(), 0);
        assert!(!mailbox.has_pending());
        assert_eq!(pool.live_count(), 0);
    }

    #[test]
    fn test_tick_interval() {
        let config = RendererConfig::default();
        assert_eq!(config.tick_interval(), Duration::from_secs(1) / 60);
    }
}
