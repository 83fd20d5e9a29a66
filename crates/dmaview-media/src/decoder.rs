//! Frame sources: the decoder side of the producer loop.
//!
//! A hardware pipeline (V4L2 stateless decode into DMA-BUF, for example)
//! plugs in by implementing [`FrameSource`]. [`TestPatternSource`] renders
//! moving color bars straight into DMA-BUFs so the whole path can run without
//! a decoder, and [`ScriptedSource`] replays a fixed list of frames.

use dmaview_core::{
    BufferLease, DecodedFrame, DmaBufPool, DmaViewError, Fourcc, FrameDescriptor, PixelLayout,
    Result,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Something that yields decoded frames.
pub trait FrameSource: Send {
    /// Wait at most `timeout` for the next frame.
    ///
    /// `Ok(None)` means nothing was ready yet, which is the normal steady
    /// state. [`DmaViewError::EndOfStream`] ends the producer loop.
    fn try_pull_frame(&mut self, timeout: Duration) -> Result<Option<DecodedFrame>>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn try_pull_frame(&mut self, timeout: Duration) -> Result<Option<DecodedFrame>> {
        (**self).try_pull_frame(timeout)
    }
}

/// One run of identically shaped frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternStage {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    /// Frames to emit before moving to the next stage.
    pub frames: u32,
}

impl PatternStage {
    pub fn new(width: u32, height: u32, layout: PixelLayout, frames: u32) -> Self {
        Self {
            width,
            height,
            layout,
            frames,
        }
    }
}

/// Synthetic decoder emitting color bars into pooled DMA-BUFs.
pub struct TestPatternSource {
    pool: DmaBufPool,
    stages: Vec<PatternStage>,
    stage: usize,
    emitted_in_stage: u32,
    sequence: u64,
    frame_interval: Option<Duration>,
    next_due: Option<Instant>,
    repeat: bool,
}

/// Row pitch alignment, matching what V4L2 decoders typically hand out.
const STRIDE_ALIGN: u32 = 64;

// Color bars: white, yellow, cyan, green, magenta, red, blue, black.
const BARS: [[f32; 3]; 8] = [
    [1.0, 1.0, 1.0],
    [1.0, 1.0, 0.0],
    [0.0, 1.0, 1.0],
    [0.0, 1.0, 0.0],
    [1.0, 0.0, 1.0],
    [1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0],
    [0.0, 0.0, 0.0],
];

impl TestPatternSource {
    pub fn new(pool: DmaBufPool, stages: Vec<PatternStage>) -> Self {
        Self {
            pool,
            stages,
            stage: 0,
            emitted_in_stage: 0,
            sequence: 0,
            frame_interval: None,
            next_due: None,
            repeat: false,
        }
    }

    /// Emit at most `fps` frames per second instead of one per pull.
    pub fn paced(mut self, fps: f64) -> Self {
        self.frame_interval = (fps > 0.0).then(|| Duration::from_secs_f64(1.0 / fps));
        self
    }

    /// Start again from the first stage instead of ending the stream.
    pub fn repeating(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    fn current_stage(&mut self) -> Option<PatternStage> {
        while self.stage < self.stages.len() {
            let stage = self.stages[self.stage];
            if self.emitted_in_stage < stage.frames {
                return Some(stage);
            }
            self.stage += 1;
            self.emitted_in_stage = 0;
        }
        if self.repeat && self.stages.iter().any(|s| s.frames > 0) {
            self.stage = 0;
            return self.current_stage();
        }
        None
    }

    fn render(&mut self, stage: PatternStage) -> DecodedFrame {
        let seq = self.sequence;
        self.sequence += 1;
        self.emitted_in_stage += 1;

        let pts = frame_pts(self.frame_interval, seq);
        let (width, height) = (stage.width, stage.height);
        let luma_stride = align(width, STRIDE_ALIGN);
        let luma_size = luma_stride as usize * height as usize;
        let shift = (seq as u32).wrapping_mul(8);

        match stage.layout {
            PixelLayout::Nv12 => {
                let (cw, ch) = (width.div_ceil(2), height.div_ceil(2));
                let chroma_stride = align(cw * 2, STRIDE_ALIGN);
                let chroma_size = chroma_stride as usize * ch as usize;
                let buf = self.pool.allocate_with(luma_size + chroma_size, |bytes| {
                    let (luma, chroma) = bytes.split_at_mut(luma_size);
                    fill_rows(luma, luma_stride, height, |x| bar_yuv(x, width, shift)[0]);
                    fill_chroma_rows(chroma, chroma_stride, ch, cw, |cx| {
                        let [_, u, v] = bar_yuv(cx * 2, width, shift);
                        [u, v]
                    });
                });
                let descriptor = FrameDescriptor::new(width, height, PixelLayout::Nv12)
                    .with_plane(buf.handle(), 0, luma_stride)
                    .with_plane(buf.handle(), luma_size as u32, chroma_stride)
                    .with_timing(pts, seq);
                DecodedFrame::new(descriptor, BufferLease::new(buf))
            }
            PixelLayout::Gray8 => {
                let buf = self.pool.allocate_with(luma_size, |bytes| {
                    fill_rows(bytes, luma_stride, height, |x| bar_yuv(x, width, shift)[0]);
                });
                let descriptor = FrameDescriptor::new(width, height, PixelLayout::Gray8)
                    .with_plane(buf.handle(), 0, luma_stride)
                    .with_timing(pts, seq);
                DecodedFrame::new(descriptor, BufferLease::new(buf))
            }
            PixelLayout::Unknown(code) => {
                // Packed 32-bit content we cannot convert; still a real buffer.
                let stride = align(width * 4, STRIDE_ALIGN);
                let buf = self
                    .pool
                    .allocate_with(stride as usize * height as usize, |_| {});
                let descriptor = FrameDescriptor::new(width, height, PixelLayout::Unknown(code))
                    .with_plane(buf.handle(), 0, stride)
                    .with_timing(pts, seq);
                DecodedFrame::new(descriptor, BufferLease::new(buf))
            }
        }
    }
}

impl FrameSource for TestPatternSource {
    fn try_pull_frame(&mut self, timeout: Duration) -> Result<Option<DecodedFrame>> {
        let Some(stage) = self.current_stage() else {
            info!(frames = self.sequence, "test pattern finished");
            return Err(DmaViewError::EndOfStream);
        };

        if let Some(interval) = self.frame_interval {
            let now = Instant::now();
            let due = *self.next_due.get_or_insert(now);
            if due > now {
                let wait = due - now;
                if wait > timeout {
                    std::thread::sleep(timeout);
                    return Ok(None);
                }
                std::thread::sleep(wait);
            }
            // Don't try to catch up after a stall.
            self.next_due = Some((due + interval).max(Instant::now()));
        }

        let frame = self.render(stage);
        debug!(
            seq = frame.descriptor.sequence,
            layout = %frame.descriptor.layout,
            width = frame.descriptor.width,
            height = frame.descriptor.height,
            "pattern frame"
        );
        Ok(Some(frame))
    }
}

/// Replays a fixed list of frames, one per pull, then ends the stream.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    frames: VecDeque<DecodedFrame>,
}

impl ScriptedSource {
    pub fn new(frames: impl IntoIterator<Item = DecodedFrame>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for ScriptedSource {
    fn try_pull_frame(&mut self, _timeout: Duration) -> Result<Option<DecodedFrame>> {
        self.frames
            .pop_front()
            .map(Some)
            .ok_or(DmaViewError::EndOfStream)
    }
}

#[inline]
fn align(value: u32, to: u32) -> u32 {
    value.div_ceil(to) * to
}

fn fill_rows(plane: &mut [u8], stride: u32, rows: u32, sample: impl Fn(u32) -> u8) {
    let stride = stride as usize;
    if stride == 0 || plane.len() < stride {
        return;
    }
    let (first, rest) = plane.split_at_mut(stride);
    for (x, px) in first.iter_mut().enumerate() {
        *px = sample(x as u32);
    }
    for row in rest.chunks_exact_mut(stride).take(rows.saturating_sub(1) as usize) {
        row.copy_from_slice(first);
    }
}

fn fill_chroma_rows(
    plane: &mut [u8],
    stride: u32,
    rows: u32,
    width: u32,
    sample: impl Fn(u32) -> [u8; 2],
) {
    let stride = stride as usize;
    if stride == 0 || plane.len() < stride {
        return;
    }
    let (first, rest) = plane.split_at_mut(stride);
    for cx in 0..width {
        let [u, v] = sample(cx);
        let i = cx as usize * 2;
        first[i] = u;
        first[i + 1] = v;
    }
    for row in rest.chunks_exact_mut(stride).take(rows.saturating_sub(1) as usize) {
        row.copy_from_slice(first);
    }
}

/// BT.709 limited-range YUV of the color bar under column `x`.
fn bar_yuv(x: u32, width: u32, shift: u32) -> [u8; 3] {
    let width = width.max(1);
    let pos = (x.wrapping_add(shift)) % width;
    let [r, g, b] = BARS[(pos as u64 * 8 / width as u64) as usize];
    let y = 0.2126 * r + 0.7152 * g + 0.0722 * b;
    let u = (b - y) / 1.8556;
    let v = (r - y) / 1.5748;
    [
        (16.0 + 219.0 * y).round() as u8,
        (128.0 + 224.0 * u).round() as u8,
        (128.0 + 224.0 * v).round() as u8,
    ]
}

/// Presentation time of frame `seq`; unpaced sources step 33 ms.
fn frame_pts(interval: Option<Duration>, seq: u64) -> Duration {
    let step_ns = interval.map_or(33_000_000, |i| {
        u64::try_from(i.as_nanos()).unwrap_or(u64::MAX)
    });
    Duration::from_nanos(step_ns.saturating_mul(seq))
}

/// Fourcc used to inject frames the renderer must reject.
pub const UNSUPPORTED_TEST_FOURCC: Fourcc = Fourcc::from_bytes(*b"XR24");
