//! Mailbox behavior under real thread contention, with pooled buffers so
//! leaks show up as live allocations.

use dmaview_core::{BufferLease, DecodedFrame, DmaBufPool, FrameDescriptor, PixelLayout};
use dmaview_media::FrameMailbox;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn frame(pool: &DmaBufPool, seq: u64) -> DecodedFrame {
    let buf = pool.allocate_with(16, |b| b.fill(seq as u8));
    let descriptor = FrameDescriptor::new(4, 4, PixelLayout::Gray8)
        .with_plane(buf.handle(), 0, 4)
        .with_timing(Duration::ZERO, seq);
    DecodedFrame::new(descriptor, BufferLease::new(buf))
}

#[test]
fn single_producer_sequences_only_move_forward() {
    const PUBLISHES: u64 = 10_000;
    let pool = DmaBufPool::new();
    let mailbox = Arc::new(FrameMailbox::new());
    let done = Arc::new(AtomicBool::new(false));

    let producer = {
        let pool = pool.clone();
        let mailbox = mailbox.clone();
        let done = done.clone();
        thread::spawn(move || {
            for seq in 0..PUBLISHES {
                mailbox.publish(frame(&pool, seq));
            }
            done.store(true, Ordering::Release);
        })
    };

    let mut last = None;
    let mut adopted = 0u64;
    loop {
        let finished = done.load(Ordering::Acquire);
        while let Some(frame) = mailbox.adopt_latest() {
            let seq = frame.descriptor.sequence;
            assert!(last.map_or(true, |prev| seq > prev), "{seq} after {last:?}");
            last = Some(seq);
            adopted += 1;
        }
        if finished {
            break;
        }
        thread::yield_now();
    }
    producer.join().unwrap();

    // The newest frame always survives to be adopted.
    assert_eq!(last, Some(PUBLISHES - 1));
    let stats = mailbox.stats();
    assert_eq!(stats.published, PUBLISHES);
    assert_eq!(stats.adopted, adopted);
    assert_eq!(stats.adopted + stats.dropped, PUBLISHES);
    assert_eq!(pool.live_count(), 0);
}

#[test]
fn contended_publish_and_adopt_lose_nothing() {
    const PRODUCERS: u64 = 4;
    const PER_PRODUCER: u64 = 3_000;
    let pool = DmaBufPool::new();
    let mailbox = Arc::new(FrameMailbox::new());

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let pool = pool.clone();
            let mailbox = mailbox.clone();
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    mailbox.publish(frame(&pool, p * PER_PRODUCER + i));
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..2)
        .map(|_| {
            let mailbox = mailbox.clone();
            thread::spawn(move || {
                let mut adopted = 0u64;
                for _ in 0..PER_PRODUCER {
                    if mailbox.adopt_latest().is_some() {
                        adopted += 1;
                    }
                    if mailbox.has_pending() {
                        thread::yield_now();
                    }
                }
                adopted
            })
        })
        .collect();

    for handle in producers {
        handle.join().unwrap();
    }
    let adopted: u64 = consumers.into_iter().map(|h| h.join().unwrap()).sum();
    let pending = u64::from(mailbox.has_pending());
    mailbox.clear();

    let stats = mailbox.stats();
    assert_eq!(stats.published, PRODUCERS * PER_PRODUCER);
    assert_eq!(stats.adopted, adopted);
    // Every publish was adopted, overwritten, or cleared at the end.
    assert_eq!(stats.adopted + stats.dropped, stats.published);
    assert!(pending <= 1);
    assert!(!mailbox.has_pending());
    assert_eq!(pool.live_count(), 0);
    assert_eq!(pool.allocated(), PRODUCERS * PER_PRODUCER);
}
