//! Producer loop: pulls frames from a [`FrameSource`] on its own thread and
//! publishes them into the [`SampleMailbox`].
//!
//! The loop never touches the GPU. It sleeps on a shutdown channel between
//! polls, so stopping it is a channel close rather than a flag check.

use crate::decoder::FrameSource;
use crate::mailbox::SampleMailbox;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use dmaview_core::{cadence, DecodedFrame, DmaViewError, Result};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, trace, warn};

/// Producer timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerConfig {
    /// Pause between polls.
    pub poll_interval: Duration,
    /// Bounded wait passed to each pull.
    pub pull_timeout: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            poll_interval: cadence::PRODUCER_POLL_INTERVAL,
            pull_timeout: cadence::PULL_TIMEOUT,
        }
    }
}

/// Counters returned when the producer thread exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProducerStats {
    pub published: u64,
    pub empty_pulls: u64,
    pub errors: u64,
    pub reached_end: bool,
}

/// Handle to the running producer thread. Dropping it stops and joins the
/// thread.
pub struct Producer {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<ProducerStats>>,
}

impl Producer {
    /// Start the loop on a new thread.
    pub fn spawn<S>(
        source: S,
        mailbox: Arc<SampleMailbox<DecodedFrame>>,
        config: ProducerConfig,
    ) -> Result<Self>
    where
        S: FrameSource + 'static,
    {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("dmaview-producer".into())
            .spawn(move || run(source, &mailbox, config, |wait| {
                match shutdown_rx.recv_timeout(wait) {
                    Err(RecvTimeoutError::Timeout) => true,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
                }
            }))?;

        info!(
            poll_ms = config.poll_interval.as_millis() as u64,
            timeout_ms = config.pull_timeout.as_millis() as u64,
            "producer started"
        );

        Ok(Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Whether the thread has exited on its own (end of stream).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signal the thread, wait for it, and return its counters.
    pub fn stop(mut self) -> ProducerStats {
        self.shutdown_and_join()
    }

    fn shutdown_and_join(&mut self) -> ProducerStats {
        if let Some(tx) = self.shutdown.take() {
            // Full or disconnected both mean the loop will see it.
            let _ = tx.try_send(());
        }
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(stats)) => stats,
            Some(Err(_)) => {
                warn!("producer thread panicked");
                ProducerStats::default()
            }
            None => ProducerStats::default(),
        }
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

/// The loop body, separate from the thread so it can run inline in tests.
/// `keep_going` waits for the given interval and returns false on shutdown.
pub fn run<S: FrameSource>(
    mut source: S,
    mailbox: &SampleMailbox<DecodedFrame>,
    config: ProducerConfig,
    mut keep_going: impl FnMut(Duration) -> bool,
) -> ProducerStats {
    let mut stats = ProducerStats::default();

    loop {
        match source.try_pull_frame(config.pull_timeout) {
            Ok(Some(frame)) => {
                trace!(seq = frame.descriptor.sequence, "publishing frame");
                mailbox.publish(frame);
                stats.published += 1;
            }
            Ok(None) => stats.empty_pulls += 1,
            Err(DmaViewError::EndOfStream) => {
                info!(published = stats.published, "source reached end of stream");
                stats.reached_end = true;
                break;
            }
            Err(e) => {
                stats.errors += 1;
                warn!(error = %e, "frame pull failed");
            }
        }

        if !keep_going(config.poll_interval) {
            break;
        }
    }

    stats
}
