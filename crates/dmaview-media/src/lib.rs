//! dmaview media - the producer half of the pipeline
//!
//! This crate handles:
//! - The single-slot, drop-oldest mailbox shared with the render loop
//! - Frame sources (decoder collaborators)
//! - The producer thread that polls a source and publishes frames

pub mod decoder;
pub mod mailbox;
pub mod producer;

pub use decoder::{FrameSource, PatternStage, ScriptedSource, TestPatternSource};
pub use mailbox::{MailboxStats, SampleMailbox};
pub use producer::{Producer, ProducerConfig, ProducerStats};

/// Mailbox type shared between the producer and the renderer.
pub type FrameMailbox = SampleMailbox<dmaview_core::DecodedFrame>;
