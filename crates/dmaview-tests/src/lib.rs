//! Integration test crate for dmaview.
//!
//! This crate exists solely to hold cross-crate integration tests: the
//! producer, mailbox and render loop wired together against the software
//! driver.

#[cfg(test)]
mod pipeline;

#[cfg(test)]
mod mailbox;

#[cfg(test)]
mod rendering;
