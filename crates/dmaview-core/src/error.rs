//! Error types for dmaview.

use crate::frame::PixelLayout;
use thiserror::Error;

/// Main error type for dmaview operations.
#[derive(Error, Debug)]
pub enum DmaViewError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Setup-time failure: missing import capability, shader compile/link
    /// failure, or display setup failure. Rendering cannot proceed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Import error: {0}")]
    Import(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Missing plane: {layout:?} needs {needed} plane(s), got {got}")]
    MissingPlane {
        layout: PixelLayout,
        needed: usize,
        got: usize,
    },

    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("Display error: {0}")]
    Display(String),

    #[error("Decoder error: {0}")]
    Decoder(String),

    #[error("End of stream")]
    EndOfStream,

    #[error("Invalid config: {0}")]
    Config(String),
}

impl DmaViewError {
    /// Whether this error belongs to a single frame and should only cause that
    /// frame to be skipped.
    pub fn is_per_frame(&self) -> bool {
        matches!(
            self,
            Self::Import(_) | Self::UnsupportedFormat(_) | Self::MissingPlane { .. } | Self::Gpu(_)
        )
    }
}

/// Result type alias for dmaview operations.
pub type Result<T> = std::result::Result<T, DmaViewError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_frame_classification() {
        assert!(DmaViewError::Import("gone".into()).is_per_frame());
        assert!(DmaViewError::UnsupportedFormat("XR24".into()).is_per_frame());
        assert!(DmaViewError::MissingPlane {
            layout: PixelLayout::Nv12,
            needed: 2,
            got: 1
        }
        .is_per_frame());
        assert!(!DmaViewError::Configuration("no import".into()).is_per_frame());
        assert!(!DmaViewError::EndOfStream.is_per_frame());
    }

    #[test]
    fn test_missing_plane_message() {
        let err = DmaViewError::MissingPlane {
            layout: PixelLayout::Nv12,
            needed: 2,
            got: 1,
        };
        assert_eq!(err.to_string(), "Missing plane: Nv12 needs 2 plane(s), got 1");
    }
}
