//! Error types for the layout engine.
//!
//! Only conditions that make a layout pass meaningless are reported as
//! errors. Malformed content, arithmetic edge cases and invalid option
//! values are recovered locally and end up in [`crate::Diagnostics`].

use thiserror::Error;

/// Errors that abort a layout pass or a resource load.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// No glyph table is available, so no spacing can be computed.
    #[error("no font is loaded; call Resources::init() or load a bounding-box table first")]
    NoFontLoaded,

    /// A glyph bounding-box table could not be used.
    #[error("font '{name}' could not be loaded: {reason}")]
    Font {
        /// Name of the font.
        name: String,
        /// What was wrong with the table.
        reason: String,
    },

    /// The requested font is not loaded.
    #[error("font '{0}' is not loaded")]
    UnknownFont(String),

    /// A font archive could not be read.
    #[error("failed to read font archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// An archive entry could not be read.
    #[error("failed to read '{path}' from font archive: {source}")]
    ArchiveEntry {
        /// Entry path inside the archive.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A bounding-box table is not well-formed XML.
    #[error("XML parse error: {0}")]
    Xml(#[from] roxmltree::Error),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The document tree violates a structural precondition.
    #[error("invalid structure in measure {measure}: {reason}")]
    Structure {
        /// Index of the offending measure.
        measure: usize,
        /// Description of the violation.
        reason: String,
    },
}

impl LayoutError {
    pub(crate) fn font(name: impl Into<String>, reason: impl Into<String>) -> Self {
        LayoutError::Font {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn structure(measure: usize, reason: impl Into<String>) -> Self {
        LayoutError::Structure {
            measure,
            reason: reason.into(),
        }
    }
}

/// Result type for layout operations.
pub type Result<T> = std::result::Result<T, LayoutError>;
