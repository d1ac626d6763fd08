//! scorelayout: alignment, spacing and pagination engine for music notation.
//!
//! Takes a tree of measures, staves, layers and notational elements and
//! assigns horizontal and vertical positions to every element, breaking
//! the music into justified systems and pages.
//!
//! # Example
//! ```no_run
//! use scorelayout::{document_from_json, layout_document, Options};
//!
//! let json = std::fs::read_to_string("score.json").unwrap();
//! let mut doc = document_from_json(&json).unwrap();
//! let summary = layout_document(&mut doc, &Options::default()).unwrap();
//! println!("Pages: {}", summary.page_count);
//! println!("Systems: {}", summary.system_count);
//! ```

pub mod diagnostics;
pub mod error;
pub mod fraction;
pub mod glyphs;
pub mod layout;
pub mod model;
pub mod options;
pub mod resources;
pub mod visitor;

pub use diagnostics::{Diagnostic, Diagnostics};
pub use error::{LayoutError, Result};
pub use fraction::{Duration, Fraction};
pub use layout::{reset_data, LayoutEngine, LayoutStage, LayoutSummary, PageSummary, Units};
pub use model::*;
pub use options::{BreakMode, Breaks, Options};
pub use resources::{BoundingBox, GlyphMetrics, Resources, ScaledMetrics};

/// Lay a document out with the bundled font.
///
/// Diagnostics of the pass are logged; use a [`LayoutEngine`] to inspect
/// them.
pub fn layout_document(doc: &mut Document, options: &Options) -> Result<LayoutSummary> {
    let resources = Resources::with_default_font()?;
    let mut engine = LayoutEngine::new(&resources, options.clone())?;
    engine.layout(doc)
}

/// Read a document tree from JSON. Layout fields are left at zero.
pub fn document_from_json(json: &str) -> Result<Document> {
    Ok(serde_json::from_str(json)?)
}

/// Write a document tree, with its layout positions, to JSON.
pub fn document_to_json(doc: &Document) -> Result<String> {
    Ok(serde_json::to_string_pretty(doc)?)
}

pub fn summary_to_json(summary: &LayoutSummary) -> Result<String> {
    Ok(serde_json::to_string_pretty(summary)?)
}
