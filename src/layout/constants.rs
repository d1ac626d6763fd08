//! Layout constants, in MEI units (half a staff space) unless noted.

// Horizontal clearance around alignment columns
pub(crate) const LEFT_MARGIN_NOTE: f64 = 1.0;
pub(crate) const RIGHT_MARGIN_NOTE: f64 = 0.5;
pub(crate) const LEFT_MARGIN_CLEF: f64 = 1.0;
pub(crate) const RIGHT_MARGIN_CLEF: f64 = 1.0;
pub(crate) const LEFT_MARGIN_SIGNATURE: f64 = 1.0;
pub(crate) const RIGHT_MARGIN_SIGNATURE: f64 = 1.0;
pub(crate) const LEFT_MARGIN_BAR_LINE: f64 = 0.0;

// Glyph clusters
pub(crate) const ACCID_GAP: f64 = 0.3;
pub(crate) const DOT_GAP: f64 = 0.5;
pub(crate) const GRACE_GAP: f64 = 0.4;
pub(crate) const KEY_SIG_GAP: f64 = 0.2;
/// Size of grace notes and clef changes, in percent of the staff size
pub(crate) const CUE_SIZE: i32 = 75;

// Barlines
pub(crate) const BAR_LINE_THIN: f64 = 0.3;
pub(crate) const BAR_LINE_THICK: f64 = 1.0;
pub(crate) const BAR_LINE_SEPARATION: f64 = 0.72;
pub(crate) const REPEAT_DOTS_SPACE: f64 = 1.5;

// System prefix
pub(crate) const PREFIX_MARGIN: f64 = 1.0;
pub(crate) const BRACE_WIDTH: f64 = 2.0;

// Vertical extents
pub(crate) const STEM_LENGTH: f64 = 7.0;
pub(crate) const LYRIC_CHAR_WIDTH: f64 = 1.2;
pub(crate) const LYRIC_LINE_HEIGHT: f64 = 5.0;
pub(crate) const CONTROL_EVENT_HEIGHT: f64 = 4.0;
/// Clearance between the overflows of two adjacent staves or systems
pub(crate) const OVERFLOW_MARGIN: f64 = 1.0;
/// Gap between staff groups relative to the staff spacing, in percent
pub(crate) const GROUP_GAP_PERCENT: i32 = 133;
/// Room reserved above the first system for the title
pub(crate) const HEADER_HEIGHT: f64 = 14.0;

/// Justification ratios below this are reported as over-compressed.
pub(crate) const COMPRESSION_WARNING_RATIO: f64 = 0.8;
