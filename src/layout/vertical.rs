//! Vertical alignment: staves within a system, systems within a page.
//!
//! Element y positions are measured downwards from the top line of their
//! staff. While they are computed, the content sticking out above and
//! below each staff is collected; the [`SystemAligner`] then stacks the
//! staves so that neighbouring overflows do not collide.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::fraction::Duration;
use crate::glyphs;
use crate::model::{
    Clef, ClefShape, ControlEvent, Element, ElementKind, Measure, Page, PitchAttr, Placement, ScoreDef,
    Staff, StemDir, System,
};
use crate::options::Options;
use crate::resources::GlyphMetrics;
use crate::visitor::{walk_measures, Flow, Visitor};

use super::constants::*;
use super::horizontal::initial_clefs;
use super::Units;

/// Vertical position of one staff in a system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffAlignment {
    pub n: u32,
    /// Index of the staff group
    pub group: usize,
    /// Offset of the top line from the top line of the first staff
    pub y_rel: i32,
    pub staff_height: i32,
    pub overflow_above: i32,
    pub overflow_below: i32,
}

/// The staves of one system, top to bottom.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SystemAligner {
    staves: Vec<StaffAlignment>,
}

impl SystemAligner {
    pub fn new(score_def: &ScoreDef, units: Units) -> Self {
        let staves = score_def
            .groups
            .iter()
            .enumerate()
            .flat_map(|(group, g)| {
                g.staff_defs.iter().map(move |def| StaffAlignment {
                    n: def.n,
                    group,
                    y_rel: 0,
                    staff_height: units.staff_height(def.lines, def.size),
                    overflow_above: 0,
                    overflow_below: 0,
                })
            })
            .collect();
        SystemAligner { staves }
    }

    pub fn staves(&self) -> &[StaffAlignment] {
        &self.staves
    }

    pub fn staff(&self, n: u32) -> Option<&StaffAlignment> {
        self.staves.iter().find(|s| s.n == n)
    }

    /// Record content extending `above` the top line and `below` the
    /// bottom line of staff `n`.
    pub fn add_overflow(&mut self, n: u32, above: i32, below: i32) {
        if let Some(staff) = self.staves.iter_mut().find(|s| s.n == n) {
            staff.overflow_above = staff.overflow_above.max(above);
            staff.overflow_below = staff.overflow_below.max(below);
        }
    }

    /// Place each staff below the previous one, separated by at least
    /// `spacing` (more between groups) and clear of both overflows.
    pub fn stack(&mut self, spacing: i32, margin: i32) {
        let group_spacing = spacing * GROUP_GAP_PERCENT / 100;
        for i in 1..self.staves.len() {
            let (done, rest) = self.staves.split_at_mut(i);
            let prev = &done[i - 1];
            let staff = &mut rest[0];
            let base = if staff.group != prev.group { group_spacing } else { spacing };
            let gap = base.max(prev.overflow_below + staff.overflow_above + margin);
            staff.y_rel = prev.y_rel + prev.staff_height + gap;
        }
    }

    /// From the top line of the first staff to the bottom line of the last.
    pub fn height(&self) -> i32 {
        self.staves.last().map_or(0, |s| s.y_rel + s.staff_height)
    }

    pub fn overflow_above(&self) -> i32 {
        self.staves.first().map_or(0, |s| s.overflow_above)
    }

    pub fn overflow_below(&self) -> i32 {
        self.staves.last().map_or(0, |s| s.overflow_below)
    }
}

/// Distance between two systems (bottom line to top line).
pub(crate) fn system_gap(prev_below: i32, above: i32, spacing: i32, margin: i32) -> i32 {
    spacing.max(prev_below + above + margin)
}

/// y of a pitch from the top line of a staff with `lines` lines.
pub fn pitch_to_staff_y(pitch: &PitchAttr, clef: Clef, lines: u8, unit: i32) -> i32 {
    let (ref_position, line) = match clef.shape {
        ClefShape::F => (3 * 7 + 3, clef.line), // F3
        ClefShape::C => (4 * 7, clef.line),     // C4
        ClefShape::G | ClefShape::Perc => (4 * 7 + 4, clef.line), // G4
    };
    let ref_position = ref_position + clef.dis as i32 * 7;
    let ref_y = (lines as i32 - line as i32) * 2 * unit;
    ref_y - (pitch.diatonic_position() - ref_position) * unit
}

// ═══════════════════════════════════════════════════════════════════════
// Staff extents pass
// ═══════════════════════════════════════════════════════════════════════

/// Clefs carried from one system to the next.
pub(crate) struct StaffState {
    clefs: BTreeMap<u32, Clef>,
}

impl StaffState {
    pub fn new(score_def: &ScoreDef) -> Self {
        Self {
            clefs: initial_clefs(score_def),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Overflow {
    content_above: i32,
    content_below: i32,
    verses: u32,
    event_above: bool,
    event_below: bool,
}

struct StaffExtents<'a> {
    metrics: &'a dyn GlyphMetrics,
    units: Units,
    staff_defs: HashMap<u32, (u8, i32)>,
}

struct ExtentState {
    clefs: BTreeMap<u32, Clef>,
    overflows: BTreeMap<u32, Overflow>,
    staff_n: u32,
    lines: u8,
    size: i32,
    /// Stem direction of the current chord
    chord_stem: Option<StemDir>,
}

impl ExtentState {
    fn overflow(&mut self) -> &mut Overflow {
        self.overflows.entry(self.staff_n).or_default()
    }
}

impl StaffExtents<'_> {
    fn record(&self, st: &mut ExtentState, top: i32, bottom: i32) {
        let height = self.units.staff_height(st.lines, st.size);
        let overflow = st.overflow();
        overflow.content_above = overflow.content_above.max(-top);
        overflow.content_below = overflow.content_below.max(bottom - height);
    }

    fn glyph_span(&self, code: u32, baseline: i32, size: i32) -> (i32, i32) {
        let bbox = self.metrics.glyph_bbox(code, size);
        (baseline - bbox.top(), baseline - bbox.y)
    }
}

impl Visitor for StaffExtents<'_> {
    type Context = ExtentState;

    fn enter_measure(&mut self, measure: &mut Measure, _index: usize, st: &mut ExtentState) -> Flow {
        if let Some(change) = measure.score_def_change.as_ref() {
            for staff_clef in &change.clefs {
                st.clefs.insert(staff_clef.staff, staff_clef.clef);
            }
        }
        Flow::Continue
    }

    fn enter_staff(&mut self, staff: &mut Staff, st: &mut ExtentState) -> Flow {
        let (lines, size) = self.staff_defs.get(&staff.n).copied().unwrap_or((5, 100));
        st.staff_n = staff.n;
        st.lines = lines;
        st.size = size;
        Flow::Continue
    }

    fn enter_element(&mut self, element: &mut Element, st: &mut ExtentState) -> Flow {
        let unit = self.units.unit(st.size);
        let height = self.units.staff_height(st.lines, st.size);
        let clef = st.clefs.get(&st.staff_n).copied().unwrap_or_else(Clef::treble);

        match &element.kind {
            ElementKind::Note(note) => {
                let y = pitch_to_staff_y(&note.pitch, clef, st.lines, unit);
                element.drawing_y_rel = y;
                let stem_length = self.units.scaled(STEM_LENGTH, st.size);
                let stem = note.stem.or(st.chord_stem).unwrap_or(if y > height / 2 {
                    StemDir::Up
                } else {
                    StemDir::Down
                });
                let has_stem = note.duration.dur.map_or(true, |d| d >= Duration::Half);
                let (mut top, mut bottom) = (y - unit, y + unit);
                if has_stem {
                    match stem {
                        StemDir::Up => top = top.min(y - stem_length),
                        StemDir::Down => bottom = bottom.max(y + stem_length),
                    }
                }
                self.record(st, top, bottom);
                let verses = note.verses.iter().map(|v| v.n).max().unwrap_or(0);
                let overflow = st.overflow();
                overflow.verses = overflow.verses.max(verses);
            }
            ElementKind::Chord(_) => {
                // One stem for the chord, set by its first note
                st.chord_stem = element
                    .children
                    .iter()
                    .find_map(|c| match &c.kind {
                        ElementKind::Note(n) => Some(n.stem.unwrap_or_else(|| {
                            if pitch_to_staff_y(&n.pitch, clef, st.lines, unit) > height / 2 {
                                StemDir::Up
                            } else {
                                StemDir::Down
                            }
                        })),
                        _ => None,
                    });
            }
            ElementKind::Rest(rest) => {
                let y = height / 2;
                element.drawing_y_rel = y;
                let code = glyphs::rest(rest.duration.dur.unwrap_or(Duration::Quarter));
                let (top, bottom) = self.glyph_span(code, y, st.size);
                self.record(st, top, bottom);
            }
            ElementKind::MRest => {
                element.drawing_y_rel = 2 * unit;
            }
            ElementKind::Clef(clef) => {
                let y = (st.lines as i32 - clef.line as i32) * 2 * unit;
                element.drawing_y_rel = y;
                let (top, bottom) = self.glyph_span(glyphs::clef(clef.shape), y, st.size * CUE_SIZE / 100);
                self.record(st, top, bottom);
                st.clefs.insert(st.staff_n, *clef);
            }
            _ => {}
        }
        Flow::Continue
    }

    fn leave_element(&mut self, element: &mut Element, st: &mut ExtentState) {
        match element.kind {
            ElementKind::Chord(_) => {
                st.chord_stem = None;
                element.drawing_y_rel = element.children.iter().map(|c| c.drawing_y_rel).min().unwrap_or(0);
            }
            ElementKind::Beam | ElementKind::Tuplet(_) | ElementKind::GraceGrp => {
                element.drawing_y_rel = element.children.first().map_or(0, |c| c.drawing_y_rel);
            }
            _ => {}
        }
    }

    fn visit_control_event(&mut self, event: &mut ControlEvent, st: &mut ExtentState) -> Flow {
        let (lines, size) = self.staff_defs.get(&event.staff).copied().unwrap_or((5, 100));
        let h = self.units.scaled(CONTROL_EVENT_HEIGHT, size);
        let overflow = st.overflows.entry(event.staff).or_default();
        match event.place {
            Placement::Above => {
                event.drawing_y_rel = -h;
                overflow.event_above = true;
            }
            Placement::Below => {
                event.drawing_y_rel = self.units.staff_height(lines, size) + h;
                overflow.event_below = true;
            }
        }
        Flow::Continue
    }
}

/// Compute the staff positions of one system and write them to the
/// staves of its measures.
pub(crate) fn stack_system(
    system: &mut System,
    measures: &mut [Measure],
    score_def: &ScoreDef,
    state: &mut StaffState,
    metrics: &dyn GlyphMetrics,
    units: Units,
    options: &Options,
) {
    let mut visitor = StaffExtents {
        metrics,
        units,
        staff_defs: score_def.staff_defs().map(|d| (d.n, (d.lines, d.size))).collect(),
    };
    let mut st = ExtentState {
        clefs: std::mem::take(&mut state.clefs),
        overflows: BTreeMap::new(),
        staff_n: 0,
        lines: 5,
        size: 100,
        chord_stem: None,
    };
    let range = system.measures.clone();
    walk_measures(&mut visitor, &mut measures[range.clone()], range.start, &mut st);
    state.clefs = st.clefs;

    let mut aligner = SystemAligner::new(score_def, units);
    for (n, overflow) in &st.overflows {
        let size = score_def.staff_size(*n);
        let event = units.scaled(CONTROL_EVENT_HEIGHT, size);
        let lyrics = units.scaled(LYRIC_LINE_HEIGHT, size) * overflow.verses as i32;
        let above = overflow.content_above + if overflow.event_above { event } else { 0 };
        let below = overflow.content_below.max(0)
            + lyrics
            + if overflow.event_below { event } else { 0 };
        aligner.add_overflow(*n, above.max(0), below);
    }
    aligner.stack(
        units.scaled(options.spacing_staff as f64, 100),
        units.scaled(OVERFLOW_MARGIN, 100),
    );

    for measure in measures[range].iter_mut() {
        for staff in measure.staves.iter_mut() {
            staff.drawing_y_rel = aligner.staff(staff.n).map_or(0, |s| s.y_rel);
        }
    }
    system.aligner = aligner;
}

// ═══════════════════════════════════════════════════════════════════════
// Pages
// ═══════════════════════════════════════════════════════════════════════

/// Place the systems of every page. `header` is reserved on the first page.
///
/// With `adjust_page_height`, the leftover space of a full page is spread
/// evenly over its system gaps, and the last page (cropped to its content)
/// uses the average gap of the pages measured before it.
pub(crate) fn place_pages(pages: &mut [Page], header: i32, units: Units, options: &Options) {
    let top = options.drawing_margin_top();
    let bottom = options.drawing_page_height() - options.drawing_margin_bottom();
    let spacing = units.scaled(options.spacing_system as f64, 100);
    let margin = units.scaled(OVERFLOW_MARGIN, 100);
    let mut measured_gaps: Vec<f64> = Vec::new();
    let last_page = pages.len().saturating_sub(1);

    for (pi, page) in pages.iter_mut().enumerate() {
        let start = top + if pi == 0 { header } else { 0 };
        let mut gaps: Vec<i32> = page
            .systems
            .windows(2)
            .map(|w| {
                system_gap(
                    w[0].aligner.overflow_below(),
                    w[1].aligner.overflow_above(),
                    spacing,
                    margin,
                )
            })
            .collect();

        if options.adjust_page_height && !gaps.is_empty() {
            if pi != last_page {
                let content = place_systems(&mut page.systems, start, &gaps);
                let leftover = bottom - content;
                if leftover > 0 {
                    let extra = leftover as f64 / gaps.len() as f64;
                    let mut spread: f64 = 0.0;
                    for gap in gaps.iter_mut() {
                        let before = spread.round() as i32;
                        spread += extra;
                        *gap += spread.round() as i32 - before;
                    }
                }
                measured_gaps.push(gaps.iter().sum::<i32>() as f64 / gaps.len() as f64);
            } else {
                let average = if measured_gaps.is_empty() {
                    spacing as f64
                } else {
                    measured_gaps.iter().sum::<f64>() / measured_gaps.len() as f64
                };
                for gap in gaps.iter_mut() {
                    *gap = (*gap).max(average.round() as i32);
                }
            }
        }

        let content = place_systems(&mut page.systems, start, &gaps);
        page.drawing_height = if options.adjust_page_height && pi == last_page {
            content + options.drawing_margin_bottom()
        } else {
            options.drawing_page_height().max(content + options.drawing_margin_bottom())
        };
    }
}

/// Set the y of each system and return the bottom of the page content.
fn place_systems(systems: &mut [System], start: i32, gaps: &[i32]) -> i32 {
    let mut y = start;
    let mut bottom = start;
    for (i, system) in systems.iter_mut().enumerate() {
        y = if i == 0 {
            start + system.aligner.overflow_above()
        } else {
            y + gaps[i - 1]
        };
        system.drawing_y_rel = y;
        bottom = y + system.aligner.height() + system.aligner.overflow_below();
        y += system.aligner.height();
    }
    bottom
}
