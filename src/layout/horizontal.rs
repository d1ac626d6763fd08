//! Horizontal alignment: one column per distinct onset in a measure.
//!
//! Every measure owns a [`MeasureAligner`]: an ordered sequence of
//! [`Alignment`] columns keyed by `(time, type)`. Elements of all staves
//! and layers starting at the same time with the same type share one
//! column, which is what keeps simultaneous notes vertically aligned.
//! Four sentinel columns (measure start, left barline, right barline,
//! measure end) are always present.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::diagnostics::Diagnostics;
use crate::fraction::{Duration, Fraction};
use crate::glyphs;
use crate::model::{
    BarLineForm, Clef, ControlEvent, Document, Element, ElementId, ElementKind, KeySig, Layer,
    Measure, MeterSig, Note, ScoreDef, Staff,
};
use crate::resources::GlyphMetrics;
use crate::visitor::{walk_measures, Flow, Visitor};

use super::constants::*;
use super::Units;

/// Column type, ordering columns that share an onset time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum AlignmentType {
    MeasureStart,
    ScoreDefClef,
    ScoreDefKeySig,
    ScoreDefMeterSig,
    MeasureLeftBarLine,
    FullMeasure,
    Clef,
    KeySig,
    MeterSig,
    GraceNote,
    BarLine,
    Default,
    MeasureRightBarLine,
    MeasureEnd,
}

impl AlignmentType {
    /// Columns between the barlines; their spacing is stretched by justification.
    pub fn is_justifiable(self) -> bool {
        self > AlignmentType::MeasureLeftBarLine && self < AlignmentType::MeasureRightBarLine
    }

    /// Columns that must clear the content of every staff.
    pub fn spans_all_staves(self) -> bool {
        !self.is_justifiable() || self == AlignmentType::FullMeasure
    }

    pub fn is_score_def(self) -> bool {
        matches!(
            self,
            AlignmentType::ScoreDefClef | AlignmentType::ScoreDefKeySig | AlignmentType::ScoreDefMeterSig
        )
    }

    fn is_sentinel(self) -> bool {
        matches!(
            self,
            AlignmentType::MeasureStart
                | AlignmentType::MeasureLeftBarLine
                | AlignmentType::MeasureRightBarLine
                | AlignmentType::MeasureEnd
        )
    }
}

/// Non-owning reference from an element to its column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AlignmentKey {
    pub time: Fraction,
    pub kind: AlignmentType,
}

/// Staff number of references that apply to every staff.
pub const ALL_STAVES: u32 = 0;

/// An element anchored at a column, with its horizontal extent around
/// the column's x position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlignmentReference {
    pub element: ElementId,
    pub staff: u32,
    pub layer: u32,
    /// Space needed left of the anchor (accidentals, margins)
    pub left: i32,
    /// Space needed right of the anchor (head, dots, flags)
    pub right: i32,
    /// Anchor offset from the column x (grace notes sharing a column)
    pub offset: i32,
    /// Placed by beat timestamp only
    pub timestamp: bool,
}

impl AlignmentReference {
    pub fn new(element: ElementId, staff: u32, layer: u32, left: i32, right: i32) -> Self {
        Self {
            element,
            staff,
            layer,
            left,
            right,
            offset: 0,
            timestamp: false,
        }
    }
}

/// One column of a measure.
#[derive(Debug, Clone, Serialize)]
pub struct Alignment {
    pub time: Fraction,
    pub kind: AlignmentType,
    /// x position relative to the measure start
    pub x_rel: i32,
    /// Smallest distance to the previous column that avoids collisions
    pub min_gap: i32,
    pub references: Vec<AlignmentReference>,
}

impl Alignment {
    fn new(time: Fraction, kind: AlignmentType) -> Self {
        Self {
            time,
            kind,
            x_rel: 0,
            min_gap: 0,
            references: Vec::new(),
        }
    }

    pub fn key(&self) -> AlignmentKey {
        AlignmentKey { time: self.time, kind: self.kind }
    }

    /// Only timestamp-attached events share this column.
    pub fn is_timestamp_only(&self) -> bool {
        !self.references.is_empty() && self.references.iter().all(|r| r.timestamp)
    }

    pub fn reference(&self, element: ElementId) -> Option<&AlignmentReference> {
        self.references.iter().find(|r| r.element == element)
    }
}

/// The ordered columns of one measure.
#[derive(Debug, Clone, Serialize)]
pub struct MeasureAligner {
    alignments: Vec<Alignment>,
}

impl Default for MeasureAligner {
    fn default() -> Self {
        Self::new()
    }
}

impl MeasureAligner {
    pub fn new() -> Self {
        let mut aligner = MeasureAligner { alignments: Vec::new() };
        aligner.reset();
        aligner
    }

    /// Drop every column except fresh sentinels.
    pub fn reset(&mut self) {
        self.alignments.clear();
        self.alignments.extend([
            Alignment::new(Fraction::ZERO, AlignmentType::MeasureStart),
            Alignment::new(Fraction::ZERO, AlignmentType::MeasureLeftBarLine),
            Alignment::new(Fraction::ZERO, AlignmentType::MeasureRightBarLine),
            Alignment::new(Fraction::ZERO, AlignmentType::MeasureEnd),
        ]);
    }

    pub fn alignments(&self) -> &[Alignment] {
        &self.alignments
    }

    pub(crate) fn alignments_mut(&mut self) -> &mut [Alignment] {
        &mut self.alignments
    }

    /// Time of the right barline.
    pub fn max_time(&self) -> Fraction {
        self.alignments.last().map_or(Fraction::ZERO, |a| a.time)
    }

    /// Measure width (x of the end sentinel).
    pub fn width(&self) -> i32 {
        self.alignments.last().map_or(0, |a| a.x_rel)
    }

    pub fn alignment_at(&self, key: AlignmentKey) -> Option<&Alignment> {
        self.alignments
            .binary_search_by(|a| a.key().cmp(&key))
            .ok()
            .map(|i| &self.alignments[i])
    }

    /// x position of a column, relative to the measure.
    pub fn x_at(&self, key: AlignmentKey) -> Option<i32> {
        self.alignment_at(key).map(|a| a.x_rel)
    }

    /// Anchor `reference` at the `(time, kind)` column, creating the column
    /// in order if needed. Negative times are rejected. Timestamp references
    /// never extend the measure: later times are clamped to its end.
    pub fn add_element(
        &mut self,
        time: Fraction,
        kind: AlignmentType,
        reference: AlignmentReference,
    ) -> Option<AlignmentKey> {
        if time.is_negative() {
            return None;
        }
        let time = if kind.is_sentinel() {
            // Sentinels stay pinned to the measure boundaries
            if kind < AlignmentType::Default { Fraction::ZERO } else { self.max_time() }
        } else if time > self.max_time() {
            if reference.timestamp {
                self.max_time()
            } else {
                self.set_max_time(time);
                time
            }
        } else {
            time
        };
        let key = AlignmentKey { time, kind };
        let index = match self.alignments.binary_search_by(|a| a.key().cmp(&key)) {
            Ok(i) => i,
            Err(i) => {
                self.alignments.insert(i, Alignment::new(time, kind));
                i
            }
        };
        self.alignments[index].references.push(reference);
        Some(key)
    }

    /// Grow the extent of an existing reference (notes of a chord).
    pub fn extend_reference(&mut self, key: AlignmentKey, element: ElementId, left: i32, right: i32) {
        if let Ok(i) = self.alignments.binary_search_by(|a| a.key().cmp(&key)) {
            if let Some(r) = self.alignments[i].references.iter_mut().find(|r| r.element == element) {
                r.left = r.left.max(left);
                r.right = r.right.max(right);
            }
        }
    }

    /// Move the right barline and measure end to `time` if it is later.
    pub fn set_max_time(&mut self, time: Fraction) {
        if time <= self.max_time() {
            return;
        }
        for alignment in self.alignments.iter_mut().rev().take(2) {
            alignment.time = time;
        }
    }

    /// Spread the grace notes sharing a column leftwards so that the last
    /// one of each layer sits at the column x.
    pub fn finalize_grace_groups(&mut self, gap: i32) {
        for alignment in self.alignments.iter_mut().filter(|a| a.kind == AlignmentType::GraceNote) {
            let mut groups: BTreeMap<(u32, u32), Vec<usize>> = BTreeMap::new();
            for (i, r) in alignment.references.iter().enumerate() {
                groups.entry((r.staff, r.layer)).or_default().push(i);
            }
            for indices in groups.values() {
                for pair in indices.windows(2).rev() {
                    let (prev, next) = (&alignment.references[pair[0]], &alignment.references[pair[1]]);
                    let offset = next.offset - (prev.right + next.left + gap);
                    alignment.references[pair[0]].offset = offset;
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Extents
// ═══════════════════════════════════════════════════════════════════════

pub(crate) fn bar_line_width(form: BarLineForm, units: Units) -> i32 {
    let mei = match form {
        BarLineForm::Single => BAR_LINE_THIN,
        BarLineForm::Invis => 0.0,
        BarLineForm::Dbl => 2.0 * BAR_LINE_THIN + BAR_LINE_SEPARATION,
        BarLineForm::End => BAR_LINE_THIN + BAR_LINE_SEPARATION + BAR_LINE_THICK,
        BarLineForm::RptStart | BarLineForm::RptEnd => {
            BAR_LINE_THIN + BAR_LINE_SEPARATION + BAR_LINE_THICK + REPEAT_DOTS_SPACE
        }
    };
    units.scaled(mei, 100)
}

pub(crate) fn key_sig_width(key: KeySig, metrics: &dyn GlyphMetrics, units: Units, size: i32) -> i32 {
    if key.sig == 0 {
        return 0;
    }
    let glyph = if key.sig > 0 { glyphs::ACCIDENTAL_SHARP } else { glyphs::ACCIDENTAL_FLAT };
    let count = key.sig.unsigned_abs() as i32;
    count * metrics.glyph_width(glyph, size) + (count - 1) * units.scaled(KEY_SIG_GAP, size)
}

pub(crate) fn meter_sig_width(meter: MeterSig, metrics: &dyn GlyphMetrics, size: i32) -> i32 {
    let digits_width = |value: u32| -> i32 {
        glyphs::time_sig_digits(value)
            .into_iter()
            .map(|g| metrics.glyph_width(g, size))
            .sum()
    };
    digits_width(meter.count).max(digits_width(meter.unit))
}

pub(crate) fn clef_width(clef: Clef, metrics: &dyn GlyphMetrics, size: i32) -> i32 {
    metrics.glyph_width(glyphs::clef(clef.shape), size)
}

fn dots_width(dots: u8, metrics: &dyn GlyphMetrics, units: Units, size: i32) -> i32 {
    dots as i32 * (units.scaled(DOT_GAP, size) + metrics.glyph_width(glyphs::AUGMENTATION_DOT, size))
}

/// Lyric syllables are centered on the head.
fn verse_half_width(note: &Note, units: Units, size: i32) -> i32 {
    note.verses
        .iter()
        .map(|v| units.scaled(v.text.chars().count() as f64 * LYRIC_CHAR_WIDTH, size) / 2)
        .max()
        .unwrap_or(0)
}

// ═══════════════════════════════════════════════════════════════════════
// Alignment pass
// ═══════════════════════════════════════════════════════════════════════

/// Clef, key and meter in effect at the start of a measure.
#[derive(Debug, Clone)]
pub(crate) struct ScoreDefState {
    pub clefs: BTreeMap<u32, Clef>,
    pub key: Option<KeySig>,
    pub meter: MeterSig,
    /// The meter is shown at this measure (first measure or a change)
    pub meter_changed: bool,
}

struct ChordState {
    key: AlignmentKey,
    element: ElementId,
    duration: Fraction,
    grace: bool,
}

struct AlignHorizontally<'a> {
    metrics: &'a dyn GlyphMetrics,
    units: Units,
    staff_sizes: HashMap<u32, i32>,
    initial_meter: bool,
}

struct AlignState<'a> {
    diagnostics: &'a mut Diagnostics,
    aligner: MeasureAligner,
    measure_index: usize,
    clefs: BTreeMap<u32, Clef>,
    key: Option<KeySig>,
    meter: MeterSig,
    states: Vec<ScoreDefState>,
    staff_n: u32,
    staff_size: i32,
    layer_n: u32,
    time: Fraction,
    tuplets: Vec<Fraction>,
    grace_depth: u32,
    beam_depth: u32,
    chord: Option<ChordState>,
    /// Element whose enter hook rejected it; its leave hook is a no-op
    skipped: Option<ElementId>,
}

impl AlignState<'_> {
    fn reset_layer(&mut self) {
        self.time = Fraction::ZERO;
        self.tuplets.clear();
        self.grace_depth = 0;
        self.beam_depth = 0;
        self.chord = None;
        self.skipped = None;
    }
}

impl AlignHorizontally<'_> {
    fn unit(&self, mei: f64, size: i32) -> i32 {
        self.units.scaled(mei, size)
    }

    /// Sounding duration of an element, tuplets applied.
    fn duration_of(&self, element: &Element, st: &mut AlignState) -> Fraction {
        let value = element.duration().and_then(|d| d.value());
        match value {
            Some(value) => st.tuplets.iter().fold(value, |acc, ratio| acc * *ratio),
            None => {
                st.diagnostics.error(format!(
                    "Measure {}: {} {} has no valid duration, treated as zero",
                    st.measure_index + 1,
                    element.name(),
                    element.id.0
                ));
                Fraction::ZERO
            }
        }
    }

    fn note_extents(&self, note: &Note, size: i32, st: &AlignState) -> (i32, i32) {
        let dur = note.duration.dur.unwrap_or(Duration::Quarter);
        let head = self.metrics.glyph_width(glyphs::notehead(dur), size);
        let mut left = self.unit(LEFT_MARGIN_NOTE, size);
        if let Some(accid) = note.accid {
            left += self.metrics.glyph_width(glyphs::accidental(accid), size) + self.unit(ACCID_GAP, size);
        }
        let mut right = head + dots_width(note.duration.dots, self.metrics, self.units, size);
        if st.beam_depth == 0 && st.chord.is_none() && dur.flag_count() > 0 {
            right += self.metrics.glyph_width(glyphs::FLAG_8TH_UP, size);
        }
        right += self.unit(RIGHT_MARGIN_NOTE, size);
        let verse = verse_half_width(note, self.units, size);
        if verse > 0 {
            left = left.max(verse - head / 2);
            right = right.max(head / 2 + verse);
        }
        (left, right)
    }

    fn add(
        &self,
        st: &mut AlignState,
        time: Fraction,
        kind: AlignmentType,
        element: ElementId,
        staff: u32,
        extents: (i32, i32),
    ) -> Option<AlignmentKey> {
        let reference = AlignmentReference::new(element, staff, st.layer_n, extents.0, extents.1);
        let key = st.aligner.add_element(time, kind, reference);
        if key.is_none() {
            st.diagnostics.error(format!(
                "Measure {}: element {} has a negative onset and was skipped",
                st.measure_index + 1,
                element.0
            ));
        }
        key
    }

    fn apply_score_def_change(&self, measure: &Measure, st: &mut AlignState) -> bool {
        let Some(change) = measure.score_def_change.as_ref() else {
            return false;
        };
        for staff_clef in &change.clefs {
            let size = self.staff_sizes.get(&staff_clef.staff).copied().unwrap_or(100);
            let width = clef_width(staff_clef.clef, self.metrics, size);
            let extents = (self.unit(LEFT_MARGIN_CLEF, size), width + self.unit(RIGHT_MARGIN_CLEF, size));
            self.add(st, Fraction::ZERO, AlignmentType::ScoreDefClef, measure.id, staff_clef.staff, extents);
            st.clefs.insert(staff_clef.staff, staff_clef.clef);
        }
        if let Some(key) = change.key {
            let width = key_sig_width(key, self.metrics, self.units, 100);
            let extents = (self.unit(LEFT_MARGIN_SIGNATURE, 100), width + self.unit(RIGHT_MARGIN_SIGNATURE, 100));
            self.add(st, Fraction::ZERO, AlignmentType::ScoreDefKeySig, measure.id, ALL_STAVES, extents);
            st.key = Some(key);
        }
        if let Some(meter) = change.meter {
            let width = meter_sig_width(meter, self.metrics, 100);
            let extents = (self.unit(LEFT_MARGIN_SIGNATURE, 100), width + self.unit(RIGHT_MARGIN_SIGNATURE, 100));
            self.add(st, Fraction::ZERO, AlignmentType::ScoreDefMeterSig, measure.id, ALL_STAVES, extents);
            st.meter = meter;
            return true;
        }
        false
    }
}

impl<'a> Visitor for AlignHorizontally<'a> {
    type Context = AlignState<'a>;

    fn enter_measure(&mut self, measure: &mut Measure, index: usize, st: &mut AlignState<'a>) -> Flow {
        st.aligner = MeasureAligner::new();
        st.measure_index = index;
        st.staff_n = ALL_STAVES;
        st.layer_n = 0;

        let meter_changed = self.apply_score_def_change(measure, st) || (index == 0 && self.initial_meter);
        st.states.push(ScoreDefState {
            clefs: st.clefs.clone(),
            key: st.key,
            meter: st.meter,
            meter_changed,
        });

        if let Some(form) = measure.left {
            let width = bar_line_width(form, self.units);
            let extents = (self.unit(LEFT_MARGIN_BAR_LINE, 100), width);
            self.add(st, Fraction::ZERO, AlignmentType::MeasureLeftBarLine, measure.id, ALL_STAVES, extents);
        }
        Flow::Continue
    }

    fn leave_measure(&mut self, measure: &mut Measure, _index: usize, st: &mut AlignState<'a>) {
        let width = bar_line_width(measure.right, self.units);
        self.add(st, Fraction::ZERO, AlignmentType::MeasureRightBarLine, measure.id, ALL_STAVES, (0, width));
        st.aligner.finalize_grace_groups(self.unit(GRACE_GAP, CUE_SIZE));
        measure.aligner = std::mem::take(&mut st.aligner);
    }

    fn enter_staff(&mut self, staff: &mut Staff, st: &mut AlignState<'a>) -> Flow {
        st.staff_n = staff.n;
        st.staff_size = self.staff_sizes.get(&staff.n).copied().unwrap_or(100);
        Flow::Continue
    }

    fn enter_layer(&mut self, layer: &mut Layer, st: &mut AlignState<'a>) -> Flow {
        st.layer_n = layer.n;
        st.reset_layer();
        Flow::Continue
    }

    fn leave_layer(&mut self, _layer: &mut Layer, st: &mut AlignState<'a>) {
        let end = st.time;
        st.aligner.set_max_time(end);
        st.reset_layer();
    }

    fn enter_element(&mut self, element: &mut Element, st: &mut AlignState<'a>) -> Flow {
        let size = st.staff_size;
        let staff = st.staff_n;
        let grace = element.is_grace() || st.grace_depth > 0;

        if st.chord.is_some() && !matches!(element.kind, ElementKind::Note(_)) {
            st.diagnostics.error(format!(
                "Measure {}: {} {} inside a chord skipped",
                st.measure_index + 1,
                element.name(),
                element.id.0
            ));
            st.skipped = Some(element.id);
            return Flow::SkipChildren;
        }

        match &element.kind {
            ElementKind::Beam => st.beam_depth += 1,
            ElementKind::GraceGrp => st.grace_depth += 1,
            ElementKind::Tuplet(tuplet) => {
                let ratio = if tuplet.num == 0 || tuplet.num_base == 0 {
                    st.diagnostics.warn(format!(
                        "Measure {}: tuplet {} has an invalid ratio, ignored",
                        st.measure_index + 1,
                        element.id.0
                    ));
                    Fraction::ONE
                } else {
                    Fraction::new(tuplet.num_base as i64, tuplet.num as i64)
                };
                st.tuplets.push(ratio);
            }
            ElementKind::Note(note) => {
                let size = if grace { size * CUE_SIZE / 100 } else { size };
                let extents = self.note_extents(note, size, st);
                if let Some(chord) = st.chord.as_ref() {
                    st.aligner.extend_reference(chord.key, chord.element, extents.0, extents.1);
                    element.alignment = Some(chord.key);
                    return Flow::Continue;
                }
                let duration = self.duration_of(element, st);
                let kind = if grace { AlignmentType::GraceNote } else { AlignmentType::Default };
                let time = st.time;
                element.alignment = self.add(st, time, kind, element.id, staff, extents);
                if !grace {
                    st.time = time + duration;
                }
            }
            ElementKind::Chord(_) => {
                let duration = self.duration_of(element, st);
                let kind = if grace { AlignmentType::GraceNote } else { AlignmentType::Default };
                let time = st.time;
                let key = self.add(st, time, kind, element.id, staff, (0, 0));
                element.alignment = key;
                if let Some(key) = key {
                    st.chord = Some(ChordState {
                        key,
                        element: element.id,
                        duration,
                        grace,
                    });
                }
            }
            ElementKind::Rest(rest) => {
                let dur = rest.duration.dur.unwrap_or(Duration::Quarter);
                let width = self.metrics.glyph_width(glyphs::rest(dur), size)
                    + dots_width(rest.duration.dots, self.metrics, self.units, size);
                let extents = (self.unit(LEFT_MARGIN_NOTE, size), width + self.unit(RIGHT_MARGIN_NOTE, size));
                let duration = self.duration_of(element, st);
                let time = st.time;
                element.alignment = self.add(st, time, AlignmentType::Default, element.id, staff, extents);
                st.time = time + duration;
            }
            ElementKind::Space(_) => {
                let duration = self.duration_of(element, st);
                let time = st.time;
                element.alignment = self.add(st, time, AlignmentType::Default, element.id, staff, (0, 0));
                st.time = time + duration;
            }
            ElementKind::MRest => {
                let width = self.metrics.glyph_width(glyphs::REST_WHOLE, size);
                let extents = (self.unit(LEFT_MARGIN_NOTE, size), width + self.unit(RIGHT_MARGIN_NOTE, size));
                element.alignment =
                    self.add(st, Fraction::ZERO, AlignmentType::FullMeasure, element.id, staff, extents);
                st.time = st.meter.measure_duration();
            }
            ElementKind::Clef(clef) => {
                let cue = size * CUE_SIZE / 100;
                let extents = (
                    self.unit(LEFT_MARGIN_CLEF, cue),
                    clef_width(*clef, self.metrics, cue) + self.unit(RIGHT_MARGIN_CLEF, cue),
                );
                let time = st.time;
                element.alignment = self.add(st, time, AlignmentType::Clef, element.id, staff, extents);
                st.clefs.insert(staff, *clef);
            }
            ElementKind::KeySig(key) => {
                let extents = (
                    self.unit(LEFT_MARGIN_SIGNATURE, size),
                    key_sig_width(*key, self.metrics, self.units, size) + self.unit(RIGHT_MARGIN_SIGNATURE, size),
                );
                let time = st.time;
                element.alignment = self.add(st, time, AlignmentType::KeySig, element.id, staff, extents);
                st.key = Some(*key);
            }
            ElementKind::MeterSig(meter) => {
                let extents = (
                    self.unit(LEFT_MARGIN_SIGNATURE, size),
                    meter_sig_width(*meter, self.metrics, size) + self.unit(RIGHT_MARGIN_SIGNATURE, size),
                );
                let time = st.time;
                element.alignment = self.add(st, time, AlignmentType::MeterSig, element.id, staff, extents);
                st.meter = *meter;
            }
            ElementKind::BarLine(bar) => {
                let extents = (self.unit(LEFT_MARGIN_NOTE, size), bar_line_width(bar.form, self.units));
                let time = st.time;
                element.alignment = self.add(st, time, AlignmentType::BarLine, element.id, staff, extents);
            }
        }
        Flow::Continue
    }

    fn leave_element(&mut self, element: &mut Element, st: &mut AlignState<'a>) {
        if st.skipped == Some(element.id) {
            st.skipped = None;
            return;
        }
        match element.kind {
            ElementKind::Beam => st.beam_depth = st.beam_depth.saturating_sub(1),
            ElementKind::GraceGrp => st.grace_depth = st.grace_depth.saturating_sub(1),
            ElementKind::Tuplet(_) => {
                st.tuplets.pop();
            }
            ElementKind::Chord(_) => {
                if let Some(chord) = st.chord.take() {
                    if chord.element == element.id && !chord.grace {
                        st.time = st.time + chord.duration;
                    }
                }
            }
            _ => {}
        }
    }

    fn visit_control_event(&mut self, event: &mut ControlEvent, st: &mut AlignState<'a>) -> Flow {
        if !event.tstamp.is_finite() || event.tstamp < 0.0 {
            st.diagnostics.error(format!(
                "Measure {}: control event {} has an invalid timestamp {}, skipped",
                st.measure_index + 1,
                event.id.0,
                event.tstamp
            ));
            return Flow::Continue;
        }
        // tstamp 1 is the first beat; anything before it sits at the measure start
        let beats = ((event.tstamp - 1.0).max(0.0) * 1024.0).round() as i64;
        let mut time = Fraction::new(beats, 1024 * st.meter.unit.max(1) as i64);
        if time > st.aligner.max_time() {
            st.diagnostics.warn(format!(
                "Measure {}: control event {} at tstamp {} is past the measure end, moved to the barline",
                st.measure_index + 1,
                event.id.0,
                event.tstamp
            ));
            time = st.aligner.max_time();
        }
        let mut reference = AlignmentReference::new(event.id, event.staff, 0, 0, 0);
        reference.timestamp = true;
        event.alignment = st.aligner.add_element(time, AlignmentType::Default, reference);
        Flow::Continue
    }
}

/// Build the aligner of every measure. Returns the clef/key/meter state at
/// the start of each measure.
pub(crate) fn align_measures(
    doc: &mut Document,
    metrics: &dyn GlyphMetrics,
    units: Units,
    diagnostics: &mut Diagnostics,
) -> Vec<ScoreDefState> {
    let mut visitor = AlignHorizontally {
        metrics,
        units,
        staff_sizes: doc.score_def.staff_defs().map(|d| (d.n, d.size)).collect(),
        initial_meter: doc.score_def.meter.is_some(),
    };
    let mut state = AlignState {
        diagnostics,
        aligner: MeasureAligner::new(),
        measure_index: 0,
        clefs: initial_clefs(&doc.score_def),
        key: doc.score_def.key,
        meter: doc.score_def.meter.unwrap_or_default(),
        states: Vec::with_capacity(doc.measures.len()),
        staff_n: ALL_STAVES,
        staff_size: 100,
        layer_n: 0,
        time: Fraction::ZERO,
        tuplets: Vec::new(),
        grace_depth: 0,
        beam_depth: 0,
        chord: None,
        skipped: None,
    };
    walk_measures(&mut visitor, &mut doc.measures, 0, &mut state);
    state.states
}

pub(crate) fn initial_clefs(score_def: &ScoreDef) -> BTreeMap<u32, Clef> {
    score_def
        .staff_defs()
        .map(|d| (d.n, d.clef.unwrap_or_else(Clef::treble)))
        .collect()
}
