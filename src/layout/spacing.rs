//! Spacing and justification.
//!
//! Each measure is first spaced on its own: every column gets the larger
//! of a duration-proportional distance from the previous column and the
//! minimum distance that keeps glyphs from colliding. The minimum is kept
//! as the column's gap floor. Systems are then justified to the available
//! width by scaling the gaps between the barlines, never below their floor.

use std::collections::BTreeMap;

use crate::diagnostics::Diagnostics;
use crate::fraction::{Duration, Fraction};
use crate::model::{ControlEvent, Element, ElementKind, Measure, ScoreDef};
use crate::options::Options;
use crate::resources::GlyphMetrics;
use crate::visitor::{walk_measures, Flow, Visitor};

use super::constants::{COMPRESSION_WARNING_RATIO, PREFIX_MARGIN};
use super::horizontal::{
    clef_width, key_sig_width, meter_sig_width, Alignment, AlignmentType, MeasureAligner, ScoreDefState,
    ALL_STAVES,
};
use super::Units;

/// Horizontal space given to an onset interval.
///
/// Implementations must not decrease as the interval grows.
pub trait SpacingFunction {
    /// Space in drawing units for an interval in whole notes.
    fn space(&self, interval: Fraction) -> f64;
}

/// `(t * 1024)^non_linear * linear * 10`, scaled to the drawing unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NonLinearSpacing {
    pub linear: f64,
    pub non_linear: f64,
    /// Intervals are divided by `2^shift` when the score uses values
    /// longer than a whole note
    pub shift: u32,
    pub scale: f64,
}

impl NonLinearSpacing {
    pub fn new(linear: f64, non_linear: f64, longest: Option<Duration>, units: Units) -> Self {
        let shift = longest.map_or(0, |d| (-(d.exponent() as i32)).max(0) as u32);
        Self {
            linear,
            non_linear,
            shift,
            // DEFINITION_FACTOR at the default unit of 9
            scale: units.unit(100) as f64 / 9.0,
        }
    }
}

impl SpacingFunction for NonLinearSpacing {
    fn space(&self, interval: Fraction) -> f64 {
        if interval <= Fraction::ZERO {
            return 0.0;
        }
        let t = interval.to_f64() / (1u64 << self.shift) as f64;
        (t * 1024.0).powf(self.non_linear) * self.linear * 10.0 * self.scale
    }
}

/// Every onset gap gets the same space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvenSpacing {
    pub step: f64,
}

impl SpacingFunction for EvenSpacing {
    fn space(&self, interval: Fraction) -> f64 {
        if interval <= Fraction::ZERO {
            0.0
        } else {
            self.step
        }
    }
}

/// The spacing function selected by the options.
pub fn spacing_function(options: &Options, longest: Option<Duration>, units: Units) -> Box<dyn SpacingFunction> {
    let non_linear = NonLinearSpacing::new(options.spacing_linear, options.spacing_non_linear, longest, units);
    if options.even_note_spacing {
        Box::new(EvenSpacing {
            step: non_linear.space(Fraction::new(1, 4)),
        })
    } else {
        Box::new(non_linear)
    }
}

/// Parameters shared by the spacing of all measures of a pass.
pub(crate) struct MeasureSpacing<'a> {
    pub function: &'a dyn SpacingFunction,
    /// Shorter intervals are spaced as this one
    pub min_interval: Fraction,
    pub staves: &'a [u32],
    pub min_width: i32,
}

/// Assign an x position and a gap floor to every column of a measure.
///
/// At the start of a system the score definition columns collapse: their
/// content is drawn in the system prefix instead.
pub(crate) fn calc_alignment_x(aligner: &mut MeasureAligner, spacing: &MeasureSpacing, at_system_start: bool) {
    let alignments = aligner.alignments_mut();
    let mut staff_edges: BTreeMap<u32, i32> = spacing.staves.iter().map(|n| (*n, 0)).collect();
    let mut all_edge = 0;
    let mut previous: Option<(Fraction, i32)> = None;

    for alignment in alignments.iter_mut() {
        if alignment.is_timestamp_only() {
            continue;
        }
        let prev_x = previous.map_or(0, |(_, x)| x);
        let ideal = match previous {
            Some((time, x)) if alignment.time > time => {
                let interval = (alignment.time - time).max(spacing.min_interval);
                x + spacing.function.space(interval).round() as i32
            }
            Some((_, x)) => x,
            None => 0,
        };

        if at_system_start && alignment.kind.is_score_def() {
            alignment.x_rel = prev_x;
            alignment.min_gap = 0;
            previous = Some((alignment.time, prev_x));
            continue;
        }

        let widest = staff_edges.values().copied().max().unwrap_or(0).max(all_edge);
        let mut required = if alignment.kind.spans_all_staves() { widest } else { 0 };
        for r in &alignment.references {
            let edge = if r.staff == ALL_STAVES {
                widest
            } else {
                staff_edges.get(&r.staff).copied().unwrap_or(0).max(all_edge)
            };
            required = required.max(edge + r.left - r.offset);
        }

        // A later onset always sits at least one unit right of the previous column
        let step = match previous {
            Some((time, _)) if alignment.time > time => 1,
            _ => 0,
        };
        let x = ideal.max(required).max(prev_x + step);
        alignment.x_rel = x;
        alignment.min_gap = (required - prev_x).max(step);

        for r in &alignment.references {
            let edge = x + r.offset + r.right;
            if r.staff == ALL_STAVES {
                all_edge = all_edge.max(edge);
            } else {
                let e = staff_edges.entry(r.staff).or_insert(0);
                *e = (*e).max(edge);
            }
        }
        if alignment.kind.spans_all_staves() {
            all_edge = all_edge.max(x);
        }
        previous = Some((alignment.time, x));
    }

    // Minimal measure width: widen the gap before the right barline
    let len = alignments.len();
    let width = alignments[len - 1].x_rel;
    if width < spacing.min_width {
        let delta = spacing.min_width - width;
        for alignment in alignments[len - 2..].iter_mut() {
            alignment.x_rel += delta;
        }
    }

    interpolate_timestamps(alignments);
}

/// Place timestamp-only columns proportionally to their time between the
/// neighbouring placed columns.
fn interpolate_timestamps(alignments: &mut [Alignment]) {
    for i in 0..alignments.len() {
        if !alignments[i].is_timestamp_only() {
            continue;
        }
        let prev = alignments[..i].iter().rev().find(|a| !a.is_timestamp_only());
        let next = alignments[i + 1..].iter().find(|a| !a.is_timestamp_only());
        let (Some(prev), Some(next)) = (prev, next) else {
            continue;
        };
        let span = next.time - prev.time;
        let x = if span > Fraction::ZERO {
            let ratio = (alignments[i].time - prev.time).to_f64() / span.to_f64();
            prev.x_rel + ((next.x_rel - prev.x_rel) as f64 * ratio).round() as i32
        } else {
            prev.x_rel
        };
        alignments[i].x_rel = x;
        alignments[i].min_gap = 0;
    }
}

/// Width of the clef, key and meter shown at the start of a system.
pub(crate) fn system_prefix_width(
    state: &ScoreDefState,
    score_def: &ScoreDef,
    metrics: &dyn GlyphMetrics,
    units: Units,
) -> i32 {
    let margin = units.scaled(PREFIX_MARGIN, 100);
    let clef = state
        .clefs
        .iter()
        .map(|(n, clef)| clef_width(*clef, metrics, score_def.staff_size(*n)))
        .max()
        .unwrap_or(0);
    let mut width = margin + clef + margin;
    if let Some(key) = state.key.filter(|k| k.sig != 0) {
        width += key_sig_width(key, metrics, units, 100) + margin;
    }
    if state.meter_changed {
        width += meter_sig_width(state.meter, metrics, 100) + margin;
    }
    width
}

/// Lay measures side by side after the prefix without stretching.
pub(crate) fn place_measures(measures: &mut [Measure], prefix: i32) {
    let mut x = prefix;
    for measure in measures.iter_mut() {
        measure.drawing_x_rel = x;
        measure.drawing_width = measure.aligner.width();
        x += measure.drawing_width;
    }
}

struct Gap {
    width: f64,
    floor: f64,
    stretchable: bool,
}

/// Common factor applied to the stretchable gaps so that they fill
/// `available`, with gaps clamped to their floor left out of the scaling.
fn stretch_ratio(gaps: &[Gap], available: f64) -> f64 {
    let mut clamped = vec![false; gaps.len()];
    loop {
        let mut floors = 0.0;
        let mut free = 0.0;
        for (gap, clamped) in gaps.iter().zip(&clamped) {
            if !gap.stretchable {
                continue;
            }
            if *clamped {
                floors += gap.floor;
            } else {
                free += gap.width;
            }
        }
        if free <= 0.0 {
            return 0.0;
        }
        let ratio = (available - floors) / free;
        let mut changed = false;
        for (gap, clamped) in gaps.iter().zip(clamped.iter_mut()) {
            if gap.stretchable && !*clamped && ratio * gap.width < gap.floor {
                *clamped = true;
                changed = true;
            }
        }
        if !changed {
            return ratio.max(0.0);
        }
    }
}

/// Justify the measures of one system to `target` (width from the system
/// start, prefix included). Returns the stretch ratio when the system was
/// justified.
pub(crate) fn justify_system(
    measures: &mut [Measure],
    first_index: usize,
    prefix: i32,
    target: i32,
    is_last: bool,
    options: &Options,
    diagnostics: &mut Diagnostics,
) -> Option<f64> {
    // Timestamp-only columns take no part; they are interpolated afterwards
    let mut gaps = Vec::new();
    let mut fixed = prefix as f64;
    for measure in measures.iter() {
        let columns: Vec<&Alignment> = measure
            .aligner
            .alignments()
            .iter()
            .filter(|a| !a.is_timestamp_only())
            .collect();
        for pair in columns.windows(2) {
            let width = (pair[1].x_rel - pair[0].x_rel) as f64;
            let stretchable = pair[0].kind >= AlignmentType::MeasureLeftBarLine
                && pair[1].kind <= AlignmentType::MeasureRightBarLine
                && width > 0.0;
            if !stretchable {
                fixed += width;
            }
            gaps.push(Gap {
                width,
                floor: (pair[1].min_gap as f64).min(width),
                stretchable,
            });
        }
    }

    let stretchable_total: f64 = gaps.iter().filter(|g| g.stretchable).map(|g| g.width).sum();
    if stretchable_total <= 0.0 {
        diagnostics.debug(format!("System at measure {}: nothing to justify", first_index + 1));
        place_measures(measures, prefix);
        return None;
    }

    let available = target as f64 - fixed;
    let ratio = stretch_ratio(&gaps, available);
    if is_last && options.min_last_justification > 0.0 && ratio > 1.0 / options.min_last_justification {
        place_measures(measures, prefix);
        return None;
    }

    let floors: f64 = gaps.iter().filter(|g| g.stretchable).map(|g| g.floor).sum();
    if floors > available {
        diagnostics.warn(format!(
            "System at measure {}: content does not fit the system width ({} > {})",
            first_index + 1,
            (fixed + floors).round() as i64,
            target
        ));
    } else if ratio < COMPRESSION_WARNING_RATIO {
        diagnostics.warn(format!(
            "System at measure {}: spacing compressed to {:.0}%",
            first_index + 1,
            ratio * 100.0
        ));
    }

    // Positions accumulate in f64; only absolute positions are rounded
    let mut gaps = gaps.into_iter();
    let mut position = prefix as f64;
    for measure in measures.iter_mut() {
        let start = position.round() as i32;
        measure.drawing_x_rel = start;
        let columns = measure.aligner.alignments_mut().iter_mut().filter(|a| !a.is_timestamp_only());
        for alignment in columns.skip(1) {
            let Some(gap) = gaps.next() else { break };
            position += if gap.stretchable { (ratio * gap.width).max(gap.floor) } else { gap.width };
            alignment.x_rel = position.round() as i32 - start;
        }
        interpolate_timestamps(measure.aligner.alignments_mut());
        measure.drawing_width = measure.aligner.width();
    }
    Some(ratio)
}

// ═══════════════════════════════════════════════════════════════════════
// Applying column positions to elements
// ═══════════════════════════════════════════════════════════════════════

struct ApplyX;

#[derive(Default)]
struct ApplyXState {
    aligner: MeasureAligner,
    chord_offset: i32,
}

impl ApplyXState {
    fn x_of(&self, element: &Element) -> Option<i32> {
        let key = element.alignment()?;
        let alignment = self.aligner.alignment_at(key)?;
        let offset = alignment
            .reference(element.id)
            .map_or(self.chord_offset, |r| r.offset);
        Some(alignment.x_rel + offset)
    }
}

impl Visitor for ApplyX {
    type Context = ApplyXState;

    fn enter_measure(&mut self, measure: &mut Measure, _index: usize, st: &mut ApplyXState) -> Flow {
        st.aligner = measure.aligner.clone();
        st.chord_offset = 0;
        Flow::Continue
    }

    fn enter_element(&mut self, element: &mut Element, st: &mut ApplyXState) -> Flow {
        if let Some(x) = st.x_of(element) {
            element.drawing_x_rel = x;
            if matches!(element.kind, ElementKind::Chord(_)) {
                let key = element.alignment();
                st.chord_offset = key
                    .and_then(|k| st.aligner.alignment_at(k))
                    .and_then(|a| a.reference(element.id))
                    .map_or(0, |r| r.offset);
            }
        }
        Flow::Continue
    }

    fn leave_element(&mut self, element: &mut Element, st: &mut ApplyXState) {
        match element.kind {
            ElementKind::Chord(_) => st.chord_offset = 0,
            // Containers start at their first child
            ElementKind::Beam | ElementKind::Tuplet(_) | ElementKind::GraceGrp => {
                element.drawing_x_rel = element.children.first().map_or(0, |c| c.drawing_x_rel);
            }
            _ => {}
        }
    }

    fn visit_control_event(&mut self, event: &mut ControlEvent, st: &mut ApplyXState) -> Flow {
        if let Some(x) = event.alignment.and_then(|k| st.aligner.x_at(k)) {
            event.drawing_x_rel = x;
        }
        Flow::Continue
    }
}

/// Copy column positions to the elements anchored at them.
pub(crate) fn apply_x_positions(measures: &mut [Measure], first_index: usize) {
    walk_measures(&mut ApplyX, measures, first_index, &mut ApplyXState::default());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::horizontal::AlignmentReference;
    use crate::model::ElementId;
    use pretty_assertions::assert_eq;

    fn horizontal_ref(id: u32, staff: u32, left: i32, right: i32) -> AlignmentReference {
        AlignmentReference::new(ElementId(id), staff, 1, left, right)
    }

    fn non_linear() -> NonLinearSpacing {
        NonLinearSpacing::new(0.25, 0.6, Some(Duration::Whole), Units::new(9))
    }

    #[test]
    fn longer_intervals_get_more_space() {
        let f = non_linear();
        let eighth = f.space(Fraction::new(1, 8));
        let quarter = f.space(Fraction::new(1, 4));
        let half = f.space(Fraction::new(1, 2));
        assert!(eighth < quarter && quarter < half);
        // 2^0.6 between doublings
        assert!((half / quarter - 2f64.powf(0.6)).abs() < 1e-9);
        assert_eq!(f.space(Fraction::ZERO), 0.0);
    }

    #[test]
    fn breve_scores_are_compressed() {
        let plain = non_linear();
        let breve = NonLinearSpacing::new(0.25, 0.6, Some(Duration::Breve), Units::new(9));
        assert_eq!(breve.shift, 1);
        assert!((breve.space(Fraction::new(1, 2)) - plain.space(Fraction::new(1, 4))).abs() < 1e-9);
    }

    #[test]
    fn even_spacing() {
        let f = EvenSpacing { step: 500.0 };
        assert_eq!(f.space(Fraction::new(1, 16)), 500.0);
        assert_eq!(f.space(Fraction::new(2, 1)), 500.0);
        assert_eq!(f.space(Fraction::ZERO), 0.0);
    }

    #[test]
    fn stretch_ratio_clamps_to_floors() {
        let gaps = vec![
            Gap { width: 100.0, floor: 90.0, stretchable: true },
            Gap { width: 100.0, floor: 10.0, stretchable: true },
            Gap { width: 50.0, floor: 50.0, stretchable: false },
        ];
        // Growing: plain ratio
        assert!((stretch_ratio(&gaps, 400.0) - 2.0).abs() < 1e-9);
        // Shrinking to 150: first gap stops at 90, second gets 60
        let ratio = stretch_ratio(&gaps, 150.0);
        assert!((ratio - 0.6).abs() < 1e-9);
        // Impossible: everything at its floor
        assert_eq!(stretch_ratio(&gaps, 50.0), 0.0);
    }

    #[test]
    fn columns_clear_previous_content() {
        let mut aligner = MeasureAligner::new();
        let quarter = Fraction::new(1, 4);
        // Wide element on staff 1 at 0, narrow next onset
        aligner.add_element(Fraction::ZERO, AlignmentType::Default, horizontal_ref(1, 1, 0, 2000));
        aligner.add_element(quarter, AlignmentType::Default, horizontal_ref(2, 1, 100, 200));
        aligner.set_max_time(Fraction::new(1, 2));
        let staves = [1];
        let spacing = MeasureSpacing {
            function: &EvenSpacing { step: 300.0 },
            min_interval: Fraction::new(1, 64),
            staves: &staves,
            min_width: 0,
        };
        calc_alignment_x(&mut aligner, &spacing, false);
        let xs: Vec<_> = aligner.alignments().iter().map(|a| (a.kind, a.x_rel, a.min_gap)).collect();
        assert_eq!(
            xs,
            vec![
                (AlignmentType::MeasureStart, 0, 0),
                (AlignmentType::MeasureLeftBarLine, 0, 0),
                (AlignmentType::Default, 0, 0),
                // 2000 of content plus 100 of left extent
                (AlignmentType::Default, 2100, 2100),
                (AlignmentType::MeasureRightBarLine, 2400, 200),
                (AlignmentType::MeasureEnd, 2400, 0),
            ]
        );
    }

    #[test]
    fn later_onsets_step_right() {
        let mut aligner = MeasureAligner::new();
        aligner.add_element(Fraction::ZERO, AlignmentType::Default, horizontal_ref(1, 1, 0, 0));
        aligner.add_element(Fraction::new(1, 4), AlignmentType::Default, horizontal_ref(2, 1, 0, 0));
        let staves = [1];
        let spacing = MeasureSpacing {
            function: &EvenSpacing { step: 0.0 },
            min_interval: Fraction::new(1, 64),
            staves: &staves,
            min_width: 0,
        };
        calc_alignment_x(&mut aligner, &spacing, false);
        let xs: Vec<_> = aligner.alignments().iter().map(|a| (a.x_rel, a.min_gap)).collect();
        // Start and left barline share time 0 and x; every later onset moves by one
        assert_eq!(xs, vec![(0, 0), (0, 0), (0, 0), (1, 1), (1, 0), (1, 0)]);
    }

    #[test]
    fn timestamps_keep_the_floor_of_the_gap_they_split() {
        let mut aligner = MeasureAligner::new();
        aligner.add_element(Fraction::ZERO, AlignmentType::Default, horizontal_ref(1, 1, 0, 2000));
        let mut event = horizontal_ref(2, 1, 0, 0);
        event.timestamp = true;
        aligner.add_element(Fraction::new(1, 8), AlignmentType::Default, event);
        aligner.add_element(Fraction::new(1, 4), AlignmentType::Default, horizontal_ref(3, 1, 100, 200));
        aligner.set_max_time(Fraction::new(1, 2));
        let staves = [1];
        let spacing = MeasureSpacing {
            function: &EvenSpacing { step: 300.0 },
            min_interval: Fraction::new(1, 64),
            staves: &staves,
            min_width: 0,
        };
        calc_alignment_x(&mut aligner, &spacing, false);

        let mut measure = Measure::new(1, Vec::new());
        measure.aligner = aligner;
        let mut measures = vec![measure];
        let mut diagnostics = Diagnostics::new();
        justify_system(&mut measures, 0, 0, 1000, false, &Options::default(), &mut diagnostics);

        assert!(diagnostics.contains("does not fit"));
        let columns: Vec<_> = measures[0]
            .aligner
            .alignments()
            .iter()
            .filter(|a| a.kind == AlignmentType::Default)
            .map(|a| (a.time, a.x_rel))
            .collect();
        assert_eq!(
            columns,
            vec![
                (Fraction::ZERO, 0),
                (Fraction::new(1, 8), 1050),
                (Fraction::new(1, 4), 2100),
            ]
        );
        assert_eq!(measures[0].drawing_width, 2300);
    }
}
