//! Layout engine: assigns drawing coordinates to a document tree.
//!
//! A pass runs, in order:
//! 1. reset of every layout field and cache,
//! 2. horizontal alignment of each measure ([`horizontal`]),
//! 3. spacing of each measure, casting off into systems and justification
//!    ([`spacing`], [`pagination`]),
//! 4. vertical stacking of the staves of each system ([`vertical`]),
//! 5. casting off systems into pages and placing them.

pub(crate) mod constants;
pub mod horizontal;
pub mod pagination;
pub mod spacing;
pub mod vertical;

use std::ops::Range;

use serde::Serialize;

use crate::diagnostics::Diagnostics;
use crate::error::{LayoutError, Result};
use crate::fraction::Fraction;
use crate::model::{ControlEvent, Document, Element, GroupSymbol, Measure, Page, Staff, System};
use crate::options::{BreakMode, Breaks, Options};
use crate::resources::{ScaledMetrics, Resources};
use crate::visitor::{walk_measures, Flow, Visitor};

use self::constants::BRACE_WIDTH;
use self::pagination::{MeasureFit, SystemFit};
use self::spacing::MeasureSpacing;

/// Drawing units per MEI unit and staff-size percent.
pub const DEFINITION_FACTOR: i32 = 10;

/// Converts MEI units to drawing units for a given staff size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Units {
    unit: i32,
}

impl Units {
    pub fn new(unit: i32) -> Self {
        Self { unit }
    }

    /// Half a staff space, in drawing units.
    pub fn unit(&self, staff_size: i32) -> i32 {
        self.unit * DEFINITION_FACTOR * staff_size / 100
    }

    /// One staff space.
    pub fn double_unit(&self, staff_size: i32) -> i32 {
        2 * self.unit(staff_size)
    }

    pub fn staff_height(&self, lines: u8, staff_size: i32) -> i32 {
        (lines as i32 - 1).max(0) * self.double_unit(staff_size)
    }

    /// A length given in MEI units, rounded to drawing units.
    pub fn scaled(&self, mei_units: f64, staff_size: i32) -> i32 {
        (mei_units * self.unit(staff_size) as f64).round() as i32
    }
}

/// Progress of the layout pipeline on a document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum LayoutStage {
    /// No layout data (fresh or reset)
    #[default]
    Clean,
    Aligning,
    Justifying,
    VerticalStacking,
    /// Every coordinate is set
    Paginated,
}

/// Counts and page structure of a finished pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutSummary {
    pub page_count: usize,
    pub system_count: usize,
    pub measure_count: usize,
    pub pages: Vec<PageSummary>,
    pub warning_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageSummary {
    /// Measure index range of each system on the page
    pub systems: Vec<Range<usize>>,
    pub height: i32,
}

impl LayoutSummary {
    fn of(doc: &Document, diagnostics: &Diagnostics) -> Self {
        LayoutSummary {
            page_count: doc.pages.len(),
            system_count: doc.system_count(),
            measure_count: doc.measures.len(),
            pages: doc
                .pages
                .iter()
                .map(|p| PageSummary {
                    systems: p.systems.iter().map(|s| s.measures.clone()).collect(),
                    height: p.drawing_height,
                })
                .collect(),
            warning_count: diagnostics.warnings().count() + diagnostics.errors().count(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Reset
// ═══════════════════════════════════════════════════════════════════════

struct ResetData;

impl Visitor for ResetData {
    type Context = ();

    fn enter_measure(&mut self, measure: &mut Measure, _index: usize, _ctx: &mut ()) -> Flow {
        measure.aligner.reset();
        measure.drawing_x_rel = 0;
        measure.drawing_width = 0;
        Flow::Continue
    }

    fn enter_staff(&mut self, staff: &mut Staff, _ctx: &mut ()) -> Flow {
        staff.drawing_y_rel = 0;
        Flow::Continue
    }

    fn enter_element(&mut self, element: &mut Element, _ctx: &mut ()) -> Flow {
        element.alignment = None;
        element.drawing_x_rel = 0;
        element.drawing_y_rel = 0;
        Flow::Continue
    }

    fn visit_control_event(&mut self, event: &mut ControlEvent, _ctx: &mut ()) -> Flow {
        event.alignment = None;
        event.drawing_x_rel = 0;
        event.drawing_y_rel = 0;
        Flow::Continue
    }
}

/// Return every node to the clean state, dropping all layout caches.
pub fn reset_data(doc: &mut Document) {
    walk_measures(&mut ResetData, &mut doc.measures, 0, &mut ());
    doc.pages.clear();
    doc.stage = LayoutStage::Clean;
}

// ═══════════════════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════════════════

/// Runs layout passes with one set of options and fonts.
pub struct LayoutEngine<'r> {
    resources: &'r Resources,
    options: Options,
    diagnostics: Diagnostics,
}

impl<'r> LayoutEngine<'r> {
    /// Fails with [`LayoutError::NoFontLoaded`] when `resources` holds no font.
    pub fn new(resources: &'r Resources, options: Options) -> Result<Self> {
        if resources.current_font().is_none() {
            return Err(LayoutError::NoFontLoaded);
        }
        Ok(Self {
            resources,
            options,
            diagnostics: Diagnostics::new(),
        })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn set_options(&mut self, options: Options) {
        self.options = options;
    }

    /// Apply a JSON object of options; messages stay in the diagnostics
    /// buffer until the next pass starts.
    pub fn set_options_json(&mut self, json: &str) -> Result<()> {
        self.options.apply_json(json, &mut self.diagnostics)
    }

    /// Messages of the last pass.
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn reset_data(&self, doc: &mut Document) {
        reset_data(doc);
    }

    /// Lay the document out from a clean state.
    pub fn layout(&mut self, doc: &mut Document) -> Result<LayoutSummary> {
        self.diagnostics.clear();
        self.options.validate(&mut self.diagnostics);
        doc.validate()?;
        reset_data(doc);

        let options = &self.options;
        let diagnostics = &mut self.diagnostics;
        let units = Units::new(options.unit);
        let metrics = ScaledMetrics::new(self.resources, units);

        // ── Horizontal alignment ──
        doc.stage = LayoutStage::Aligning;
        let states = horizontal::align_measures(doc, &metrics, units, diagnostics);

        // ── Spacing, systems and justification ──
        doc.stage = LayoutStage::Justifying;
        let staves = doc.score_def.staff_order();
        let function = spacing::spacing_function(options, doc.longest_duration(), units);
        let measure_spacing = MeasureSpacing {
            function: function.as_ref(),
            min_interval: Fraction::new(1, options.spacing_min_duration as i64),
            staves: &staves,
            min_width: units.scaled(options.min_measure_width as f64, 100),
        };
        for measure in doc.measures.iter_mut() {
            spacing::calc_alignment_x(&mut measure.aligner, &measure_spacing, false);
            measure.drawing_width = measure.aligner.width();
        }

        let x_offset = if doc.score_def.groups.iter().any(|g| g.symbol != GroupSymbol::None) {
            units.scaled(BRACE_WIDTH, 100)
        } else {
            0
        };
        let system_width = options.drawing_content_width() - x_offset;
        let fits: Vec<MeasureFit> = doc
            .measures
            .iter()
            .enumerate()
            .map(|(i, m)| MeasureFit {
                width: m.drawing_width,
                prefix: spacing::system_prefix_width(&states[i], &doc.score_def, &metrics, units),
                new_system: m.new_system,
                new_page: m.new_page,
                n: m.n.unwrap_or(i as i32 + 1),
            })
            .collect();
        let ranges = pagination::cast_off_systems(&fits, system_width, options, diagnostics);

        let justify = options.justify && options.breaks != Breaks::Mode(BreakMode::None);
        let mut systems = Vec::with_capacity(ranges.len());
        for (si, range) in ranges.iter().enumerate() {
            let first = &mut doc.measures[range.start];
            spacing::calc_alignment_x(&mut first.aligner, &measure_spacing, true);
            first.drawing_width = first.aligner.width();

            let prefix = fits[range.start].prefix;
            let measures = &mut doc.measures[range.clone()];
            if justify {
                let is_last = si + 1 == ranges.len();
                spacing::justify_system(measures, range.start, prefix, system_width, is_last, options, diagnostics);
            } else {
                spacing::place_measures(measures, prefix);
            }
            spacing::apply_x_positions(measures, range.start);

            systems.push(System {
                measures: range.clone(),
                drawing_x_rel: x_offset,
                drawing_prefix_width: prefix,
                drawing_width: measures.last().map_or(prefix, |m| m.drawing_x_rel + m.drawing_width),
                ..System::default()
            });
        }

        // ── Vertical stacking ──
        doc.stage = LayoutStage::VerticalStacking;
        let mut staff_state = vertical::StaffState::new(&doc.score_def);
        for system in systems.iter_mut() {
            vertical::stack_system(system, &mut doc.measures, &doc.score_def, &mut staff_state, &metrics, units, options);
        }

        // ── Pages ──
        let header = if options.header && doc.title.is_some() {
            units.scaled(constants::HEADER_HEIGHT, 100)
        } else {
            0
        };
        let system_fits: Vec<SystemFit> = systems
            .iter()
            .map(|s| SystemFit {
                height: s.aligner.height(),
                overflow_above: s.aligner.overflow_above(),
                overflow_below: s.aligner.overflow_below(),
                new_page: doc.measures[s.measures.start].new_page,
            })
            .collect();
        let page_ranges = pagination::cast_off_pages(&system_fits, header, units, options, diagnostics);

        let mut systems = systems.into_iter();
        let mut pages: Vec<Page> = page_ranges
            .iter()
            .map(|r| Page {
                systems: systems.by_ref().take(r.len()).collect(),
                drawing_height: 0,
            })
            .collect();
        vertical::place_pages(&mut pages, header, units, options);
        doc.pages = pages;
        doc.stage = LayoutStage::Paginated;

        for code in metrics.take_missing() {
            diagnostics.warn(format!("Glyph U+{code:04X} is missing, the fallback glyph was used"));
        }
        log::debug!(
            "Layout done: {} measures, {} systems, {} pages",
            doc.measures.len(),
            doc.system_count(),
            doc.pages.len()
        );
        Ok(LayoutSummary::of(doc, diagnostics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fraction::Duration;
    use crate::model::{Clef, Layer, PitchName, ScoreDef};

    #[test]
    fn unit_conversions() {
        let units = Units::new(9);
        assert_eq!(units.unit(100), 90);
        assert_eq!(units.double_unit(100), 180);
        assert_eq!(units.staff_height(5, 100), 720);
        assert_eq!(units.staff_height(1, 100), 0);
        assert_eq!(units.unit(75), 67);
        assert_eq!(units.scaled(1.5, 100), 135);
    }

    #[test]
    fn refuses_to_run_without_font() {
        let resources = Resources::new();
        assert!(matches!(
            LayoutEngine::new(&resources, Options::default()),
            Err(LayoutError::NoFontLoaded)
        ));
    }

    #[test]
    fn stage_transitions() {
        let resources = Resources::with_default_font().unwrap();
        let mut engine = LayoutEngine::new(&resources, Options::default()).unwrap();
        let mut doc = Document::new(
            ScoreDef::with_staves(&[Clef::treble()]),
            vec![Measure::new(
                1,
                vec![Staff::new(
                    2,
                    1,
                    vec![Layer::new(3, 1, vec![Element::note(4, Duration::Whole, PitchName::G, 4)])],
                )],
            )],
        );
        assert_eq!(doc.stage(), LayoutStage::Clean);
        engine.layout(&mut doc).unwrap();
        assert_eq!(doc.stage(), LayoutStage::Paginated);
        assert!(doc.measures[0].staves[0].layers[0].elements[0].alignment().is_some());

        engine.reset_data(&mut doc);
        assert_eq!(doc.stage(), LayoutStage::Clean);
        assert!(doc.pages.is_empty());
        assert!(doc.measures[0].staves[0].layers[0].elements[0].alignment().is_none());
        assert_eq!(doc.measures[0].drawing_width, 0);
    }
}
