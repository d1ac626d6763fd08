//! Data model for a music-notation document tree.
//!
//! Measures contain staves, staves contain layers, layers contain an
//! ordered tree of content elements. Every node is owned by exactly one
//! parent. Layout output lives in the `drawing_*` fields, which default to
//! zero on input and are only written by the layout engine; the auxiliary
//! aligners are caches that are never serialized.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{LayoutError, Result};
use crate::fraction::{Duration, Fraction};
use crate::layout::horizontal::{AlignmentKey, MeasureAligner};
use crate::layout::vertical::SystemAligner;
use crate::layout::LayoutStage;

/// Identifier of a node, unique within a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(pub u32);

/// A complete document: score definition, measures and, after layout,
/// the pages it was cast off into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Title of the piece (reserves header room on the first page)
    #[serde(default)]
    pub title: Option<String>,
    /// Staff groups and initial signatures
    pub score_def: ScoreDef,
    /// Measures in score order
    pub measures: Vec<Measure>,
    /// Layout output: pages with their systems
    #[serde(default, skip_deserializing)]
    pub pages: Vec<Page>,
    #[serde(skip)]
    pub(crate) stage: LayoutStage,
}

/// Initial score definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreDef {
    /// Staff groups, top to bottom
    pub groups: Vec<StaffGrp>,
    /// Initial key signature
    #[serde(default)]
    pub key: Option<KeySig>,
    /// Initial meter
    #[serde(default)]
    pub meter: Option<MeterSig>,
}

/// A group of staves (e.g. the two staves of a piano part).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaffGrp {
    #[serde(default)]
    pub symbol: GroupSymbol,
    pub staff_defs: Vec<StaffDef>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupSymbol {
    #[default]
    None,
    Brace,
    Bracket,
}

/// Definition of one staff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffDef {
    /// Staff number referenced by `Staff::n`
    pub n: u32,
    /// Number of staff lines
    #[serde(default = "default_lines")]
    pub lines: u8,
    /// Staff size in percent
    #[serde(default = "default_staff_size")]
    pub size: i32,
    /// Initial clef
    #[serde(default)]
    pub clef: Option<Clef>,
    /// Instrument label
    #[serde(default)]
    pub label: Option<String>,
}

fn default_lines() -> u8 {
    5
}

fn default_staff_size() -> i32 {
    100
}

/// A score definition change taking effect at the start of a measure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreDefChange {
    #[serde(default)]
    pub clefs: Vec<StaffClef>,
    #[serde(default)]
    pub key: Option<KeySig>,
    #[serde(default)]
    pub meter: Option<MeterSig>,
}

/// A clef assigned to a staff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffClef {
    pub staff: u32,
    pub clef: Clef,
}

/// A single measure (bar).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measure {
    pub id: ElementId,
    /// Measure number
    #[serde(default)]
    pub n: Option<i32>,
    /// Encoded system break before this measure
    #[serde(default)]
    pub new_system: bool,
    /// Encoded page break before this measure
    #[serde(default)]
    pub new_page: bool,
    /// Clef/key/meter changes at the start of the measure
    #[serde(default)]
    pub score_def_change: Option<ScoreDefChange>,
    /// Left barline, if one is drawn
    #[serde(default)]
    pub left: Option<BarLineForm>,
    /// Right barline
    #[serde(default)]
    pub right: BarLineForm,
    pub staves: Vec<Staff>,
    /// Dynamics, directions and tempo marks attached by timestamp
    #[serde(default)]
    pub control_events: Vec<ControlEvent>,
    /// Layout output: x offset within the system
    #[serde(default)]
    pub drawing_x_rel: i32,
    /// Layout output: measure width
    #[serde(default)]
    pub drawing_width: i32,
    #[serde(skip)]
    pub(crate) aligner: MeasureAligner,
}

/// One staff within a measure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Staff {
    pub id: ElementId,
    pub n: u32,
    pub layers: Vec<Layer>,
    /// Layout output: y offset of the top line within the system
    #[serde(default)]
    pub drawing_y_rel: i32,
}

/// One layer (voice) within a staff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub id: ElementId,
    pub n: u32,
    pub elements: Vec<Element>,
}

/// A content element with its owned children.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Element {
    pub id: ElementId,
    pub kind: ElementKind,
    #[serde(default)]
    pub children: Vec<Element>,
    /// Layout output: x offset within the measure
    #[serde(default)]
    pub drawing_x_rel: i32,
    /// Layout output: y offset from the top staff line
    #[serde(default)]
    pub drawing_y_rel: i32,
    #[serde(skip)]
    pub(crate) alignment: Option<AlignmentKey>,
}

/// Element variants and their type-specific attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ElementKind {
    Note(Note),
    Rest(Rest),
    /// Full-measure rest
    MRest,
    Space(Space),
    Chord(Chord),
    Beam,
    Tuplet(Tuplet),
    /// Container making its notes grace notes
    GraceGrp,
    Clef(Clef),
    KeySig(KeySig),
    MeterSig(MeterSig),
    BarLine(BarLine),
}

/// Capabilities an element may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interface {
    /// Carries a notated duration
    Duration,
    /// Carries a pitch
    Pitch,
    /// Owns other content elements
    Container,
    /// Occupies a column of its own in the measure
    Alignable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationAttr {
    /// Missing on malformed input
    #[serde(default)]
    pub dur: Option<Duration>,
    #[serde(default)]
    pub dots: u8,
}

impl DurationAttr {
    pub fn new(dur: Duration) -> Self {
        Self { dur: Some(dur), dots: 0 }
    }

    pub fn dotted(dur: Duration, dots: u8) -> Self {
        Self { dur: Some(dur), dots }
    }

    /// Notated value including dots, in whole notes.
    pub fn value(&self) -> Option<Fraction> {
        let base = Fraction::from(self.dur?);
        // 2 - 2^-dots
        let dots = self.dots.min(8) as u32;
        let factor = Fraction::new((1i64 << (dots + 1)) - 1, 1i64 << dots);
        Some(base * factor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitchAttr {
    pub pname: PitchName,
    pub oct: i8,
}

impl PitchAttr {
    pub fn new(pname: PitchName, oct: i8) -> Self {
        Self { pname, oct }
    }

    /// Diatonic step count from C0.
    pub fn diatonic_position(&self) -> i32 {
        self.oct as i32 * 7 + self.pname.step_index()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PitchName {
    C,
    D,
    E,
    F,
    G,
    A,
    B,
}

impl PitchName {
    pub fn step_index(self) -> i32 {
        match self {
            PitchName::C => 0,
            PitchName::D => 1,
            PitchName::E => 2,
            PitchName::F => 3,
            PitchName::G => 4,
            PitchName::A => 5,
            PitchName::B => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Accidental {
    #[serde(rename = "s")]
    Sharp,
    #[serde(rename = "f")]
    Flat,
    #[serde(rename = "n")]
    Natural,
    #[serde(rename = "x")]
    DoubleSharp,
    #[serde(rename = "ff")]
    DoubleFlat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StemDir {
    Up,
    Down,
}

/// One lyric syllable attached to a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verse {
    pub n: u32,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    #[serde(default)]
    pub duration: DurationAttr,
    pub pitch: PitchAttr,
    #[serde(default)]
    pub accid: Option<Accidental>,
    #[serde(default)]
    pub grace: bool,
    #[serde(default)]
    pub stem: Option<StemDir>,
    #[serde(default)]
    pub verses: Vec<Verse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rest {
    #[serde(default)]
    pub duration: DurationAttr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Space {
    #[serde(default)]
    pub duration: DurationAttr,
}

/// Simultaneous notes; the child notes' own durations are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chord {
    #[serde(default)]
    pub duration: DurationAttr,
    #[serde(default)]
    pub grace: bool,
}

/// `num` notes in the time of `num_base`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Tuplet {
    pub num: u32,
    pub num_base: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clef {
    pub shape: ClefShape,
    pub line: u8,
    /// Octave displacement (e.g. -1 for the tenor "8vb" G clef)
    #[serde(default)]
    pub dis: i8,
}

impl Clef {
    pub fn treble() -> Self {
        Clef { shape: ClefShape::G, line: 2, dis: 0 }
    }

    pub fn bass() -> Self {
        Clef { shape: ClefShape::F, line: 4, dis: 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClefShape {
    G,
    F,
    C,
    #[serde(rename = "perc")]
    Perc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySig {
    /// Sharps (positive) or flats (negative)
    pub sig: i8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterSig {
    pub count: u32,
    pub unit: u32,
}

impl MeterSig {
    /// Measure duration in whole notes.
    pub fn measure_duration(&self) -> Fraction {
        Fraction::new(self.count as i64, self.unit.max(1) as i64)
    }
}

impl Default for MeterSig {
    fn default() -> Self {
        MeterSig { count: 4, unit: 4 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BarLine {
    pub form: BarLineForm,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BarLineForm {
    #[default]
    Single,
    Dbl,
    End,
    RptStart,
    RptEnd,
    Invis,
}

/// An event attached to a staff by beat timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlEvent {
    pub id: ElementId,
    pub kind: ControlEventKind,
    pub staff: u32,
    /// 1-based beat position in meter units
    pub tstamp: f64,
    #[serde(default)]
    pub place: Placement,
    #[serde(default)]
    pub drawing_x_rel: i32,
    #[serde(default)]
    pub drawing_y_rel: i32,
    #[serde(skip)]
    pub(crate) alignment: Option<AlignmentKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "text", rename_all = "lowercase")]
pub enum ControlEventKind {
    Dynam(String),
    Dir(String),
    Tempo(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
    Above,
    #[default]
    Below,
}

/// A page produced by pagination.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Page {
    pub systems: Vec<System>,
    /// Drawing height of the page (content height when cropped)
    pub drawing_height: i32,
}

/// A system: a contiguous run of measures laid out on one line.
#[derive(Debug, Clone, Default, Serialize)]
pub struct System {
    /// Indices into `Document::measures`
    pub measures: Range<usize>,
    /// Offset of the top staff line from the page top
    pub drawing_y_rel: i32,
    /// Left edge offset from the page margin
    pub drawing_x_rel: i32,
    /// Width of the clef/key/meter prefix
    pub drawing_prefix_width: i32,
    /// Justified width (prefix + measures)
    pub drawing_width: i32,
    pub aligner: SystemAligner,
}

// ═══════════════════════════════════════════════════════════════════════
// Element helpers
// ═══════════════════════════════════════════════════════════════════════

impl Element {
    pub fn new(id: u32, kind: ElementKind) -> Self {
        Self {
            id: ElementId(id),
            kind,
            children: Vec::new(),
            drawing_x_rel: 0,
            drawing_y_rel: 0,
            alignment: None,
        }
    }

    pub fn with_children(mut self, children: Vec<Element>) -> Self {
        self.children = children;
        self
    }

    pub fn note(id: u32, dur: Duration, pname: PitchName, oct: i8) -> Self {
        Self::new(
            id,
            ElementKind::Note(Note {
                duration: DurationAttr::new(dur),
                pitch: PitchAttr::new(pname, oct),
                accid: None,
                grace: false,
                stem: None,
                verses: Vec::new(),
            }),
        )
    }

    pub fn rest(id: u32, dur: Duration) -> Self {
        Self::new(id, ElementKind::Rest(Rest { duration: DurationAttr::new(dur) }))
    }

    pub fn chord(id: u32, dur: Duration, notes: Vec<Element>) -> Self {
        Self::new(
            id,
            ElementKind::Chord(Chord { duration: DurationAttr::new(dur), grace: false }),
        )
        .with_children(notes)
    }

    pub fn clef(id: u32, clef: Clef) -> Self {
        Self::new(id, ElementKind::Clef(clef))
    }

    /// Alignment column of the element, once aligned.
    pub fn alignment(&self) -> Option<AlignmentKey> {
        self.alignment
    }

    pub fn duration(&self) -> Option<&DurationAttr> {
        match &self.kind {
            ElementKind::Note(n) => Some(&n.duration),
            ElementKind::Rest(r) => Some(&r.duration),
            ElementKind::Space(s) => Some(&s.duration),
            ElementKind::Chord(c) => Some(&c.duration),
            _ => None,
        }
    }

    pub fn pitch(&self) -> Option<&PitchAttr> {
        match &self.kind {
            ElementKind::Note(n) => Some(&n.pitch),
            _ => None,
        }
    }

    pub fn implements(&self, interface: Interface) -> bool {
        match interface {
            Interface::Duration => self.duration().is_some(),
            Interface::Pitch => self.pitch().is_some(),
            Interface::Container => matches!(
                self.kind,
                ElementKind::Chord(_) | ElementKind::Beam | ElementKind::Tuplet(_) | ElementKind::GraceGrp
            ),
            Interface::Alignable => !matches!(
                self.kind,
                ElementKind::Beam | ElementKind::Tuplet(_) | ElementKind::GraceGrp
            ),
        }
    }

    pub fn is_grace(&self) -> bool {
        match &self.kind {
            ElementKind::Note(n) => n.grace,
            ElementKind::Chord(c) => c.grace,
            _ => false,
        }
    }

    /// Class name used in messages.
    pub fn name(&self) -> &'static str {
        match self.kind {
            ElementKind::Note(_) => "note",
            ElementKind::Rest(_) => "rest",
            ElementKind::MRest => "mRest",
            ElementKind::Space(_) => "space",
            ElementKind::Chord(_) => "chord",
            ElementKind::Beam => "beam",
            ElementKind::Tuplet(_) => "tuplet",
            ElementKind::GraceGrp => "graceGrp",
            ElementKind::Clef(_) => "clef",
            ElementKind::KeySig(_) => "keySig",
            ElementKind::MeterSig(_) => "meterSig",
            ElementKind::BarLine(_) => "barLine",
        }
    }
}

impl Note {
    pub fn with_accid(mut self, accid: Accidental) -> Self {
        self.accid = Some(accid);
        self
    }
}

impl Layer {
    pub fn new(id: u32, n: u32, elements: Vec<Element>) -> Self {
        Self { id: ElementId(id), n, elements }
    }
}

impl Staff {
    pub fn new(id: u32, n: u32, layers: Vec<Layer>) -> Self {
        Self { id: ElementId(id), n, layers, drawing_y_rel: 0 }
    }
}

impl ControlEvent {
    pub fn new(id: u32, kind: ControlEventKind, staff: u32, tstamp: f64, place: Placement) -> Self {
        Self {
            id: ElementId(id),
            kind,
            staff,
            tstamp,
            place,
            drawing_x_rel: 0,
            drawing_y_rel: 0,
            alignment: None,
        }
    }

    pub fn alignment(&self) -> Option<AlignmentKey> {
        self.alignment
    }
}

impl Measure {
    pub fn new(id: u32, staves: Vec<Staff>) -> Self {
        Self {
            id: ElementId(id),
            n: None,
            new_system: false,
            new_page: false,
            score_def_change: None,
            left: None,
            right: BarLineForm::Single,
            staves,
            control_events: Vec::new(),
            drawing_x_rel: 0,
            drawing_width: 0,
            aligner: MeasureAligner::default(),
        }
    }

    pub fn numbered(mut self, n: i32) -> Self {
        self.n = Some(n);
        self
    }

    /// The horizontal aligner built by the last layout pass.
    pub fn aligner(&self) -> &MeasureAligner {
        &self.aligner
    }
}

impl ScoreDef {
    /// A score definition with one staff per clef, all in one group.
    pub fn with_staves(clefs: &[Clef]) -> Self {
        let staff_defs = clefs
            .iter()
            .enumerate()
            .map(|(i, clef)| StaffDef {
                n: i as u32 + 1,
                lines: 5,
                size: 100,
                clef: Some(*clef),
                label: None,
            })
            .collect();
        ScoreDef {
            groups: vec![StaffGrp { symbol: GroupSymbol::None, staff_defs }],
            key: None,
            meter: Some(MeterSig::default()),
        }
    }

    /// Staff definitions in declared top-to-bottom order.
    pub fn staff_defs(&self) -> impl Iterator<Item = &StaffDef> {
        self.groups.iter().flat_map(|g| g.staff_defs.iter())
    }

    pub fn staff_def(&self, n: u32) -> Option<&StaffDef> {
        self.staff_defs().find(|d| d.n == n)
    }

    /// Staff numbers, top to bottom.
    pub fn staff_order(&self) -> Vec<u32> {
        self.staff_defs().map(|d| d.n).collect()
    }

    pub fn staff_size(&self, n: u32) -> i32 {
        self.staff_def(n).map_or(100, |d| d.size)
    }
}

impl Document {
    pub fn new(score_def: ScoreDef, measures: Vec<Measure>) -> Self {
        Self {
            title: None,
            score_def,
            measures,
            pages: Vec::new(),
            stage: LayoutStage::Clean,
        }
    }

    /// Current state of the layout pipeline for this document.
    pub fn stage(&self) -> LayoutStage {
        self.stage
    }

    pub fn measure_count(&self) -> usize {
        self.measures.len()
    }

    pub fn system_count(&self) -> usize {
        self.pages.iter().map(|p| p.systems.len()).sum()
    }

    pub fn systems(&self) -> impl Iterator<Item = &System> {
        self.pages.iter().flat_map(|p| p.systems.iter())
    }

    /// Check the structural preconditions the layout relies on.
    pub fn validate(&self) -> Result<()> {
        let order = self.score_def.staff_order();
        if order.is_empty() {
            return Err(LayoutError::structure(0, "the score definition declares no staff"));
        }
        for (i, n) in order.iter().enumerate() {
            if order[..i].contains(n) {
                return Err(LayoutError::structure(0, format!("staff {n} is declared twice")));
            }
        }
        for (mi, measure) in self.measures.iter().enumerate() {
            for staff in &measure.staves {
                if !order.contains(&staff.n) {
                    return Err(LayoutError::structure(
                        mi,
                        format!("staff {} is not declared in the score definition", staff.n),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Longest notated duration in the document.
    pub fn longest_duration(&self) -> Option<Duration> {
        fn walk(elements: &[Element], longest: &mut Option<Duration>) {
            for element in elements {
                if let Some(dur) = element.duration().and_then(|d| d.dur) {
                    if longest.map_or(true, |l| dur < l) {
                        *longest = Some(dur);
                    }
                }
                walk(&element.children, longest);
            }
        }
        let mut longest = None;
        for measure in &self.measures {
            for staff in &measure.staves {
                for layer in &staff.layers {
                    walk(&layer.elements, &mut longest);
                }
            }
        }
        longest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_values() {
        assert_eq!(DurationAttr::new(Duration::Half).value(), Some(Fraction::new(1, 2)));
        assert_eq!(
            DurationAttr::dotted(Duration::Quarter, 1).value(),
            Some(Fraction::new(3, 8))
        );
        assert_eq!(
            DurationAttr::dotted(Duration::Quarter, 2).value(),
            Some(Fraction::new(7, 16))
        );
        assert_eq!(DurationAttr::default().value(), None);
    }

    #[test]
    fn capabilities() {
        let note = Element::note(1, Duration::Quarter, PitchName::C, 4);
        assert!(note.implements(Interface::Duration));
        assert!(note.implements(Interface::Pitch));
        assert!(!note.implements(Interface::Container));
        let beam = Element::new(2, ElementKind::Beam);
        assert!(beam.implements(Interface::Container));
        assert!(!beam.implements(Interface::Alignable));
    }

    #[test]
    fn validate_rejects_undeclared_staff() {
        let doc = Document::new(
            ScoreDef::with_staves(&[Clef::treble()]),
            vec![Measure::new(1, vec![Staff::new(2, 3, vec![])])],
        );
        assert!(matches!(doc.validate(), Err(LayoutError::Structure { measure: 0, .. })));
    }

    #[test]
    fn element_json_shape() {
        let json = r#"{"id": 7, "kind": {"type": "note", "duration": {"dur": "8", "dots": 1},
                       "pitch": {"pname": "g", "oct": 4}, "accid": "s"}}"#;
        let element: Element = serde_json::from_str(json).unwrap();
        assert_eq!(element.id, ElementId(7));
        assert_eq!(element.duration().and_then(|d| d.value()), Some(Fraction::new(3, 16)));
        match element.kind {
            ElementKind::Note(ref n) => assert_eq!(n.accid, Some(Accidental::Sharp)),
            _ => panic!("expected a note"),
        }
    }

    #[test]
    fn longest_duration_scans_children() {
        let doc = Document::new(
            ScoreDef::with_staves(&[Clef::treble()]),
            vec![Measure::new(
                1,
                vec![Staff::new(
                    2,
                    1,
                    vec![Layer::new(
                        3,
                        1,
                        vec![
                            Element::note(4, Duration::Quarter, PitchName::C, 4),
                            Element::new(5, ElementKind::Beam)
                                .with_children(vec![Element::rest(6, Duration::Breve)]),
                        ],
                    )],
                )],
            )],
        );
        assert_eq!(doc.longest_duration(), Some(Duration::Breve));
    }
}
