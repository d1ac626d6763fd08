//! Layout tests: build documents, lay them out and check the positions.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use scorelayout::layout::horizontal::AlignmentType;
use scorelayout::*;

fn engine_layout(doc: &mut Document, options: Options) -> (LayoutSummary, Diagnostics) {
    let resources = Resources::with_default_font().expect("bundled font");
    let mut engine = LayoutEngine::new(&resources, options).expect("engine");
    let summary = engine.layout(doc).expect("layout");
    (summary, engine.diagnostics().clone())
}

#[test]
fn quarter_notes_are_evenly_spaced() {
    init_logger();
    let mut ids = Ids::default();
    let mut doc = treble_document(vec![ids.quarters(1)]);
    layout_document(&mut doc, &Options::default()).unwrap();

    let xs = layer_x(&doc.measures[0], 0);
    let steps: Vec<i32> = xs.windows(2).map(|w| w[1] - w[0]).collect();
    assert!(steps.iter().all(|s| *s > 0), "x must increase: {xs:?}");
    for step in &steps {
        assert!((step - steps[0]).abs() <= 1, "uneven steps: {steps:?}");
    }

    let kinds: Vec<AlignmentType> = doc.measures[0].aligner().alignments().iter().map(|a| a.kind).collect();
    assert_eq!(kinds.first(), Some(&AlignmentType::MeasureStart));
    assert_eq!(kinds.last(), Some(&AlignmentType::MeasureEnd));
    assert_eq!(kinds.iter().filter(|k| **k == AlignmentType::Default).count(), 4);
}

#[test]
fn simultaneous_onsets_share_a_column() {
    let mut ids = Ids::default();
    let upper = vec![
        ids.note(Duration::Quarter, PitchName::E, 5),
        ids.note(Duration::Quarter, PitchName::D, 5),
        ids.note(Duration::Quarter, PitchName::C, 5),
        ids.note(Duration::Quarter, PitchName::B, 4),
    ];
    let lower = vec![
        ids.note(Duration::Half, PitchName::C, 3),
        ids.note(Duration::Quarter, PitchName::G, 2),
        ids.rest(Duration::Quarter),
    ];
    let measure = ids.measure(1, vec![upper, lower]);
    let mut doc = Document::new(ScoreDef::with_staves(&[Clef::treble(), Clef::bass()]), vec![measure]);
    layout_document(&mut doc, &Options::default()).unwrap();

    let top = layer_x(&doc.measures[0], 0);
    let bottom = layer_x(&doc.measures[0], 1);
    assert_eq!(bottom[0], top[0]);
    assert_eq!(bottom[1], top[2]);
    assert_eq!(bottom[2], top[3]);

    // One column per distinct onset
    let columns = doc.measures[0]
        .aligner()
        .alignments()
        .iter()
        .filter(|a| a.kind == AlignmentType::Default)
        .count();
    assert_eq!(columns, 4);

    // The bass staff sits below the treble staff
    let staves = &doc.measures[0].staves;
    assert_eq!(staves[0].drawing_y_rel, 0);
    assert!(staves[1].drawing_y_rel >= 720 + 12 * 90);
}

#[test]
fn layers_starting_together_share_a_column() {
    let mut ids = Ids::default();
    let upper = Layer::new(ids.next(), 1, vec![ids.note(Duration::Half, PitchName::E, 5), ids.note(Duration::Half, PitchName::D, 5)]);
    let lower = Layer::new(
        ids.next(),
        2,
        vec![
            ids.note(Duration::Quarter, PitchName::G, 4),
            ids.note(Duration::Quarter, PitchName::A, 4),
            ids.note(Duration::Half, PitchName::B, 4),
        ],
    );
    let measure = Measure::new(ids.next(), vec![Staff::new(ids.next(), 1, vec![upper, lower])]);
    let mut doc = treble_document(vec![measure]);
    layout_document(&mut doc, &Options::default()).unwrap();

    let layers = &doc.measures[0].staves[0].layers;
    let (a, b) = (&layers[0].elements, &layers[1].elements);
    assert_eq!(a[0].alignment(), b[0].alignment());
    assert_eq!(a[1].alignment(), b[2].alignment());
    let second = b[1].alignment().expect("aligned");
    assert_eq!(second.time, Fraction::new(1, 4));
    assert_eq!(a[0].drawing_x_rel, b[0].drawing_x_rel);
}

#[test]
fn overwide_measure_gets_its_own_system() {
    let mut ids = Ids::default();
    let measures = vec![ids.quarters(1), ids.run(2, Duration::D64), ids.quarters(3)];
    let mut doc = treble_document(measures);
    let options = Options { page_width: 800, ..Options::default() };
    let (summary, diagnostics) = engine_layout(&mut doc, options);

    let systems: Vec<_> = doc.systems().map(|s| s.measures.clone()).collect();
    assert!(systems.contains(&(1..2)), "systems: {systems:?}");
    assert_eq!(systems.iter().map(|r| r.len()).sum::<usize>(), 3);
    assert_eq!(summary.measure_count, 3);
    assert!(diagnostics.contains("wider than the system"));
}

#[test]
fn systems_fill_the_width() {
    let mut ids = Ids::default();
    let measures: Vec<Measure> = (1..=24).map(|n| ids.quarters(n)).collect();
    let mut doc = treble_document(measures);
    let options = Options::default();
    let target = options.drawing_content_width();
    let (summary, _) = engine_layout(&mut doc, options);

    assert!(summary.system_count > 1);
    let systems: Vec<&System> = doc.systems().collect();
    for system in &systems[..systems.len() - 1] {
        assert!((system.drawing_width - target).abs() <= 1, "{} != {target}", system.drawing_width);
    }
    // Measures follow each other within a system
    for system in &systems {
        let mut x = system.drawing_prefix_width;
        for measure in &doc.measures[system.measures.clone()] {
            assert_eq!(measure.drawing_x_rel, x);
            x += measure.drawing_width;
        }
    }
}

#[test]
fn layout_is_idempotent() {
    let mut doc = load_fixture("minuet.json");
    layout_document(&mut doc, &Options::default()).unwrap();
    let first = document_to_json(&doc).unwrap();
    layout_document(&mut doc, &Options::default()).unwrap();
    let second = document_to_json(&doc).unwrap();
    assert_eq!(first, second);
}

#[test]
fn minuet_fixture() {
    init_logger();
    let mut doc = load_fixture("minuet.json");
    assert_eq!(doc.measure_count(), 8);
    let (summary, diagnostics) = engine_layout(&mut doc, Options::default());

    assert_eq!(doc.stage(), LayoutStage::Paginated);
    assert_eq!(summary.page_count, 1);
    // Encoded system break before measure 5
    let starts: Vec<usize> = doc.systems().map(|s| s.measures.start).collect();
    assert!(starts.contains(&4), "system starts: {starts:?}");
    assert!(diagnostics.errors().next().is_none(), "{:?}", diagnostics.messages());

    // The brace pushes every system right
    assert!(doc.systems().all(|s| s.drawing_x_rel > 0));

    // Dynamic below staff 1, direction above it
    let p = &doc.measures[0].control_events[0];
    assert!(p.drawing_y_rel > 720);
    let dolce = &doc.measures[4].control_events[0];
    assert!(dolce.drawing_y_rel < 0);
    // Beat 2 is the onset of the half note after the triplet
    let half = &doc.measures[4].staves[0].layers[0].elements[1];
    assert_eq!(dolce.drawing_x_rel, half.drawing_x_rel);

    // Chord notes share the chord column
    let chord = &doc.measures[0].staves[1].layers[0].elements[0];
    assert!(chord.children.iter().all(|n| n.drawing_x_rel == chord.drawing_x_rel));

    let summary_json = summary_to_json(&summary).unwrap();
    assert!(summary_json.contains("\"pageCount\": 1"));
}

#[test]
fn pitch_sets_vertical_position() {
    let mut ids = Ids::default();
    let notes = vec![
        ids.note(Duration::Quarter, PitchName::F, 5),
        ids.note(Duration::Quarter, PitchName::G, 4),
        ids.note(Duration::Quarter, PitchName::C, 4),
        ids.rest(Duration::Quarter),
    ];
    let mut doc = treble_document(vec![ids.measure(1, vec![notes])]);
    layout_document(&mut doc, &Options::default()).unwrap();

    let ys: Vec<i32> = doc.measures[0].staves[0].layers[0].elements.iter().map(|e| e.drawing_y_rel).collect();
    assert_eq!(ys, vec![0, 540, 900, 360]);
}

#[test]
fn break_mode_none_keeps_one_system() {
    let mut ids = Ids::default();
    let measures: Vec<Measure> = (1..=30).map(|n| ids.quarters(n)).collect();
    let mut doc = treble_document(measures);
    let options = Options { breaks: Breaks::Mode(BreakMode::None), ..Options::default() };
    let (summary, _) = engine_layout(&mut doc, options);
    assert_eq!(summary.system_count, 1);
    assert_eq!(summary.page_count, 1);
}

#[test]
fn explicit_breaks_and_page_limit() {
    let mut ids = Ids::default();
    let measures: Vec<Measure> = (1..=8).map(|n| ids.quarters(n)).collect();
    let mut doc = treble_document(measures);
    let options = Options {
        breaks: Breaks::Measures(vec![3, 5, 7]),
        system_max_per_page: 2,
        ..Options::default()
    };
    let (summary, _) = engine_layout(&mut doc, options);
    let ranges: Vec<_> = doc.systems().map(|s| s.measures.clone()).collect();
    assert_eq!(ranges, vec![0..2, 2..4, 4..6, 6..8]);
    assert_eq!(summary.page_count, 2);
    assert_eq!(summary.pages[1].systems, vec![4..6, 6..8]);
}

#[test]
fn undeclared_staff_is_an_error() {
    let mut ids = Ids::default();
    let notes = vec![ids.note(Duration::Whole, PitchName::C, 4)];
    let other = vec![ids.note(Duration::Whole, PitchName::C, 4)];
    let mut doc = treble_document(vec![ids.measure(1, vec![notes, other])]);
    let err = layout_document(&mut doc, &Options::default()).unwrap_err();
    assert!(matches!(err, LayoutError::Structure { .. }), "{err}");
}

#[test]
fn empty_resources_refuse_to_lay_out() {
    let resources = Resources::new();
    assert!(matches!(
        LayoutEngine::new(&resources, Options::default()),
        Err(LayoutError::NoFontLoaded)
    ));
}

#[test]
fn reset_clears_layout_output() {
    let mut doc = load_fixture("minuet.json");
    layout_document(&mut doc, &Options::default()).unwrap();
    assert!(doc.measures[1].drawing_width > 0);
    reset_data(&mut doc);
    assert_eq!(doc.stage(), LayoutStage::Clean);
    assert!(doc.pages.is_empty());
    assert_eq!(doc.measures[1].drawing_width, 0);
    assert!(doc.measures[1].aligner().alignments().len() <= 4);
}

#[test]
fn timestamped_events_follow_the_columns() {
    let mut ids = Ids::default();
    let notes = vec![
        ids.note(Duration::Half, PitchName::G, 4),
        ids.note(Duration::Half, PitchName::A, 4),
    ];
    let mut measure = ids.measure(1, vec![notes]);
    let dir = |id, tstamp| {
        ControlEvent::new(id, ControlEventKind::Dir("cresc.".to_string()), 1, tstamp, Placement::Below)
    };
    // Between the two halves, on the second half, past the barline
    measure.control_events = vec![dir(ids.next(), 2.0), dir(ids.next(), 3.0), dir(ids.next(), 9.0)];
    let mut doc = treble_document(vec![measure]);
    let (_, diagnostics) = engine_layout(&mut doc, Options::default());

    let measure = &doc.measures[0];
    let xs = layer_x(measure, 0);
    let events: Vec<i32> = measure.control_events.iter().map(|e| e.drawing_x_rel).collect();
    let midpoint = (xs[0] + xs[1]) / 2;
    assert!(events[0] > xs[0] && events[0] < xs[1], "{events:?} vs {xs:?}");
    assert!((events[0] - midpoint).abs() <= 1);
    assert_eq!(events[1], xs[1]);
    let barline = measure
        .aligner()
        .alignments()
        .iter()
        .find(|a| a.kind == AlignmentType::MeasureRightBarLine)
        .map(|a| a.x_rel);
    assert_eq!(Some(events[2]), barline);
    assert!(diagnostics.contains("past the measure end"));

    assert_eq!(measure.aligner().max_time(), Fraction::ONE);
    let timestamp_only: Vec<bool> = measure
        .control_events
        .iter()
        .map(|e| measure.aligner().alignment_at(e.alignment().unwrap()).unwrap().is_timestamp_only())
        .collect();
    assert_eq!(timestamp_only, vec![true, false, true]);
}
