//! Justification properties over generated scores.

mod common;

use common::*;
use proptest::prelude::*;
use scorelayout::layout::horizontal::Alignment;
use scorelayout::*;

/// One beat as a quarter, two eighths or four sixteenths.
fn beat(ids: &mut Ids, pattern: usize) -> Vec<Element> {
    let (dur, count) = match pattern {
        0 => (Duration::Quarter, 1),
        1 => (Duration::Eighth, 2),
        _ => (Duration::D16, 4),
    };
    (0..count).map(|_| ids.note(dur, PitchName::D, 5)).collect()
}

fn score(patterns: &[(Vec<usize>, Option<u8>)]) -> Document {
    let mut ids = Ids::default();
    let measures = patterns
        .iter()
        .enumerate()
        .map(|(i, (beats, event))| {
            let notes = beats.iter().flat_map(|p| beat(&mut ids, *p)).collect();
            let mut measure = ids.measure(i as i32 + 1, vec![notes]);
            // Steps of 3/8 of a beat land between columns and past the barline
            if let Some(step) = event {
                let tstamp = 1.0 + *step as f64 * 0.375;
                let kind = ControlEventKind::Dynam("mf".to_string());
                measure.control_events.push(ControlEvent::new(ids.next(), kind, 1, tstamp, Placement::Below));
            }
            measure
        })
        .collect();
    treble_document(measures)
}

fn measures_strategy() -> impl Strategy<Value = Vec<(Vec<usize>, Option<u8>)>> {
    prop::collection::vec(
        (prop::collection::vec(0usize..3, 4), prop::option::of(0u8..13)),
        1..24,
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn justified_systems_reach_the_target(
        patterns in measures_strategy(),
        page_width in 1200i32..3000,
        non_linear in 0.4f64..0.8,
    ) {
        let mut doc = score(&patterns);
        let options = Options { page_width, spacing_non_linear: non_linear, ..Options::default() };
        let target = options.drawing_content_width();
        let resources = Resources::with_default_font().unwrap();
        let mut engine = LayoutEngine::new(&resources, options).unwrap();
        engine.layout(&mut doc).unwrap();
        let overflow = engine.diagnostics().contains("does not fit") || engine.diagnostics().contains("wider than");

        let systems: Vec<&System> = doc.systems().collect();
        prop_assert_eq!(systems.iter().map(|s| s.measures.len()).sum::<usize>(), patterns.len());
        if !overflow {
            for system in &systems[..systems.len() - 1] {
                prop_assert!((system.drawing_width - target).abs() <= 1);
            }
        }
        for system in &systems {
            prop_assert!(system.drawing_width <= target + 1 || overflow);
        }
    }

    #[test]
    fn columns_stay_ordered(patterns in measures_strategy(), page_width in 1200i32..3000) {
        let mut doc = score(&patterns);
        layout_document(&mut doc, &Options { page_width, ..Options::default() }).unwrap();
        for measure in &doc.measures {
            let alignments = measure.aligner().alignments();
            prop_assert!(alignments.windows(2).all(|w| w[0].key() < w[1].key()));
            prop_assert!(alignments.windows(2).all(|w| w[0].x_rel <= w[1].x_rel));
            let xs = layer_x(measure, 0);
            prop_assert!(xs.windows(2).all(|w| w[0] < w[1]), "{:?}", xs);
            prop_assert_eq!(alignments.last().map(|a| a.x_rel), Some(measure.drawing_width));
        }
    }

    #[test]
    fn gaps_never_drop_below_their_floor(
        patterns in measures_strategy(),
        page_width in 600i32..3000,
    ) {
        let mut doc = score(&patterns);
        layout_document(&mut doc, &Options { page_width, ..Options::default() }).unwrap();
        for measure in &doc.measures {
            let alignments = measure.aligner().alignments();
            let columns: Vec<&Alignment> = alignments.iter().filter(|a| !a.is_timestamp_only()).collect();
            for pair in columns.windows(2) {
                let gap = pair[1].x_rel - pair[0].x_rel;
                prop_assert!(gap >= pair[1].min_gap, "{:?} -> {:?}", pair[0].key(), pair[1].key());
                if pair[1].time > pair[0].time {
                    prop_assert!(gap > 0);
                }
            }
            for (i, alignment) in alignments.iter().enumerate().filter(|(_, a)| a.is_timestamp_only()) {
                let before = alignments[..i].iter().rev().find(|a| !a.is_timestamp_only()).map(|a| a.x_rel);
                let after = alignments[i + 1..].iter().find(|a| !a.is_timestamp_only()).map(|a| a.x_rel);
                prop_assert!(before.is_some_and(|x| x <= alignment.x_rel));
                prop_assert!(after.is_some_and(|x| alignment.x_rel <= x));
            }
            for event in &measure.control_events {
                let key = event.alignment();
                prop_assert!(key.is_some_and(|k| k.time <= measure.aligner().max_time()));
            }
        }
    }
}
