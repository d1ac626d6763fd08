//! Builders shared by the integration tests.

#![allow(dead_code)]

use std::path::PathBuf;

use scorelayout::*;

pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

pub fn load_fixture(name: &str) -> Document {
    let json = std::fs::read_to_string(fixtures_dir().join(name)).expect("Failed to read fixture");
    document_from_json(&json).expect("Failed to parse fixture")
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Hands out unique element ids.
#[derive(Default)]
pub struct Ids(u32);

impl Ids {
    pub fn next(&mut self) -> u32 {
        self.0 += 1;
        self.0
    }

    pub fn note(&mut self, dur: Duration, pname: PitchName, oct: i8) -> Element {
        Element::note(self.next(), dur, pname, oct)
    }

    pub fn rest(&mut self, dur: Duration) -> Element {
        Element::rest(self.next(), dur)
    }

    /// A measure with one single-layer staff per entry, numbered from 1.
    pub fn measure(&mut self, n: i32, staves: Vec<Vec<Element>>) -> Measure {
        let staves = staves
            .into_iter()
            .enumerate()
            .map(|(i, elements)| {
                let layer = Layer::new(self.next(), 1, elements);
                Staff::new(self.next(), i as u32 + 1, vec![layer])
            })
            .collect();
        Measure::new(self.next(), staves).numbered(n)
    }

    /// Four quarter notes on one staff.
    pub fn quarters(&mut self, n: i32) -> Measure {
        let notes = vec![
            self.note(Duration::Quarter, PitchName::G, 4),
            self.note(Duration::Quarter, PitchName::A, 4),
            self.note(Duration::Quarter, PitchName::B, 4),
            self.note(Duration::Quarter, PitchName::C, 5),
        ];
        self.measure(n, vec![notes])
    }

    /// A 4/4 measure filled with notes of one duration.
    pub fn run(&mut self, n: i32, dur: Duration) -> Measure {
        let count = 1usize << dur.exponent();
        let notes = (0..count).map(|_| self.note(dur, PitchName::E, 5)).collect();
        self.measure(n, vec![notes])
    }
}

pub fn treble_document(measures: Vec<Measure>) -> Document {
    Document::new(ScoreDef::with_staves(&[Clef::treble()]), measures)
}

/// Element x positions of the first layer of staff `staff` in `measure`.
pub fn layer_x(measure: &Measure, staff: usize) -> Vec<i32> {
    measure.staves[staff].layers[0].elements.iter().map(|e| e.drawing_x_rel).collect()
}
