//! Casting measures off into systems and systems into pages.

use std::ops::Range;

use crate::diagnostics::Diagnostics;
use crate::options::{BreakMode, Breaks, Options};

use super::constants::OVERFLOW_MARGIN;
use super::vertical::system_gap;
use super::Units;

/// What the system cast-off needs to know about a measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MeasureFit {
    /// Unjustified width
    pub width: i32,
    /// Width of the prefix if the measure starts a system
    pub prefix: i32,
    pub new_system: bool,
    pub new_page: bool,
    pub n: i32,
}

/// What the page cast-off needs to know about a system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SystemFit {
    pub height: i32,
    pub overflow_above: i32,
    pub overflow_below: i32,
    pub new_page: bool,
}

/// Split measures into systems no wider than `system_width`.
pub(crate) fn cast_off_systems(
    fits: &[MeasureFit],
    system_width: i32,
    options: &Options,
    diagnostics: &mut Diagnostics,
) -> Vec<Range<usize>> {
    if fits.is_empty() {
        return Vec::new();
    }
    let marker = |fit: &MeasureFit| fit.new_system || fit.new_page;
    match &options.breaks {
        Breaks::Mode(BreakMode::None) => vec![0..fits.len()],
        Breaks::Mode(BreakMode::Line) | Breaks::Mode(BreakMode::Encoded) => split_at(fits.len(), |i| marker(&fits[i])),
        Breaks::Measures(list) => {
            for n in list {
                if !fits.iter().any(|f| f.n == *n) {
                    diagnostics.warn(format!("Break at measure {n} ignored, no such measure"));
                }
            }
            split_at(fits.len(), |i| list.contains(&fits[i].n))
        }
        Breaks::Mode(BreakMode::Auto) => greedy(fits, system_width, |fit, _| marker(fit), diagnostics),
        Breaks::Mode(BreakMode::Smart) => {
            let threshold = (system_width as f64 * options.breaks_smart_sb) as i32;
            greedy(fits, system_width, |fit, filled| marker(fit) && filled >= threshold, diagnostics)
        }
    }
}

/// Ranges starting at 0 and at every `i > 0` where `starts(i)` holds.
fn split_at(len: usize, starts: impl Fn(usize) -> bool) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    for i in 1..len {
        if starts(i) {
            ranges.push(start..i);
            start = i;
        }
    }
    ranges.push(start..len);
    ranges
}

fn greedy(
    fits: &[MeasureFit],
    system_width: i32,
    forced: impl Fn(&MeasureFit, i32) -> bool,
    diagnostics: &mut Diagnostics,
) -> Vec<Range<usize>> {
    let mut systems = Vec::new();
    let mut start = 0;
    let mut width = 0;
    for (i, fit) in fits.iter().enumerate() {
        if i > start && (forced(fit, width) || width + fit.width > system_width) {
            systems.push(start..i);
            start = i;
        }
        if i == start {
            width = fit.prefix + fit.width;
            if width > system_width {
                diagnostics.warn(format!(
                    "Measure {} is wider than the system ({width} > {system_width})",
                    fit.n
                ));
            }
        } else {
            width += fit.width;
        }
    }
    systems.push(start..fits.len());
    log::debug!("{} measures cast off into {} systems", fits.len(), systems.len());
    systems
}

/// Split systems into pages. `header` is reserved on the first page.
pub(crate) fn cast_off_pages(
    systems: &[SystemFit],
    header: i32,
    units: Units,
    options: &Options,
    diagnostics: &mut Diagnostics,
) -> Vec<Range<usize>> {
    if systems.is_empty() {
        return Vec::new();
    }
    let mode = match options.breaks {
        Breaks::Mode(mode) => mode,
        Breaks::Measures(_) => BreakMode::Line,
    };
    if mode == BreakMode::None {
        return vec![0..systems.len()];
    }
    let budget = options.drawing_content_height();
    let spacing = units.scaled(options.spacing_system as f64, 100);
    let margin = units.scaled(OVERFLOW_MARGIN, 100);
    let max_per_page = options.system_max_per_page.max(0) as usize;

    let mut pages = Vec::new();
    let mut start = 0;
    // Bottom line of the last system placed, from the top margin
    let mut y = 0;
    for (i, system) in systems.iter().enumerate() {
        if i > start {
            let prev = &systems[i - 1];
            let top = y + system_gap(prev.overflow_below, system.overflow_above, spacing, margin);
            let too_tall = mode != BreakMode::Encoded && top + system.height + system.overflow_below > budget;
            let full = max_per_page > 0 && i - start >= max_per_page;
            if system.new_page || too_tall || full {
                pages.push(start..i);
                start = i;
            } else {
                y = top + system.height;
            }
        }
        if i == start {
            let reserve = if pages.is_empty() { header } else { 0 };
            y = reserve + system.overflow_above + system.height;
            if y + system.overflow_below > budget {
                diagnostics.warn(format!("System {} is taller than the page ({} > {budget})", i + 1, y));
            }
        }
    }
    pages.push(start..systems.len());
    log::debug!("{} systems cast off into {} pages", systems.len(), pages.len());
    pages
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn measures(widths: &[i32]) -> Vec<MeasureFit> {
        widths
            .iter()
            .enumerate()
            .map(|(i, &width)| MeasureFit {
                width,
                prefix: 100,
                new_system: false,
                new_page: false,
                n: i as i32 + 1,
            })
            .collect()
    }

    fn with_breaks(breaks: Breaks) -> Options {
        Options { breaks, ..Options::default() }
    }

    #[test]
    fn greedy_systems() {
        let mut diagnostics = Diagnostics::new();
        let fits = measures(&[400, 400, 400, 400, 400]);
        let systems = cast_off_systems(&fits, 1000, &Options::default(), &mut diagnostics);
        assert_eq!(systems, vec![0..2, 2..4, 4..5]);
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn wide_measure_goes_alone() {
        let mut diagnostics = Diagnostics::new();
        let fits = measures(&[300, 5000, 300]);
        let systems = cast_off_systems(&fits, 1000, &Options::default(), &mut diagnostics);
        assert_eq!(systems, vec![0..1, 1..2, 2..3]);
        assert!(diagnostics.contains("wider than the system"));
    }

    #[test]
    fn encoded_markers() {
        let mut diagnostics = Diagnostics::new();
        let mut fits = measures(&[100, 100, 100, 100]);
        fits[2].new_system = true;
        let auto = cast_off_systems(&fits, 1000, &Options::default(), &mut diagnostics);
        assert_eq!(auto, vec![0..2, 2..4]);
        let none = cast_off_systems(&fits, 1000, &with_breaks(Breaks::Mode(BreakMode::None)), &mut diagnostics);
        assert_eq!(none, vec![0..4]);
        // Smart: the first system is only 30% full
        let smart = cast_off_systems(&fits, 1000, &with_breaks(Breaks::Mode(BreakMode::Smart)), &mut diagnostics);
        assert_eq!(smart, vec![0..4]);
    }

    #[test]
    fn explicit_measure_list() {
        let mut diagnostics = Diagnostics::new();
        let fits = measures(&[800, 800, 800, 800]);
        let options = with_breaks(Breaks::Measures(vec![3, 9]));
        let systems = cast_off_systems(&fits, 1000, &options, &mut diagnostics);
        assert_eq!(systems, vec![0..2, 2..4]);
        assert!(diagnostics.contains("measure 9"));
    }

    fn systems(count: usize, height: i32) -> Vec<SystemFit> {
        vec![
            SystemFit {
                height,
                overflow_above: 0,
                overflow_below: 0,
                new_page: false,
            };
            count
        ]
    }

    #[test]
    fn greedy_pages() {
        let mut diagnostics = Diagnostics::new();
        let units = Units::new(9);
        // Content height 28700, gap 360: three 9000 systems fit on a page
        let pages = cast_off_pages(&systems(7, 9000), 0, units, &Options::default(), &mut diagnostics);
        assert_eq!(pages, vec![0..3, 3..6, 6..7]);
        // The header pushes the third system off the first page
        let pages = cast_off_pages(&systems(4, 9000), 2000, units, &Options::default(), &mut diagnostics);
        assert_eq!(pages, vec![0..2, 2..4]);
    }

    #[test]
    fn page_limits_and_markers() {
        let mut diagnostics = Diagnostics::new();
        let units = Units::new(9);
        let options = Options { system_max_per_page: 2, ..Options::default() };
        let pages = cast_off_pages(&systems(5, 1000), 0, units, &options, &mut diagnostics);
        assert_eq!(pages, vec![0..2, 2..4, 4..5]);

        let mut fits = systems(4, 1000);
        fits[1].new_page = true;
        let pages = cast_off_pages(&fits, 0, units, &Options::default(), &mut diagnostics);
        assert_eq!(pages, vec![0..1, 1..4]);
    }

    #[test]
    fn tall_system_goes_alone() {
        let mut diagnostics = Diagnostics::new();
        let pages = cast_off_pages(&systems(2, 40000), 0, Units::new(9), &Options::default(), &mut diagnostics);
        assert_eq!(pages, vec![0..1, 1..2]);
        assert!(diagnostics.contains("taller than the page"));
    }
}
