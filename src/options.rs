//! Layout options.
//!
//! Options are plain values with defaults. They can be set in code or
//! from a JSON object using camelCase names; every value is checked at
//! the start of a layout pass, and anything out of range is clamped or
//! replaced by its default with a message in the diagnostics buffer.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::layout::DEFINITION_FACTOR;

/// How measures are broken into systems and pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreakMode {
    /// Greedy filling, honouring encoded breaks
    #[default]
    Auto,
    /// Everything on one system and one page
    None,
    /// Systems only at encoded system breaks; pages filled greedily
    Line,
    /// Encoded system breaks only when the system is already well filled
    Smart,
    /// Systems and pages only at encoded breaks
    Encoded,
}

/// Break mode or an explicit list of measure numbers starting a system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Breaks {
    Mode(BreakMode),
    Measures(Vec<i32>),
}

impl Default for Breaks {
    fn default() -> Self {
        Breaks::Mode(BreakMode::Auto)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Options {
    /// Page width in tenths of mm
    pub page_width: i32,
    pub page_height: i32,
    pub page_margin_left: i32,
    pub page_margin_right: i32,
    pub page_margin_top: i32,
    pub page_margin_bottom: i32,
    /// Percent; larger values put less music on a page
    pub scale: i32,
    /// Half the distance between two staff lines
    pub unit: i32,
    pub spacing_linear: f64,
    pub spacing_non_linear: f64,
    /// Minimal space between staves, in units
    pub spacing_staff: i32,
    /// Minimal space between systems, in units
    pub spacing_system: i32,
    /// Shortest interval (as a note value denominator) given its own space
    pub spacing_min_duration: i32,
    /// Minimal measure width, in units
    pub min_measure_width: i32,
    pub justify: bool,
    /// The last system is justified only when at least this full
    pub min_last_justification: f64,
    /// Crop the page height to its content
    pub adjust_page_height: bool,
    pub breaks: Breaks,
    pub breaks_smart_sb: f64,
    /// 0 for no limit
    pub system_max_per_page: i32,
    pub even_note_spacing: bool,
    /// Reserve room for a title header on the first page
    pub header: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            page_width: 2100,
            page_height: 2970,
            page_margin_left: 50,
            page_margin_right: 50,
            page_margin_top: 50,
            page_margin_bottom: 50,
            scale: 100,
            unit: 9,
            spacing_linear: 0.25,
            spacing_non_linear: 0.6,
            spacing_staff: 12,
            spacing_system: 4,
            spacing_min_duration: 64,
            min_measure_width: 15,
            justify: true,
            min_last_justification: 0.8,
            adjust_page_height: false,
            breaks: Breaks::default(),
            breaks_smart_sb: 0.66,
            system_max_per_page: 0,
            even_note_spacing: false,
            header: true,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Validation
// ═══════════════════════════════════════════════════════════════════════

fn check_int(name: &str, value: &mut i32, default: i32, min: i32, max: i32, diagnostics: &mut Diagnostics) {
    if *value < min && (*value < 0 || (*value == 0 && min > 0)) {
        diagnostics.error(format!(
            "Option '{name}': {value} is not valid, using the default ({default})"
        ));
        *value = default;
    } else if *value < min || *value > max {
        let clamped = (*value).clamp(min, max);
        diagnostics.warn(format!(
            "Option '{name}': {value} is out of range [{min}, {max}], clamped to {clamped}"
        ));
        *value = clamped;
    }
}

fn check_f64(name: &str, value: &mut f64, default: f64, min: f64, max: f64, diagnostics: &mut Diagnostics) {
    if !value.is_finite() || *value < 0.0 {
        diagnostics.error(format!(
            "Option '{name}': {value} is not valid, using the default ({default})"
        ));
        *value = default;
    } else if *value < min || *value > max {
        let clamped = value.clamp(min, max);
        diagnostics.warn(format!(
            "Option '{name}': {value} is out of range [{min}, {max}], clamped to {clamped}"
        ));
        *value = clamped;
    }
}

impl Options {
    /// Options from a JSON object, starting from the defaults.
    pub fn from_json(json: &str, diagnostics: &mut Diagnostics) -> Result<Self> {
        let mut options = Options::default();
        options.apply_json(json, diagnostics)?;
        Ok(options)
    }

    /// Set the options named in a JSON object. Only a syntax error is
    /// returned; bad names and values are reported and skipped.
    pub fn apply_json(&mut self, json: &str, diagnostics: &mut Diagnostics) -> Result<()> {
        let value: Value = serde_json::from_str(json)?;
        let Value::Object(map) = value else {
            diagnostics.warn("Options must be given as a JSON object, ignored");
            return Ok(());
        };
        for (name, value) in &map {
            self.apply_value(name, value, diagnostics);
        }
        self.validate(diagnostics);
        Ok(())
    }

    fn apply_value(&mut self, name: &str, value: &Value, diagnostics: &mut Diagnostics) {
        let applied = match name {
            "pageWidth" => set_int(&mut self.page_width, value),
            "pageHeight" => set_int(&mut self.page_height, value),
            "pageMarginLeft" => set_int(&mut self.page_margin_left, value),
            "pageMarginRight" => set_int(&mut self.page_margin_right, value),
            "pageMarginTop" => set_int(&mut self.page_margin_top, value),
            "pageMarginBottom" => set_int(&mut self.page_margin_bottom, value),
            "scale" => set_int(&mut self.scale, value),
            "unit" => set_int(&mut self.unit, value),
            "spacingLinear" => set_f64(&mut self.spacing_linear, value),
            "spacingNonLinear" => set_f64(&mut self.spacing_non_linear, value),
            "spacingStaff" => set_int(&mut self.spacing_staff, value),
            "spacingSystem" => set_int(&mut self.spacing_system, value),
            "spacingMinDuration" => set_int(&mut self.spacing_min_duration, value),
            "minMeasureWidth" => set_int(&mut self.min_measure_width, value),
            "justify" => set_bool(&mut self.justify, value),
            "minLastJustification" => set_f64(&mut self.min_last_justification, value),
            "adjustPageHeight" => set_bool(&mut self.adjust_page_height, value),
            "breaks" => match serde_json::from_value::<Breaks>(value.clone()) {
                Ok(breaks) => {
                    self.breaks = breaks;
                    true
                }
                Err(_) => false,
            },
            "breaksSmartSb" => set_f64(&mut self.breaks_smart_sb, value),
            "systemMaxPerPage" => set_int(&mut self.system_max_per_page, value),
            "evenNoteSpacing" => set_bool(&mut self.even_note_spacing, value),
            "header" => set_bool(&mut self.header, value),
            _ => {
                diagnostics.warn(format!("Unsupported option '{name}' ignored"));
                return;
            }
        };
        if !applied {
            diagnostics.warn(format!("Option '{name}': invalid value {value}, ignored"));
        }
    }

    /// Clamp out-of-range values and replace invalid ones by defaults.
    pub fn validate(&mut self, diagnostics: &mut Diagnostics) {
        let d = Options::default();
        check_int("pageWidth", &mut self.page_width, d.page_width, 100, 60000, diagnostics);
        check_int("pageHeight", &mut self.page_height, d.page_height, 100, 60000, diagnostics);
        check_int("pageMarginLeft", &mut self.page_margin_left, d.page_margin_left, 0, 500, diagnostics);
        check_int("pageMarginRight", &mut self.page_margin_right, d.page_margin_right, 0, 500, diagnostics);
        check_int("pageMarginTop", &mut self.page_margin_top, d.page_margin_top, 0, 500, diagnostics);
        check_int("pageMarginBottom", &mut self.page_margin_bottom, d.page_margin_bottom, 0, 500, diagnostics);
        check_int("scale", &mut self.scale, d.scale, 1, 1000, diagnostics);
        check_int("unit", &mut self.unit, d.unit, 6, 20, diagnostics);
        check_f64("spacingLinear", &mut self.spacing_linear, d.spacing_linear, 0.0, 1.0, diagnostics);
        check_f64("spacingNonLinear", &mut self.spacing_non_linear, d.spacing_non_linear, 0.0, 1.0, diagnostics);
        check_int("spacingStaff", &mut self.spacing_staff, d.spacing_staff, 0, 48, diagnostics);
        check_int("spacingSystem", &mut self.spacing_system, d.spacing_system, 0, 48, diagnostics);
        check_int("spacingMinDuration", &mut self.spacing_min_duration, d.spacing_min_duration, 1, 2048, diagnostics);
        if self.spacing_min_duration.count_ones() != 1 {
            let rounded = (self.spacing_min_duration as u32).next_power_of_two() as i32;
            diagnostics.warn(format!(
                "Option 'spacingMinDuration': {} is not a power of two, using {rounded}",
                self.spacing_min_duration
            ));
            self.spacing_min_duration = rounded;
        }
        check_int("minMeasureWidth", &mut self.min_measure_width, d.min_measure_width, 1, 30, diagnostics);
        check_f64(
            "minLastJustification",
            &mut self.min_last_justification,
            d.min_last_justification,
            0.0,
            1.0,
            diagnostics,
        );
        check_f64("breaksSmartSb", &mut self.breaks_smart_sb, d.breaks_smart_sb, 0.0, 1.0, diagnostics);
        check_int("systemMaxPerPage", &mut self.system_max_per_page, d.system_max_per_page, 0, 1000, diagnostics);
        if self.page_margin_left + self.page_margin_right >= self.page_width {
            diagnostics.error("Horizontal page margins leave no room for music, using default margins");
            self.page_margin_left = d.page_margin_left;
            self.page_margin_right = d.page_margin_right;
        }
        if self.page_margin_top + self.page_margin_bottom >= self.page_height {
            diagnostics.error("Vertical page margins leave no room for music, using default margins");
            self.page_margin_top = d.page_margin_top;
            self.page_margin_bottom = d.page_margin_bottom;
        }
    }

    /// Echo the options as JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    // ── Page geometry in drawing units ──

    fn to_drawing(&self, value: i32) -> i32 {
        (value as i64 * DEFINITION_FACTOR as i64 * 100 / self.scale.max(1) as i64) as i32
    }

    pub fn drawing_page_width(&self) -> i32 {
        self.to_drawing(self.page_width)
    }

    pub fn drawing_page_height(&self) -> i32 {
        self.to_drawing(self.page_height)
    }

    pub fn drawing_margin_left(&self) -> i32 {
        self.to_drawing(self.page_margin_left)
    }

    pub fn drawing_margin_right(&self) -> i32 {
        self.to_drawing(self.page_margin_right)
    }

    pub fn drawing_margin_top(&self) -> i32 {
        self.to_drawing(self.page_margin_top)
    }

    pub fn drawing_margin_bottom(&self) -> i32 {
        self.to_drawing(self.page_margin_bottom)
    }

    /// Width available to a system.
    pub fn drawing_content_width(&self) -> i32 {
        self.drawing_page_width() - self.drawing_margin_left() - self.drawing_margin_right()
    }

    /// Height available to systems on a page.
    pub fn drawing_content_height(&self) -> i32 {
        self.drawing_page_height() - self.drawing_margin_top() - self.drawing_margin_bottom()
    }
}

fn set_int(field: &mut i32, value: &Value) -> bool {
    match value.as_i64().or_else(|| value.as_f64().map(|f| f.round() as i64)) {
        Some(v) => {
            *field = v.clamp(i32::MIN as i64, i32::MAX as i64) as i32;
            true
        }
        None => false,
    }
}

fn set_f64(field: &mut f64, value: &Value) -> bool {
    match value.as_f64() {
        Some(v) => {
            *field = v;
            true
        }
        None => false,
    }
}

fn set_bool(field: &mut bool, value: &Value) -> bool {
    match value.as_bool() {
        Some(v) => {
            *field = v;
            true
        }
        None => false,
    }
}
