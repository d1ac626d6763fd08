//! Font resources: glyph bounding-box tables and the metrics lookup used
//! by the layout.
//!
//! A font is described by a bounding-box table:
//!
//! ```xml
//! <bounding-boxes font-family="Leipzig" units-per-em="1000">
//!   <g c="E0A4" n="noteheadBlack" x="0" y="-125" w="295" h="250" h-a-x="295"/>
//! </bounding-boxes>
//! ```
//!
//! Custom fonts can be shipped as a zip archive holding one `<name>.xml`
//! table per font at the archive root.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{Cursor, Read};

use zip::ZipArchive;

use crate::error::{LayoutError, Result};
use crate::glyphs;
use crate::layout::Units;

const BUNDLED_LEIPZIG: &str = include_str!("../data/Leipzig.xml");

/// Bounding box of one glyph, in font units.
#[derive(Debug, Clone, PartialEq)]
pub struct Glyph {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub horiz_adv_x: f64,
}

/// All glyphs of one font.
#[derive(Debug, Clone)]
pub struct FontTable {
    name: String,
    units_per_em: f64,
    glyphs: HashMap<u32, Glyph>,
}

impl FontTable {
    /// Parse a bounding-box table.
    pub fn parse(name: &str, xml: &str) -> Result<Self> {
        let doc = roxmltree::Document::parse(xml)?;
        let root = doc.root_element();
        if root.tag_name().name() != "bounding-boxes" {
            return Err(LayoutError::font(
                name,
                format!("expected <bounding-boxes>, found <{}>", root.tag_name().name()),
            ));
        }
        let units_per_em = root
            .attribute("units-per-em")
            .and_then(|v| v.parse::<f64>().ok())
            .filter(|v| *v > 0.0)
            .ok_or_else(|| LayoutError::font(name, "missing or invalid units-per-em"))?;

        let mut glyphs = HashMap::new();
        for node in root.children().filter(|n| n.has_tag_name("g")) {
            let Some(code) = node.attribute("c").and_then(glyphs::parse_code) else {
                log::warn!("Font '{name}': glyph without a valid code skipped");
                continue;
            };
            let number = |attr: &str| node.attribute(attr).and_then(|v| v.parse::<f64>().ok());
            let width = number("w").unwrap_or(0.0);
            glyphs.insert(
                code,
                Glyph {
                    name: node.attribute("n").unwrap_or_default().to_string(),
                    x: number("x").unwrap_or(0.0),
                    y: number("y").unwrap_or(0.0),
                    width,
                    height: number("h").unwrap_or(0.0),
                    horiz_adv_x: number("h-a-x").unwrap_or(width),
                },
            );
        }
        if glyphs.is_empty() {
            return Err(LayoutError::font(name, "the table contains no glyph"));
        }

        Ok(FontTable {
            name: name.to_string(),
            units_per_em,
            glyphs,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn units_per_em(&self) -> f64 {
        self.units_per_em
    }

    pub fn glyph(&self, code: u32) -> Option<&Glyph> {
        self.glyphs.get(&code)
    }

    /// Look a glyph up by its SMuFL name.
    pub fn code_for_name(&self, name: &str) -> Option<u32> {
        self.glyphs.iter().find(|(_, g)| g.name == name).map(|(c, _)| *c)
    }

    pub fn len(&self) -> usize {
        self.glyphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.glyphs.is_empty()
    }
}

/// Loaded font tables with a current and a fallback font.
///
/// Read-only during layout; one instance can serve any number of engines.
#[derive(Debug, Clone, Default)]
pub struct Resources {
    fonts: BTreeMap<String, FontTable>,
    current: Option<String>,
    fallback: Option<String>,
}

impl Resources {
    pub const DEFAULT_FONT: &'static str = "Leipzig";

    /// Empty resources; [`Resources::init`] loads the bundled font.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resources with the bundled font loaded.
    pub fn with_default_font() -> Result<Self> {
        let mut resources = Self::new();
        resources.init()?;
        Ok(resources)
    }

    /// Load the bundled font and make it the current and fallback font.
    pub fn init(&mut self) -> Result<()> {
        self.load_font_xml(Self::DEFAULT_FONT, BUNDLED_LEIPZIG)?;
        self.fallback = Some(Self::DEFAULT_FONT.to_string());
        self.current = Some(Self::DEFAULT_FONT.to_string());
        Ok(())
    }

    /// Drop every loaded font.
    pub fn reset(&mut self) {
        self.fonts.clear();
        self.current = None;
        self.fallback = None;
    }

    /// Parse and register a font table. The first font loaded becomes
    /// the current font.
    pub fn load_font_xml(&mut self, name: &str, xml: &str) -> Result<()> {
        let table = FontTable::parse(name, xml)?;
        log::debug!("Loaded font '{name}' ({} glyphs)", table.len());
        self.fonts.insert(name.to_string(), table);
        if self.current.is_none() {
            self.current = Some(name.to_string());
        }
        Ok(())
    }

    /// Register every `<name>.xml` table found at the root of a zip
    /// archive. Returns the names of the fonts loaded.
    pub fn add_custom_font_zip(&mut self, data: &[u8]) -> Result<Vec<String>> {
        let mut archive = ZipArchive::new(Cursor::new(data))?;
        let mut loaded = Vec::new();

        for i in 0..archive.len() {
            let mut file = archive.by_index(i)?;
            let path = file.name().to_string();
            // Glyph files live in per-font subdirectories; tables sit at the root
            if file.is_dir() || path.contains('/') || !path.ends_with(".xml") {
                continue;
            }
            let mut xml = String::new();
            file.read_to_string(&mut xml)
                .map_err(|source| LayoutError::ArchiveEntry { path: path.clone(), source })?;
            let name = path.trim_end_matches(".xml");
            self.load_font_xml(name, &xml)?;
            loaded.push(name.to_string());
        }

        if loaded.is_empty() {
            return Err(LayoutError::font("archive", "no bounding-box table at the archive root"));
        }
        Ok(loaded)
    }

    pub fn set_current_font(&mut self, name: &str) -> Result<()> {
        if !self.fonts.contains_key(name) {
            return Err(LayoutError::UnknownFont(name.to_string()));
        }
        self.current = Some(name.to_string());
        Ok(())
    }

    pub fn current_font(&self) -> Option<&FontTable> {
        self.current.as_ref().and_then(|n| self.fonts.get(n))
    }

    pub fn font(&self, name: &str) -> Option<&FontTable> {
        self.fonts.get(name)
    }

    pub fn font_names(&self) -> impl Iterator<Item = &str> {
        self.fonts.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }

    fn fallback_font(&self) -> Option<&FontTable> {
        self.fallback.as_ref().and_then(|n| self.fonts.get(n))
    }

    /// Find a glyph: current font, then fallback font, then the fallback
    /// glyph. The flag is set when the requested glyph was not found.
    pub fn lookup(&self, code: u32) -> Option<(&FontTable, &Glyph, bool)> {
        let fonts = [self.current_font(), self.fallback_font()];
        for font in fonts.iter().flatten() {
            if let Some(glyph) = font.glyph(code) {
                return Some((font, glyph, false));
            }
        }
        for font in fonts.iter().flatten() {
            if let Some(glyph) = font.glyph(glyphs::FALLBACK) {
                return Some((font, glyph, true));
            }
        }
        None
    }
}

/// Glyph bounding box in drawing units, y pointing up from the baseline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn top(&self) -> i32 {
        self.y + self.height
    }
}

/// Glyph size lookup used by the spacing and stacking passes.
pub trait GlyphMetrics {
    fn glyph_bbox(&self, code: u32, staff_size: i32) -> BoundingBox;

    fn glyph_width(&self, code: u32, staff_size: i32) -> i32 {
        self.glyph_bbox(code, staff_size).width
    }

    fn glyph_height(&self, code: u32, staff_size: i32) -> i32 {
        self.glyph_bbox(code, staff_size).height
    }
}

/// Metrics of a [`Resources`] scaled to a drawing unit. Glyphs that had
/// to be substituted are remembered so they can be reported once.
pub struct ScaledMetrics<'r> {
    resources: &'r Resources,
    units: Units,
    missing: RefCell<BTreeSet<u32>>,
}

impl<'r> ScaledMetrics<'r> {
    pub fn new(resources: &'r Resources, units: Units) -> Self {
        Self {
            resources,
            units,
            missing: RefCell::new(BTreeSet::new()),
        }
    }

    /// Codes substituted by the fallback glyph since the last call.
    pub fn take_missing(&self) -> BTreeSet<u32> {
        std::mem::take(&mut *self.missing.borrow_mut())
    }
}

impl GlyphMetrics for ScaledMetrics<'_> {
    fn glyph_bbox(&self, code: u32, staff_size: i32) -> BoundingBox {
        let Some((font, glyph, substituted)) = self.resources.lookup(code) else {
            return BoundingBox::default();
        };
        if substituted {
            self.missing.borrow_mut().insert(code);
        }
        // One em is the height of a five-line staff
        let font_size = (8 * self.units.unit(staff_size)) as f64;
        let scale = |v: f64| (v * font_size / font.units_per_em()).round() as i32;
        BoundingBox {
            x: scale(glyph.x),
            y: scale(glyph.y),
            width: scale(glyph.width),
            height: scale(glyph.height),
        }
    }
}
