//! Intrinsic size of generated SVG documents.
//!
//! Sizing rules, applied to the root `<svg>` element:
//!
//! 1. `width`/`height` attributes are read as leading numbers (`"120px"` is
//!    `120`); percentages and unparsable values count as absent.
//! 2. If either is missing or zero, the `viewBox` (`minX minY width height`)
//!    is consulted. With exactly one attribute known, the other axis is
//!    derived from the viewBox aspect ratio; with neither, the viewBox size
//!    is used as-is.
//! 3. If no positive width and height can be derived, the result is the
//!    default 0×0 geometry.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// Width and height of a rendered diagram in user units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SvgGeometry {
    pub width: f64,
    pub height: f64,
}

impl SvgGeometry {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Whether both axes are positive and finite.
    pub fn is_usable(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }

    /// Width divided by height, when usable.
    pub fn aspect_ratio(&self) -> Option<f64> {
        self.is_usable().then(|| self.width / self.height)
    }
}

/// Recover the geometry of `svg`, falling back to 0×0 on any failure.
pub fn extract(svg: &str) -> SvgGeometry {
    match try_extract(svg) {
        Ok(geometry) => geometry,
        Err(err) => {
            debug!(error = %err, "Falling back to default svg geometry");
            SvgGeometry::default()
        }
    }
}

/// Recover the geometry of `svg`, reporting malformed documents.
///
/// A well-formed document without usable sizing still yields `Ok(0×0)`.
pub fn try_extract(svg: &str) -> CoreResult<SvgGeometry> {
    let doc = roxmltree::Document::parse(svg).map_err(|e| CoreError::SvgParse(e.to_string()))?;
    let root = doc
        .descendants()
        .find(|n| n.has_tag_name("svg"))
        .ok_or(CoreError::MissingSvgRoot)?;

    let mut width = root.attribute("width").and_then(parse_length).unwrap_or(0.0);
    let mut height = root.attribute("height").and_then(parse_length).unwrap_or(0.0);

    if width == 0.0 || height == 0.0 {
        if let Some((vb_width, vb_height)) = root.attribute("viewBox").and_then(parse_view_box) {
            if width == 0.0 && height != 0.0 {
                width = vb_width / vb_height * height;
            } else if height == 0.0 && width != 0.0 {
                height = vb_height / vb_width * width;
            } else {
                width = vb_width;
                height = vb_height;
            }
        }
    }

    let geometry = SvgGeometry::new(width, height);
    Ok(if geometry.is_usable() {
        geometry
    } else {
        SvgGeometry::default()
    })
}

/// Leading numeric prefix of a length attribute.
fn parse_length(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.ends_with('%') {
        return None;
    }
    let end = raw
        .char_indices()
        .find(|&(i, c)| {
            !(c.is_ascii_digit()
                || c == '.'
                || ((c == '-' || c == '+') && i == 0)
                || c == 'e'
                || c == 'E')
        })
        .map(|(i, _)| i)
        .unwrap_or(raw.len());

    // Trim back until the prefix parses, so "12e" or "1.5.2" still yield a number.
    let mut prefix = &raw[..end];
    while !prefix.is_empty() {
        if let Ok(value) = prefix.parse::<f64>() {
            return value.is_finite().then_some(value.max(0.0));
        }
        prefix = &prefix[..prefix.len() - 1];
    }
    None
}

/// Width and height of a `viewBox`, when both are positive.
fn parse_view_box(raw: &str) -> Option<(f64, f64)> {
    let parts: Vec<f64> = raw
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|part| !part.is_empty())
        .map(str::parse::<f64>)
        .collect::<Result<_, _>>()
        .ok()?;

    match parts.as_slice() {
        [_, _, width, height] if *width > 0.0 && *height > 0.0 => Some((*width, *height)),
        _ => None,
    }
}
