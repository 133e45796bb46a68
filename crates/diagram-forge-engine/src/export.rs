//! Downloadable renditions of the generated diagram.

use std::fmt;
use std::str::FromStr;

use diagram_forge_core::SvgGeometry;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::generation::{GenerationState, RenderedDiagram};

/// Output formats offered for download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportFormat {
    /// The SVG exactly as the backend produced it.
    Svg,
    /// A raster rendered at the diagram's intrinsic size.
    Png,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Svg => "svg",
            ExportFormat::Png => "png",
        }
    }

    /// File name offered when the user does not pick one.
    pub fn default_file_name(self) -> &'static str {
        match self {
            ExportFormat::Svg => "diagram.svg",
            ExportFormat::Png => "diagram.png",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "svg" => Ok(ExportFormat::Svg),
            "png" => Ok(ExportFormat::Png),
            other => Err(format!("unknown export format: {other} (expected svg or png)")),
        }
    }
}

/// File name for companion notes.
pub const NOTES_FILE_NAME: &str = "diagram.md";

/// Renders the last successful diagram for download.
#[derive(Debug, Clone, Copy)]
pub struct ExportStage {
    raster_scale: f32,
}

impl Default for ExportStage {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl ExportStage {
    pub fn new(raster_scale: f32) -> Self {
        let raster_scale = if raster_scale.is_finite() && raster_scale > 0.0 {
            raster_scale
        } else {
            1.0
        };
        Self { raster_scale }
    }

    pub fn raster_scale(&self) -> f32 {
        self.raster_scale
    }

    /// Export from the current generation state. Only `success` has
    /// anything to export.
    pub fn export(&self, state: &GenerationState, format: ExportFormat) -> EngineResult<Vec<u8>> {
        let diagram = state.diagram().ok_or(EngineError::NoDiagram {
            state: state.label(),
        })?;
        match format {
            ExportFormat::Svg => Ok(export_vector(&diagram.svg)),
            ExportFormat::Png => self.export_raster(diagram),
        }
    }

    /// Rasterize `diagram` to PNG.
    pub fn export_raster(&self, diagram: &RenderedDiagram) -> EngineResult<Vec<u8>> {
        let pixmap = render_pixmap(&diagram.svg, diagram.geometry, self.raster_scale)?;
        pixmap
            .encode_png()
            .map_err(|e| EngineError::Export(format!("failed to encode PNG: {e}")))
    }
}

/// The original SVG, byte for byte.
pub fn export_vector(svg: &str) -> Vec<u8> {
    svg.as_bytes().to_vec()
}

fn render_pixmap(
    svg: &str,
    geometry: SvgGeometry,
    scale: f32,
) -> EngineResult<tiny_skia::Pixmap> {
    let mut options = usvg::Options::default();
    options.fontdb_mut().load_system_fonts();

    let tree = usvg::Tree::from_str(svg, &options)
        .map_err(|e| EngineError::Export(format!("failed to parse SVG: {e}")))?;
    let tree_size = tree.size();

    // Unsized documents render at whatever size usvg settled on.
    let (width, height) = if geometry.is_usable() {
        (geometry.width as f32, geometry.height as f32)
    } else {
        (tree_size.width(), tree_size.height())
    };

    let width_px = (width * scale).ceil().max(1.0) as u32;
    let height_px = (height * scale).ceil().max(1.0) as u32;
    debug!(width_px, height_px, scale, "Rasterizing diagram");

    let mut pixmap = tiny_skia::Pixmap::new(width_px, height_px)
        .ok_or_else(|| EngineError::Export("failed to allocate pixmap".to_string()))?;
    pixmap.fill(tiny_skia::Color::WHITE);

    let transform = tiny_skia::Transform::from_scale(
        width_px as f32 / tree_size.width(),
        height_px as f32 / tree_size.height(),
    );
    resvg::render(&tree, transform, &mut pixmap.as_mut());
    Ok(pixmap)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_fixtures::SAMPLE_SVG;

    fn diagram(svg: &str) -> RenderedDiagram {
        RenderedDiagram {
            svg: svg.to_string(),
            notes: None,
            geometry: diagram_forge_core::svg::extract(svg),
        }
    }

    /// Width and height from a PNG's IHDR chunk.
    fn png_size(bytes: &[u8]) -> (u32, u32) {
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
        let width = u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        let height = u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
        (width, height)
    }

    #[test]
    fn test_vector_export_is_unchanged() {
        let state = GenerationState::Success(Arc::new(diagram(SAMPLE_SVG)));
        let bytes = ExportStage::default().export(&state, ExportFormat::Svg).unwrap();
        assert_eq!(bytes, SAMPLE_SVG.as_bytes());
    }

    #[test]
    fn test_raster_export_uses_geometry() {
        let state = GenerationState::Success(Arc::new(diagram(SAMPLE_SVG)));
        let bytes = ExportStage::default().export(&state, ExportFormat::Png).unwrap();
        assert_eq!(png_size(&bytes), (120, 80));
    }

    #[test]
    fn test_raster_scale() {
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 300 150" height="50"><circle cx="150" cy="75" r="40"/></svg>"#;
        let rendered = diagram(svg);
        assert_eq!(rendered.geometry, SvgGeometry::new(100.0, 50.0));

        let bytes = ExportStage::new(2.0).export_raster(&rendered).unwrap();
        assert_eq!(png_size(&bytes), (200, 100));
    }

    #[test]
    fn test_no_export_without_success() {
        let stage = ExportStage::default();
        for state in [GenerationState::Idle, GenerationState::Loading] {
            let err = stage.export(&state, ExportFormat::Svg).unwrap_err();
            assert!(matches!(err, EngineError::NoDiagram { .. }));
        }
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("PNG".parse::<ExportFormat>().unwrap(), ExportFormat::Png);
        assert!("jpg".parse::<ExportFormat>().is_err());
        assert_eq!(ExportFormat::Svg.default_file_name(), "diagram.svg");
    }

    #[test]
    fn test_invalid_scale_falls_back() {
        assert_eq!(ExportStage::new(0.0).raster_scale(), 1.0);
        assert_eq!(ExportStage::new(f32::NAN).raster_scale(), 1.0);
    }
}
