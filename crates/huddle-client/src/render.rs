//! Glyph renderers and a terminal overlay.
//!
//! Both renderers draw the matrix inside a one-cell black border, with
//! white cells for `1` bits, which is the layout the engine's camera expects.

use huddle_core::protocol::{GlyphImage, GlyphMatrix};
use huddle_core::{GlyphRenderer, VisualOverlay};
use tracing::{debug, info};

/// Side length of rendered raster glyphs, in pixels.
pub const GLYPH_DIMENSION: usize = 840;

pub const PGM_MIME: &str = "image/x-portable-graymap";
pub const TEXT_MIME: &str = "text/plain";

/// Renders glyphs as binary PGM (P5) images.
#[derive(Debug, Clone, Copy)]
pub struct PgmGlyphRenderer {
    pub dimension: usize,
}

impl Default for PgmGlyphRenderer {
    fn default() -> Self {
        Self {
            dimension: GLYPH_DIMENSION,
        }
    }
}

impl GlyphRenderer for PgmGlyphRenderer {
    fn render(&self, matrix: &GlyphMatrix) -> GlyphImage {
        let dim = self.dimension;
        let cells = matrix.dimension();
        let cell_size = dim as f64 / (cells + 2) as f64;

        let header = format!("P5\n{} {}\n255\n", dim, dim);
        let mut bytes = Vec::with_capacity(header.len() + dim * dim);
        bytes.extend_from_slice(header.as_bytes());

        for y in 0..dim {
            let row = (y as f64 / cell_size) as usize;
            for x in 0..dim {
                let col = (x as f64 / cell_size) as usize;
                let white = row >= 1
                    && col >= 1
                    && matrix.get(row - 1, col - 1).unwrap_or(false);
                bytes.push(if white { 255 } else { 0 });
            }
        }

        GlyphImage::new(PGM_MIME, bytes)
    }
}

/// Renders glyphs as block characters, two columns per cell.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextGlyphRenderer;

impl GlyphRenderer for TextGlyphRenderer {
    fn render(&self, matrix: &GlyphMatrix) -> GlyphImage {
        let width = matrix.dimension() + 2;
        let mut text = String::new();

        for row in 0..width {
            for col in 0..width {
                let white = row >= 1
                    && col >= 1
                    && matrix.get(row - 1, col - 1).unwrap_or(false);
                text.push_str(if white { "██" } else { "  " });
            }
            text.push('\n');
        }

        GlyphImage::new(TEXT_MIME, text.into_bytes())
    }
}

/// Overlay that logs what a screen would show.
///
/// With `print_glyph`, text glyphs are also written to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogOverlay {
    pub print_glyph: bool,
}

impl VisualOverlay for LogOverlay {
    fn show(&self, id: &str, image: &GlyphImage) {
        info!("Showing glyph {} ({}, {} bytes)", id, image.mime, image.bytes.len());
        if self.print_glyph && image.mime == TEXT_MIME {
            println!("{}", String::from_utf8_lossy(&image.bytes));
        }
    }

    fn hide(&self) {
        debug!("Hiding glyph");
    }

    fn show_color(&self, color: Option<&str>) {
        info!("Showing color {}", color.unwrap_or("(none)"));
    }

    fn hide_color(&self) {
        debug!("Hiding color");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pgm_header_and_size() {
        let matrix = GlyphMatrix::parse("1001").unwrap();
        let image = PgmGlyphRenderer { dimension: 40 }.render(&matrix);

        let header = b"P5\n40 40\n255\n";
        assert_eq!(image.mime, PGM_MIME);
        assert!(image.bytes.starts_with(header));
        assert_eq!(image.bytes.len(), header.len() + 40 * 40);
    }

    #[test]
    fn test_pgm_border_and_cells() {
        // 2x2 glyph in a 40px image: cells are 10px, border is one cell.
        let matrix = GlyphMatrix::parse("1001").unwrap();
        let image = PgmGlyphRenderer { dimension: 40 }.render(&matrix);
        let pixels = &image.bytes[b"P5\n40 40\n255\n".len()..];
        let at = |x: usize, y: usize| pixels[y * 40 + x];

        assert_eq!(at(5, 5), 0); // border
        assert_eq!(at(15, 15), 255); // (0,0) = 1
        assert_eq!(at(25, 15), 0); // (0,1) = 0
        assert_eq!(at(15, 25), 0); // (1,0) = 0
        assert_eq!(at(25, 25), 255); // (1,1) = 1
        assert_eq!(at(35, 35), 0); // border
    }

    #[test]
    fn test_text_renderer_layout() {
        let matrix = GlyphMatrix::parse("1").unwrap();
        let image = TextGlyphRenderer.render(&matrix);
        let text = String::from_utf8(image.bytes).unwrap();

        assert_eq!(text, "      \n  ██  \n      \n");
    }
}
