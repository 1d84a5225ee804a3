//! Capabilities the protocol layer drives but does not implement.
//!
//! Rendering glyphs and painting full-screen overlays depends on the host
//! (terminal, GUI toolkit, browser). The session only talks to these traits;
//! concrete implementations are injected through [`ClientContext`].

use crate::events::EventDispatcher;
use crate::protocol::{GlyphImage, GlyphMatrix};
use std::sync::Arc;

/// Full-screen identification surface.
pub trait VisualOverlay: Send + Sync {
    /// Show the glyph assigned to this client.
    fn show(&self, id: &str, image: &GlyphImage);

    /// Remove the glyph, if shown.
    fn hide(&self);

    /// Fill the screen with a color (the engine's color-flash registration).
    fn show_color(&self, color: Option<&str>);

    /// Remove the color fill, if shown.
    fn hide_color(&self);
}

/// Turns a glyph bit matrix into an image.
pub trait GlyphRenderer: Send + Sync {
    fn render(&self, matrix: &GlyphMatrix) -> GlyphImage;
}

/// Overlay for headless clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopOverlay;

impl VisualOverlay for NoopOverlay {
    fn show(&self, _id: &str, _image: &GlyphImage) {}
    fn hide(&self) {}
    fn show_color(&self, _color: Option<&str>) {}
    fn hide_color(&self) {}
}

/// Renderer for headless clients: keeps the bits, one ASCII digit per cell.
#[derive(Debug, Default, Clone, Copy)]
pub struct BitsRenderer;

impl GlyphRenderer for BitsRenderer {
    fn render(&self, matrix: &GlyphMatrix) -> GlyphImage {
        let bytes = matrix
            .rows()
            .iter()
            .flatten()
            .map(|&bit| if bit { b'1' } else { b'0' })
            .collect();
        GlyphImage::new("text/plain", bytes)
    }
}

/// Collaborators shared by the state machine and the multiplexer.
#[derive(Clone)]
pub struct ClientContext {
    pub dispatcher: Arc<EventDispatcher>,
    pub overlay: Arc<dyn VisualOverlay>,
    pub renderer: Arc<dyn GlyphRenderer>,
}

impl ClientContext {
    pub fn new(
        dispatcher: Arc<EventDispatcher>,
        overlay: Arc<dyn VisualOverlay>,
        renderer: Arc<dyn GlyphRenderer>,
    ) -> Self {
        Self {
            dispatcher,
            overlay,
            renderer,
        }
    }

    /// Fresh dispatcher, no-op overlay, bit renderer.
    pub fn headless() -> Self {
        Self::new(
            Arc::new(EventDispatcher::new()),
            Arc::new(NoopOverlay),
            Arc::new(BitsRenderer),
        )
    }
}
