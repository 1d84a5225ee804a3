//! Routing of inbound envelopes.
//!
//! Each decoded envelope is interpreted by type: glyph assignments and
//! identify requests drive the overlay, proximity samples and broadcasts are
//! re-published to subscribers, and a color flash is answered with an
//! `Acknowledge`. Anything unrecognized goes to the fallback handler.

use crate::events::names;
use crate::overlay::{ClientContext, VisualOverlay};
use crate::protocol::{ClientIdentity, Envelope, EnvelopeType, GlyphImage, GlyphMatrix, ProximityKind};
use serde_json::Value;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Marker in a `Digital` payload selecting the color-flash handler.
pub const SHOW_COLOR_MARKER: &str = "ShowColor";

/// Receives every inbound value the multiplexer could not route.
pub type FallbackHandler = Arc<dyn Fn(&Value) + Send + Sync>;

pub struct Multiplexer {
    context: ClientContext,
    /// Last rendered glyph, kept to re-show on identify requests
    glyph: Option<GlyphImage>,
    /// Whether the engine is currently identifying this device
    identified: bool,
    fallback: Option<FallbackHandler>,
}

impl Multiplexer {
    pub fn new(context: ClientContext) -> Self {
        Self {
            context,
            glyph: None,
            identified: false,
            fallback: None,
        }
    }

    /// Replace the handler for unroutable values. The default only logs.
    pub fn set_fallback(&mut self, fallback: FallbackHandler) {
        self.fallback = Some(fallback);
    }

    pub fn is_identified(&self) -> bool {
        self.identified
    }

    pub fn glyph(&self) -> Option<&GlyphImage> {
        self.glyph.as_ref()
    }

    /// Interpret one inbound envelope.
    ///
    /// Returns the protocol-level reply to send back, if any.
    pub fn handle(&mut self, envelope: Envelope, identity: &mut ClientIdentity) -> Option<Envelope> {
        match envelope.kind {
            EnvelopeType::Glyph => {
                self.assign_glyph(&envelope.payload, identity);
                None
            }
            EnvelopeType::IdentifyDevice => match envelope.data() {
                Some(data) if data.get("Type").and_then(Value::as_str) == Some(SHOW_COLOR_MARKER) => {
                    Some(self.show_color(data.clone()))
                }
                Some(data) if data.is_object() => {
                    let data = data.clone();
                    self.identify_device(&data, identity);
                    None
                }
                _ => {
                    warn!("Identify message without data object");
                    self.undefined(envelope);
                    None
                }
            },
            EnvelopeType::Proximity => {
                match envelope.data() {
                    Some(data) => self.update_proximity(data),
                    None => {
                        warn!("Proximity message without data");
                        self.undefined(envelope);
                    }
                }
                None
            }
            EnvelopeType::Message => {
                match envelope.payload.get("Event").and_then(Value::as_str) {
                    Some(event) => {
                        let data = envelope.data().cloned().unwrap_or(Value::Null);
                        self.context.dispatcher.trigger(event, &data);
                    }
                    None => {
                        warn!("Broadcast message without event name");
                        self.undefined(envelope);
                    }
                }
                None
            }
            _ => {
                self.undefined(envelope);
                None
            }
        }
    }

    /// Hide the glyph overlay (the socket closed or the client disconnected).
    pub fn hide_glyph(&self) {
        self.overlay("hide", |overlay| overlay.hide());
    }

    fn assign_glyph(&mut self, payload: &Value, identity: &mut ClientIdentity) {
        self.overlay("hide", |overlay| overlay.hide());
        self.glyph = None;

        match payload.get("Id") {
            Some(Value::String(id)) => identity.assigned_id = Some(id.clone()),
            Some(Value::Number(id)) => identity.assigned_id = Some(id.to_string()),
            _ => warn!(
                "Glyph assignment without id, keeping {:?}",
                identity.assigned_id
            ),
        }

        let data = payload.get("GlyphData").and_then(Value::as_str).unwrap_or_default();
        match GlyphMatrix::parse(data) {
            Ok(matrix) => {
                debug!(
                    "Assigned glyph {:?} ({}x{})",
                    identity.assigned_id,
                    matrix.dimension(),
                    matrix.dimension()
                );
                let renderer = &self.context.renderer;
                self.glyph = isolated("Glyph renderer", || renderer.render(&matrix));
                self.show_glyph(identity);
            }
            Err(e) => warn!("Ignoring glyph for {:?}: {}", identity.assigned_id, e),
        }
    }

    fn show_glyph(&self, identity: &ClientIdentity) {
        if let Some(image) = &self.glyph {
            let id = identity.assigned_id.as_deref().unwrap_or_default();
            self.overlay("show", |overlay| overlay.show(id, image));
        }
    }

    fn identify_device(&mut self, data: &Value, identity: &ClientIdentity) {
        let value = data.get("Value").and_then(Value::as_bool).unwrap_or(false);

        if self.identified != value {
            self.identified = value;
            let event = if value {
                names::DEVICE_FOUND
            } else {
                names::DEVICE_LOST
            };
            self.context.dispatcher.trigger(event, &Value::Null);
        }

        if value {
            self.show_glyph(identity);
        } else {
            self.overlay("hide", |overlay| overlay.hide());
        }

        self.context.dispatcher.trigger(names::IDENTIFY, data);
    }

    fn show_color(&mut self, data: Value) -> Envelope {
        if data.get("Value").and_then(Value::as_bool).unwrap_or(false) {
            let color = data.get("Color").and_then(Value::as_str);
            self.overlay("show_color", |overlay| overlay.show_color(color));
        } else {
            self.overlay("hide_color", |overlay| overlay.hide_color());
        }

        self.context.dispatcher.trigger(names::SHOW_COLOR, &data);
        Envelope::acknowledge(data)
    }

    fn update_proximity(&self, data: &Value) {
        let dispatcher = &self.context.dispatcher;
        dispatcher.trigger(names::PROXIMITY, data);
        if let Some(event) = ProximityKind::of(data).event_name() {
            dispatcher.trigger(event, data);
        }
    }

    fn undefined(&self, envelope: Envelope) {
        let value = envelope.into_value();
        match &self.fallback {
            Some(fallback) => {
                isolated("Fallback handler", || fallback(&value));
            }
            None => debug!("Unhandled message: {}", value),
        }
    }

    fn overlay(&self, call: &str, f: impl FnOnce(&dyn VisualOverlay)) {
        let overlay = self.context.overlay.as_ref();
        if panic::catch_unwind(AssertUnwindSafe(|| f(overlay))).is_err() {
            error!("Overlay '{}' panicked", call);
        }
    }
}

/// Run an application-supplied capability, containing any panic.
fn isolated<T>(what: &str, f: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(_) => {
            error!("{} panicked", what);
            None
        }
    }
}

impl std::fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Multiplexer")
            .field("identified", &self.identified)
            .field("has_glyph", &self.glyph.is_some())
            .finish()
    }
}
