//! Wire protocol spoken with the Huddle engine.
//!
//! - Envelope encoding and decoding
//! - Handshake and client identity
//! - Proximity samples and glyph matrices carried in inbound messages

pub mod envelope;
pub mod glyph;
pub mod handshake;
pub mod proximity;

pub use envelope::{decode, encode, CodecError, Envelope, EnvelopeType};
pub use glyph::{GlyphError, GlyphImage, GlyphMatrix};
pub use handshake::{ClientIdentity, ClientOptions, Handshake};
pub use proximity::{Presence, ProximityKind, ProximityRecord, RgbRatio};
