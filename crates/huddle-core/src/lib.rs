//! huddle-core: Protocol core for clients of the Huddle proximity engine.
//!
//! This crate provides the sans-IO building blocks for:
//! - Encoding/decoding the engine's JSON envelopes
//! - Dispatching named events to application subscribers
//! - The connection lifecycle (handshake, heartbeat, reconnect)
//! - Routing inbound messages to overlays and subscribers
//!
//! Sockets and timers live in the driver (see `huddle-client`); the core only
//! consumes transport signals and the current time.

pub mod device;
pub mod events;
pub mod heartbeat;
pub mod mux;
pub mod overlay;
pub mod protocol;
pub mod reconnect;
pub mod session;

pub use events::{DispatchError, EventDispatcher, SubscriptionId};
pub use mux::{FallbackHandler, Multiplexer};
pub use overlay::{ClientContext, GlyphRenderer, NoopOverlay, VisualOverlay};
pub use protocol::{
    ClientIdentity, ClientOptions, Envelope, EnvelopeType, GlyphImage, GlyphMatrix,
    ProximityKind, ProximityRecord,
};
pub use reconnect::ReconnectConfig;
pub use session::{ConnectionState, Endpoint, Session, SessionAction, SessionConfig, DEFAULT_PORT};
