//! huddle-client: async WebSocket client for a Huddle proximity engine.
//!
//! The protocol state machine lives in `huddle-core`; this crate drives it
//! with real sockets and timers on Tokio.

pub mod client;
pub mod connection;
pub mod render;

pub use client::{ClientError, HuddleClient};
pub use connection::{SocketEvent, SocketHandle, TaggedEvent, MAX_MESSAGE_SIZE};
pub use render::{LogOverlay, PgmGlyphRenderer, TextGlyphRenderer};
