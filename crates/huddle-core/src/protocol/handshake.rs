//! Client identity and the handshake announcing it.
//!
//! The handshake is sent once per successful connection, shortly after the
//! socket opens. The engine does not answer it; the glyph assignment that
//! usually follows is what completes the client's identity.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default name used when the application does not supply one.
pub const DEFAULT_NAME: &str = "undefined";

/// Options supplied by the application at construction.
///
/// The whole options object is echoed to the engine in the handshake's
/// `Options` field, including any `extra` keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientOptions {
    /// Display name; does not need to be unique
    pub name: String,
    /// Preferred glyph id, if the device has a fixed one
    pub glyph_id: Option<i64>,
    /// Device type announced in the handshake
    #[serde(skip)]
    pub device_type: String,
    /// Additional application-defined options
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            glyph_id: None,
            device_type: crate::device::UNKNOWN_DEVICE.to_string(),
            extra: Map::new(),
        }
    }
}

impl ClientOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_glyph_id(mut self, glyph_id: i64) -> Self {
        self.glyph_id = Some(glyph_id);
        self
    }

    pub fn with_device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = device_type.into();
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Who this client is, as far as the engine is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub name: String,
    pub glyph_id: Option<i64>,
    pub device_type: String,
    /// Set by the engine's glyph assignment, echoed in every heartbeat
    pub assigned_id: Option<String>,
}

impl ClientIdentity {
    pub fn from_options(options: &ClientOptions) -> Self {
        Self {
            name: options.name.clone(),
            glyph_id: options.glyph_id,
            device_type: options.device_type.clone(),
            assigned_id: None,
        }
    }
}

/// Handshake body, the `Data` of a `Handshake` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Handshake {
    pub name: String,
    pub glyph_id: Option<i64>,
    pub device_type: String,
    pub options: ClientOptions,
}

impl Handshake {
    pub fn new(identity: &ClientIdentity, options: &ClientOptions) -> Self {
        Self {
            name: identity.name.clone(),
            glyph_id: identity.glyph_id,
            device_type: identity.device_type.clone(),
            options: options.clone(),
        }
    }
}
