//! Proximity samples streamed by the engine.
//!
//! Subscribers receive the raw `Data` value; these types are a typed view for
//! applications that want one.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProximityKind {
    Display,
    Hand,
    #[serde(other)]
    Other,
}

impl ProximityKind {
    /// Kind-specific event name, if this kind has one.
    pub fn event_name(&self) -> Option<&'static str> {
        match self {
            Self::Display => Some(crate::events::names::DISPLAY_MOVE),
            Self::Hand => Some(crate::events::names::HAND_MOVE),
            Self::Other => None,
        }
    }

    /// Read the kind from a raw `Data` value without a full parse.
    pub fn of(data: &Value) -> Self {
        match data.get("Type").and_then(Value::as_str) {
            Some("Display") => Self::Display,
            Some("Hand") => Self::Hand,
            _ => Self::Other,
        }
    }
}

/// Ratio between the engine's RGB image and the display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RgbRatio {
    #[serde(rename = "X")]
    pub x: f64,
    #[serde(rename = "Y")]
    pub y: f64,
}

/// A nested presence. Presences never carry presences of their own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Presence {
    #[serde(rename = "Type")]
    pub kind: ProximityKind,
    pub identity: String,
    /// x, y, z, each in [0, 1]
    pub location: [f64; 3],
    /// Degrees in [0, 360)
    pub orientation: f64,
    /// Distance to the parent entity in [0, 1]
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default)]
    pub movement: Option<f64>,
    #[serde(rename = "RgbImageToDisplayRatio", default)]
    pub rgb_ratio: RgbRatio,
}

/// A position/orientation sample for a display or hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProximityRecord {
    #[serde(rename = "Type")]
    pub kind: ProximityKind,
    pub identity: String,
    pub location: [f64; 3],
    pub orientation: f64,
    #[serde(default)]
    pub distance: Option<f64>,
    #[serde(default)]
    pub movement: Option<f64>,
    #[serde(default)]
    pub presences: Vec<Presence>,
    #[serde(rename = "RgbImageToDisplayRatio", default)]
    pub rgb_ratio: RgbRatio,
}

impl ProximityRecord {
    /// Parse a record from an event payload.
    pub fn from_value(data: &Value) -> Option<Self> {
        Self::deserialize(data).ok()
    }
}
