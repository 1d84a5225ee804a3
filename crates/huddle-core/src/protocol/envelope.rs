//! Wire envelope for engine messages.
//!
//! Every frame is a single JSON object carrying a `Type` discriminator next to
//! the type-specific fields:
//!
//! ```text
//! {"Type":"Proximity","Data":{...}}
//! {"Type":"Alive","Id":"42"}
//! {"Type":"Message","Event":"chat","Data":{...}}
//! ```
//!
//! The payload keys are spliced in at the top level rather than nested, so an
//! [`Envelope`] keeps the payload as the object that remains after removing
//! `Type`. Decoding never fails: anything that is not a typed JSON object comes
//! back as an [`EnvelopeType::Unknown`] envelope so it can reach the fallback
//! handler.

use serde_json::{Map, Value};
use thiserror::Error;

use super::handshake::Handshake;

/// Key carrying the envelope discriminator.
pub const TYPE_KEY: &str = "Type";

/// Key used for nested payloads (`Digital`, `Proximity`, `Handshake`, ...).
pub const DATA_KEY: &str = "Data";

/// `Id` sent in keep-alives before the engine has assigned one.
pub const UNASSIGNED_ID: &str = "undefined";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Failed to serialize envelope: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Envelope discriminator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EnvelopeType {
    /// Glyph assignment from the engine
    Glyph,
    /// Identify request, `"Digital"` on the wire
    IdentifyDevice,
    /// Position/orientation sample
    Proximity,
    /// Application broadcast relayed by the engine
    Message,
    /// Client keep-alive
    Alive,
    /// Client reply to a color flash
    Acknowledge,
    /// Client identity announcement
    Handshake,
    /// A `Type` name this client does not know
    Other(String),
    /// No `Type` at all, or not JSON
    Unknown,
}

impl EnvelopeType {
    /// Wire name, or `None` for [`EnvelopeType::Unknown`].
    pub fn as_wire(&self) -> Option<&str> {
        match self {
            Self::Glyph => Some("Glyph"),
            Self::IdentifyDevice => Some("Digital"),
            Self::Proximity => Some("Proximity"),
            Self::Message => Some("Message"),
            Self::Alive => Some("Alive"),
            Self::Acknowledge => Some("Acknowledge"),
            Self::Handshake => Some("Handshake"),
            Self::Other(name) => Some(name.as_str()),
            Self::Unknown => None,
        }
    }

    pub fn from_wire(name: &str) -> Self {
        match name {
            "Glyph" => Self::Glyph,
            "Digital" => Self::IdentifyDevice,
            "Proximity" => Self::Proximity,
            "Message" => Self::Message,
            "Alive" => Self::Alive,
            "Acknowledge" => Self::Acknowledge,
            "Handshake" => Self::Handshake,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A decoded or to-be-encoded wire message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub kind: EnvelopeType,
    pub payload: Value,
}

impl Envelope {
    pub fn new(kind: EnvelopeType, payload: Value) -> Self {
        Self { kind, payload }
    }

    /// Keep-alive: `{"Type":"Alive","Id":id}`.
    ///
    /// The id is always a string: [`UNASSIGNED_ID`] until the engine has
    /// assigned one.
    pub fn alive(id: Option<&str>) -> Self {
        let mut payload = Map::new();
        payload.insert("Id".into(), Value::from(id.unwrap_or(UNASSIGNED_ID)));
        Self::new(EnvelopeType::Alive, Value::Object(payload))
    }

    /// Identity announcement: `{"Type":"Handshake","Data":{...}}`.
    pub fn handshake(handshake: &Handshake) -> Result<Self, CodecError> {
        let data = serde_json::to_value(handshake)?;
        Ok(Self::nested(EnvelopeType::Handshake, data))
    }

    /// Broadcast: `{"Type":"Message","Event":event,"Data":data}`.
    pub fn message(event: &str, data: Value) -> Self {
        let mut payload = Map::new();
        payload.insert("Event".into(), Value::from(event));
        payload.insert(DATA_KEY.into(), data);
        Self::new(EnvelopeType::Message, Value::Object(payload))
    }

    /// Color-flash reply echoing the received data.
    pub fn acknowledge(data: Value) -> Self {
        Self::nested(EnvelopeType::Acknowledge, data)
    }

    fn nested(kind: EnvelopeType, data: Value) -> Self {
        let mut payload = Map::new();
        payload.insert(DATA_KEY.into(), data);
        Self::new(kind, Value::Object(payload))
    }

    /// The nested `Data` field, if the payload has one.
    pub fn data(&self) -> Option<&Value> {
        self.payload.get(DATA_KEY)
    }

    /// Rebuild the value as it arrived on the wire (`Type` spliced back in).
    pub fn into_value(self) -> Value {
        match (self.kind.as_wire(), self.payload) {
            (Some(name), Value::Object(fields)) => {
                let mut object = Map::with_capacity(fields.len() + 1);
                object.insert(TYPE_KEY.into(), Value::from(name));
                object.extend(fields);
                Value::Object(object)
            }
            (Some(name), other) => {
                let mut object = Map::new();
                object.insert(TYPE_KEY.into(), Value::from(name));
                object.insert(DATA_KEY.into(), other);
                Value::Object(object)
            }
            (None, payload) => payload,
        }
    }
}

/// Encode an envelope as a single JSON text frame.
///
/// Object payloads are spliced next to `Type`; any other payload is nested
/// under `Data`. An [`EnvelopeType::Unknown`] envelope encodes its payload
/// as-is.
pub fn encode(envelope: &Envelope) -> Result<String, CodecError> {
    Ok(serde_json::to_string(&envelope.clone().into_value())?)
}

/// Decode a text frame. Never fails.
pub fn decode(raw: &str) -> Envelope {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => return Envelope::new(EnvelopeType::Unknown, Value::String(raw.to_string())),
    };

    match value {
        Value::Object(mut fields) => match fields.remove(TYPE_KEY) {
            Some(Value::String(name)) => {
                Envelope::new(EnvelopeType::from_wire(&name), Value::Object(fields))
            }
            Some(other) => {
                // Non-string discriminator: hand back the object untouched.
                fields.insert(TYPE_KEY.into(), other);
                Envelope::new(EnvelopeType::Unknown, Value::Object(fields))
            }
            None => Envelope::new(EnvelopeType::Unknown, Value::Object(fields)),
        },
        other => Envelope::new(EnvelopeType::Unknown, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::handshake::{ClientIdentity, ClientOptions};
    use serde_json::json;

    // ==================== Encoding ====================

    #[test]
    fn test_alive_wire_format() {
        let wire = encode(&Envelope::alive(Some("7"))).unwrap();
        let value: Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(value, json!({"Type": "Alive", "Id": "7"}));
    }

    #[test]
    fn test_alive_without_assigned_id() {
        let wire = encode(&Envelope::alive(None)).unwrap();
        let value: Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(value, json!({"Type": "Alive", "Id": "undefined"}));
    }

    #[test]
    fn test_message_is_two_level() {
        let wire = encode(&Envelope::message("chat", json!({"text": "hi"}))).unwrap();
        let value: Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(
            value,
            json!({"Type": "Message", "Event": "chat", "Data": {"text": "hi"}})
        );
    }

    #[test]
    fn test_acknowledge_nests_data() {
        let data = json!({"Value": true, "Type": "ShowColor", "Color": "red"});
        let wire = encode(&Envelope::acknowledge(data.clone())).unwrap();
        let value: Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(value, json!({"Type": "Acknowledge", "Data": data}));
    }

    #[test]
    fn test_handshake_wire_format() {
        let options = ClientOptions {
            name: "tablet".into(),
            glyph_id: Some(3),
            ..Default::default()
        };
        let identity = ClientIdentity::from_options(&options);
        let envelope = Envelope::handshake(&Handshake::new(&identity, &options)).unwrap();
        let value: Value = serde_json::from_str(&encode(&envelope).unwrap()).unwrap();

        assert_eq!(value["Type"], "Handshake");
        assert_eq!(value["Data"]["Name"], "tablet");
        assert_eq!(value["Data"]["GlyphId"], 3);
        assert_eq!(value["Data"]["DeviceType"], "unknown");
        assert_eq!(value["Data"]["Options"]["name"], "tablet");
    }

    #[test]
    fn test_non_object_payload_nests_under_data() {
        let envelope = Envelope::new(EnvelopeType::Other("Custom".into()), json!([1, 2]));
        let value: Value = serde_json::from_str(&encode(&envelope).unwrap()).unwrap();
        assert_eq!(value, json!({"Type": "Custom", "Data": [1, 2]}));
    }

    // ==================== Decoding ====================

    #[test]
    fn test_roundtrip_known_types() {
        let envelopes = [
            Envelope::alive(Some("1")),
            Envelope::message("move", json!({"x": 0.5})),
            Envelope::acknowledge(json!({"Value": false})),
            Envelope::new(EnvelopeType::Proximity, json!({"Data": {"Type": "Hand"}})),
            Envelope::new(EnvelopeType::Other("Future".into()), json!({"A": 1})),
        ];
        for envelope in envelopes {
            let decoded = decode(&encode(&envelope).unwrap());
            assert_eq!(decoded, envelope);
        }
    }

    #[test]
    fn test_digital_maps_to_identify_device() {
        let decoded = decode(r#"{"Type":"Digital","Data":{"Value":true}}"#);
        assert_eq!(decoded.kind, EnvelopeType::IdentifyDevice);
        assert_eq!(decoded.data(), Some(&json!({"Value": true})));
    }

    #[test]
    fn test_glyph_fields_stay_top_level() {
        let decoded = decode(r#"{"Type":"Glyph","Id":"5","GlyphData":"1001"}"#);
        assert_eq!(decoded.kind, EnvelopeType::Glyph);
        assert_eq!(decoded.payload["Id"], "5");
        assert_eq!(decoded.payload["GlyphData"], "1001");
    }

    #[test]
    fn test_invalid_json_becomes_unknown_raw_string() {
        let decoded = decode("not json at all");
        assert_eq!(decoded.kind, EnvelopeType::Unknown);
        assert_eq!(decoded.payload, Value::String("not json at all".into()));
    }

    #[test]
    fn test_untyped_object_is_unknown() {
        let decoded = decode(r#"{"Foo":1}"#);
        assert_eq!(decoded.kind, EnvelopeType::Unknown);
        assert_eq!(decoded.into_value(), json!({"Foo": 1}));
    }

    #[test]
    fn test_non_string_type_is_preserved() {
        let decoded = decode(r#"{"Type":5,"Foo":1}"#);
        assert_eq!(decoded.kind, EnvelopeType::Unknown);
        assert_eq!(decoded.into_value(), json!({"Type": 5, "Foo": 1}));
    }

    #[test]
    fn test_unknown_type_is_preserved() {
        let decoded = decode(r#"{"Type":"Telemetry","Rate":30}"#);
        assert_eq!(decoded.kind, EnvelopeType::Other("Telemetry".into()));
        assert_eq!(decoded.into_value(), json!({"Type": "Telemetry", "Rate": 30}));
    }
}
