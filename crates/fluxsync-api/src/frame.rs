// ── Frame ──
//
// One named message on a multiplexed stream. The payload stays opaque
// bytes until a listener decodes it against its own schema.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A single frame delivered on a named channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Channel the frame was published on, e.g. `"sy_label_set"`.
    pub channel: String,

    /// Raw payload bytes. Encoding is up to the channel's schema.
    pub payload: Bytes,
}

impl Frame {
    pub fn new(channel: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    /// Build a frame whose payload is the JSON encoding of `value`.
    pub fn json<T: Serialize>(channel: impl Into<String>, value: &T) -> Result<Self, Error> {
        let payload = serde_json::to_vec(value)?;
        Ok(Self::new(channel, payload))
    }
}

// ── Wire format ──────────────────────────────────────────────────────

/// Envelope used on the WebSocket transport.
///
/// `{ "channel": "...", "payload": <any JSON> }`
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireFrame {
    pub channel: String,
    pub payload: serde_json::Value,
}

impl TryFrom<WireFrame> for Frame {
    type Error = Error;

    fn try_from(wire: WireFrame) -> Result<Self, Self::Error> {
        let payload = serde_json::to_vec(&wire.payload)?;
        Ok(Self::new(wire.channel, payload))
    }
}

/// Control message sent by the client after the socket opens.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ControlMessage<'a> {
    Subscribe { channels: &'a [String] },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn json_frame_encodes_payload() {
        let frame = Frame::json("labels", &serde_json::json!({ "key": 1 })).unwrap();
        assert_eq!(frame.channel, "labels");
        assert_eq!(&frame.payload[..], br#"{"key":1}"#);
    }

    #[test]
    fn wire_frame_keeps_payload_as_json_bytes() {
        let wire: WireFrame =
            serde_json::from_str(r#"{"channel":"ranges","payload":[1,2,3]}"#).unwrap();
        let frame = Frame::try_from(wire).unwrap();
        assert_eq!(frame.channel, "ranges");
        assert_eq!(&frame.payload[..], b"[1,2,3]");
    }

    #[test]
    fn subscribe_message_shape() {
        let channels = vec!["a".to_owned(), "b".to_owned()];
        let msg = ControlMessage::Subscribe {
            channels: &channels,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "type": "subscribe", "channels": ["a", "b"] })
        );
    }
}
