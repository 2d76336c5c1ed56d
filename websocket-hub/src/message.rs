use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

pub type ClientId = u64;

/// Id reserved for server-generated announcements. Connection ids start at 1.
pub const SYSTEM_ID: ClientId = 0;
pub const SYSTEM_NAME: &str = "ADMIN";

/// The part of a client that is safe to put on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientView {
    pub id: ClientId,
    pub name: String,
}

impl ClientView {
    pub fn system() -> Self {
        Self {
            id: SYSTEM_ID,
            name: SYSTEM_NAME.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientToServer {
    Login { name: String },
    Message { text: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerToClient {
    Message { text: String, user: ClientView },
    AdminMessage { text: String, user: ClientView },
}

impl ServerToClient {
    pub fn admin(text: impl Into<String>) -> Self {
        ServerToClient::AdminMessage {
            text: text.into(),
            user: ClientView::system(),
        }
    }
}

/// Everything the hub can put on a client's outbound queue.
///
/// The join acknowledgement is the client's bare record, so the enum is
/// untagged and each variant keeps its own wire shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum OutboundFrame {
    Broadcast(ServerToClient),
    Welcome(ClientView),
}

#[derive(Debug)]
pub enum FrameError {
    /// Not JSON, or no string `type` discriminator.
    Malformed(serde_json::Error),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Malformed(err) => write!(f, "malformed frame: {err}"),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FrameError::Malformed(err) => Some(err),
        }
    }
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Deserialize)]
struct LoginPayload {
    name: String,
}

#[derive(Deserialize)]
struct ChatPayload {
    text: String,
}

/// Decodes one inbound frame.
///
/// Returns `Ok(None)` for frames that should be skipped: unknown `type`
/// values and known types whose payload has the wrong shape. Only a frame
/// that cannot be read as an envelope at all is an error.
pub fn decode_client_message(frame: &[u8]) -> Result<Option<ClientToServer>, FrameError> {
    let raw: RawFrame = serde_json::from_slice(frame).map_err(FrameError::Malformed)?;

    let message = match raw.kind.as_str() {
        "login" => decode_payload::<LoginPayload>(&raw.kind, raw.payload)
            .map(|payload| ClientToServer::Login { name: payload.name }),
        "message" => decode_payload::<ChatPayload>(&raw.kind, raw.payload)
            .map(|payload| ClientToServer::Message { text: payload.text }),
        other => {
            debug!(kind = other, "ignoring frame with unknown type");
            None
        }
    };

    Ok(message)
}

fn decode_payload<T: DeserializeOwned>(kind: &str, payload: serde_json::Value) -> Option<T> {
    match serde_json::from_value(payload) {
        Ok(payload) => Some(payload),
        Err(err) => {
            warn!(kind, error = %err, "ignoring frame with unexpected payload");
            None
        }
    }
}

pub fn encode_frame(frame: &OutboundFrame) -> serde_json::Result<String> {
    serde_json::to_string(frame)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_login_and_chat() {
        let login = decode_client_message(br#"{"type":"login","payload":{"name":"Alice"}}"#)
            .expect("valid frame");
        assert_eq!(
            login,
            Some(ClientToServer::Login {
                name: "Alice".into()
            })
        );

        let chat = decode_client_message(br#"{"type":"message","payload":{"text":"hi"}}"#)
            .expect("valid frame");
        assert_eq!(chat, Some(ClientToServer::Message { text: "hi".into() }));
    }

    #[test]
    fn unknown_type_is_skipped() {
        let decoded = decode_client_message(br#"{"type":"ping","payload":{}}"#).expect("envelope");
        assert_eq!(decoded, None);

        let no_payload = decode_client_message(br#"{"type":"typing"}"#).expect("envelope");
        assert_eq!(no_payload, None);
    }

    #[test]
    fn mistyped_payload_is_skipped_not_fatal() {
        let wrong_type =
            decode_client_message(br#"{"type":"login","payload":{"name":42}}"#).expect("envelope");
        assert_eq!(wrong_type, None);

        let missing_field =
            decode_client_message(br#"{"type":"message","payload":{}}"#).expect("envelope");
        assert_eq!(missing_field, None);

        let missing_payload = decode_client_message(br#"{"type":"login"}"#).expect("envelope");
        assert_eq!(missing_payload, None);
    }

    #[test]
    fn non_envelope_is_malformed() {
        assert!(matches!(
            decode_client_message(b"not json"),
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(
            decode_client_message(br#"{"payload":{"text":"hi"}}"#),
            Err(FrameError::Malformed(_))
        ));
        assert!(matches!(
            decode_client_message(br#"{"type":7}"#),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn broadcast_wire_shape() {
        let frame = OutboundFrame::Broadcast(ServerToClient::Message {
            text: "hi".into(),
            user: ClientView {
                id: 7,
                name: "Alice".into(),
            },
        });
        let encoded: serde_json::Value =
            serde_json::from_str(&encode_frame(&frame).expect("encode")).expect("json");

        assert_eq!(
            encoded,
            json!({
                "type": "message",
                "payload": { "text": "hi", "user": { "id": 7, "name": "Alice" } }
            })
        );
    }

    #[test]
    fn admin_message_uses_system_sentinel() {
        let frame = OutboundFrame::Broadcast(ServerToClient::admin("Alice joined"));
        let encoded: serde_json::Value =
            serde_json::from_str(&encode_frame(&frame).expect("encode")).expect("json");

        assert_eq!(
            encoded,
            json!({
                "type": "admin_message",
                "payload": { "text": "Alice joined", "user": { "id": 0, "name": "ADMIN" } }
            })
        );
    }

    #[test]
    fn welcome_is_bare_client_record() {
        let frame = OutboundFrame::Welcome(ClientView {
            id: 3,
            name: "Bob".into(),
        });
        let encoded = encode_frame(&frame).expect("encode");
        assert_eq!(encoded, r#"{"id":3,"name":"Bob"}"#);

        let parsed: OutboundFrame = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(parsed, frame);
    }
}
