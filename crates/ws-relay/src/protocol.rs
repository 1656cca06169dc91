use serde::{Deserialize, Serialize};
use thiserror::Error;

use tile_cache::TileAnnouncement;

/// Text message sent by a tile producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Proof that the producer knows the shared map identifier.
    #[serde(rename = "auth")]
    Auth { hash: String },

    /// Metadata for a tile whose bytes will follow as a binary frame.
    #[serde(rename = "map.tile.info")]
    TileInfo { data: TileAnnouncement },
}

impl ClientMessage {
    /// Every `type` tag this protocol understands.
    pub const KNOWN_TYPES: &'static [&'static str] = &["auth", "map.tile.info"];
}

/// Text message sent back to a tile producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "auth")]
    Auth { ok: bool },

    /// Answer to `map.tile.info`. `hash` always echoes the announcement.
    #[serde(rename = "maptileresponse")]
    TileResponse { ok: bool, hash: String },
}

/// Reasons a text frame could not be turned into a [`ClientMessage`].
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed client message: {0}")]
    Malformed(String),

    #[error("unknown message type '{0}'")]
    UnknownType(String),
}

/// Parse a text frame.
///
/// Unknown tags are reported separately from structural problems so the
/// caller can tell a newer producer apart from a broken one.
pub fn parse_client_message(text: &str) -> Result<ClientMessage, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let tag = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| ProtocolError::Malformed("missing string field 'type'".to_string()))?;

    if !ClientMessage::KNOWN_TYPES.contains(&tag) {
        return Err(ProtocolError::UnknownType(tag.to_string()));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TILE_INFO: &str = r#"{
        "type": "map.tile.info",
        "data": {
            "mapId": "m",
            "fileName": "t.png",
            "coords": { "x": 40000, "y": 1 },
            "hash": "abc",
            "lastModifiedOn": "2024-05-01T10:00:00.000Z"
        }
    }"#;

    #[test]
    fn parses_auth() {
        let msg = parse_client_message(r#"{"type":"auth","hash":"h"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Auth { hash: "h".to_string() });
    }

    #[test]
    fn parses_tile_info_without_range_checking() {
        match parse_client_message(TILE_INFO).unwrap() {
            ClientMessage::TileInfo { data } => {
                assert_eq!(data.file_name, "t.png");
                assert_eq!(data.coords.x, 40000);
            }
            other => panic!("expected TileInfo, got {:?}", other),
        }
    }

    #[test]
    fn unknown_type_is_its_own_error() {
        let err = parse_client_message(r#"{"type":"ping"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(ref t) if t == "ping"));
    }

    #[test]
    fn structural_problems_are_malformed() {
        for text in [
            "not json",
            "[1,2,3]",
            r#"{"hash":"h"}"#,
            r#"{"type":5}"#,
            r#"{"type":"auth"}"#,
            r#"{"type":"map.tile.info","data":{"fileName":"x"}}"#,
        ] {
            let err = parse_client_message(text).unwrap_err();
            assert!(
                matches!(err, ProtocolError::Malformed(_)),
                "expected Malformed for {text}, got {err:?}"
            );
        }
    }

    #[test]
    fn responses_serialize_with_type_tag() {
        let auth = serde_json::to_value(ServerMessage::Auth { ok: true }).unwrap();
        assert_eq!(auth, serde_json::json!({"type": "auth", "ok": true}));

        let tile = serde_json::to_value(ServerMessage::TileResponse {
            ok: false,
            hash: "abc".to_string(),
        })
        .unwrap();
        assert_eq!(
            tile,
            serde_json::json!({"type": "maptileresponse", "ok": false, "hash": "abc"})
        );
    }
}
