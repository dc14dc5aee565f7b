use bytestring::ByteString;
use serde::{Deserialize, Serialize};

/// Control envelope a downstream client may send instead of a raw upstream payload.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum IncomingMessage {
    #[serde(rename = "yahoo_message")]
    YahooMessage { data: String },
    #[serde(rename = "yahoo_reconnect")]
    YahooReconnect { data: ReconnectPayload },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub struct ReconnectPayload {
    #[serde(rename = "leagueId")]
    pub league_id: String,
    #[serde(rename = "draftPosition")]
    pub draft_position: u32,
}

/// Frames the proxy sends down to a browser client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum OutgoingMessage {
    #[serde(rename = "room_joined")]
    RoomJoined {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "yahooConnected")]
        yahoo_connected: bool,
        #[serde(rename = "clientsCount")]
        clients_count: usize,
        #[serde(rename = "draftPosition")]
        draft_position: u32,
    },
    #[serde(rename = "yahoo_connected")]
    YahooConnected { message: String },
    #[serde(rename = "yahoo_message")]
    YahooMessage { data: String },
    #[serde(rename = "yahoo_disconnected")]
    YahooDisconnected { code: u16, reason: String },
    #[serde(rename = "yahoo_error")]
    YahooError { error: String },
    /// Reserved for a future max-reconnect-attempts policy; nothing emits this today.
    #[allow(dead_code)]
    #[serde(rename = "yahoo_max_reconnect_reached")]
    YahooMaxReconnectReached,
}

impl From<OutgoingMessage> for ByteString {
    fn from(msg: OutgoingMessage) -> Self {
        serde_json::to_string(&msg)
            .expect("OutgoingMessage always serializes")
            .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yahoo_message_round_trips_through_json() {
        let raw = r#"{"type":"yahoo_message","data":"8|123|1|ua|"}"#;
        let parsed: IncomingMessage = serde_json::from_str(raw).unwrap();
        match parsed {
            IncomingMessage::YahooMessage { data } => assert_eq!(data, "8|123|1|ua|"),
            _ => panic!("expected YahooMessage"),
        }
    }

    #[test]
    fn reconnect_payload_uses_camel_case_keys() {
        let raw = r#"{"type":"yahoo_reconnect","data":{"leagueId":"999","draftPosition":4}}"#;
        let parsed: IncomingMessage = serde_json::from_str(raw).unwrap();
        match parsed {
            IncomingMessage::YahooReconnect { data } => {
                assert_eq!(data.league_id, "999");
                assert_eq!(data.draft_position, 4);
            }
            _ => panic!("expected YahooReconnect"),
        }
    }

    #[test]
    fn unrecognised_type_falls_back_to_unknown() {
        let raw = r#"{"type":"something_else","whatever":true}"#;
        let parsed: IncomingMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(parsed, IncomingMessage::Unknown));
    }

    #[test]
    fn outgoing_room_joined_serializes_camel_case() {
        let msg = OutgoingMessage::RoomJoined {
            room_id: "123".to_string(),
            yahoo_connected: false,
            clients_count: 1,
            draft_position: 2,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"roomId\":\"123\""));
        assert!(json.contains("\"yahooConnected\":false"));
        assert!(json.contains("\"clientsCount\":1"));
        assert!(json.contains("\"draftPosition\":2"));
    }
}
