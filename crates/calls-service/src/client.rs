//! Inbound client messages.
//!
//! The host delivers websocket requests as `{action, data}` where `action`
//! is `<prefix><type>`. [`ClientMessageType::from_action`] strips the prefix
//! and [`decode_request`] extracts the payload each type requires.
//!
//! SDP arrives either as plain text or as an octet array holding the
//! zlib-packed description the web client sends; the latter is inflated
//! by [`unpack_sdp`] before dispatch.

use crate::errors::CallsError;

use flate2::read::ZlibDecoder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::Read;

/// Largest unpacked session description accepted from a client.
pub const MAX_SDP_SIZE: usize = 1 << 20;

/// Raw websocket request as handed over by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebSocketRequest {
    pub action: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl WebSocketRequest {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            data: Map::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}

/// Client message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMessageType {
    Join,
    Leave,
    Reconnect,
    Sdp,
    Ice,
    Mute,
    Unmute,
    VoiceOn,
    VoiceOff,
    ScreenOn,
    ScreenOff,
    RaiseHand,
    UnraiseHand,
    React,
}

impl ClientMessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            ClientMessageType::Join => "join",
            ClientMessageType::Leave => "leave",
            ClientMessageType::Reconnect => "reconnect",
            ClientMessageType::Sdp => "sdp",
            ClientMessageType::Ice => "ice",
            ClientMessageType::Mute => "mute",
            ClientMessageType::Unmute => "unmute",
            ClientMessageType::VoiceOn => "voice_on",
            ClientMessageType::VoiceOff => "voice_off",
            ClientMessageType::ScreenOn => "screen_on",
            ClientMessageType::ScreenOff => "screen_off",
            ClientMessageType::RaiseHand => "raise_hand",
            ClientMessageType::UnraiseHand => "unraise_hand",
            ClientMessageType::React => "react",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        let msg_type = match name {
            "join" => ClientMessageType::Join,
            "leave" => ClientMessageType::Leave,
            "reconnect" => ClientMessageType::Reconnect,
            "sdp" => ClientMessageType::Sdp,
            "ice" => ClientMessageType::Ice,
            "mute" => ClientMessageType::Mute,
            "unmute" => ClientMessageType::Unmute,
            "voice_on" => ClientMessageType::VoiceOn,
            "voice_off" => ClientMessageType::VoiceOff,
            "screen_on" => ClientMessageType::ScreenOn,
            "screen_off" => ClientMessageType::ScreenOff,
            "raise_hand" => ClientMessageType::RaiseHand,
            "unraise_hand" => ClientMessageType::UnraiseHand,
            "react" => ClientMessageType::React,
            _ => return None,
        };
        Some(msg_type)
    }

    /// Type named by a host action, with `prefix` stripped when present.
    pub fn from_action(prefix: &str, action: &str) -> Option<Self> {
        Self::parse(action.strip_prefix(prefix).unwrap_or(action))
    }

    /// Join, leave and reconnect are handled without an existing session.
    pub fn is_session_control(self) -> bool {
        matches!(
            self,
            ClientMessageType::Join | ClientMessageType::Leave | ClientMessageType::Reconnect
        )
    }
}

/// Typed client event with its raw payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub msg_type: ClientMessageType,
    #[serde(default)]
    pub data: Vec<u8>,
}

impl ClientMessage {
    pub fn new(msg_type: ClientMessageType, data: Vec<u8>) -> Self {
        Self { msg_type, data }
    }
}

/// Decoded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    Join {
        channel_id: String,
        title: String,
    },
    Reconnect {
        channel_id: String,
        original_connection_id: String,
        previous_connection_id: String,
    },
    Leave,
    Message(ClientMessage),
}

/// Extract the payload `msg_type` requires from the request data.
///
/// # Errors
///
/// `CallsError::InvalidMessage` when a required field is missing or has the
/// wrong shape.
pub fn decode_request(
    msg_type: ClientMessageType,
    data: &Map<String, Value>,
) -> Result<ClientRequest, CallsError> {
    let request = match msg_type {
        ClientMessageType::Join => ClientRequest::Join {
            channel_id: required_str(data, "channelID")?,
            title: data
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        },
        ClientMessageType::Reconnect => ClientRequest::Reconnect {
            channel_id: required_str(data, "channelID")?,
            original_connection_id: required_str(data, "originalConnID")?,
            previous_connection_id: required_str(data, "prevConnID")?,
        },
        ClientMessageType::Leave => ClientRequest::Leave,
        ClientMessageType::Sdp => {
            ClientRequest::Message(ClientMessage::new(msg_type, sdp_payload(data)?))
        }
        ClientMessageType::Ice | ClientMessageType::ScreenOn | ClientMessageType::React => {
            let payload = data
                .get("data")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    CallsError::InvalidMessage(format!(
                        "invalid or missing data for {}",
                        msg_type.as_str()
                    ))
                })?;
            ClientRequest::Message(ClientMessage::new(msg_type, payload.as_bytes().to_vec()))
        }
        ClientMessageType::Mute
        | ClientMessageType::Unmute
        | ClientMessageType::VoiceOn
        | ClientMessageType::VoiceOff
        | ClientMessageType::ScreenOff
        | ClientMessageType::RaiseHand
        | ClientMessageType::UnraiseHand => {
            ClientRequest::Message(ClientMessage::new(msg_type, Vec::new()))
        }
    };
    Ok(request)
}

fn required_str(data: &Map<String, Value>, key: &str) -> Result<String, CallsError> {
    match data.get(key).and_then(Value::as_str) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(CallsError::InvalidMessage(format!("missing {key}"))),
    }
}

/// SDP payloads arrive either as an array of octets or as a string.
fn sdp_payload(data: &Map<String, Value>) -> Result<Vec<u8>, CallsError> {
    let invalid = || CallsError::InvalidMessage("invalid or missing sdp data".to_string());
    match data.get("data") {
        Some(Value::String(s)) => Ok(s.as_bytes().to_vec()),
        Some(Value::Array(items)) => {
            let packed = items
                .iter()
                .map(|item| {
                    item.as_u64()
                        .and_then(|n| u8::try_from(n).ok())
                        .ok_or_else(invalid)
                })
                .collect::<Result<Vec<u8>, _>>()?;
            unpack_sdp(&packed)
        }
        _ => Err(invalid()),
    }
}

/// Inflate a zlib-packed session description.
///
/// # Errors
///
/// `CallsError::InvalidMessage` when the payload is not valid zlib data or
/// inflates past [`MAX_SDP_SIZE`].
pub fn unpack_sdp(packed: &[u8]) -> Result<Vec<u8>, CallsError> {
    let limit = u64::try_from(MAX_SDP_SIZE).unwrap_or(u64::MAX).saturating_add(1);
    let mut sdp = Vec::new();
    ZlibDecoder::new(packed)
        .take(limit)
        .read_to_end(&mut sdp)
        .map_err(|e| CallsError::InvalidMessage(format!("failed to unpack sdp data: {e}")))?;

    if sdp.len() > MAX_SDP_SIZE {
        return Err(CallsError::InvalidMessage(format!(
            "unpacked sdp exceeds {MAX_SDP_SIZE} bytes"
        )));
    }
    Ok(sdp)
}
