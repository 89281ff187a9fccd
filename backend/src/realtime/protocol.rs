//! JSON wire protocol spoken over `/api/ws`.
//!
//! Every frame is an envelope `{ "type": ..., "payload": ..., "id": ... }`.
//! Frames that are not an object with a string `type` violate the protocol
//! and close the connection; a well-formed envelope with a bad payload only
//! earns an error frame.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::hub::{ConnectionHub, ConnectionId, SubscribeError};

pub const CLOSE_GOING_AWAY: u16 = 1001;
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
pub const CLOSE_UNSUPPORTED_DATA: u16 = 1003;

pub const MAX_CONTENT_CHARS: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RateLimited,
    NotInRoom,
    InvalidPayload,
    Forbidden,
    RoomFull,
    UnknownRoom,
    Unauthenticated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerFrameType {
    Pong,
    Welcome,
    Subscribed,
    Unsubscribed,
    Message,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerFrame {
    #[serde(rename = "type")]
    pub kind: ServerFrameType,
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl ServerFrame {
    fn new(kind: ServerFrameType, payload: Value, id: Option<Value>) -> Self {
        Self { kind, payload, id }
    }

    pub fn pong(id: Option<Value>) -> Self {
        Self::new(ServerFrameType::Pong, json!({}), id)
    }

    pub fn welcome(connection_id: ConnectionId, authenticated: bool, rooms: &[String]) -> Self {
        Self::new(
            ServerFrameType::Welcome,
            json!({
                "connectionId": connection_id,
                "authenticated": authenticated,
                "rooms": rooms,
            }),
            None,
        )
    }

    pub fn subscribed(room: &str, id: Option<Value>) -> Self {
        Self::new(ServerFrameType::Subscribed, json!({ "room": room }), id)
    }

    pub fn unsubscribed(room: &str, id: Option<Value>) -> Self {
        Self::new(ServerFrameType::Unsubscribed, json!({ "room": room }), id)
    }

    pub fn message(room: &str, content: &str, from: Value) -> Self {
        Self::new(
            ServerFrameType::Message,
            json!({ "room": room, "content": content, "from": from }),
            None,
        )
    }

    pub fn error(code: ErrorCode, message: impl Into<String>, id: Option<Value>) -> Self {
        Self::new(
            ServerFrameType::Error,
            json!({ "code": code, "message": message.into() }),
            id,
        )
    }

    pub fn to_text(&self) -> String {
        // Serializing a `Value`-backed struct cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoomPayload {
    pub room: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessagePayload {
    pub room: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Ping,
    Subscribe(RoomPayload),
    Unsubscribe(RoomPayload),
    Message(MessagePayload),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    /// Not an object with a string `type`; the connection must close.
    Protocol(&'static str),
    /// Well-formed envelope whose type or payload is not acceptable.
    InvalidPayload { message: String, id: Option<Value> },
}

/// Decodes one text frame into the envelope id and a typed message.
pub fn parse_client_frame(text: &str) -> Result<(Option<Value>, ClientMessage), ParseError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|_| ParseError::Protocol("frame is not valid JSON"))?;
    let Value::Object(mut envelope) = value else {
        return Err(ParseError::Protocol("frame is not a JSON object"));
    };
    let kind = match envelope.remove("type") {
        Some(Value::String(kind)) => kind,
        _ => return Err(ParseError::Protocol("frame has no string type")),
    };
    let id = envelope.remove("id").filter(|id| !id.is_null());
    let payload = envelope
        .remove("payload")
        .unwrap_or_else(|| Value::Object(Map::new()));

    let invalid = |message: String| ParseError::InvalidPayload {
        message,
        id: id.clone(),
    };

    let message = match kind.as_str() {
        "ping" => ClientMessage::Ping,
        "subscribe" => ClientMessage::Subscribe(payload_as(payload).map_err(invalid)?),
        "unsubscribe" => ClientMessage::Unsubscribe(payload_as(payload).map_err(invalid)?),
        "message" => {
            let payload: MessagePayload = payload_as(payload).map_err(invalid)?;
            if payload.content.trim().is_empty() {
                return Err(invalid("content must not be empty".to_string()));
            }
            if payload.content.chars().count() > MAX_CONTENT_CHARS {
                return Err(invalid(format!(
                    "content exceeds {} characters",
                    MAX_CONTENT_CHARS
                )));
            }
            ClientMessage::Message(payload)
        }
        other => return Err(invalid(format!("unknown message type '{}'", other))),
    };
    Ok((id, message))
}

fn payload_as<T: DeserializeOwned>(payload: Value) -> Result<T, String> {
    serde_json::from_value(payload).map_err(|err| format!("invalid payload: {}", err))
}

/// What the socket task should do after a client frame was handled.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Reply(ServerFrame),
    /// Handled with no direct reply (a broadcast reaches the sender through
    /// its own room membership).
    Silent,
    Close { code: u16, reason: &'static str },
}

/// Applies one text frame from `connection` to the hub. The rate budget is
/// charged before the frame is parsed.
pub fn dispatch_text(hub: &ConnectionHub, connection: ConnectionId, text: &str) -> Dispatch {
    if !hub.check_rate(connection) {
        return Dispatch::Reply(ServerFrame::error(
            ErrorCode::RateLimited,
            "Too many messages, slow down",
            None,
        ));
    }

    let (id, message) = match parse_client_frame(text) {
        Ok(parsed) => parsed,
        Err(ParseError::Protocol(reason)) => {
            return Dispatch::Close {
                code: CLOSE_PROTOCOL_ERROR,
                reason,
            }
        }
        Err(ParseError::InvalidPayload { message, id }) => {
            return Dispatch::Reply(ServerFrame::error(ErrorCode::InvalidPayload, message, id))
        }
    };

    match message {
        ClientMessage::Ping => Dispatch::Reply(ServerFrame::pong(id)),
        ClientMessage::Subscribe(RoomPayload { room }) => match hub.subscribe(connection, &room) {
            Ok(()) => Dispatch::Reply(ServerFrame::subscribed(&room, id)),
            Err(err) => Dispatch::Reply(subscribe_error_frame(&err, id)),
        },
        ClientMessage::Unsubscribe(RoomPayload { room }) => {
            if !hub.has_room(&room) {
                return Dispatch::Reply(ServerFrame::error(
                    ErrorCode::UnknownRoom,
                    format!("Room '{}' does not exist", room),
                    id,
                ));
            }
            hub.unsubscribe(connection, &room);
            Dispatch::Reply(ServerFrame::unsubscribed(&room, id))
        }
        ClientMessage::Message(MessagePayload { room, content }) => {
            let Some(user) = hub.user(connection) else {
                return Dispatch::Reply(ServerFrame::error(
                    ErrorCode::Unauthenticated,
                    "Sign in to post messages",
                    id,
                ));
            };
            if !hub.is_member(connection, &room) {
                return Dispatch::Reply(ServerFrame::error(
                    ErrorCode::NotInRoom,
                    format!("Subscribe to '{}' before posting", room),
                    id,
                ));
            }
            let from = json!({
                "connectionId": connection,
                "userId": user.id,
                "displayName": user.display_name,
                "role": user.role,
            });
            hub.broadcast(&room, &ServerFrame::message(&room, &content, from));
            Dispatch::Silent
        }
    }
}

/// Binary frames are not part of the protocol.
pub fn dispatch_binary() -> Dispatch {
    Dispatch::Close {
        code: CLOSE_UNSUPPORTED_DATA,
        reason: "binary frames are not supported",
    }
}

fn subscribe_error_frame(err: &SubscribeError, id: Option<Value>) -> ServerFrame {
    let code = match err {
        SubscribeError::UnknownRoom(_) => ErrorCode::UnknownRoom,
        SubscribeError::Forbidden(_) => ErrorCode::Forbidden,
        SubscribeError::RoomFull(_) => ErrorCode::RoomFull,
        SubscribeError::UnknownConnection => ErrorCode::InvalidPayload,
    };
    ServerFrame::error(code, err.to_string(), id)
}
