//! Realtime rooms over WebSocket.

pub mod hub;
pub mod protocol;
pub mod room;

pub use hub::{ConnectionHub, ConnectionId, ConnectionUser, HubLimits, SubscribeError};
pub use room::RoomConfig;
