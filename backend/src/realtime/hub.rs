//! Registry of live realtime connections and their room memberships.
//!
//! All connection state sits in one arena keyed by [`ConnectionId`] and
//! guarded by a single mutex. Broadcasts enqueue onto each member's bounded
//! outbound channel while holding that lock, so membership seen by a
//! broadcast is exactly the membership at the moment of the call.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::protocol::ServerFrame;
use super::room::RoomConfig;
use crate::models::user::{User, UserRole};
use crate::types::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity attached to an authenticated connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUser {
    pub id: UserId,
    pub display_name: String,
    pub role: UserRole,
}

impl From<&User> for ConnectionUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            display_name: user.display_name.clone(),
            role: user.role,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscribeError {
    #[error("Room '{0}' does not exist")]
    UnknownRoom(String),
    #[error("Your role does not allow joining '{0}'")]
    Forbidden(String),
    #[error("Room '{0}' is full")]
    RoomFull(String),
    #[error("Connection is not registered")]
    UnknownConnection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub name: String,
    pub min_role: Option<UserRole>,
    pub capacity: Option<usize>,
    pub members: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct HubLimits {
    pub messages_per_second: u32,
    pub burst: u32,
}

struct Connection {
    user: Option<ConnectionUser>,
    rooms: HashSet<String>,
    outbound: mpsc::Sender<ServerFrame>,
    limiter: DefaultDirectRateLimiter,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<ConnectionId, Connection>,
    members: HashMap<String, BTreeSet<ConnectionId>>,
}

pub struct ConnectionHub {
    registry: Mutex<Registry>,
    rooms: Vec<RoomConfig>,
    next_id: AtomicU64,
    quota: Quota,
}

impl ConnectionHub {
    pub fn new(rooms: Vec<RoomConfig>, limits: HubLimits) -> Self {
        let per_second = NonZeroU32::new(limits.messages_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(limits.burst.max(limits.messages_per_second))
            .unwrap_or(per_second);
        Self {
            registry: Mutex::new(Registry::default()),
            rooms,
            next_id: AtomicU64::new(1),
            quota: Quota::per_second(per_second).allow_burst(burst),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn room(&self, name: &str) -> Option<&RoomConfig> {
        self.rooms.iter().find(|room| room.name == name)
    }

    pub fn has_room(&self, name: &str) -> bool {
        self.room(name).is_some()
    }

    /// Registers a connection. Identifiers increase monotonically and are
    /// never handed out twice.
    pub fn connect(
        &self,
        outbound: mpsc::Sender<ServerFrame>,
        user: Option<ConnectionUser>,
    ) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let connection = Connection {
            user,
            rooms: HashSet::new(),
            outbound,
            limiter: RateLimiter::direct(self.quota),
        };
        self.registry().connections.insert(id, connection);
        tracing::debug!(connection_id = %id, "Realtime connection registered");
        id
    }

    pub fn subscribe(&self, id: ConnectionId, room: &str) -> Result<(), SubscribeError> {
        let config = self
            .room(room)
            .ok_or_else(|| SubscribeError::UnknownRoom(room.to_string()))?;

        let mut registry = self.registry();
        let Registry {
            connections,
            members,
        } = &mut *registry;
        let connection = connections
            .get_mut(&id)
            .ok_or(SubscribeError::UnknownConnection)?;

        if connection.rooms.contains(room) {
            return Ok(());
        }
        if !config.admits(connection.user.as_ref().map(|user| user.role)) {
            return Err(SubscribeError::Forbidden(room.to_string()));
        }
        let room_members = members.entry(room.to_string()).or_default();
        if config.is_full(room_members.len()) {
            return Err(SubscribeError::RoomFull(room.to_string()));
        }

        room_members.insert(id);
        connection.rooms.insert(room.to_string());
        Ok(())
    }

    /// Idempotent; returns whether the connection was a member.
    pub fn unsubscribe(&self, id: ConnectionId, room: &str) -> bool {
        let mut registry = self.registry();
        let removed = registry
            .connections
            .get_mut(&id)
            .is_some_and(|connection| connection.rooms.remove(room));
        if removed {
            if let Some(room_members) = registry.members.get_mut(room) {
                room_members.remove(&id);
                if room_members.is_empty() {
                    registry.members.remove(room);
                }
            }
        }
        removed
    }

    /// Enqueues `frame` for every current member of `room` and returns how
    /// many connections accepted it. A member whose queue is full misses
    /// this frame.
    pub fn broadcast(&self, room: &str, frame: &ServerFrame) -> usize {
        let registry = self.registry();
        let Some(room_members) = registry.members.get(room) else {
            return 0;
        };

        let mut delivered = 0;
        for id in room_members {
            let Some(connection) = registry.connections.get(id) else {
                continue;
            };
            match connection.outbound.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(connection_id = %id, room, "Outbound queue full, dropping frame")
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(connection_id = %id, room, "Outbound queue closed")
                }
            }
        }
        delivered
    }

    /// Enqueues a direct reply on one connection's outbound queue, behind
    /// any broadcasts already waiting there.
    pub fn send_to(&self, id: ConnectionId, frame: ServerFrame) -> bool {
        let registry = self.registry();
        let Some(connection) = registry.connections.get(&id) else {
            return false;
        };
        match connection.outbound.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(connection_id = %id, "Outbound queue full, dropping reply");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Removes the connection from every room before returning.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let mut registry = self.registry();
        let Some(connection) = registry.connections.remove(&id) else {
            return false;
        };
        for room in &connection.rooms {
            if let Some(room_members) = registry.members.get_mut(room) {
                room_members.remove(&id);
                if room_members.is_empty() {
                    registry.members.remove(room);
                }
            }
        }
        tracing::debug!(connection_id = %id, "Realtime connection removed");
        true
    }

    /// Charges one message against the connection's budget. Unknown
    /// connections have no budget.
    pub fn check_rate(&self, id: ConnectionId) -> bool {
        self.registry()
            .connections
            .get(&id)
            .is_some_and(|connection| connection.limiter.check().is_ok())
    }

    pub fn user(&self, id: ConnectionId) -> Option<ConnectionUser> {
        self.registry()
            .connections
            .get(&id)
            .and_then(|connection| connection.user.clone())
    }

    pub fn is_member(&self, id: ConnectionId, room: &str) -> bool {
        self.registry()
            .connections
            .get(&id)
            .is_some_and(|connection| connection.rooms.contains(room))
    }

    pub fn members(&self, room: &str) -> Vec<ConnectionId> {
        self.registry()
            .members
            .get(room)
            .map(|room_members| room_members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn rooms(&self) -> Vec<RoomInfo> {
        let registry = self.registry();
        self.rooms
            .iter()
            .map(|room| RoomInfo {
                name: room.name.clone(),
                min_role: room.min_role,
                capacity: room.capacity,
                members: registry.members.get(&room.name).map_or(0, BTreeSet::len),
            })
            .collect()
    }

    /// Names of the rooms a connection with `role` could join.
    pub fn joinable_rooms(&self, role: Option<UserRole>) -> Vec<String> {
        self.rooms
            .iter()
            .filter(|room| room.admits(role))
            .map(|room| room.name.clone())
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.registry().connections.len()
    }

    /// Drops every connection. Their outbound senders go with them, which
    /// ends each socket's writer task.
    pub fn disconnect_all(&self) -> usize {
        let mut registry = self.registry();
        let count = registry.connections.len();
        registry.connections.clear();
        registry.members.clear();
        count
    }
}
