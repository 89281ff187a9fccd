//! Static room configuration.

use std::collections::HashSet;

use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::models::user::{role_satisfies, UserRole};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomConfig {
    pub name: String,
    /// Lowest role allowed to join; `None` admits anonymous connections.
    pub min_role: Option<UserRole>,
    /// Maximum concurrent members; `None` is unbounded.
    pub capacity: Option<usize>,
}

impl RoomConfig {
    pub fn new(name: impl Into<String>, min_role: Option<UserRole>, capacity: Option<usize>) -> Self {
        Self {
            name: name.into(),
            min_role,
            capacity,
        }
    }

    pub fn defaults() -> Vec<RoomConfig> {
        vec![
            RoomConfig::new("lobby", None, None),
            RoomConfig::new("members", Some(UserRole::Member), None),
            RoomConfig::new("editors", Some(UserRole::Editor), None),
            RoomConfig::new("admins", Some(UserRole::Admin), None),
        ]
    }

    pub fn admits(&self, role: Option<UserRole>) -> bool {
        role_satisfies(role, self.min_role)
    }

    pub fn is_full(&self, members: usize) -> bool {
        self.capacity.is_some_and(|capacity| members >= capacity)
    }
}

/// Parses `WS_ROOMS`, a comma-separated list of `name[:min_role[:capacity]]`.
/// `public`, `any` or an empty role mean no requirement.
///
/// `lobby,editors:editor,war-room:admin:10`
pub fn parse_room_specs(raw: &str) -> anyhow::Result<Vec<RoomConfig>> {
    let mut rooms = Vec::new();
    let mut seen = HashSet::new();

    for spec in raw.split(',').map(str::trim).filter(|spec| !spec.is_empty()) {
        let mut parts = spec.split(':').map(str::trim);
        let name = parts.next().unwrap_or_default();
        if name.is_empty() {
            bail!("Room spec '{}' has an empty name", spec);
        }

        let min_role = match parts.next() {
            None | Some("") | Some("public") | Some("any") => None,
            Some(role) => Some(
                UserRole::parse(role)
                    .ok_or_else(|| anyhow!("Unknown role '{}' in room spec '{}'", role, spec))?,
            ),
        };

        let capacity = match parts.next() {
            None | Some("") => None,
            Some(value) => {
                let capacity: usize = value
                    .parse()
                    .map_err(|_| anyhow!("Invalid capacity '{}' in room spec '{}'", value, spec))?;
                if capacity == 0 {
                    bail!("Room '{}' must allow at least one member", name);
                }
                Some(capacity)
            }
        };

        if parts.next().is_some() {
            bail!("Room spec '{}' has too many fields", spec);
        }
        if !seen.insert(name.to_string()) {
            bail!("Room '{}' is configured twice", name);
        }
        rooms.push(RoomConfig::new(name, min_role, capacity));
    }

    if rooms.is_empty() {
        bail!("WS_ROOMS does not define any room");
    }
    Ok(rooms)
}
