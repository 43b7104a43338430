//! Per-order room registry
//!
//! A room is an ephemeral topic scoped to one order. The creation saga
//! opens the room silently; clients join and leave through the message
//! handler; the per-connection forwarder consults [`RoomRegistry::is_member`]
//! to deliver room-scoped messages only to members. Nothing here is
//! persisted.

use dashmap::DashMap;
use std::collections::HashSet;

/// Room membership registry
///
/// `join` and `leave` are idempotent. `drop_client` removes every
/// membership of a disconnecting client so handlers cannot leak across
/// connections.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    /// room -> member client ids
    rooms: DashMap<String, HashSet<String>>,
    /// client id -> joined rooms (for teardown)
    memberships: DashMap<String, HashSet<String>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure a room exists (saga step 5; emits nothing)
    pub fn open(&self, room: &str) {
        self.rooms.entry(room.to_string()).or_default();
    }

    pub fn exists(&self, room: &str) -> bool {
        self.rooms.contains_key(room)
    }

    /// Add a client to a room; joining twice is a no-op
    pub fn join(&self, room: &str, client_id: &str) {
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(client_id.to_string());
        self.memberships
            .entry(client_id.to_string())
            .or_default()
            .insert(room.to_string());
    }

    /// Remove a client from a room; leaving twice is a no-op
    pub fn leave(&self, room: &str, client_id: &str) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(client_id);
        }
        if let Some(mut joined) = self.memberships.get_mut(client_id) {
            joined.remove(room);
        }
    }

    pub fn is_member(&self, room: &str, client_id: &str) -> bool {
        self.rooms
            .get(room)
            .map(|members| members.contains(client_id))
            .unwrap_or(false)
    }

    pub fn members(&self, room: &str) -> Vec<String> {
        self.rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove every membership of a disconnecting client
    pub fn drop_client(&self, client_id: &str) {
        if let Some((_, joined)) = self.memberships.remove(client_id) {
            for room in joined {
                if let Some(mut members) = self.rooms.get_mut(&room) {
                    members.remove(client_id);
                }
            }
        }
    }
}
