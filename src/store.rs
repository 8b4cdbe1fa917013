//! Room persistence contract and the in-memory implementation.
//!
//! The session core never does bare read-then-write against storage: every
//! mutation is a conditional put against the version it read, so two
//! concurrent writers cannot silently lose updates. Successful writes fan
//! out `RoomUpdated` / `RoomDeleted` events to subscribers; the events are
//! best-effort, which is why clients also poll.

use crate::types::{Room, RoomCode};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StoreError {
    #[error("room not found")]
    NotFound,

    #[error("version conflict")]
    Conflict,
}

/// A room together with the storage version it was read at.
#[derive(Debug, Clone)]
pub struct VersionedRoom {
    pub room: Room,
    pub version: u64,
}

/// Change notification emitted after a successful write. At-least-once,
/// best-effort: a missed event must not cause permanent staleness.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Updated(RoomCode),
    Deleted(RoomCode),
}

#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Case-insensitive lookup by room code.
    async fn get(&self, code: &str) -> Result<VersionedRoom, StoreError>;

    /// Insert a new room; `Conflict` if the code is already taken.
    async fn insert(&self, room: Room) -> Result<(), StoreError>;

    /// Conditional write: commits only if the stored version still equals
    /// `expected_version`, returning the new version.
    async fn compare_and_put(
        &self,
        expected_version: u64,
        room: Room,
    ) -> Result<u64, StoreError>;

    /// Conditional delete, same precondition as `compare_and_put`.
    async fn remove(&self, code: &str, expected_version: u64) -> Result<Room, StoreError>;

    async fn list_codes(&self) -> Vec<RoomCode>;

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

/// In-memory store. Mutations run under a single write lock, which is what
/// makes the check-then-act inside `compare_and_put` atomic.
pub struct MemoryStore {
    rooms: RwLock<HashMap<RoomCode, VersionedRoom>>,
    events: broadcast::Sender<StoreEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self {
            rooms: RwLock::new(HashMap::new()),
            events: tx,
        }
    }

    fn notify(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn get(&self, code: &str) -> Result<VersionedRoom, StoreError> {
        self.rooms
            .read()
            .await
            .get(&normalize(code))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn insert(&self, room: Room) -> Result<(), StoreError> {
        let code = normalize(&room.code);
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(&code) {
            return Err(StoreError::Conflict);
        }
        rooms.insert(code.clone(), VersionedRoom { room, version: 1 });
        drop(rooms);
        self.notify(StoreEvent::Updated(code));
        Ok(())
    }

    async fn compare_and_put(
        &self,
        expected_version: u64,
        room: Room,
    ) -> Result<u64, StoreError> {
        let code = normalize(&room.code);
        let mut rooms = self.rooms.write().await;
        let entry = rooms.get_mut(&code).ok_or(StoreError::NotFound)?;
        if entry.version != expected_version {
            return Err(StoreError::Conflict);
        }
        entry.version += 1;
        entry.room = room;
        let version = entry.version;
        drop(rooms);
        self.notify(StoreEvent::Updated(code));
        Ok(version)
    }

    async fn remove(&self, code: &str, expected_version: u64) -> Result<Room, StoreError> {
        let code = normalize(code);
        let mut rooms = self.rooms.write().await;
        let entry = rooms.get(&code).ok_or(StoreError::NotFound)?;
        if entry.version != expected_version {
            return Err(StoreError::Conflict);
        }
        let removed = rooms.remove(&code).ok_or(StoreError::NotFound)?;
        drop(rooms);
        self.notify(StoreEvent::Deleted(code));
        Ok(removed.room)
    }

    async fn list_codes(&self) -> Vec<RoomCode> {
        self.rooms.read().await.keys().cloned().collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GameState;

    fn room(code: &str) -> Room {
        Room {
            code: code.to_string(),
            host_id: "p1".to_string(),
            players: Vec::new(),
            deck: Vec::new(),
            state: GameState::lobby(),
        }
    }

    #[tokio::test]
    async fn lookup_is_case_insensitive() {
        let store = MemoryStore::new();
        store.insert(room("AB12CD")).await.unwrap();

        assert!(store.get("ab12cd").await.is_ok());
        assert!(store.get(" ab12cd ").await.is_ok());
        assert_eq!(store.get("XXXXXX").await.unwrap_err(), StoreError::NotFound);
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let store = MemoryStore::new();
        store.insert(room("AB12CD")).await.unwrap();

        let first = store.get("AB12CD").await.unwrap();
        let second = store.get("AB12CD").await.unwrap();

        // First writer wins.
        let v2 = store
            .compare_and_put(first.version, first.room.clone())
            .await
            .unwrap();
        assert_eq!(v2, 2);

        // Second writer saw version 1 and must conflict.
        let err = store
            .compare_and_put(second.version, second.room)
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::Conflict);
    }

    #[tokio::test]
    async fn duplicate_code_conflicts() {
        let store = MemoryStore::new();
        store.insert(room("AB12CD")).await.unwrap();
        assert_eq!(
            store.insert(room("ab12cd")).await.unwrap_err(),
            StoreError::Conflict
        );
    }

    #[tokio::test]
    async fn remove_requires_current_version() {
        let store = MemoryStore::new();
        store.insert(room("AB12CD")).await.unwrap();

        let read = store.get("AB12CD").await.unwrap();
        store
            .compare_and_put(read.version, read.room.clone())
            .await
            .unwrap();

        assert_eq!(
            store.remove("AB12CD", read.version).await.unwrap_err(),
            StoreError::Conflict
        );
        assert!(store.remove("AB12CD", read.version + 1).await.is_ok());
        assert!(store.list_codes().await.is_empty());
    }

    #[tokio::test]
    async fn writes_emit_events() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();

        store.insert(room("AB12CD")).await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            StoreEvent::Updated("AB12CD".to_string())
        );

        let read = store.get("AB12CD").await.unwrap();
        store.remove("AB12CD", read.version).await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            StoreEvent::Deleted("AB12CD".to_string())
        );
    }
}
