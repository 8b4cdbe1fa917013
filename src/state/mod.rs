mod generate;
mod phase;
mod room;
mod select;
mod swipe;
mod tokens;

pub use phase::AdvanceOutcome;
pub use select::select_winners;

use crate::error::{AppError, AppResult};
use crate::llm::{GenConfig, IdeaGenerator};
use crate::store::{RoomStore, StoreError, VersionedRoom};
use crate::types::Room;
use std::sync::Arc;

/// How many times a room mutation is retried after losing a conditional
/// write race before surfacing `Conflict` to the caller.
const CAS_RETRIES: usize = 16;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RoomStore>,
    pub generator: Option<Arc<dyn IdeaGenerator>>,
    pub gen_config: GenConfig,
}

impl AppState {
    pub fn new(store: Arc<dyn RoomStore>, config: GenConfig) -> Self {
        let generator = config.build_generator();
        Self {
            store,
            generator,
            gen_config: config,
        }
    }

    pub fn new_with_generator(
        store: Arc<dyn RoomStore>,
        generator: Arc<dyn IdeaGenerator>,
    ) -> Self {
        Self {
            store,
            generator: Some(generator),
            gen_config: GenConfig::default(),
        }
    }

    pub async fn get_room(&self, code: &str) -> AppResult<Room> {
        Ok(self.store.get(code).await?.room)
    }

    pub(crate) async fn get_versioned(&self, code: &str) -> AppResult<VersionedRoom> {
        Ok(self.store.get(code).await?)
    }

    /// Apply `mutate` to the room under optimistic concurrency: read, mutate
    /// a copy, write conditionally, retry from a fresh read on conflict.
    /// `mutate` must re-derive everything from the room it is given, since
    /// each retry sees different state. Returns the committed room.
    pub(crate) async fn with_room<F>(&self, code: &str, mut mutate: F) -> AppResult<Room>
    where
        F: FnMut(&mut Room) -> AppResult<()>,
    {
        for _ in 0..CAS_RETRIES {
            let VersionedRoom { mut room, version } = self.store.get(code).await?;
            mutate(&mut room)?;
            match self.store.compare_and_put(version, room.clone()).await {
                Ok(_) => return Ok(room),
                Err(StoreError::Conflict) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(AppError::Conflict)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => AppError::RoomNotFound,
            StoreError::Conflict => AppError::Conflict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::*;

    pub(crate) fn test_state() -> AppState {
        AppState {
            store: Arc::new(MemoryStore::new()),
            generator: None,
            gen_config: GenConfig::default(),
        }
    }

    pub(crate) fn new_player(id: &str, name: &str) -> crate::protocol::NewPlayer {
        crate::protocol::NewPlayer {
            player_id: id.to_string(),
            name: name.to_string(),
            profile: PlayerProfile::default(),
        }
    }

    pub(crate) fn test_idea(id: &str) -> Idea {
        Idea {
            id: id.to_string(),
            title: format!("Idea {id}"),
            description: "Build a thing".to_string(),
            tech_stack: vec!["Rust".to_string()],
            time_estimate: "20 hours".to_string(),
            difficulty: Difficulty::Medium,
            is_winner: None,
            features: Vec::new(),
            risk: None,
            pitch: None,
            podium_rank: None,
        }
    }

    #[tokio::test]
    async fn with_room_retries_after_interleaved_write() {
        let state = test_state();
        let room = state.create_room(new_player("p1", "Alice")).await.unwrap();
        let code = room.code.clone();

        // First closure invocation races against an external write; the
        // retry must see the new player.
        let store = state.store.clone();
        let code2 = code.clone();
        let mut first = true;
        let result = state
            .with_room(&code, |room| {
                if first {
                    first = false;
                    let store = store.clone();
                    let code = code2.clone();
                    // Bump the version out from under this write.
                    futures::executor::block_on(async {
                        let read = store.get(&code).await.unwrap();
                        store
                            .compare_and_put(read.version, read.room)
                            .await
                            .unwrap();
                    });
                }
                room.players[0].name = "Alicia".to_string();
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(result.players[0].name, "Alicia");
    }

    #[tokio::test]
    async fn missing_room_maps_to_not_found() {
        let state = test_state();
        let err = state.get_room("NOPE42").await.unwrap_err();
        assert_eq!(err, AppError::RoomNotFound);
    }
}
