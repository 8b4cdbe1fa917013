use super::AppState;
use crate::error::{AppError, AppResult};
use crate::protocol::NewPlayer;
use crate::store::StoreError;
use crate::types::*;
use rand::Rng;

const CODE_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LENGTH: usize = 6;

fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_CHARS[rng.random_range(0..CODE_CHARS.len())] as char)
        .collect()
}

fn validate_player(player: &NewPlayer) -> AppResult<()> {
    if player.player_id.trim().is_empty() {
        return Err(AppError::Validation("player_id must not be empty".into()));
    }
    if player.name.trim().is_empty() {
        return Err(AppError::Validation("name must not be empty".into()));
    }
    Ok(())
}

impl AppState {
    /// Create a room with the caller as host, in Lobby.
    pub async fn create_room(&self, host: NewPlayer) -> AppResult<Room> {
        validate_player(&host)?;

        // Collisions are rare (36^6 codes); regenerate on conflict.
        loop {
            let room = Room {
                code: generate_room_code(),
                host_id: host.player_id.clone(),
                players: vec![PlayerSnapshot {
                    id: host.player_id.clone(),
                    name: host.name.clone(),
                    is_host: true,
                    profile: host.profile.clone(),
                }],
                deck: Vec::new(),
                state: GameState::lobby(),
            };
            match self.store.insert(room.clone()).await {
                Ok(()) => {
                    tracing::info!(code = %room.code, host = %room.host_id, "room created");
                    return Ok(room);
                }
                Err(StoreError::Conflict) => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Join a room. Existing members may rejoin at any phase (no-op beyond a
    /// name refresh); fresh joins are only accepted while the room is still
    /// in Lobby.
    pub async fn join_room(&self, code: &str, player: NewPlayer) -> AppResult<Room> {
        validate_player(&player)?;

        self.with_room(code, |room| {
            if let Some(existing) = room
                .players
                .iter_mut()
                .find(|p| p.id == player.player_id)
            {
                existing.name = player.name.clone();
                return Ok(());
            }
            if room.state.phase != Phase::Lobby {
                return Err(AppError::GameInProgress);
            }
            room.players.push(PlayerSnapshot {
                id: player.player_id.clone(),
                name: player.name.clone(),
                is_host: false,
                profile: player.profile.clone(),
            });
            Ok(())
        })
        .await
    }

    /// Remove a player. The host role moves to the earliest remaining player;
    /// the last player out deletes the room. Returns `None` when the room was
    /// deleted.
    pub async fn leave_room(&self, code: &str, player_id: &str) -> AppResult<Option<Room>> {
        loop {
            let versioned = self.get_versioned(code).await?;
            let mut room = versioned.room;
            if !room.is_member(player_id) {
                return Err(AppError::Validation("not a member of this room".into()));
            }
            room.players.retain(|p| p.id != player_id);

            if room.players.is_empty() {
                match self.store.remove(code, versioned.version).await {
                    Ok(_) => {
                        tracing::info!(code = %room.code, "room emptied and deleted");
                        return Ok(None);
                    }
                    Err(StoreError::Conflict) => continue,
                    Err(err) => return Err(err.into()),
                }
            }

            if room.host_id == player_id {
                let next = &mut room.players[0];
                next.is_host = true;
                room.host_id = next.id.clone();
                tracing::info!(code = %room.code, host = %room.host_id, "host reassigned");
            }

            match self.store.compare_and_put(versioned.version, room.clone()).await {
                Ok(_) => return Ok(Some(room)),
                Err(StoreError::Conflict) => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Replace a player's profile. Only meaningful before generation runs.
    pub async fn update_profile(
        &self,
        code: &str,
        player_id: &str,
        profile: PlayerProfile,
    ) -> AppResult<Room> {
        if profile.scale_preference < 1 || profile.scale_preference > 10 {
            return Err(AppError::Validation(
                "scale_preference must be between 1 and 10".into(),
            ));
        }
        self.with_room(code, |room| {
            if room.state.phase != Phase::Lobby {
                return Err(AppError::WrongPhase {
                    actual: room.state.phase,
                });
            }
            let player = room
                .players
                .iter_mut()
                .find(|p| p.id == player_id)
                .ok_or_else(|| AppError::Validation("not a member of this room".into()))?;
            player.profile = profile.clone();
            Ok(())
        })
        .await
    }

    /// Archive a finished room: rank winners by final token counts, emit the
    /// permanent record, delete the room. Host only, Results only.
    pub async fn archive_room(&self, code: &str, player_id: &str) -> AppResult<ArchiveRecord> {
        loop {
            let versioned = self.get_versioned(code).await?;
            let room = versioned.room;
            if room.host_id != player_id {
                return Err(AppError::Validation("only the host can archive".into()));
            }
            if room.state.phase != Phase::Results {
                return Err(AppError::WrongPhase {
                    actual: room.state.phase,
                });
            }

            let allocations = room.state.tokens().cloned().unwrap_or_default();

            // Finalists first, ordered by tokens received; podium ranks go
            // to the top three.
            let mut deck = room.deck.clone();
            deck.sort_by_key(|idea| {
                (
                    std::cmp::Reverse(idea.is_winner == Some(true)),
                    std::cmp::Reverse(allocations.card_tokens(&idea.id)),
                )
            });
            for (rank, idea) in deck
                .iter_mut()
                .filter(|idea| idea.is_winner == Some(true))
                .take(3)
                .enumerate()
            {
                idea.podium_rank = Some((rank + 1) as u8);
            }

            let record = ArchiveRecord {
                code: room.code.clone(),
                played_at: chrono::Utc::now(),
                deck,
                players: room.players.clone(),
                allocations,
            };

            match self.store.remove(code, versioned.version).await {
                Ok(_) => {
                    tracing::info!(code = %record.code, "room archived");
                    return Ok(record);
                }
                Err(StoreError::Conflict) => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }
}
