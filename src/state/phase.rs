use super::AppState;
use crate::error::{AppError, AppResult};
use crate::store::StoreError;
use crate::types::*;

/// Result of a conditional phase advance. Concurrent advancers racing on the
/// same completion event all succeed; exactly one observes `Advanced`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Advanced(Phase),
    AlreadyAdvanced(Phase),
}

impl AdvanceOutcome {
    pub fn phase(self) -> Phase {
        match self {
            AdvanceOutcome::Advanced(phase) | AdvanceOutcome::AlreadyAdvanced(phase) => phase,
        }
    }
}

fn is_valid_phase_transition(from: Phase, to: Phase) -> bool {
    use Phase::*;

    matches!(
        (from, to),
        (Lobby, Generating)
            | (Generating, Round1)
            | (Round1, Phase2Generating)
            | (Phase2Generating, Round2)
            | (Round2, Results)
    )
}

/// Substate a phase starts with. Each voting round begins from its own empty
/// state; Results has no round of its own and keeps the final token
/// allocations, which are what results display and archival score from.
fn entry_round_data(phase: Phase, current: RoundData) -> RoundData {
    match phase {
        Phase::Round1 => RoundData::Swipes(SwipeTally::default()),
        Phase::Round2 => RoundData::Tokens(TokenAllocations::default()),
        Phase::Results => current,
        _ => RoundData::Idle,
    }
}

impl AppState {
    /// Advance the room from `from` to its successor, conditionally: if the
    /// room already moved past `from`, report `AlreadyAdvanced` instead of
    /// failing, so duplicate triggers (watcher + client race) are harmless.
    /// Backward or skipping requests are rejected.
    pub async fn advance_phase(&self, code: &str, from: Phase) -> AppResult<AdvanceOutcome> {
        let to = match from {
            Phase::Lobby => Phase::Generating,
            Phase::Generating => Phase::Round1,
            Phase::Round1 => Phase::Phase2Generating,
            Phase::Phase2Generating => Phase::Round2,
            Phase::Round2 => Phase::Results,
            Phase::Results => {
                return Err(AppError::WrongPhase {
                    actual: Phase::Results,
                })
            }
        };
        debug_assert!(is_valid_phase_transition(from, to));

        loop {
            let versioned = self.get_versioned(code).await?;
            let mut room = versioned.room;
            let actual = room.state.phase;

            if actual.index() > from.index() {
                return Ok(AdvanceOutcome::AlreadyAdvanced(actual));
            }
            if actual != from {
                return Err(AppError::WrongPhase { actual });
            }

            room.state.phase = to;
            let current = std::mem::replace(&mut room.state.round, RoundData::Idle);
            room.state.round = entry_round_data(to, current);
            room.state.is_generating = false;
            room.state.generating_since = None;

            match self.store.compare_and_put(versioned.version, room).await {
                Ok(_) => {
                    tracing::info!(code, from = from.route(), to = to.route(), "phase advanced");
                    return Ok(AdvanceOutcome::Advanced(to));
                }
                Err(StoreError::Conflict) => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Host starts the game: fix the roster's average scale preference and
    /// move Lobby -> Generating. The deck generation itself is kicked off by
    /// the caller afterwards.
    pub async fn start_game(&self, code: &str, player_id: &str) -> AppResult<Room> {
        self.with_room(code, |room| {
            if room.host_id != player_id {
                return Err(AppError::Validation("only the host can start".into()));
            }
            if room.state.phase != Phase::Lobby {
                return Err(AppError::WrongPhase {
                    actual: room.state.phase,
                });
            }
            if room.players.is_empty() {
                return Err(AppError::Validation("room has no players".into()));
            }
            let sum: u32 = room
                .players
                .iter()
                .map(|p| u32::from(p.profile.scale_preference))
                .sum();
            let avg = (sum as f64 / room.players.len() as f64).round() as u8;
            room.state.phase = Phase::Generating;
            room.state.avg_scale = Some(avg.clamp(1, 10));
            room.state.round = RoundData::Idle;
            Ok(())
        })
        .await
    }
}
