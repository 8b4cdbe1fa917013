use super::AppState;
use crate::error::{AppError, AppResult};
use crate::protocol::VoteReceipt;
use crate::types::*;

impl AppState {
    /// Record a Round-1 swipe. Re-voting the same card overwrites the weight
    /// without touching the distinct-pair counter, so retries cannot inflate
    /// the completion denominator. Weight 2 is the super-like and is only
    /// accepted while the player holds no weight-2 entry on another card.
    pub async fn record_vote(
        &self,
        code: &str,
        player_id: &str,
        card_id: &str,
        weight: u8,
    ) -> AppResult<(Room, VoteReceipt)> {
        if weight > SUPER_LIKE_WEIGHT {
            return Err(AppError::Validation(format!(
                "weight must be 0, 1 or 2, got {weight}"
            )));
        }

        let room = self
            .with_room(code, |room| {
                if room.state.phase != Phase::Round1 {
                    return Err(AppError::WrongPhase {
                        actual: room.state.phase,
                    });
                }
                if !room.is_member(player_id) {
                    return Err(AppError::Validation("not a member of this room".into()));
                }
                if room.idea(card_id).is_none() {
                    return Err(AppError::Validation(format!("unknown card {card_id}")));
                }

                let tally = room
                    .state
                    .swipes_mut()
                    .ok_or(AppError::Conflict)?;

                if weight == SUPER_LIKE_WEIGHT
                    && tally.super_like_spent_elsewhere(player_id, card_id)
                {
                    return Err(AppError::SuperLikeAlreadyUsed);
                }

                let votes = tally.map.entry(card_id.to_string()).or_default();
                if votes.insert(player_id.to_string(), weight).is_none() {
                    tally.total_swipes += 1;
                }
                Ok(())
            })
            .await?;

        let target = room.swipe_target();
        let total_swipes = room
            .state
            .swipes()
            .map(|t| t.total_swipes)
            .unwrap_or_default();
        let receipt = VoteReceipt {
            total_swipes,
            target,
            // >= because departures can shrink the target below counted pairs.
            complete: total_swipes >= target,
        };
        tracing::debug!(
            code,
            player = player_id,
            card = card_id,
            weight,
            total = total_swipes,
            target,
            "vote recorded"
        );
        Ok((room, receipt))
    }
}
