use super::AppState;
use crate::error::{AppError, AppResult};
use crate::protocol::{TokenAction, TokenReceipt};
use crate::types::*;

impl AppState {
    /// Place or withdraw a Round-2 token. Tokens only land on finalist cards
    /// and each player holds a budget of `TOKEN_BUDGET`; withdrawing removes
    /// one occurrence of the player's id from the card.
    pub async fn place_token(
        &self,
        code: &str,
        player_id: &str,
        card_id: &str,
        action: TokenAction,
    ) -> AppResult<(Room, TokenReceipt)> {
        let room = self
            .with_room(code, |room| {
                if room.state.phase != Phase::Round2 {
                    return Err(AppError::WrongPhase {
                        actual: room.state.phase,
                    });
                }
                if !room.is_member(player_id) {
                    return Err(AppError::Validation("not a member of this room".into()));
                }
                match room.idea(card_id) {
                    None => {
                        return Err(AppError::Validation(format!("unknown card {card_id}")))
                    }
                    Some(idea) if idea.is_winner != Some(true) => {
                        return Err(AppError::Validation(
                            "tokens can only go on finalist cards".into(),
                        ))
                    }
                    Some(_) => {}
                }

                let allocations = room
                    .state
                    .tokens_mut()
                    .ok_or(AppError::Conflict)?;

                match action {
                    TokenAction::Add => {
                        if allocations.player_tokens(player_id) >= TOKEN_BUDGET {
                            return Err(AppError::TokenBudgetExceeded);
                        }
                        allocations
                            .0
                            .entry(card_id.to_string())
                            .or_default()
                            .push(player_id.to_string());
                    }
                    TokenAction::Remove => {
                        let ids = allocations
                            .0
                            .get_mut(card_id)
                            .ok_or(AppError::NoTokenToRemove)?;
                        let pos = ids
                            .iter()
                            .position(|id| id == player_id)
                            .ok_or(AppError::NoTokenToRemove)?;
                        ids.remove(pos);
                        if ids.is_empty() {
                            allocations.0.remove(card_id);
                        }
                    }
                }
                Ok(())
            })
            .await?;

        let target = room.token_target();
        let total_tokens = room
            .state
            .tokens()
            .map(|a| a.total() as u32)
            .unwrap_or_default();
        let receipt = TokenReceipt {
            total_tokens,
            target,
            complete: total_tokens >= target,
        };
        tracing::debug!(
            code,
            player = player_id,
            card = card_id,
            ?action,
            total = total_tokens,
            target,
            "token update"
        );
        Ok((room, receipt))
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{new_player, test_idea, test_state};
    use super::*;

    async fn room_in_round2(state: &AppState) -> String {
        let room = state.create_room(new_player("p1", "Alice")).await.unwrap();
        let code = room.code.clone();
        state
            .join_room(&code, new_player("p2", "Bob"))
            .await
            .unwrap();
        state
            .with_room(&code, |room| {
                let mut a = test_idea("a");
                a.is_winner = Some(true);
                let mut b = test_idea("b");
                b.is_winner = Some(true);
                let mut loser = test_idea("x");
                loser.is_winner = Some(false);
                room.deck = vec![a, b, loser];
                room.state.phase = Phase::Round2;
                room.state.round = RoundData::Tokens(TokenAllocations::default());
                Ok(())
            })
            .await
            .unwrap();
        code
    }

    #[tokio::test]
    async fn budget_caps_at_two_and_stacking_is_allowed() {
        let state = test_state();
        let code = room_in_round2(&state).await;

        state
            .place_token(&code, "p1", "a", TokenAction::Add)
            .await
            .unwrap();
        let (room, _) = state
            .place_token(&code, "p1", "a", TokenAction::Add)
            .await
            .unwrap();
        assert_eq!(room.state.tokens().unwrap().card_tokens("a"), 2);

        assert_eq!(
            state
                .place_token(&code, "p1", "b", TokenAction::Add)
                .await
                .unwrap_err(),
            AppError::TokenBudgetExceeded
        );
    }

    #[tokio::test]
    async fn remove_frees_budget_and_respects_ownership() {
        let state = test_state();
        let code = room_in_round2(&state).await;

        state
            .place_token(&code, "p1", "a", TokenAction::Add)
            .await
            .unwrap();

        // p2 has nothing on the card.
        assert_eq!(
            state
                .place_token(&code, "p2", "a", TokenAction::Remove)
                .await
                .unwrap_err(),
            AppError::NoTokenToRemove
        );

        let (room, _) = state
            .place_token(&code, "p1", "a", TokenAction::Remove)
            .await
            .unwrap();
        assert_eq!(room.state.tokens().unwrap().total(), 0);

        // Budget is back.
        state
            .place_token(&code, "p1", "b", TokenAction::Add)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn tokens_only_land_on_finalists() {
        let state = test_state();
        let code = room_in_round2(&state).await;

        assert!(matches!(
            state
                .place_token(&code, "p1", "x", TokenAction::Add)
                .await
                .unwrap_err(),
            AppError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn completion_when_all_budgets_spent() {
        let state = test_state();
        let code = room_in_round2(&state).await;

        state
            .place_token(&code, "p1", "a", TokenAction::Add)
            .await
            .unwrap();
        state
            .place_token(&code, "p1", "b", TokenAction::Add)
            .await
            .unwrap();
        state
            .place_token(&code, "p2", "a", TokenAction::Add)
            .await
            .unwrap();
        let (_, receipt) = state
            .place_token(&code, "p2", "b", TokenAction::Add)
            .await
            .unwrap();
        assert_eq!(receipt.total_tokens, 4);
        assert!(receipt.complete);
    }
}
