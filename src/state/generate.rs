use super::select::{apply_winner_labels, select_winners};
use super::{AdvanceOutcome, AppState};
use crate::error::{AppError, AppResult};
use crate::llm::{DeckRequest, WinnerDetails};
use crate::store::StoreError;
use crate::types::*;
use std::collections::HashMap;

/// A generation run older than this is considered stalled and may be taken
/// over by the next trigger.
const GENERATION_STALL_SECS: i64 = 120;

impl AppState {
    /// Atomically claim the generation flag for `expected` phase. Returns
    /// false when there is nothing to do: wrong phase, or a fresh run is
    /// already in flight. A run whose timestamp is older than the stall
    /// window is presumed dead and gets taken over.
    async fn begin_generation(&self, code: &str, expected: Phase) -> AppResult<bool> {
        loop {
            let versioned = self.get_versioned(code).await?;
            let mut room = versioned.room;
            if room.state.phase != expected {
                return Ok(false);
            }
            if room.state.is_generating {
                let stalled = room
                    .state
                    .generating_since
                    .map(|since| chrono::Utc::now() - since
                        > chrono::Duration::seconds(GENERATION_STALL_SECS))
                    .unwrap_or(true);
                if !stalled {
                    return Ok(false);
                }
                tracing::warn!(code, phase = expected.route(), "taking over stalled generation");
            }
            room.state.is_generating = true;
            room.state.generating_since = Some(chrono::Utc::now());
            match self.store.compare_and_put(versioned.version, room).await {
                Ok(_) => return Ok(true),
                Err(StoreError::Conflict) => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Best-effort flag release for failure paths. The room may already be
    /// gone or advanced; both are fine.
    async fn clear_generation_flag(&self, code: &str) {
        let result = self
            .with_room(code, |room| {
                room.state.is_generating = false;
                room.state.generating_since = None;
                Ok(())
            })
            .await;
        if let Err(err) = result {
            tracing::debug!(code, %err, "could not clear generation flag");
        }
    }

    /// Produce the deck and move the room into Round 1. Safe to call from
    /// multiple triggers: only the claimant of the generation flag does the
    /// work, everyone else returns immediately.
    pub async fn run_deck_generation(&self, code: &str) -> AppResult<()> {
        if !self.begin_generation(code, Phase::Generating).await? {
            return Ok(());
        }

        let room = self.get_room(code).await?;
        let Some(generator) = self.generator.clone() else {
            self.clear_generation_flag(code).await;
            return Err(AppError::Upstream(
                "no idea generator configured".to_string(),
            ));
        };

        let avg_scale = room.state.avg_scale.unwrap_or(5);
        let per_player = TARGET_DECK_SIZE.div_ceil(room.players.len().max(1));

        let requests = room.players.iter().map(|player| {
            let generator = generator.clone();
            let request = DeckRequest {
                player_name: player.name.clone(),
                profile: player.profile.clone(),
                count: per_player,
                avg_scale,
            };
            let player_id = player.id.clone();
            async move {
                match generator.generate_ideas(request).await {
                    Ok(ideas) => ideas,
                    Err(err) => {
                        tracing::error!(player = %player_id, %err, "idea generation failed");
                        Vec::new()
                    }
                }
            }
        });

        let mut deck: Vec<Idea> = futures::future::join_all(requests)
            .await
            .into_iter()
            .flatten()
            .map(|generated| Idea {
                id: ulid::Ulid::new().to_string(),
                title: generated.title,
                description: generated.description,
                tech_stack: generated.tech_stack,
                time_estimate: generated.time_estimate,
                difficulty: generated.difficulty,
                is_winner: None,
                features: Vec::new(),
                risk: None,
                pitch: None,
                podium_rank: None,
            })
            .collect();

        if deck.is_empty() {
            self.clear_generation_flag(code).await;
            return Err(AppError::Upstream(
                "generation produced an empty deck".to_string(),
            ));
        }

        // Interleave per-player contributions.
        {
            use rand::seq::SliceRandom;
            let mut rng = rand::rng();
            deck.shuffle(&mut rng);
        }

        tracing::info!(code, cards = deck.len(), "deck generated");

        loop {
            let versioned = self.get_versioned(code).await?;
            let mut room = versioned.room;
            if room.state.phase != Phase::Generating {
                // Someone else finished; drop our deck.
                return Ok(());
            }
            room.deck = deck.clone();
            room.state.phase = Phase::Round1;
            room.state.round = RoundData::Swipes(SwipeTally::default());
            room.state.is_generating = false;
            room.state.generating_since = None;
            match self.store.compare_and_put(versioned.version, room).await {
                Ok(_) => return Ok(()),
                Err(StoreError::Conflict) => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Close Round 1: pick the finalists from the current tally, label the
    /// deck, and enter Phase2Generating. Conditional like `advance_phase`,
    /// so racing triggers converge on one outcome.
    pub async fn complete_round1(&self, code: &str) -> AppResult<AdvanceOutcome> {
        loop {
            let versioned = self.get_versioned(code).await?;
            let mut room = versioned.room;
            let actual = room.state.phase;
            if actual.index() > Phase::Round1.index() {
                return Ok(AdvanceOutcome::AlreadyAdvanced(actual));
            }
            if actual != Phase::Round1 {
                return Err(AppError::WrongPhase { actual });
            }

            let tally = room.state.swipes().cloned().unwrap_or_default();
            let winners = select_winners(&room.deck, &tally);
            apply_winner_labels(&mut room.deck, &winners);
            room.state.phase = Phase::Phase2Generating;
            room.state.round = RoundData::Idle;
            room.state.is_generating = false;
            room.state.generating_since = None;

            match self.store.compare_and_put(versioned.version, room).await {
                Ok(_) => {
                    tracing::info!(code, finalists = winners.len(), "round 1 closed");
                    return Ok(AdvanceOutcome::Advanced(Phase::Phase2Generating));
                }
                Err(StoreError::Conflict) => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Enrich the finalists with features, risk and pitch, then open
    /// Round 2. Enrichment failures degrade to placeholder details per card
    /// instead of blocking the game.
    pub async fn run_phase2_generation(&self, code: &str) -> AppResult<()> {
        if !self.begin_generation(code, Phase::Phase2Generating).await? {
            return Ok(());
        }

        let room = self.get_room(code).await?;
        let finalists: Vec<Idea> = room
            .deck
            .iter()
            .filter(|idea| idea.is_winner == Some(true))
            .cloned()
            .collect();

        let mut details: HashMap<IdeaId, WinnerDetails> = HashMap::new();
        match self.generator.clone() {
            Some(generator) => {
                let tasks = finalists.iter().map(|idea| {
                    let generator = generator.clone();
                    let idea = idea.clone();
                    async move {
                        let result = generator.enrich_winner(&idea).await;
                        (idea.id, result)
                    }
                });
                for (id, result) in futures::future::join_all(tasks).await {
                    match result {
                        Ok(d) => {
                            details.insert(id, d);
                        }
                        Err(err) => {
                            tracing::error!(card = %id, %err, "enrichment failed, using fallback");
                            details.insert(id, WinnerDetails::fallback());
                        }
                    }
                }
            }
            None => {
                for idea in &finalists {
                    details.insert(idea.id.clone(), WinnerDetails::fallback());
                }
            }
        }

        loop {
            let versioned = self.get_versioned(code).await?;
            let mut room = versioned.room;
            if room.state.phase != Phase::Phase2Generating {
                return Ok(());
            }
            for idea in room.deck.iter_mut() {
                if let Some(d) = details.get(&idea.id) {
                    idea.features = d.features.clone();
                    idea.risk = Some(d.risk.clone());
                    idea.pitch = Some(d.pitch.clone());
                }
            }
            room.state.phase = Phase::Round2;
            room.state.round = RoundData::Tokens(TokenAllocations::default());
            room.state.is_generating = false;
            room.state.generating_since = None;
            match self.store.compare_and_put(versioned.version, room).await {
                Ok(_) => {
                    tracing::info!(code, finalists = finalists.len(), "round 2 opened");
                    return Ok(());
                }
                Err(StoreError::Conflict) => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Drive the room forward from whatever state it is in: kick pending
    /// generation work, close rounds whose completion condition holds. Called
    /// after completing mutations and periodically by the round watcher, so
    /// no single missed trigger can strand a room.
    pub async fn check_progress(&self, code: &str) -> AppResult<()> {
        let room = self.get_room(code).await?;
        match room.state.phase {
            Phase::Generating => self.run_deck_generation(code).await,
            Phase::Round1 => {
                let target = room.swipe_target();
                let total = room
                    .state
                    .swipes()
                    .map(|t| t.total_swipes)
                    .unwrap_or_default();
                if target > 0 && total >= target {
                    self.complete_round1(code).await?;
                    self.run_phase2_generation(code).await?;
                }
                Ok(())
            }
            Phase::Phase2Generating => self.run_phase2_generation(code).await,
            Phase::Round2 => {
                let target = room.token_target();
                let total = room
                    .state
                    .tokens()
                    .map(|a| a.total() as u32)
                    .unwrap_or_default();
                if target > 0 && total >= target {
                    self.advance_phase(code, Phase::Round2).await?;
                }
                Ok(())
            }
            Phase::Lobby | Phase::Results => Ok(()),
        }
    }

    /// Close the current round with whatever votes exist. Any member may
    /// trigger this; only the two voting rounds can be forced.
    pub async fn force_advance(&self, code: &str, player_id: &str) -> AppResult<AdvanceOutcome> {
        let room = self.get_room(code).await?;
        if !room.is_member(player_id) {
            return Err(AppError::Validation("not a member of this room".into()));
        }
        match room.state.phase {
            Phase::Round1 => self.complete_round1(code).await,
            Phase::Round2 => self.advance_phase(code, Phase::Round2).await,
            actual => Err(AppError::WrongPhase { actual }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::new_player;
    use super::*;
    use crate::llm::{DeckRequest, GenError, GenResult, GeneratedIdea, IdeaGenerator};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct FixtureGenerator;

    #[async_trait]
    impl IdeaGenerator for FixtureGenerator {
        async fn generate_ideas(&self, request: DeckRequest) -> GenResult<Vec<GeneratedIdea>> {
            Ok((0..request.count)
                .map(|i| GeneratedIdea {
                    title: format!("{} idea {i}", request.player_name),
                    description: "Build a thing.".to_string(),
                    tech_stack: vec!["Rust".to_string()],
                    time_estimate: "10 hours".to_string(),
                    difficulty: Difficulty::Easy,
                })
                .collect())
        }

        async fn enrich_winner(&self, idea: &Idea) -> GenResult<WinnerDetails> {
            Ok(WinnerDetails {
                features: vec![format!("{} core flow", idea.title)],
                risk: "None worth naming.".to_string(),
                pitch: format!("{}, but fun.", idea.title),
            })
        }

        fn name(&self) -> &str {
            "fixture"
        }
    }

    struct BrokenGenerator;

    #[async_trait]
    impl IdeaGenerator for BrokenGenerator {
        async fn generate_ideas(&self, _request: DeckRequest) -> GenResult<Vec<GeneratedIdea>> {
            Err(GenError::ApiError("boom".to_string()))
        }

        async fn enrich_winner(&self, _idea: &Idea) -> GenResult<WinnerDetails> {
            Err(GenError::ApiError("boom".to_string()))
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    fn fixture_state() -> AppState {
        AppState::new_with_generator(Arc::new(MemoryStore::new()), Arc::new(FixtureGenerator))
    }

    #[tokio::test]
    async fn deck_generation_fills_deck_and_opens_round1() {
        let state = fixture_state();
        let room = state.create_room(new_player("p1", "Alice")).await.unwrap();
        let code = room.code.clone();
        state
            .join_room(&code, new_player("p2", "Bob"))
            .await
            .unwrap();
        state.start_game(&code, "p1").await.unwrap();

        state.run_deck_generation(&code).await.unwrap();

        let room = state.get_room(&code).await.unwrap();
        assert_eq!(room.state.phase, Phase::Round1);
        // ceil(40 / 2) per player
        assert_eq!(room.deck.len(), 40);
        assert!(!room.state.is_generating);
        assert!(room.state.swipes().is_some());

        // Re-running against the advanced room is a no-op.
        state.run_deck_generation(&code).await.unwrap();
        let again = state.get_room(&code).await.unwrap();
        assert_eq!(again.deck.len(), 40);
    }

    #[tokio::test]
    async fn failed_generation_leaves_room_retriable() {
        let state =
            AppState::new_with_generator(Arc::new(MemoryStore::new()), Arc::new(BrokenGenerator));
        let room = state.create_room(new_player("p1", "Alice")).await.unwrap();
        let code = room.code.clone();
        state.start_game(&code, "p1").await.unwrap();

        let err = state.run_deck_generation(&code).await.unwrap_err();
        assert!(matches!(err, AppError::Upstream(_)));

        let room = state.get_room(&code).await.unwrap();
        assert_eq!(room.state.phase, Phase::Generating);
        assert!(!room.state.is_generating);
    }

    #[tokio::test]
    async fn stalled_generation_is_taken_over() {
        let state = fixture_state();
        let room = state.create_room(new_player("p1", "Alice")).await.unwrap();
        let code = room.code.clone();
        state.start_game(&code, "p1").await.unwrap();

        // Simulate a crashed run from long ago.
        state
            .with_room(&code, |room| {
                room.state.is_generating = true;
                room.state.generating_since =
                    Some(chrono::Utc::now() - chrono::Duration::seconds(600));
                Ok(())
            })
            .await
            .unwrap();

        state.run_deck_generation(&code).await.unwrap();
        let room = state.get_room(&code).await.unwrap();
        assert_eq!(room.state.phase, Phase::Round1);
    }

    #[tokio::test]
    async fn fresh_generation_is_not_duplicated() {
        let state = fixture_state();
        let room = state.create_room(new_player("p1", "Alice")).await.unwrap();
        let code = room.code.clone();
        state.start_game(&code, "p1").await.unwrap();

        state
            .with_room(&code, |room| {
                room.state.is_generating = true;
                room.state.generating_since = Some(chrono::Utc::now());
                Ok(())
            })
            .await
            .unwrap();

        // Flag is fresh, so this returns without generating.
        state.run_deck_generation(&code).await.unwrap();
        let room = state.get_room(&code).await.unwrap();
        assert_eq!(room.state.phase, Phase::Generating);
        assert!(room.deck.is_empty());
    }

    #[tokio::test]
    async fn full_progress_from_votes_to_results() {
        let state = fixture_state();
        let room = state.create_room(new_player("p1", "Alice")).await.unwrap();
        let code = room.code.clone();
        state.start_game(&code, "p1").await.unwrap();
        state.run_deck_generation(&code).await.unwrap();

        let room = state.get_room(&code).await.unwrap();
        let card_ids: Vec<String> = room.deck.iter().map(|i| i.id.clone()).collect();
        for (i, card_id) in card_ids.iter().enumerate() {
            let weight = if i < 10 { 1 } else { 0 };
            state.record_vote(&code, "p1", card_id, weight).await.unwrap();
        }

        state.check_progress(&code).await.unwrap();
        let room = state.get_room(&code).await.unwrap();
        assert_eq!(room.state.phase, Phase::Round2);

        let finalists: Vec<&Idea> = room
            .deck
            .iter()
            .filter(|i| i.is_winner == Some(true))
            .collect();
        assert_eq!(finalists.len(), MAX_WINNERS);
        assert!(finalists.iter().all(|i| i.risk.is_some() && i.pitch.is_some()));
        // Losers stay in the deck, labelled.
        assert_eq!(room.deck.len(), 40);

        use crate::protocol::TokenAction;
        state
            .place_token(&code, "p1", &finalists[0].id, TokenAction::Add)
            .await
            .unwrap();
        state
            .place_token(&code, "p1", &finalists[1].id, TokenAction::Add)
            .await
            .unwrap();
        state.check_progress(&code).await.unwrap();

        let room = state.get_room(&code).await.unwrap();
        assert_eq!(room.state.phase, Phase::Results);
    }

    #[tokio::test]
    async fn broken_enrichment_falls_back_and_still_opens_round2() {
        let state =
            AppState::new_with_generator(Arc::new(MemoryStore::new()), Arc::new(BrokenGenerator));
        let room = state.create_room(new_player("p1", "Alice")).await.unwrap();
        let code = room.code.clone();

        state
            .with_room(&code, |room| {
                let mut idea = super::super::tests::test_idea("a");
                idea.is_winner = Some(true);
                room.deck = vec![idea];
                room.state.phase = Phase::Phase2Generating;
                Ok(())
            })
            .await
            .unwrap();

        state.run_phase2_generation(&code).await.unwrap();
        let room = state.get_room(&code).await.unwrap();
        assert_eq!(room.state.phase, Phase::Round2);
        assert_eq!(room.deck[0].risk.as_deref(), Some("N/A"));
        assert_eq!(room.deck[0].pitch.as_deref(), Some("N/A"));
    }

    #[tokio::test]
    async fn force_advance_is_member_only_and_round_scoped() {
        let state = fixture_state();
        let room = state.create_room(new_player("p1", "Alice")).await.unwrap();
        let code = room.code.clone();
        state
            .join_room(&code, new_player("p2", "Bob"))
            .await
            .unwrap();

        assert!(matches!(
            state.force_advance(&code, "p1").await.unwrap_err(),
            AppError::WrongPhase { .. }
        ));

        state.start_game(&code, "p1").await.unwrap();
        state.run_deck_generation(&code).await.unwrap();

        assert!(matches!(
            state.force_advance(&code, "stranger").await.unwrap_err(),
            AppError::Validation(_)
        ));

        // Partial votes are fine when forced, and any member can do it.
        let outcome = state.force_advance(&code, "p2").await.unwrap();
        assert_eq!(outcome, AdvanceOutcome::Advanced(Phase::Phase2Generating));
        let room = state.get_room(&code).await.unwrap();
        assert!(room.deck.iter().all(|i| i.is_winner.is_some()));
    }
}
