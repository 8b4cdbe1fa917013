use crate::types::{Idea, IdeaId, SwipeTally, MAX_WINNERS};
use rand::seq::IndexedRandom;
use std::collections::HashSet;

/// Pick the Round-1 finalists: the `MAX_WINNERS` cards with the highest vote
/// weight sums, or the whole deck when it is that small. Cards tied at the
/// cutoff score compete for the remaining slots by uniform random draw;
/// cards strictly above the cutoff always advance.
pub fn select_winners(deck: &[Idea], tally: &SwipeTally) -> HashSet<IdeaId> {
    let limit = MAX_WINNERS.min(deck.len());
    if deck.len() <= limit {
        return deck.iter().map(|idea| idea.id.clone()).collect();
    }

    let mut scored: Vec<(&IdeaId, u32)> = deck
        .iter()
        .map(|idea| (&idea.id, tally.weight_sum(&idea.id)))
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));

    let cutoff_score = scored[limit - 1].1;

    let mut winners: HashSet<IdeaId> = scored
        .iter()
        .take_while(|(_, score)| *score > cutoff_score)
        .map(|(id, _)| (*id).clone())
        .collect();

    let tied: Vec<&IdeaId> = scored
        .iter()
        .filter(|(_, score)| *score == cutoff_score)
        .map(|(id, _)| *id)
        .collect();
    let open_slots = limit - winners.len();

    let mut rng = rand::rng();
    winners.extend(
        tied.choose_multiple(&mut rng, open_slots)
            .map(|id| (*id).clone()),
    );
    winners
}

/// Stamp every card with its Round-1 outcome. Losers keep their data and
/// stay in the deck with `is_winner: false`.
pub fn apply_winner_labels(deck: &mut [Idea], winners: &HashSet<IdeaId>) {
    for idea in deck.iter_mut() {
        idea.is_winner = Some(winners.contains(&idea.id));
    }
}
