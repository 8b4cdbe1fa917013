use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque ID types for type safety
pub type PlayerId = String;
pub type IdeaId = String;
pub type RoomCode = String;

/// Number of ideas advancing past Round 1 (the "Winning 8")
pub const MAX_WINNERS: usize = 8;
/// Tokens each player may invest in Round 2
pub const TOKEN_BUDGET: usize = 2;
/// Vote weight reserved for the once-per-session super-like
pub const SUPER_LIKE_WEIGHT: u8 = 2;
/// Deck size the generation step aims for across all players
pub const TARGET_DECK_SIZE: usize = 40;

/// Session phases in strict forward order. The numeric index is what gets
/// compared when deciding whether an advance is still pending or already done.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Lobby,
    Generating,
    Round1,
    Phase2Generating,
    Round2,
    Results,
}

impl Phase {
    pub fn index(self) -> u8 {
        match self {
            Phase::Lobby => 0,
            Phase::Generating => 1,
            Phase::Round1 => 2,
            Phase::Phase2Generating => 3,
            Phase::Round2 => 4,
            Phase::Results => 5,
        }
    }

    /// Canonical client page for this phase. Clients landing anywhere else
    /// are redirected here.
    pub fn route(self) -> &'static str {
        match self {
            Phase::Lobby => "lobby",
            Phase::Generating => "generating",
            Phase::Round1 => "round1",
            Phase::Phase2Generating => "phase2generation",
            Phase::Round2 => "round2",
            Phase::Results => "results",
        }
    }
}

/// Player profile forwarded to the generation collaborator. Opaque to the
/// session core beyond the scale preference average.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerProfile {
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub interests: Vec<String>,
    #[serde(default)]
    pub hobbies: Vec<String>,
    pub hours_per_week: u32,
    /// 1 = tiny script, 10 = startup MVP
    pub scale_preference: u8,
}

impl Default for PlayerProfile {
    fn default() -> Self {
        Self {
            skills: Vec::new(),
            interests: Vec::new(),
            hobbies: Vec::new(),
            hours_per_week: 10,
            scale_preference: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub name: String,
    pub is_host: bool,
    #[serde(default)]
    pub profile: PlayerProfile,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// One idea card. Generation-time fields are set once; round-produced fields
/// (`is_winner`, `features`, `risk`, `pitch`, `podium_rank`) are added
/// monotonically and never removed. Elimination is `is_winner: false`,
/// never deletion, so history and audit remain possible.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Idea {
    pub id: IdeaId,
    pub title: String,
    pub description: String,
    pub tech_stack: Vec<String>,
    pub time_estimate: String,
    pub difficulty: Difficulty,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_winner: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub podium_rank: Option<u8>,
}

/// Round-1 vote state: card id -> player id -> weight in {0, 1, 2}.
/// `total_swipes` counts distinct (card, player) pairs, not vote operations,
/// so client retries and overwrites never skew the completion denominator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SwipeTally {
    pub total_swipes: u32,
    pub map: HashMap<IdeaId, HashMap<PlayerId, u8>>,
}

impl SwipeTally {
    pub fn has_voted(&self, card_id: &str, player_id: &str) -> bool {
        self.map
            .get(card_id)
            .is_some_and(|votes| votes.contains_key(player_id))
    }

    /// Whether the player holds a weight-2 entry on any card other than
    /// `except`. Re-casting the super-like on the same card is an overwrite,
    /// not a second use.
    pub fn super_like_spent_elsewhere(&self, player_id: &str, except: &str) -> bool {
        self.map.iter().any(|(card_id, votes)| {
            card_id != except && votes.get(player_id) == Some(&SUPER_LIKE_WEIGHT)
        })
    }

    pub fn super_like_spent(&self, player_id: &str) -> bool {
        self.map
            .values()
            .any(|votes| votes.get(player_id) == Some(&SUPER_LIKE_WEIGHT))
    }

    /// Sum of vote weights for a card; missing entries count as 0.
    pub fn weight_sum(&self, card_id: &str) -> u32 {
        self.map
            .get(card_id)
            .map(|votes| votes.values().map(|w| u32::from(*w)).sum())
            .unwrap_or(0)
    }

    pub fn entry_count(&self) -> usize {
        self.map.values().map(|votes| votes.len()).sum()
    }
}

/// Round-2 token state: card id -> invested player ids, duplicates allowed
/// (each occurrence is one token).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct TokenAllocations(pub HashMap<IdeaId, Vec<PlayerId>>);

impl TokenAllocations {
    pub fn player_tokens(&self, player_id: &str) -> usize {
        self.0
            .values()
            .map(|ids| ids.iter().filter(|id| *id == player_id).count())
            .sum()
    }

    pub fn card_tokens(&self, card_id: &str) -> usize {
        self.0.get(card_id).map(Vec::len).unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }
}

/// Phase-specific substate, tagged so the store boundary rejects shapes that
/// do not belong to the phase they claim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum RoundData {
    Idle,
    Swipes(SwipeTally),
    Tokens(TokenAllocations),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameState {
    pub phase: Phase,
    #[serde(default)]
    pub is_generating: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generating_since: Option<DateTime<Utc>>,
    /// Rounded average of player scale preferences, fixed at game start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_scale: Option<u8>,
    pub round: RoundData,
}

impl GameState {
    pub fn lobby() -> Self {
        Self {
            phase: Phase::Lobby,
            is_generating: false,
            generating_since: None,
            avg_scale: None,
            round: RoundData::Idle,
        }
    }

    pub fn swipes(&self) -> Option<&SwipeTally> {
        match &self.round {
            RoundData::Swipes(tally) => Some(tally),
            _ => None,
        }
    }

    pub fn swipes_mut(&mut self) -> Option<&mut SwipeTally> {
        match &mut self.round {
            RoundData::Swipes(tally) => Some(tally),
            _ => None,
        }
    }

    pub fn tokens(&self) -> Option<&TokenAllocations> {
        match &self.round {
            RoundData::Tokens(allocations) => Some(allocations),
            _ => None,
        }
    }

    pub fn tokens_mut(&mut self) -> Option<&mut TokenAllocations> {
        match &mut self.round {
            RoundData::Tokens(allocations) => Some(allocations),
            _ => None,
        }
    }
}

/// One game session. The unit of atomic update: every mutation is applied as
/// a conditional write against the stored version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Room {
    pub code: RoomCode,
    pub host_id: PlayerId,
    pub players: Vec<PlayerSnapshot>,
    pub deck: Vec<Idea>,
    pub state: GameState,
}

impl Room {
    pub fn is_member(&self, player_id: &str) -> bool {
        self.players.iter().any(|p| p.id == player_id)
    }

    pub fn idea(&self, card_id: &str) -> Option<&Idea> {
        self.deck.iter().find(|i| i.id == card_id)
    }

    /// Completion denominator for Round 1, against the current roster.
    pub fn swipe_target(&self) -> u32 {
        (self.players.len() * self.deck.len()) as u32
    }

    /// Completion denominator for Round 2, against the current roster.
    pub fn token_target(&self) -> u32 {
        (self.players.len() * TOKEN_BUDGET) as u32
    }

    /// Index of the first card the player has not voted on, in deck order.
    /// Derived, never stored; equals `deck.len()` when the player is done.
    pub fn resume_index(&self, player_id: &str) -> usize {
        let Some(tally) = self.state.swipes() else {
            return 0;
        };
        self.deck
            .iter()
            .position(|card| !tally.has_voted(&card.id, player_id))
            .unwrap_or(self.deck.len())
    }
}

/// Final record produced by archival, after which the room ceases to exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub code: RoomCode,
    pub played_at: DateTime<Utc>,
    pub deck: Vec<Idea>,
    pub players: Vec<PlayerSnapshot>,
    pub allocations: TokenAllocations,
}
