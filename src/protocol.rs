use crate::types::*;
use serde::{Deserialize, Serialize};

/// Error payload shared by every HTTP error response and the ws error frame.
/// `route` is set for phase mismatches and names the page the client should
/// navigate to instead of retrying.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
}

/// Identity as asserted by the caller. Authentication is an upstream
/// collaborator; the session core trusts the id and only validates shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPlayer {
    pub player_id: PlayerId,
    pub name: String,
    #[serde(default)]
    pub profile: PlayerProfile,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRoomRequest {
    #[serde(flatten)]
    pub host: NewPlayer,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinRoomRequest {
    #[serde(flatten)]
    pub player: NewPlayer,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaveRequest {
    pub player_id: PlayerId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileRequest {
    pub player_id: PlayerId,
    pub profile: PlayerProfile,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartRequest {
    pub player_id: PlayerId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoteRequest {
    pub player_id: PlayerId,
    pub card_id: IdeaId,
    /// 0 = pass, 1 = like, 2 = super-like.
    pub weight: u8,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenRequest {
    pub player_id: PlayerId,
    pub card_id: IdeaId,
    pub action: TokenAction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdvanceRequest {
    pub player_id: PlayerId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveRequest {
    pub player_id: PlayerId,
}

/// Full room snapshot plus the per-caller bits that are derived, not stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomView {
    pub room: Room,
    pub route: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub super_like_spent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_spent: Option<usize>,
}

impl RoomView {
    pub fn new(room: Room) -> Self {
        let route = room.state.phase.route().to_string();
        Self {
            room,
            route,
            resume_index: None,
            super_like_spent: None,
            tokens_spent: None,
        }
    }

    /// Attach the bits only meaningful to one caller.
    pub fn for_player(room: Room, player_id: &str) -> Self {
        let mut view = Self::new(room);
        match view.room.state.phase {
            Phase::Round1 => {
                view.resume_index = Some(view.room.resume_index(player_id));
                view.super_like_spent = view
                    .room
                    .state
                    .swipes()
                    .map(|tally| tally.super_like_spent(player_id));
            }
            Phase::Round2 => {
                view.tokens_spent = view
                    .room
                    .state
                    .tokens()
                    .map(|allocations| allocations.player_tokens(player_id));
            }
            _ => {}
        }
        view
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub total_swipes: u32,
    pub target: u32,
    pub complete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenReceipt {
    pub total_tokens: u32,
    pub target: u32,
    pub complete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Pushed on connect and after every committed room write.
    RoomState { room: Room, route: String },
    /// The room was archived or emptied out; the code no longer resolves.
    RoomDeleted,
    Error { code: String, msg: String },
}
