use crate::protocol::ErrorBody;
use crate::types::Phase;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

pub type AppResult<T> = Result<T, AppError>;

/// Error taxonomy for session operations.
///
/// `Conflict` means an atomic precondition failed after retries; callers
/// should re-read and retry, not treat it as fatal. The budget errors are
/// user-visible and final. `Upstream` covers store and generation-service
/// failures that were not absorbed by fallback content.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum AppError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("concurrent update conflict")]
    Conflict,

    #[error("room not found")]
    RoomNotFound,

    #[error("operation not valid in {} phase", .actual.route())]
    WrongPhase { actual: Phase },

    #[error("game already in progress")]
    GameInProgress,

    #[error("super-like already used this session")]
    SuperLikeAlreadyUsed,

    #[error("token budget of 2 already spent")]
    TokenBudgetExceeded,

    #[error("no token of yours on this card")]
    NoTokenToRemove,

    #[error("upstream service failure: {0}")]
    Upstream(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION",
            AppError::Conflict => "CONFLICT",
            AppError::RoomNotFound => "ROOM_NOT_FOUND",
            AppError::WrongPhase { .. } => "WRONG_PHASE",
            AppError::GameInProgress => "GAME_IN_PROGRESS",
            AppError::SuperLikeAlreadyUsed => "SUPER_LIKE_USED",
            AppError::TokenBudgetExceeded => "TOKEN_BUDGET_EXCEEDED",
            AppError::NoTokenToRemove => "NO_TOKEN_TO_REMOVE",
            AppError::Upstream(_) => "UPSTREAM",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::RoomNotFound => StatusCode::NOT_FOUND,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Conflict
            | AppError::WrongPhase { .. }
            | AppError::GameInProgress
            | AppError::SuperLikeAlreadyUsed
            | AppError::TokenBudgetExceeded
            | AppError::NoTokenToRemove => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // WrongPhase carries the canonical destination so clients can route
        // themselves instead of retrying.
        let route = match &self {
            AppError::WrongPhase { actual } => Some(actual.route().to_string()),
            _ => None,
        };
        let body = ErrorBody {
            code: self.code().to_string(),
            msg: self.to_string(),
            route,
        };
        (self.status(), Json(body)).into_response()
    }
}
