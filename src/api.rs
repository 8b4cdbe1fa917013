//! HTTP API endpoints for the session lifecycle.
//!
//! Handlers stay thin: validate the request shape, call into `AppState`, and
//! map the result through `AppError`'s response conversion. Anything that can
//! take a while (generation, round completion) is spawned so mutation
//! responses return immediately.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::error::AppResult;
use crate::protocol::*;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/rooms", post(create_room))
        .route("/api/rooms/{code}", get(get_room))
        .route("/api/rooms/{code}/join", post(join_room))
        .route("/api/rooms/{code}/leave", post(leave_room))
        .route("/api/rooms/{code}/profile", post(update_profile))
        .route("/api/rooms/{code}/start", post(start_game))
        .route("/api/rooms/{code}/vote", post(record_vote))
        .route("/api/rooms/{code}/token", post(place_token))
        .route("/api/rooms/{code}/advance", post(force_advance))
        .route("/api/rooms/{code}/archive", post(archive_room))
}

/// Run `check_progress` off the request path; it owns its own error logging.
fn spawn_progress(state: &Arc<AppState>, code: &str) {
    let state = Arc::clone(state);
    let code = code.to_string();
    tokio::spawn(async move {
        if let Err(err) = state.check_progress(&code).await {
            tracing::error!(code, %err, "progress check failed");
        }
    });
}

async fn create_room(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateRoomRequest>,
) -> AppResult<Json<RoomView>> {
    let room = state.create_room(request.host).await?;
    Ok(Json(RoomView::new(room)))
}

#[derive(Debug, Deserialize)]
struct ViewQuery {
    player_id: Option<String>,
}

async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Query(query): Query<ViewQuery>,
) -> AppResult<Json<RoomView>> {
    let room = state.get_room(&code).await?;
    let view = match query.player_id {
        Some(player_id) => RoomView::for_player(room, &player_id),
        None => RoomView::new(room),
    };
    Ok(Json(view))
}

async fn join_room(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(request): Json<JoinRoomRequest>,
) -> AppResult<Json<RoomView>> {
    let player_id = request.player.player_id.clone();
    let room = state.join_room(&code, request.player).await?;
    Ok(Json(RoomView::for_player(room, &player_id)))
}

async fn leave_room(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(request): Json<LeaveRequest>,
) -> AppResult<Response> {
    match state.leave_room(&code, &request.player_id).await? {
        Some(room) => {
            // A departure can retroactively complete the active round.
            spawn_progress(&state, &code);
            Ok(Json(RoomView::new(room)).into_response())
        }
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

async fn update_profile(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(request): Json<ProfileRequest>,
) -> AppResult<Json<RoomView>> {
    let room = state
        .update_profile(&code, &request.player_id, request.profile)
        .await?;
    Ok(Json(RoomView::new(room)))
}

async fn start_game(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(request): Json<StartRequest>,
) -> AppResult<Json<RoomView>> {
    let room = state.start_game(&code, &request.player_id).await?;
    spawn_progress(&state, &code);
    Ok(Json(RoomView::new(room)))
}

async fn record_vote(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(request): Json<VoteRequest>,
) -> AppResult<Json<VoteReceipt>> {
    let (_, receipt) = state
        .record_vote(&code, &request.player_id, &request.card_id, request.weight)
        .await?;
    if receipt.complete {
        spawn_progress(&state, &code);
    }
    Ok(Json(receipt))
}

async fn place_token(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(request): Json<TokenRequest>,
) -> AppResult<Json<TokenReceipt>> {
    let (_, receipt) = state
        .place_token(&code, &request.player_id, &request.card_id, request.action)
        .await?;
    if receipt.complete {
        spawn_progress(&state, &code);
    }
    Ok(Json(receipt))
}

async fn force_advance(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(request): Json<AdvanceRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let outcome = state.force_advance(&code, &request.player_id).await?;
    // The next phase may need generation work.
    spawn_progress(&state, &code);
    Ok(Json(json!({ "phase": outcome.phase().route() })))
}

async fn archive_room(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    Json(request): Json<ArchiveRequest>,
) -> AppResult<Json<crate::types::ArchiveRecord>> {
    let record = state.archive_room(&code, &request.player_id).await?;
    Ok(Json(record))
}
