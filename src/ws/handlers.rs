//! WebSocket message dispatch
//!
//! Every handler maps onto one `Session` operation. Progress is not echoed
//! back here: the connection's replica reports it from the store.

use crate::error::{GameError, GameResult};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::server::AppState;
use crate::state::LobbyOptions;
use crate::types::*;
use std::sync::Arc;

use super::{Connection, LOG_TARGET};

/// Handle client messages and return optional response
pub async fn handle_message(
    msg: ClientMessage,
    conn: &mut Connection,
    state: &Arc<AppState>,
) -> Option<ServerMessage> {
    let result = match msg {
        ClientMessage::CreateLobby {
            display_name,
            answer_kind,
            mode,
            automated_models,
        } => {
            let options = LobbyOptions {
                answer_kind,
                mode,
                automated_models: automated_models.unwrap_or_else(|| state.default_models.clone()),
            };
            handle_create_lobby(conn, state, display_name, options).await
        }

        ClientMessage::JoinLobby { code, display_name } => {
            handle_join_lobby(conn, state, code, display_name).await
        }

        ClientMessage::StartGame => handle_start_game(conn, state).await,

        ClientMessage::SubmitAnswer { answer } => handle_submit_answer(conn, state, answer).await,

        ClientMessage::SubmitVote { answer_id } => {
            handle_submit_vote(conn, state, answer_id).await
        }

        ClientMessage::AdvanceRound => handle_advance_round(conn, state).await,

        ClientMessage::LeaveLobby => handle_leave_lobby(conn, state).await,
    };

    match result {
        Ok(reply) => reply,
        Err(e) => {
            tracing::debug!(target: LOG_TARGET, connection_id = %conn.id, code = e.code(), "Request rejected: {}", e);
            Some(e.into())
        }
    }
}

fn require_participant(conn: &Connection) -> GameResult<&Participant> {
    conn.participant.as_ref().ok_or(GameError::NotInLobby)
}

fn require_no_lobby(conn: &Connection) -> GameResult<()> {
    if conn.participant.is_some() {
        return Err(GameError::invalid("already in a lobby, leave it first"));
    }
    Ok(())
}

/// The lobby's round in progress
async fn current_round(state: &AppState, lobby_id: &str) -> GameResult<(Lobby, Round)> {
    let store = &state.session.store;
    let lobby = store
        .get_lobby(lobby_id)
        .await?
        .ok_or(GameError::LobbyNotFound)?;
    if lobby.status != LobbyStatus::Started {
        return Err(GameError::invalid("the game is not running"));
    }
    let round = store
        .find_round(&lobby.id, lobby.current_round)
        .await?
        .ok_or(GameError::NotFound("round"))?;
    Ok((lobby, round))
}

async fn handle_create_lobby(
    conn: &mut Connection,
    state: &Arc<AppState>,
    display_name: String,
    options: LobbyOptions,
) -> GameResult<Option<ServerMessage>> {
    require_no_lobby(conn)?;
    let (lobby, participant) = state
        .session
        .create_lobby(&conn.user_id, &display_name, options)
        .await?;
    conn.follow(&state.session, participant.clone());
    Ok(Some(ServerMessage::Joined { lobby, participant }))
}

async fn handle_join_lobby(
    conn: &mut Connection,
    state: &Arc<AppState>,
    code: String,
    display_name: String,
) -> GameResult<Option<ServerMessage>> {
    require_no_lobby(conn)?;
    let (lobby, participant) = state
        .session
        .join_lobby(&code, &conn.user_id, &display_name)
        .await?;
    conn.follow(&state.session, participant.clone());
    Ok(Some(ServerMessage::Joined { lobby, participant }))
}

async fn handle_start_game(
    conn: &Connection,
    state: &Arc<AppState>,
) -> GameResult<Option<ServerMessage>> {
    let participant = require_participant(conn)?;
    state
        .session
        .start_game(&participant.lobby_id, &participant.id, &state.deck)
        .await?;
    Ok(None)
}

async fn handle_submit_answer(
    conn: &Connection,
    state: &Arc<AppState>,
    answer: AnswerContent,
) -> GameResult<Option<ServerMessage>> {
    let participant = require_participant(conn)?;
    let (_, round) = current_round(state, &participant.lobby_id).await?;
    state
        .session
        .submit_answer(&round.id, &participant.id, answer)
        .await?;
    Ok(None)
}

async fn handle_submit_vote(
    conn: &Connection,
    state: &Arc<AppState>,
    answer_id: AnswerId,
) -> GameResult<Option<ServerMessage>> {
    let participant = require_participant(conn)?;
    let (_, round) = current_round(state, &participant.lobby_id).await?;
    state
        .session
        .submit_vote(&round.id, &participant.id, &answer_id)
        .await?;
    Ok(None)
}

async fn handle_advance_round(
    conn: &Connection,
    state: &Arc<AppState>,
) -> GameResult<Option<ServerMessage>> {
    let participant = require_participant(conn)?;
    let (lobby, round) = current_round(state, &participant.lobby_id).await?;
    if round.status != RoundStatus::Scoring {
        return Err(GameError::WrongPhase {
            expected: RoundStatus::Scoring,
            actual: round.status,
        });
    }
    state
        .session
        .advance_round(&lobby.id, lobby.current_round + 1)
        .await?;
    Ok(None)
}

async fn handle_leave_lobby(
    conn: &mut Connection,
    state: &Arc<AppState>,
) -> GameResult<Option<ServerMessage>> {
    let participant = conn.detach().ok_or(GameError::NotInLobby)?;
    state.session.leave_lobby(&participant.id).await?;
    tracing::info!(target: LOG_TARGET, participant_id = %participant.id, "Participant left");
    Ok(Some(ServerMessage::LobbyClosed))
}
