//! HTTP API endpoints.
//!
//! Lobby UIs use these before opening a WebSocket: to offer models for the
//! automated participants, and to preview a lobby from its join code.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::error::GameError;
use crate::llm::{list_local_models, LlmConfig};
use crate::protocol::ServerMessage;
use crate::server::AppState;
use crate::types::*;

#[derive(Debug, Clone, Serialize)]
pub struct AvailableModelsResponse {
    pub openai_models: Vec<ModelInfo>,
    pub ollama_models: Vec<ModelInfo>,
    pub default_model: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    /// "provider:model", as accepted in `create_lobby`
    pub id: String,
    pub name: String,
}

/// OpenAI models offered on top of the configured one
const OPENAI_MODELS: &[&str] = &["gpt-4o-mini", "gpt-4o", "gpt-4.1", "gpt-4.1-mini"];

/// GET /api/models
///
/// OpenAI models are a static list (when a key is configured); Ollama
/// models are whatever the local server has pulled.
pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<AvailableModelsResponse> {
    let config = &state.llm_config;

    let openai_models: Vec<ModelInfo> = if config.openai_api_key.is_some() {
        let mut names: Vec<&str> = OPENAI_MODELS.to_vec();
        if !names.contains(&config.openai_model.as_str()) {
            names.insert(0, &config.openai_model);
        }
        names
            .into_iter()
            .map(|name| ModelInfo {
                id: format!("openai:{}", name),
                name: name.to_string(),
            })
            .collect()
    } else {
        vec![]
    };

    let ollama_models: Vec<ModelInfo> = match &config.ollama_base_url {
        Some(base_url) => match list_local_models(base_url).await {
            Ok(ids) => ids
                .into_iter()
                .map(|id| ModelInfo {
                    name: id.trim_start_matches("ollama:").to_string(),
                    id,
                })
                .collect(),
            Err(e) => {
                tracing::warn!("Failed to list Ollama models: {}", e);
                vec![]
            }
        },
        None => vec![],
    };

    Json(AvailableModelsResponse {
        openai_models,
        ollama_models,
        default_model: default_model(config),
    })
}

/// The configured model of the first configured provider, pulled or not
fn default_model(config: &LlmConfig) -> Option<String> {
    if config.openai_api_key.is_some() {
        return Some(format!("openai:{}", config.openai_model));
    }
    if config.ollama_base_url.is_some() {
        return Some(format!("ollama:{}", config.ollama_model));
    }
    None
}

#[derive(Debug, Clone, Serialize)]
pub struct LobbySnapshot {
    pub lobby: Lobby,
    pub participants: Vec<Participant>,
}

/// GET /api/lobbies/{code}
pub async fn get_lobby(State(state): State<Arc<AppState>>, Path(code): Path<String>) -> Response {
    match state.session.lobby_snapshot(&code).await {
        Ok((lobby, participants)) => Json(LobbySnapshot {
            lobby,
            participants,
        })
        .into_response(),
        Err(e) => {
            let status = match e {
                GameError::LobbyNotFound => StatusCode::NOT_FOUND,
                GameError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_REQUEST,
            };
            (status, Json(ServerMessage::from(e))).into_response()
        }
    }
}
