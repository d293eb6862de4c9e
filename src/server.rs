use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::game::PromptDeck;
use crate::llm::LlmConfig;
use crate::state::Session;
use crate::types::ModelId;
use crate::{api, ws};

const DEFAULT_BIND: &str = "0.0.0.0:3000";

/// Shared by every connection
pub struct AppState {
    pub session: Session,
    pub deck: PromptDeck,
    pub llm_config: LlmConfig,
    /// Automated participants for lobbies that do not pick their own models
    pub default_models: Vec<ModelId>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let fallback = SocketAddr::from(([0, 0, 0, 0], 3000));
        let bind = match std::env::var("GENUINE_BIND") {
            Ok(value) => match value.trim().parse() {
                Ok(addr) => addr,
                Err(e) => {
                    tracing::warn!("Invalid GENUINE_BIND {:?} ({}), using {}", value, e, DEFAULT_BIND);
                    fallback
                }
            },
            Err(_) => fallback,
        };
        Self { bind }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/models", get(api::list_models))
        .route("/api/lobbies/{code}", get(api::get_lobby))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
