use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use genuine::game::PromptDeck;
use genuine::llm::{self, LlmManager};
use genuine::server::{self, AppState, ServerConfig};
use genuine::state::Session;
use genuine::store::InMemoryStore;
use genuine::types::GameConfig;

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "genuine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting genuine...");

    let llm_config = llm::LlmConfig::from_env();
    let manager = match llm_config.build_manager() {
        Ok(manager) => {
            tracing::info!(models = ?manager.available_models(), "LLM providers initialized");
            manager
        }
        Err(e) => {
            tracing::warn!(
                "Failed to initialize LLM providers: {}. Automated participants will give placeholder answers.",
                e
            );
            LlmManager::new(Vec::new())
        }
    };
    let default_models: Vec<String> = manager.available_models().into_iter().take(1).collect();
    let manager = Arc::new(manager);

    let game_config = GameConfig::from_env();
    tracing::info!(
        rounds = game_config.rounds,
        reveal_seconds = game_config.reveal_seconds,
        auto_advance = game_config.auto_advance,
        "Game configured"
    );

    let session = Session::new(
        Arc::new(InMemoryStore::new()),
        game_config,
        manager.clone(),
        manager,
    );

    let state = Arc::new(AppState {
        session,
        deck: PromptDeck::from_env(),
        llm_config,
        default_models,
    });

    let config = ServerConfig::from_env();
    let app = server::router(state);

    let listener = match tokio::net::TcpListener::bind(config.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", config.bind, e);
            std::process::exit(1);
        }
    };
    tracing::info!("Listening on http://{}", config.bind);

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
