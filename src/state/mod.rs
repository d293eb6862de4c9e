//! Operations any client may invoke against the shared store.
//!
//! A `Session` holds no game state of its own: every call reads what it needs
//! from the store and writes through conditional operations, so the same call
//! made by several clients at once has its side effects applied once.

mod answer;
mod lobby;
mod round;
mod score;
mod vote;

pub use lobby::LobbyOptions;

use crate::llm::{AnswerGenerator, VoterOracle};
use crate::store::ReactiveStore;
use crate::types::*;
use std::sync::Arc;

const LOG_TARGET: &str = "genuine::session";

#[derive(Clone)]
pub struct Session {
    pub store: Arc<dyn ReactiveStore>,
    pub config: GameConfig,
    generator: Arc<dyn AnswerGenerator>,
    oracle: Arc<dyn VoterOracle>,
}

impl Session {
    pub fn new(
        store: Arc<dyn ReactiveStore>,
        config: GameConfig,
        generator: Arc<dyn AnswerGenerator>,
        oracle: Arc<dyn VoterOracle>,
    ) -> Self {
        Self {
            store,
            config,
            generator,
            oracle,
        }
    }
}
