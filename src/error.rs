use crate::store::StoreError;
use crate::types::{AnswerKind, RoundStatus};

/// Result type for game operations
pub type GameResult<T> = Result<T, GameError>;

/// Rejected operations. Nothing is written when one of these is returned.
///
/// Losing a race on a conditional write is not represented here: the
/// operation reports `WriteOutcome::Skipped` and the caller stops acting.
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("lobby not found")]
    LobbyNotFound,

    #[error("name '{0}' is already taken in this lobby")]
    NameTaken(String),

    #[error("participant is not part of this lobby")]
    NotInLobby,

    #[error("only the host can {0}")]
    NotHost(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("round is {actual:?}, expected {expected:?}")]
    WrongPhase {
        expected: RoundStatus,
        actual: RoundStatus,
    },

    #[error("lobby expects {expected:?} answers")]
    WrongAnswerKind { expected: AnswerKind },

    #[error("answer is empty")]
    EmptyAnswer,

    #[error("participants cannot vote for their own answer")]
    SelfVote,

    #[error("{needed} prompts needed, only {available} available")]
    NotEnoughPrompts { needed: usize, available: usize },

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl GameError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    /// Stable code sent to clients over the wire
    pub fn code(&self) -> &'static str {
        match self {
            GameError::LobbyNotFound => "LOBBY_NOT_FOUND",
            GameError::NameTaken(_) => "NAME_TAKEN",
            GameError::NotInLobby => "NOT_IN_LOBBY",
            GameError::NotHost(_) => "UNAUTHORIZED",
            GameError::NotFound(_) => "NOT_FOUND",
            GameError::WrongPhase { .. } => "WRONG_PHASE",
            GameError::Store(_) => "STORE_ERROR",
            _ => "INVALID_REQUEST",
        }
    }
}
