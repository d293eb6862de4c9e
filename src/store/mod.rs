//! Reactive record store.
//!
//! Keyed storage for lobbies, participants, prompts, rounds, answers and
//! votes, plus live queries that re-deliver the full matching result set on
//! every change. The only writes that carry a condition are the ones the
//! game relies on for deduplication: lobby progress, round status, the
//! per-(round, participant) uniqueness of answers and votes, and the
//! per-(lobby, number) uniqueness of rounds.

mod memory;

pub use memory::InMemoryStore;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::types::*;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result of a conditional write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// This caller's write took effect
    Applied,
    /// The condition did not hold, usually because another client got there first
    Skipped,
}

impl WriteOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, WriteOutcome::Applied)
    }
}

/// Live query: yields the current result set right away, then again after
/// every change to the observed records. Dropping it unsubscribes.
pub type Subscription<T> = BoxStream<'static, Vec<T>>;

#[async_trait]
pub trait ReactiveStore: Send + Sync {
    // Lobbies

    async fn insert_lobby(&self, lobby: Lobby) -> StoreResult<()>;

    async fn get_lobby(&self, id: &str) -> StoreResult<Option<Lobby>>;

    /// Exact match against lobbies that are WAITING or STARTED
    async fn find_lobby_by_code(&self, code: &str) -> StoreResult<Option<Lobby>>;

    /// Move the lobby from `expected` to `next` progress, optionally recording
    /// the prompt plan in the same write
    async fn compare_and_set_lobby(
        &self,
        id: &str,
        expected: LobbyProgress,
        next: LobbyProgress,
        prompt_ids: Option<Vec<PromptId>>,
    ) -> StoreResult<WriteOutcome>;

    /// Removes the lobby with its participants, rounds, answers and votes
    async fn delete_lobby(&self, id: &str) -> StoreResult<()>;

    // Participants

    async fn insert_participant(&self, participant: Participant) -> StoreResult<()>;

    async fn get_participant(&self, id: &str) -> StoreResult<Option<Participant>>;

    async fn list_participants(&self, lobby_id: &str) -> StoreResult<Vec<Participant>>;

    /// Set the score to `max(current, score)`
    async fn raise_score(&self, participant_id: &str, score: u32) -> StoreResult<WriteOutcome>;

    /// Removes the participant with every answer and vote they authored
    async fn delete_participant(&self, id: &str) -> StoreResult<()>;

    // Prompts

    async fn insert_prompt(&self, prompt: Prompt) -> StoreResult<()>;

    async fn get_prompt(&self, id: &str) -> StoreResult<Option<Prompt>>;

    // Rounds

    /// Skipped when the lobby already has a round with this number
    async fn insert_round(&self, round: Round) -> StoreResult<WriteOutcome>;

    async fn get_round(&self, id: &str) -> StoreResult<Option<Round>>;

    async fn find_round(&self, lobby_id: &str, number: u32) -> StoreResult<Option<Round>>;

    async fn list_rounds(&self, lobby_id: &str) -> StoreResult<Vec<Round>>;

    async fn compare_and_set_round_status(
        &self,
        id: &str,
        from: RoundStatus,
        to: RoundStatus,
    ) -> StoreResult<WriteOutcome>;

    // Answers

    /// Skipped when the participant already answered in this round
    async fn insert_answer(&self, answer: Answer) -> StoreResult<WriteOutcome>;

    async fn list_answers(&self, round_id: &str) -> StoreResult<Vec<Answer>>;

    // Votes

    /// Skipped when the participant already voted in this round
    async fn insert_vote(&self, vote: Vote) -> StoreResult<WriteOutcome>;

    async fn list_votes(&self, round_id: &str) -> StoreResult<Vec<Vote>>;

    // Live queries

    fn observe_lobby(&self, id: &str) -> Subscription<Lobby>;

    fn observe_participants(&self, lobby_id: &str) -> Subscription<Participant>;

    fn observe_round(&self, lobby_id: &str, number: u32) -> Subscription<Round>;

    fn observe_answers(&self, round_id: &str) -> Subscription<Answer>;

    fn observe_votes(&self, round_id: &str) -> Subscription<Vote>;
}
