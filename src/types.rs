use serde::{Deserialize, Serialize};

/// Opaque ID types for type safety
pub type LobbyId = String;
pub type ParticipantId = String;
pub type PromptId = String;
pub type RoundId = String;
pub type AnswerId = String;
pub type VoteId = String;
/// "provider:model", e.g. "openai:gpt-4o-mini" or "ollama:llama3.2"
pub type ModelId = String;

pub(crate) fn new_id() -> String {
    ulid::Ulid::new().to_string()
}

pub(crate) fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LobbyStatus {
    Waiting,
    Started,
    Completed,
}

impl LobbyStatus {
    /// Lobbies that can still be found by their join code
    pub fn is_active(&self) -> bool {
        matches!(self, LobbyStatus::Waiting | LobbyStatus::Started)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundStatus {
    Answering,
    Voting,
    Scoring,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnswerKind {
    Text,
    Drawing,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameMode {
    /// Humans answer and vote, automated participants only answer
    Multiplayer,
    /// One human answers, automated participants answer and vote
    SinglePlayer,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AuthorKind {
    Human,
    Automated,
}

impl GameMode {
    /// Which kind of participant casts votes
    pub fn voter_kind(&self) -> AuthorKind {
        match self {
            GameMode::Multiplayer => AuthorKind::Human,
            GameMode::SinglePlayer => AuthorKind::Automated,
        }
    }

    /// Which kind of answer the voters are hunting for
    pub fn target_kind(&self) -> AuthorKind {
        match self {
            GameMode::Multiplayer => AuthorKind::Automated,
            GameMode::SinglePlayer => AuthorKind::Human,
        }
    }
}

/// Fixed bonuses awarded during SCORING
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreConfig {
    /// Voter picked an answer of the hunted kind
    pub voter: u32,
    /// Author of an answer that was picked while not being of the hunted kind
    pub creator: u32,
    /// Each hunted-kind author in the round, whenever a vote missed them
    pub automated: u32,
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            voter: 100,
            creator: 50,
            automated: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    pub rounds: u32,
    /// How long the SCORING reveal stays up before a client advances
    pub reveal_seconds: u64,
    /// When false, only an explicit advance request leaves SCORING
    pub auto_advance: bool,
    /// How long a replica waits on missing automated answers or votes
    /// before generating them itself
    pub recovery_seconds: u64,
    pub scoring: ScoreConfig,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            rounds: 5,
            reveal_seconds: 10,
            auto_advance: true,
            recovery_seconds: 45,
            scoring: ScoreConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl GameConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let auto_advance = std::env::var("GAME_AUTO_ADVANCE")
            .map(|v| v != "0" && v.to_lowercase() != "false")
            .unwrap_or(defaults.auto_advance);

        Self {
            rounds: env_parse::<u32>("GAME_ROUNDS")
                .filter(|r| *r > 0)
                .unwrap_or(defaults.rounds),
            reveal_seconds: env_parse("GAME_REVEAL_SECONDS").unwrap_or(defaults.reveal_seconds),
            auto_advance,
            recovery_seconds: env_parse("GAME_RECOVERY_SECONDS")
                .unwrap_or(defaults.recovery_seconds),
            scoring: ScoreConfig {
                voter: env_parse("SCORE_VOTER").unwrap_or(defaults.scoring.voter),
                creator: env_parse("SCORE_CREATOR").unwrap_or(defaults.scoring.creator),
                automated: env_parse("SCORE_AUTOMATED").unwrap_or(defaults.scoring.automated),
            },
        }
    }
}

/// The two lobby fields that only ever change through a conditional write
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LobbyProgress {
    pub status: LobbyStatus,
    pub current_round: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lobby {
    pub id: LobbyId,
    /// Short human-entered join token, unique among active lobbies
    pub code: String,
    pub host_id: ParticipantId,
    pub status: LobbyStatus,
    /// 0 before start, otherwise the number of the round in progress
    pub current_round: u32,
    pub answer_kind: AnswerKind,
    pub mode: GameMode,
    /// Number of rounds configured for this lobby
    pub rounds: u32,
    /// Prompts drawn at start, one per round in order
    #[serde(default)]
    pub prompt_ids: Vec<PromptId>,
    pub created_at: String,
}

impl Lobby {
    pub fn progress(&self) -> LobbyProgress {
        LobbyProgress {
            status: self.status,
            current_round: self.current_round,
        }
    }

    /// Prompt assigned to the given 1-based round
    pub fn prompt_for_round(&self, number: u32) -> Option<&PromptId> {
        let index = usize::try_from(number.checked_sub(1)?).ok()?;
        self.prompt_ids.get(index)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Participant {
    pub id: ParticipantId,
    pub lobby_id: LobbyId,
    pub user_id: String,
    pub display_name: String,
    pub is_host: bool,
    pub is_automated: bool,
    /// Model backing an automated participant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<ModelId>,
    pub score: u32,
}

impl Participant {
    pub fn kind(&self) -> AuthorKind {
        if self.is_automated {
            AuthorKind::Automated
        } else {
            AuthorKind::Human
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prompt {
    pub id: PromptId,
    pub text: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Round {
    pub id: RoundId,
    pub lobby_id: LobbyId,
    pub prompt_id: PromptId,
    /// 1-based, unique per lobby
    pub number: u32,
    pub status: RoundStatus,
    pub created_at: String,
}

/// Exactly one of text or drawing, selected by the lobby's answer kind
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnswerContent {
    Text(String),
    /// SVG document
    Drawing(String),
}

impl AnswerContent {
    pub fn kind(&self) -> AnswerKind {
        match self {
            AnswerContent::Text(_) => AnswerKind::Text,
            AnswerContent::Drawing(_) => AnswerKind::Drawing,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            AnswerContent::Text(s) | AnswerContent::Drawing(s) => s,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub id: AnswerId,
    pub round_id: RoundId,
    pub participant_id: ParticipantId,
    pub is_automated: bool,
    pub content: AnswerContent,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Vote {
    pub id: VoteId,
    pub round_id: RoundId,
    /// The voter
    pub participant_id: ParticipantId,
    /// The chosen answer
    pub answer_id: AnswerId,
    pub created_at: String,
}
