use crate::client::ClientEvent;
use crate::error::GameError;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub const PROTOCOL_VERSION: &str = "1.0";

fn default_mode() -> GameMode {
    GameMode::Multiplayer
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    CreateLobby {
        display_name: String,
        answer_kind: AnswerKind,
        #[serde(default = "default_mode")]
        mode: GameMode,
        /// "provider:model" per automated participant; server defaults when absent
        #[serde(default)]
        automated_models: Option<Vec<ModelId>>,
    },
    JoinLobby {
        code: String,
        display_name: String,
    },
    StartGame,
    SubmitAnswer {
        answer: AnswerContent,
    },
    SubmitVote {
        answer_id: AnswerId,
    },
    /// Leave SCORING without waiting for the reveal timer
    AdvanceRound,
    LeaveLobby,
}

/// An answer as shown to one viewer. Authorship stays hidden until SCORING.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerView {
    pub id: AnswerId,
    pub content: AnswerContent,
    /// Written by the viewer
    pub own: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<ParticipantId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_automated: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        protocol: String,
        connection_id: String,
        server_now: String,
    },
    Joined {
        lobby: Lobby,
        participant: Participant,
    },
    Lobby {
        lobby: Lobby,
    },
    Participants {
        participants: Vec<Participant>,
    },
    Round {
        round: Round,
        prompt: String,
    },
    Answers {
        round_id: RoundId,
        status: RoundStatus,
        submitted: usize,
        required: usize,
        /// Empty while answers are still being collected
        answers: Vec<AnswerView>,
    },
    VoteProgress {
        round_id: RoundId,
        votes: usize,
        required: usize,
        /// Who picked what, only once the round is scored
        #[serde(skip_serializing_if = "Option::is_none")]
        picks: Option<Vec<Vote>>,
    },
    LobbyClosed,
    Error {
        code: String,
        msg: String,
    },
}

/// Sort key for showing a round's answers. Stable within a round, but
/// unrelated to when (or by whom) each answer was written.
fn display_order(round_id: &str, answer_id: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    round_id.hash(&mut hasher);
    answer_id.hash(&mut hasher);
    hasher.finish()
}

impl ServerMessage {
    pub fn error(code: &str, msg: impl Into<String>) -> Self {
        ServerMessage::Error {
            code: code.to_string(),
            msg: msg.into(),
        }
    }

    /// Render a replica event for the participant on the other end of the socket
    pub fn from_event(event: ClientEvent, viewer: Option<&str>) -> Self {
        match event {
            ClientEvent::Lobby(lobby) => ServerMessage::Lobby { lobby },
            ClientEvent::Participants(participants) => ServerMessage::Participants { participants },
            ClientEvent::Round { round, prompt } => ServerMessage::Round { round, prompt },
            ClientEvent::Answers {
                round,
                mut answers,
                required,
            } => {
                let submitted = answers.len();
                // Ids sort by creation time, and bot answers are written first
                answers.sort_by_cached_key(|a| display_order(&round.id, &a.id));
                let views = match round.status {
                    RoundStatus::Answering => Vec::new(),
                    status => answers
                        .into_iter()
                        .map(|a| AnswerView {
                            own: viewer == Some(a.participant_id.as_str()),
                            participant_id: (status == RoundStatus::Scoring)
                                .then(|| a.participant_id.clone()),
                            is_automated: (status == RoundStatus::Scoring).then_some(a.is_automated),
                            id: a.id,
                            content: a.content,
                        })
                        .collect(),
                };
                ServerMessage::Answers {
                    round_id: round.id,
                    status: round.status,
                    submitted,
                    required,
                    answers: views,
                }
            }
            ClientEvent::Votes {
                round,
                votes,
                required,
            } => ServerMessage::VoteProgress {
                round_id: round.id,
                votes: votes.len(),
                required,
                picks: (round.status == RoundStatus::Scoring).then_some(votes),
            },
            ClientEvent::LobbyClosed => ServerMessage::LobbyClosed,
        }
    }
}

impl From<GameError> for ServerMessage {
    fn from(e: GameError) -> Self {
        ServerMessage::error(e.code(), e.to_string())
    }
}
