use super::{Session, LOG_TARGET};
use crate::error::{GameError, GameResult};
use crate::game::PromptDeck;
use crate::store::WriteOutcome;
use crate::types::*;
use rand::Rng;

/// Safe character set for join codes (excludes 0/O, 1/I/L to avoid confusion)
const CODE_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 6;

fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_CHARS[rng.random_range(0..CODE_CHARS.len())] as char)
        .collect()
}

/// Join input is case-insensitive: codes are stored upper-case
pub fn normalize_code(input: &str) -> String {
    input.trim().to_uppercase()
}

/// Display name for an automated participant, unique among `taken`
fn automated_name(taken: &[String], ordinal: usize) -> String {
    for _ in 0..5 {
        if let Some(name) = petname::petname(2, "-") {
            if !taken.contains(&name) {
                return name;
            }
        }
    }

    let mut n = ordinal;
    loop {
        let name = format!("Bot {}", n);
        if !taken.contains(&name) {
            return name;
        }
        n += 1;
    }
}

/// How a new lobby is set up
#[derive(Debug, Clone)]
pub struct LobbyOptions {
    pub answer_kind: AnswerKind,
    pub mode: GameMode,
    /// One automated participant per entry, "provider:model"
    pub automated_models: Vec<ModelId>,
}

impl Session {
    /// Create a lobby in WAITING with its host and automated participants
    pub async fn create_lobby(
        &self,
        user_id: &str,
        host_name: &str,
        options: LobbyOptions,
    ) -> GameResult<(Lobby, Participant)> {
        let host_name = host_name.trim();
        if host_name.is_empty() {
            return Err(GameError::invalid("display name is required"));
        }
        if options.mode == GameMode::SinglePlayer && options.automated_models.is_empty() {
            return Err(GameError::invalid(
                "single-player lobbies need at least one automated participant",
            ));
        }

        let code = loop {
            let code = generate_code();
            if self.store.find_lobby_by_code(&code).await?.is_none() {
                break code;
            }
        };

        let host = Participant {
            id: new_id(),
            lobby_id: new_id(),
            user_id: user_id.to_string(),
            display_name: host_name.to_string(),
            is_host: true,
            is_automated: false,
            model_id: None,
            score: 0,
        };

        let lobby = Lobby {
            id: host.lobby_id.clone(),
            code,
            host_id: host.id.clone(),
            status: LobbyStatus::Waiting,
            current_round: 0,
            answer_kind: options.answer_kind,
            mode: options.mode,
            rounds: self.config.rounds,
            prompt_ids: Vec::new(),
            created_at: now(),
        };

        self.store.insert_lobby(lobby.clone()).await?;
        self.store.insert_participant(host.clone()).await?;

        let mut taken = vec![host.display_name.clone()];
        for (i, model_id) in options.automated_models.iter().enumerate() {
            let display_name = automated_name(&taken, i + 1);
            taken.push(display_name.clone());

            let bot = Participant {
                id: new_id(),
                lobby_id: lobby.id.clone(),
                user_id: format!("automated:{}", model_id),
                display_name,
                is_host: false,
                is_automated: true,
                model_id: Some(model_id.clone()),
                score: 0,
            };
            self.store.insert_participant(bot).await?;
        }

        tracing::info!(
            target: LOG_TARGET,
            lobby_id = %lobby.id,
            code = %lobby.code,
            mode = ?lobby.mode,
            automated = options.automated_models.len(),
            "Lobby created"
        );
        Ok((lobby, host))
    }

    /// Join a WAITING or STARTED lobby by its code
    pub async fn join_lobby(
        &self,
        code: &str,
        user_id: &str,
        display_name: &str,
    ) -> GameResult<(Lobby, Participant)> {
        let lobby = self
            .store
            .find_lobby_by_code(&normalize_code(code))
            .await?
            .ok_or(GameError::LobbyNotFound)?;

        if display_name.trim().is_empty() {
            return Err(GameError::invalid("display name is required"));
        }

        // Exact comparison, no case or whitespace folding
        let participants = self.store.list_participants(&lobby.id).await?;
        if participants.iter().any(|p| p.display_name == display_name) {
            return Err(GameError::NameTaken(display_name.to_string()));
        }

        let participant = Participant {
            id: new_id(),
            lobby_id: lobby.id.clone(),
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            is_host: false,
            is_automated: false,
            model_id: None,
            score: 0,
        };
        self.store.insert_participant(participant.clone()).await?;

        tracing::info!(
            target: LOG_TARGET,
            lobby_id = %lobby.id,
            participant_id = %participant.id,
            "Participant joined"
        );
        Ok((lobby, participant))
    }

    /// Remove a participant; the host leaving closes the whole lobby
    pub async fn leave_lobby(&self, participant_id: &str) -> GameResult<()> {
        let Some(participant) = self.store.get_participant(participant_id).await? else {
            return Ok(());
        };

        if participant.is_host {
            self.store.delete_lobby(&participant.lobby_id).await?;
            tracing::info!(target: LOG_TARGET, lobby_id = %participant.lobby_id, "Host left, lobby closed");
        } else {
            self.store.delete_participant(participant_id).await?;
            tracing::info!(
                target: LOG_TARGET,
                lobby_id = %participant.lobby_id,
                participant_id,
                "Participant left"
            );
        }
        Ok(())
    }

    /// Draw the prompts and move the lobby from WAITING to round 1.
    ///
    /// Returns `Skipped` when the game was already started, by this host or
    /// by a racing duplicate request.
    pub async fn start_game(
        &self,
        lobby_id: &str,
        participant_id: &str,
        deck: &PromptDeck,
    ) -> GameResult<WriteOutcome> {
        let lobby = self
            .store
            .get_lobby(lobby_id)
            .await?
            .ok_or(GameError::LobbyNotFound)?;

        let participant = self
            .store
            .get_participant(participant_id)
            .await?
            .filter(|p| p.lobby_id == lobby.id)
            .ok_or(GameError::NotInLobby)?;
        if !participant.is_host {
            return Err(GameError::NotHost("start the game"));
        }

        if lobby.status != LobbyStatus::Waiting {
            return Ok(WriteOutcome::Skipped);
        }

        let texts = deck.draw(lobby.answer_kind, lobby.rounds as usize)?;
        let mut prompt_ids = Vec::with_capacity(texts.len());
        for text in texts {
            let prompt = Prompt {
                id: new_id(),
                text,
                created_at: now(),
            };
            prompt_ids.push(prompt.id.clone());
            self.store.insert_prompt(prompt).await?;
        }

        let started = LobbyProgress {
            status: LobbyStatus::Started,
            current_round: 1,
        };
        let outcome = self
            .store
            .compare_and_set_lobby(&lobby.id, lobby.progress(), started, Some(prompt_ids.clone()))
            .await?;

        if !outcome.applied() {
            tracing::debug!(target: LOG_TARGET, lobby_id, "Game already started elsewhere");
            return Ok(outcome);
        }

        tracing::info!(target: LOG_TARGET, lobby_id, rounds = lobby.rounds, "Game started");

        let lobby = Lobby {
            status: started.status,
            current_round: started.current_round,
            prompt_ids,
            ..lobby
        };
        self.open_round(&lobby, 1).await?;
        Ok(outcome)
    }

    /// Lobby with its participants, looked up by join code
    pub async fn lobby_snapshot(&self, code: &str) -> GameResult<(Lobby, Vec<Participant>)> {
        let lobby = self
            .store
            .find_lobby_by_code(&normalize_code(code))
            .await?
            .ok_or(GameError::LobbyNotFound)?;
        let participants = self.store.list_participants(&lobby.id).await?;
        Ok((lobby, participants))
    }
}
