use super::{Session, LOG_TARGET};
use crate::error::{GameError, GameResult};
use crate::game::Transition;
use crate::store::{StoreError, WriteOutcome};
use crate::types::*;

impl Session {
    /// Create round `number` for a lobby that has already moved to it.
    ///
    /// Safe to call from several clients: only the one whose insert lands
    /// provisions the automated answers, the others get `None`. If that client
    /// dies mid-generation, replicas fill in the missing answers later.
    pub async fn open_round(&self, lobby: &Lobby, number: u32) -> GameResult<Option<Round>> {
        let prompt_id = lobby
            .prompt_for_round(number)
            .cloned()
            .ok_or(GameError::NotFound("prompt"))?;

        let round = Round {
            id: new_id(),
            lobby_id: lobby.id.clone(),
            prompt_id,
            number,
            status: RoundStatus::Answering,
            created_at: now(),
        };

        if !self.store.insert_round(round.clone()).await?.applied() {
            tracing::debug!(target: LOG_TARGET, lobby_id = %lobby.id, number, "Round already open");
            return Ok(None);
        }

        tracing::info!(target: LOG_TARGET, lobby_id = %lobby.id, round_id = %round.id, number, "Round opened");
        self.provision_automated_answers(lobby, &round).await?;
        Ok(Some(round))
    }

    /// Leave SCORING of round `number - 1`, opening round `number` or
    /// completing the game when there are no rounds left
    pub async fn advance_round(&self, lobby_id: &str, number: u32) -> GameResult<WriteOutcome> {
        let lobby = self
            .store
            .get_lobby(lobby_id)
            .await?
            .ok_or(GameError::LobbyNotFound)?;

        if number < 2 {
            return Err(GameError::invalid("round 1 is opened by starting the game"));
        }
        if lobby.status != LobbyStatus::Started || lobby.current_round >= number {
            // Completed, or another client already advanced
            return Ok(WriteOutcome::Skipped);
        }
        if lobby.current_round + 1 != number {
            return Err(GameError::invalid(format!(
                "lobby is on round {}, cannot advance to {}",
                lobby.current_round, number
            )));
        }

        let previous = self
            .store
            .find_round(&lobby.id, number - 1)
            .await?
            .ok_or(GameError::NotFound("round"))?;
        crate::game::phase::ensure_status(&previous, RoundStatus::Scoring)?;

        let next = if number > lobby.rounds {
            LobbyProgress {
                status: LobbyStatus::Completed,
                current_round: lobby.current_round,
            }
        } else {
            LobbyProgress {
                status: LobbyStatus::Started,
                current_round: number,
            }
        };

        let outcome = self
            .store
            .compare_and_set_lobby(&lobby.id, lobby.progress(), next, None)
            .await?;
        if !outcome.applied() {
            tracing::debug!(target: LOG_TARGET, lobby_id, number, "Advance lost the race");
            return Ok(outcome);
        }

        if next.status == LobbyStatus::Completed {
            tracing::info!(target: LOG_TARGET, lobby_id, "Game completed");
            return Ok(outcome);
        }

        let lobby = Lobby {
            status: next.status,
            current_round: next.current_round,
            ..lobby
        };
        self.open_round(&lobby, number).await?;
        Ok(outcome)
    }

    /// Apply a detected phase boundary.
    ///
    /// The conditional status write is the deduplication point: only the
    /// client whose write lands runs the entry actions of the new phase right
    /// away. Both entry actions are idempotent, and replicas re-run them when
    /// they find the phase's work incomplete.
    /// A round deleted underneath the caller counts as a lost race.
    pub async fn apply_transition(&self, transition: &Transition) -> GameResult<WriteOutcome> {
        let outcome = match self
            .store
            .compare_and_set_round_status(&transition.round_id, transition.from, transition.to)
            .await
        {
            Ok(outcome) => outcome,
            Err(StoreError::NotFound(what)) => {
                tracing::debug!(target: LOG_TARGET, round_id = %transition.round_id, "{} vanished before transition", what);
                return Ok(WriteOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        };

        if !outcome.applied() {
            tracing::debug!(
                target: LOG_TARGET,
                round_id = %transition.round_id,
                from = ?transition.from,
                "Transition already applied by another client"
            );
            return Ok(outcome);
        }

        tracing::info!(
            target: LOG_TARGET,
            round_id = %transition.round_id,
            from = ?transition.from,
            to = ?transition.to,
            "Round transitioned"
        );

        let Some(round) = self.store.get_round(&transition.round_id).await? else {
            return Ok(outcome);
        };
        let Some(lobby) = self.store.get_lobby(&round.lobby_id).await? else {
            return Ok(outcome);
        };

        match transition.to {
            RoundStatus::Voting if lobby.mode.voter_kind() == AuthorKind::Automated => {
                self.provision_automated_votes(&lobby, &round).await?;
            }
            RoundStatus::Scoring => {
                self.apply_scores(&lobby).await?;
            }
            _ => {}
        }

        Ok(outcome)
    }

    /// Text of the prompt a round was opened with
    pub async fn prompt_text(&self, round: &Round) -> GameResult<String> {
        self.store
            .get_prompt(&round.prompt_id)
            .await?
            .map(|p| p.text)
            .ok_or(GameError::NotFound("prompt"))
    }
}
