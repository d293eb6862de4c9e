use super::{Session, LOG_TARGET};
use crate::error::{GameError, GameResult};
use crate::game::phase::{candidates_for, ensure_status};
use crate::llm::pick_or_default;
use crate::store::WriteOutcome;
use crate::types::*;

impl Session {
    /// Record a vote for an answer of the same round.
    ///
    /// Participants cannot pick their own answer, and only the mode's voters
    /// vote. A second vote by the same participant is ignored (`Skipped`).
    pub async fn submit_vote(
        &self,
        round_id: &str,
        participant_id: &str,
        answer_id: &str,
    ) -> GameResult<WriteOutcome> {
        let round = self
            .store
            .get_round(round_id)
            .await?
            .ok_or(GameError::NotFound("round"))?;
        let participant = self
            .store
            .get_participant(participant_id)
            .await?
            .filter(|p| p.lobby_id == round.lobby_id)
            .ok_or(GameError::NotInLobby)?;
        let lobby = self
            .store
            .get_lobby(&round.lobby_id)
            .await?
            .ok_or(GameError::LobbyNotFound)?;

        ensure_status(&round, RoundStatus::Voting)?;
        if participant.kind() != lobby.mode.voter_kind() {
            return Err(GameError::invalid("this participant does not vote in this mode"));
        }

        let answers = self.store.list_answers(&round.id).await?;
        let answer = answers
            .iter()
            .find(|a| a.id == answer_id)
            .ok_or(GameError::NotFound("answer"))?;
        if answer.participant_id == participant.id {
            return Err(GameError::SelfVote);
        }

        self.insert_vote(&round, &participant, answer_id).await
    }

    async fn insert_vote(
        &self,
        round: &Round,
        participant: &Participant,
        answer_id: &str,
    ) -> GameResult<WriteOutcome> {
        let vote = Vote {
            id: new_id(),
            round_id: round.id.clone(),
            participant_id: participant.id.clone(),
            answer_id: answer_id.to_string(),
            created_at: now(),
        };

        let outcome = self.store.insert_vote(vote).await?;
        if outcome.applied() {
            tracing::debug!(
                target: LOG_TARGET,
                round_id = %round.id,
                participant_id = %participant.id,
                "Vote recorded"
            );
        } else {
            tracing::debug!(
                target: LOG_TARGET,
                round_id = %round.id,
                participant_id = %participant.id,
                "Duplicate vote ignored"
            );
        }
        Ok(outcome)
    }

    /// Let every automated voter that has not voted yet pick an answer other
    /// than its own.
    ///
    /// Called on entry to VOTING in modes where automated participants vote,
    /// and again by any replica that finds bot votes still missing.
    pub(crate) async fn provision_automated_votes(
        &self,
        lobby: &Lobby,
        round: &Round,
    ) -> GameResult<()> {
        let participants = self.store.list_participants(&lobby.id).await?;
        let answers = self.store.list_answers(&round.id).await?;
        let cast = self.store.list_votes(&round.id).await?;
        let target = lobby.mode.target_kind();

        let voters: Vec<&Participant> = participants
            .iter()
            .filter(|p| p.kind() == lobby.mode.voter_kind() && p.is_automated)
            .filter(|p| !cast.iter().any(|v| v.participant_id == p.id))
            .collect();
        if voters.is_empty() {
            return Ok(());
        }
        let prompt = self.prompt_text(round).await?;

        let picks = futures::future::join_all(voters.iter().map(|voter| {
            let candidates = candidates_for(&voter.id, &answers);
            let prompt = prompt.as_str();
            async move {
                if candidates.is_empty() {
                    return None;
                }
                let texts: Vec<String> = candidates
                    .iter()
                    .map(|a| a.content.as_str().to_string())
                    .collect();
                let index = match voter.model_id.as_deref() {
                    Some(model_id) => {
                        pick_or_default(self.oracle.as_ref(), prompt, &texts, model_id, target)
                            .await
                    }
                    None => 0,
                };
                candidates.get(index).map(|a| a.id.clone())
            }
        }))
        .await;

        for (voter, pick) in voters.into_iter().zip(picks) {
            if let Some(answer_id) = pick {
                self.insert_vote(round, voter, &answer_id).await?;
            }
        }
        Ok(())
    }
}
