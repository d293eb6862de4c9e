use super::{Session, LOG_TARGET};
use crate::error::{GameError, GameResult};
use crate::game::{normalize_answer, phase::ensure_status};
use crate::llm::{fallback_answer, generate_or_fallback};
use crate::store::WriteOutcome;
use crate::types::*;

/// Stored form of an answer: text is normalised, drawings are kept verbatim
fn prepare_content(content: AnswerContent) -> GameResult<AnswerContent> {
    let prepared = match content {
        AnswerContent::Text(text) => AnswerContent::Text(normalize_answer(&text)),
        AnswerContent::Drawing(svg) => AnswerContent::Drawing(svg.trim().to_string()),
    };
    if prepared.as_str().is_empty() {
        return Err(GameError::EmptyAnswer);
    }
    Ok(prepared)
}

impl Session {
    /// Record a participant's answer for a round in ANSWERING.
    ///
    /// A second submission by the same participant is ignored (`Skipped`).
    pub async fn submit_answer(
        &self,
        round_id: &str,
        participant_id: &str,
        content: AnswerContent,
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

        ensure_status(&round, RoundStatus::Answering)?;
        if content.kind() != lobby.answer_kind {
            return Err(GameError::WrongAnswerKind {
                expected: lobby.answer_kind,
            });
        }
        let content = prepare_content(content)?;

        self.insert_answer(&round, &participant, content).await
    }

    async fn insert_answer(
        &self,
        round: &Round,
        participant: &Participant,
        content: AnswerContent,
    ) -> GameResult<WriteOutcome> {
        let answer = Answer {
            id: new_id(),
            round_id: round.id.clone(),
            participant_id: participant.id.clone(),
            is_automated: participant.is_automated,
            content,
            created_at: now(),
        };

        let outcome = self.store.insert_answer(answer).await?;
        if outcome.applied() {
            tracing::debug!(
                target: LOG_TARGET,
                round_id = %round.id,
                participant_id = %participant.id,
                automated = participant.is_automated,
                "Answer recorded"
            );
        } else {
            tracing::debug!(
                target: LOG_TARGET,
                round_id = %round.id,
                participant_id = %participant.id,
                "Duplicate answer ignored"
            );
        }
        Ok(outcome)
    }

    /// Generate and store an answer for every automated participant that has
    /// none yet.
    ///
    /// The client that creates the round calls this right away. Any replica
    /// may call it again later for bots still missing an answer; the insert
    /// is unique per participant, so late or repeated calls change nothing.
    pub(crate) async fn provision_automated_answers(
        &self,
        lobby: &Lobby,
        round: &Round,
    ) -> GameResult<()> {
        let participants = self.store.list_participants(&lobby.id).await?;
        let answered = self.store.list_answers(&round.id).await?;
        let bots: Vec<&Participant> = participants
            .iter()
            .filter(|p| p.is_automated)
            .filter(|p| !answered.iter().any(|a| a.participant_id == p.id))
            .collect();
        if bots.is_empty() {
            return Ok(());
        }

        let prompt = self.prompt_text(round).await?;
        let kind = lobby.answer_kind;

        let generated = futures::future::join_all(bots.iter().map(|bot| {
            let prompt = prompt.as_str();
            async move {
                match bot.model_id.as_deref() {
                    Some(model_id) => {
                        generate_or_fallback(self.generator.as_ref(), prompt, model_id, kind).await
                    }
                    None => fallback_answer(kind),
                }
            }
        }))
        .await;

        for (bot, content) in bots.into_iter().zip(generated) {
            // Generated text must survive normalisation like a human answer
            let content = prepare_content(content).unwrap_or_else(|_| fallback_answer(kind));
            self.insert_answer(round, bot, content).await?;
        }
        Ok(())
    }
}
