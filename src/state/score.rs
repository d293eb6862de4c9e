use super::{Session, LOG_TARGET};
use crate::error::GameResult;
use crate::game::{total_scores, ScoreTotal};
use crate::store::StoreError;
use crate::types::*;

impl Session {
    /// Recompute every participant's score from all SCORING rounds of the
    /// lobby and write the totals.
    ///
    /// Writes only ever raise a score, so running this again, from any
    /// client, leaves the same result.
    pub async fn apply_scores(&self, lobby: &Lobby) -> GameResult<Vec<ScoreTotal>> {
        let participants = self.store.list_participants(&lobby.id).await?;

        let mut scored = Vec::new();
        for round in self.store.list_rounds(&lobby.id).await? {
            if round.status != RoundStatus::Scoring {
                continue;
            }
            let answers = self.store.list_answers(&round.id).await?;
            let votes = self.store.list_votes(&round.id).await?;
            scored.push((answers, votes));
        }

        let totals = total_scores(
            lobby.mode,
            &self.config.scoring,
            &participants,
            scored.iter().map(|(a, v)| (a.as_slice(), v.as_slice())),
        );

        for total in totals.iter().filter(|t| t.score > 0) {
            match self.store.raise_score(&total.participant_id, total.score).await {
                Ok(_) => {}
                // Left between the read and the write
                Err(StoreError::NotFound(_)) => {
                    tracing::debug!(target: LOG_TARGET, participant_id = %total.participant_id, "Skipping score for departed participant");
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::info!(target: LOG_TARGET, lobby_id = %lobby.id, rounds = scored.len(), "Scores applied");
        Ok(totals)
    }
}
