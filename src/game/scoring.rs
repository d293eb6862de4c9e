use std::collections::BTreeMap;

use crate::types::*;

/// Points one participant earned in a single round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreDelta {
    pub participant_id: ParticipantId,
    pub points: u32,
}

/// Absolute score a participant should hold after every scored round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreTotal {
    pub participant_id: ParticipantId,
    pub score: u32,
}

fn answer_kind_of(answer: &Answer) -> AuthorKind {
    if answer.is_automated {
        AuthorKind::Automated
    } else {
        AuthorKind::Human
    }
}

/// Scores stop at `u32::MAX` instead of wrapping
fn award(totals: &mut BTreeMap<ParticipantId, u32>, participant_id: &str, points: u32) {
    let total = totals.entry(participant_id.to_string()).or_default();
    *total = total.saturating_add(points);
}

fn accumulate(
    totals: &mut BTreeMap<ParticipantId, u32>,
    mode: GameMode,
    scoring: &ScoreConfig,
    answers: &[Answer],
    votes: &[Vote],
) {
    let target = mode.target_kind();

    for vote in votes {
        // Target answer gone (author left): the vote is worth nothing
        let Some(picked) = answers.iter().find(|a| a.id == vote.answer_id) else {
            continue;
        };

        if answer_kind_of(picked) == target {
            award(totals, &vote.participant_id, scoring.voter);
            continue;
        }

        award(totals, &picked.participant_id, scoring.creator);
        for hidden in answers.iter().filter(|a| answer_kind_of(a) == target) {
            award(totals, &hidden.participant_id, scoring.automated);
        }
    }
}

/// Points earned in one round, one entry per participant who earned any
pub fn score_round(
    mode: GameMode,
    scoring: &ScoreConfig,
    answers: &[Answer],
    votes: &[Vote],
) -> Vec<ScoreDelta> {
    let mut totals = BTreeMap::new();
    accumulate(&mut totals, mode, scoring, answers, votes);

    totals
        .into_iter()
        .filter(|(_, points)| *points > 0)
        .map(|(participant_id, points)| ScoreDelta {
            participant_id,
            points,
        })
        .collect()
}

/// Recompute every participant's score from all scored rounds.
///
/// The result is absolute, so writing it twice leaves the same scores as
/// writing it once. Participants without points get 0.
pub fn total_scores<'a>(
    mode: GameMode,
    scoring: &ScoreConfig,
    participants: &[Participant],
    rounds: impl IntoIterator<Item = (&'a [Answer], &'a [Vote])>,
) -> Vec<ScoreTotal> {
    let mut totals = BTreeMap::new();
    for (answers, votes) in rounds {
        accumulate(&mut totals, mode, scoring, answers, votes);
    }

    participants
        .iter()
        .map(|p| ScoreTotal {
            participant_id: p.id.clone(),
            score: totals.get(&p.id).copied().unwrap_or(0),
        })
        .collect()
}
