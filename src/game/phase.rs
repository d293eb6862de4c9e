use crate::error::{GameError, GameResult};
use crate::types::*;

/// The status a round moves to once the current one is complete.
/// SCORING is left by advancing the lobby, not by a round transition.
pub fn next_status(status: RoundStatus) -> Option<RoundStatus> {
    match status {
        RoundStatus::Answering => Some(RoundStatus::Voting),
        RoundStatus::Voting => Some(RoundStatus::Scoring),
        RoundStatus::Scoring => None,
    }
}

pub fn ensure_status(round: &Round, expected: RoundStatus) -> GameResult<()> {
    if round.status == expected {
        Ok(())
    } else {
        Err(GameError::WrongPhase {
            expected,
            actual: round.status,
        })
    }
}

/// Participants who still owe an answer for this round.
///
/// Every current participant answers, automated ones included: their answers
/// are provisioned when the round is created.
pub fn missing_answers<'a>(
    round: &Round,
    participants: &'a [Participant],
    answers: &[Answer],
) -> Vec<&'a Participant> {
    participants
        .iter()
        .filter(|p| {
            !answers
                .iter()
                .any(|a| a.round_id == round.id && a.participant_id == p.id)
        })
        .collect()
}

pub fn answering_complete(round: &Round, participants: &[Participant], answers: &[Answer]) -> bool {
    missing_answers(round, participants, answers).is_empty()
}

/// Answers a participant may pick from: everything in the round except their own
pub fn candidates_for<'a>(voter_id: &str, answers: &'a [Answer]) -> Vec<&'a Answer> {
    answers
        .iter()
        .filter(|a| a.participant_id != voter_id)
        .collect()
}

/// Participants entitled to vote in this round
pub fn eligible_voters<'a>(
    mode: GameMode,
    round: &Round,
    participants: &'a [Participant],
    answers: &[Answer],
) -> Vec<&'a Participant> {
    participants
        .iter()
        .filter(|p| p.kind() == mode.voter_kind())
        .filter(|p| {
            answers
                .iter()
                .any(|a| a.round_id == round.id && a.participant_id != p.id)
        })
        .collect()
}

/// Eligible voters who have not voted yet
pub fn missing_votes<'a>(
    mode: GameMode,
    round: &Round,
    participants: &'a [Participant],
    answers: &[Answer],
    votes: &[Vote],
) -> Vec<&'a Participant> {
    eligible_voters(mode, round, participants, answers)
        .into_iter()
        .filter(|p| {
            !votes
                .iter()
                .any(|v| v.round_id == round.id && v.participant_id == p.id)
        })
        .collect()
}

pub fn voting_complete(
    mode: GameMode,
    round: &Round,
    participants: &[Participant],
    answers: &[Answer],
    votes: &[Vote],
) -> bool {
    missing_votes(mode, round, participants, answers, votes).is_empty()
}

/// Newlines removed, lower-cased, trimmed, one trailing punctuation mark dropped
pub fn normalize_answer(raw: &str) -> String {
    let flat: String = raw.chars().filter(|c| *c != '\n' && *c != '\r').collect();
    let lowered = flat.to_lowercase();
    let trimmed = lowered.trim();
    let stripped = trimmed
        .strip_suffix(['.', ',', ';', ':', '!', '?'])
        .unwrap_or(trimmed);
    stripped.trim_end().to_string()
}
