//! Phase-boundary detection.
//!
//! Every replica runs the same evaluation on every subscription update, so a
//! boundary is typically detected by many clients at once. Detection only
//! proposes a [`Transition`]; the conditional status write decides which one
//! client actually performs it.

use std::collections::HashSet;

use super::phase::{answering_complete, next_status, voting_complete};
use crate::types::*;

/// A round status change that the observed records justify
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub round_id: RoundId,
    pub from: RoundStatus,
    pub to: RoundStatus,
}

/// Decide whether the round's current phase is complete.
///
/// Answers and votes belonging to other rounds are ignored.
pub fn evaluate(
    mode: GameMode,
    round: &Round,
    participants: &[Participant],
    answers: &[Answer],
    votes: &[Vote],
) -> Option<Transition> {
    let complete = match round.status {
        RoundStatus::Answering => answering_complete(round, participants, answers),
        RoundStatus::Voting => voting_complete(mode, round, participants, answers, votes),
        RoundStatus::Scoring => false,
    };

    if !complete {
        return None;
    }

    next_status(round.status).map(|to| Transition {
        round_id: round.id.clone(),
        from: round.status,
        to,
    })
}

/// Per-replica memo so a client proposes each boundary once, no matter how
/// many notifications re-deliver the same completed snapshot
#[derive(Debug, Default)]
pub struct ConvergenceDetector {
    proposed: HashSet<(RoundId, RoundStatus)>,
}

impl ConvergenceDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate a snapshot, returning a transition only the first time it is seen
    pub fn observe(
        &mut self,
        mode: GameMode,
        round: &Round,
        participants: &[Participant],
        answers: &[Answer],
        votes: &[Vote],
    ) -> Option<Transition> {
        let transition = evaluate(mode, round, participants, answers, votes)?;
        let key = (transition.round_id.clone(), transition.from);
        self.proposed.insert(key).then_some(transition)
    }

    /// Allow a transition to be proposed again, e.g. after the write failed
    pub fn retry(&mut self, transition: &Transition) {
        self.proposed
            .remove(&(transition.round_id.clone(), transition.from));
    }

    /// Drop memo entries for rounds this replica no longer watches
    pub fn forget_round(&mut self, round_id: &str) {
        self.proposed.retain(|(id, _)| id != round_id);
    }
}
