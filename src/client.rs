//! One client replica.
//!
//! A `GameClient` follows a single lobby through live queries, keeps a local
//! view of it, and runs the convergence detector on every update. Any number
//! of replicas may follow the same lobby; phase transitions stay at-most-once
//! because they go through [`Session::apply_transition`].
//!
//! The detector only runs once every query feeding it has delivered its first
//! snapshot for the current round. Work a phase depends on (bot answers, bot
//! votes, scores) is re-checked by every replica, so it survives the client
//! that started it going away.

use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::game::phase::{eligible_voters, missing_answers, missing_votes};
use crate::game::ConvergenceDetector;
use crate::state::Session;
use crate::store::Subscription;
use crate::types::*;

const LOG_TARGET: &str = "genuine::client";

/// View updates produced by a replica
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Lobby(Lobby),
    Participants(Vec<Participant>),
    /// Current round, re-sent whenever its status changes
    Round { round: Round, prompt: String },
    Answers {
        round: Round,
        answers: Vec<Answer>,
        required: usize,
    },
    Votes {
        round: Round,
        votes: Vec<Vote>,
        required: usize,
    },
    /// The lobby was deleted (host left)
    LobbyClosed,
}

enum Flow {
    Continue,
    Stop,
}

async fn next_or_pending<T>(sub: &mut Option<Subscription<T>>) -> Option<Vec<T>> {
    match sub {
        Some(sub) => sub.next().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

pub struct GameClient {
    session: Session,
    lobby_id: LobbyId,
    events: mpsc::Sender<ClientEvent>,
    detector: ConvergenceDetector,

    lobby: Option<Lobby>,
    participants: Vec<Participant>,
    round: Option<Round>,
    answers: Vec<Answer>,
    votes: Vec<Vote>,
    /// Round number the round subscription is tied to
    watched_round: u32,
    participants_loaded: bool,
    answers_loaded: bool,
    votes_loaded: bool,
    /// Last round whose scores this replica has written
    scored_round: Option<RoundId>,
    reveal_at: Option<Instant>,
    recover_at: Option<Instant>,
}

impl GameClient {
    pub fn new(session: Session, lobby_id: LobbyId, events: mpsc::Sender<ClientEvent>) -> Self {
        Self {
            session,
            lobby_id,
            events,
            detector: ConvergenceDetector::new(),
            lobby: None,
            participants: Vec::new(),
            round: None,
            answers: Vec::new(),
            votes: Vec::new(),
            watched_round: 0,
            participants_loaded: false,
            answers_loaded: false,
            votes_loaded: false,
            scored_round: None,
            reveal_at: None,
            recover_at: None,
        }
    }

    /// Run the replica on its own task; abort the handle to tear it down
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        let store = self.session.store.clone();
        let mut lobby_sub = store.observe_lobby(&self.lobby_id);
        let mut participants_sub = store.observe_participants(&self.lobby_id);
        let mut round_sub: Option<Subscription<Round>> = None;
        let mut answers_sub: Option<Subscription<Answer>> = None;
        let mut votes_sub: Option<Subscription<Vote>> = None;

        tracing::debug!(target: LOG_TARGET, lobby_id = %self.lobby_id, "Replica started");

        loop {
            let flow = tokio::select! {
                update = lobby_sub.next() => match update {
                    Some(mut lobbies) => match lobbies.pop() {
                        Some(lobby) => {
                            if lobby.status != LobbyStatus::Waiting
                                && lobby.current_round != self.watched_round
                            {
                                // Tear down the old round's queries before following the new one
                                self.leave_round();
                                answers_sub = None;
                                votes_sub = None;
                                self.watched_round = lobby.current_round;
                                round_sub = Some(store.observe_round(&lobby.id, lobby.current_round));
                            }
                            self.on_lobby(lobby).await
                        }
                        None => {
                            let _ = self.events.send(ClientEvent::LobbyClosed).await;
                            Flow::Stop
                        }
                    },
                    None => Flow::Stop,
                },

                update = participants_sub.next() => match update {
                    Some(participants) => self.on_participants(participants).await,
                    None => Flow::Stop,
                },

                update = next_or_pending(&mut round_sub) => match update {
                    Some(mut rounds) => match rounds.pop() {
                        Some(round) => {
                            if self.round.as_ref().map(|r| &r.id) != Some(&round.id) {
                                self.reset_round_view();
                                answers_sub = Some(store.observe_answers(&round.id));
                                votes_sub = Some(store.observe_votes(&round.id));
                            }
                            self.on_round(round).await
                        }
                        None => self.on_round_missing().await,
                    },
                    None => Flow::Stop,
                },

                update = next_or_pending(&mut answers_sub) => match update {
                    Some(answers) => self.on_answers(answers).await,
                    None => Flow::Stop,
                },

                update = next_or_pending(&mut votes_sub) => match update {
                    Some(votes) => self.on_votes(votes).await,
                    None => Flow::Stop,
                },

                _ = wait_until(self.reveal_at) => {
                    self.reveal_at = None;
                    self.on_reveal_elapsed().await
                }

                _ = wait_until(self.recover_at) => {
                    self.recover_at = None;
                    self.on_recovery_due().await
                }
            };

            if matches!(flow, Flow::Stop) {
                break;
            }
        }

        tracing::debug!(target: LOG_TARGET, lobby_id = %self.lobby_id, "Replica stopped");
    }

    async fn emit(&self, event: ClientEvent) -> Flow {
        match self.events.send(event).await {
            Ok(()) => Flow::Continue,
            // Nobody is listening any more
            Err(_) => Flow::Stop,
        }
    }

    fn leave_round(&mut self) {
        if let Some(round) = self.round.take() {
            self.detector.forget_round(&round.id);
        }
        self.reset_round_view();
        self.reveal_at = None;
    }

    /// Forget the per-round records until fresh queries deliver them
    fn reset_round_view(&mut self) {
        self.answers.clear();
        self.votes.clear();
        self.answers_loaded = false;
        self.votes_loaded = false;
        self.recover_at = None;
    }

    /// Every query the detector reads has reported at least once
    fn view_loaded(&self) -> bool {
        self.participants_loaded && self.answers_loaded && self.votes_loaded
    }

    async fn on_lobby(&mut self, lobby: Lobby) -> Flow {
        self.lobby = Some(lobby.clone());
        self.emit(ClientEvent::Lobby(lobby)).await
    }

    async fn on_participants(&mut self, participants: Vec<Participant>) -> Flow {
        self.participants = participants.clone();
        self.participants_loaded = true;
        if let Flow::Stop = self.emit(ClientEvent::Participants(participants)).await {
            return Flow::Stop;
        }
        // A departure can complete a phase
        self.evaluate().await;
        Flow::Continue
    }

    /// The lobby moved to a round whose record is not there yet
    async fn on_round_missing(&mut self) -> Flow {
        let Some(lobby) = self.lobby.clone() else {
            return Flow::Continue;
        };
        if lobby.status != LobbyStatus::Started || lobby.current_round != self.watched_round {
            return Flow::Continue;
        }

        // Usually the advancing client is about to insert it; if it died
        // between its two writes, whoever gets here first opens the round
        if let Err(e) = self.session.open_round(&lobby, lobby.current_round).await {
            tracing::warn!(target: LOG_TARGET, lobby_id = %lobby.id, "Could not open round: {}", e);
        }
        Flow::Continue
    }

    async fn on_round(&mut self, round: Round) -> Flow {
        if round.number != self.watched_round {
            return Flow::Continue;
        }

        let entered_scoring = round.status == RoundStatus::Scoring
            && self.round.as_ref().map(|r| r.status) != Some(RoundStatus::Scoring);

        let prompt = match self.session.prompt_text(&round).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(target: LOG_TARGET, round_id = %round.id, "Prompt unavailable: {}", e);
                String::new()
            }
        };

        // The view may have moved on while the prompt was loading
        if round.number != self.watched_round {
            return Flow::Continue;
        }

        self.round = Some(round.clone());
        if entered_scoring && self.session.config.auto_advance {
            self.reveal_at =
                Some(Instant::now() + Duration::from_secs(self.session.config.reveal_seconds));
        }

        if let Flow::Stop = self.emit(ClientEvent::Round { round, prompt }).await {
            return Flow::Stop;
        }
        // Answers are revealed differently per phase
        if let Flow::Stop = self.emit_answers().await {
            return Flow::Stop;
        }
        self.evaluate().await;
        Flow::Continue
    }

    async fn on_answers(&mut self, answers: Vec<Answer>) -> Flow {
        self.answers = answers;
        self.answers_loaded = true;
        if let Flow::Stop = self.emit_answers().await {
            return Flow::Stop;
        }
        self.evaluate().await;
        Flow::Continue
    }

    async fn on_votes(&mut self, votes: Vec<Vote>) -> Flow {
        self.votes = votes;
        self.votes_loaded = true;
        if let (Some(lobby), Some(round)) = (&self.lobby, &self.round) {
            let required =
                eligible_voters(lobby.mode, round, &self.participants, &self.answers).len();
            let event = ClientEvent::Votes {
                round: round.clone(),
                votes: self.votes.clone(),
                required,
            };
            if let Flow::Stop = self.emit(event).await {
                return Flow::Stop;
            }
        }
        self.evaluate().await;
        Flow::Continue
    }

    async fn emit_answers(&self) -> Flow {
        let Some(round) = &self.round else {
            return Flow::Continue;
        };
        self.emit(ClientEvent::Answers {
            round: round.clone(),
            answers: self.answers.clone(),
            required: self.participants.len(),
        })
        .await
    }

    /// The lobby and its round in progress, once the whole view has loaded
    fn current(&self) -> Option<(Lobby, Round)> {
        if !self.view_loaded() {
            return None;
        }
        let (lobby, round) = (self.lobby.as_ref()?, self.round.as_ref()?);
        if lobby.status != LobbyStatus::Started || round.number != lobby.current_round {
            return None;
        }
        Some((lobby.clone(), round.clone()))
    }

    /// Run the detector on the current view and propose any boundary it finds
    async fn evaluate(&mut self) {
        // A partial view would count nobody as missing
        let Some((lobby, round)) = self.current() else {
            return;
        };

        if round.status == RoundStatus::Scoring {
            self.settle_scores(&lobby, &round).await;
        }
        self.schedule_recovery(&lobby, &round);

        let Some(transition) = self.detector.observe(
            lobby.mode,
            &round,
            &self.participants,
            &self.answers,
            &self.votes,
        ) else {
            return;
        };

        match self.session.apply_transition(&transition).await {
            Ok(outcome) => tracing::debug!(
                target: LOG_TARGET,
                round_id = %transition.round_id,
                to = ?transition.to,
                applied = outcome.applied(),
                "Proposed transition"
            ),
            Err(e) => {
                tracing::warn!(target: LOG_TARGET, round_id = %transition.round_id, "Transition failed: {}", e);
                self.detector.retry(&transition);
            }
        }
    }

    /// Write the lobby's scores once per scored round, whichever client
    /// moved the round into SCORING
    async fn settle_scores(&mut self, lobby: &Lobby, round: &Round) {
        if self.scored_round.as_ref() == Some(&round.id) {
            return;
        }
        match self.session.apply_scores(lobby).await {
            Ok(_) => self.scored_round = Some(round.id.clone()),
            Err(e) => {
                tracing::warn!(target: LOG_TARGET, round_id = %round.id, "Could not apply scores: {}", e)
            }
        }
    }

    /// Automated participants the current phase is still waiting on
    fn automated_work_pending(&self, lobby: &Lobby, round: &Round) -> bool {
        match round.status {
            RoundStatus::Answering => missing_answers(round, &self.participants, &self.answers)
                .iter()
                .any(|p| p.is_automated),
            RoundStatus::Voting => missing_votes(
                lobby.mode,
                round,
                &self.participants,
                &self.answers,
                &self.votes,
            )
            .iter()
            .any(|p| p.is_automated),
            RoundStatus::Scoring => false,
        }
    }

    /// Arm the recovery timer while bots owe an answer or a vote
    fn schedule_recovery(&mut self, lobby: &Lobby, round: &Round) {
        if !self.automated_work_pending(lobby, round) {
            self.recover_at = None;
        } else if self.recover_at.is_none() {
            self.recover_at =
                Some(Instant::now() + Duration::from_secs(self.session.config.recovery_seconds));
        }
    }

    /// The client that should have generated the bots' work has not delivered
    /// it in time; generate whatever is still missing from here
    async fn on_recovery_due(&mut self) -> Flow {
        let Some((lobby, round)) = self.current() else {
            return Flow::Continue;
        };
        if !self.automated_work_pending(&lobby, &round) {
            return Flow::Continue;
        }

        tracing::info!(target: LOG_TARGET, round_id = %round.id, status = ?round.status, "Generating missing automated work");
        let result = match round.status {
            RoundStatus::Answering => self.session.provision_automated_answers(&lobby, &round).await,
            RoundStatus::Voting => self.session.provision_automated_votes(&lobby, &round).await,
            RoundStatus::Scoring => Ok(()),
        };
        if let Err(e) = result {
            tracing::warn!(target: LOG_TARGET, round_id = %round.id, "Recovery failed: {}", e);
            let backoff = self.session.config.recovery_seconds.max(1);
            self.recover_at = Some(Instant::now() + Duration::from_secs(backoff));
        }
        Flow::Continue
    }

    async fn on_reveal_elapsed(&mut self) -> Flow {
        let (Some(lobby), Some(round)) = (&self.lobby, &self.round) else {
            return Flow::Continue;
        };
        if round.status != RoundStatus::Scoring || round.number != lobby.current_round {
            return Flow::Continue;
        }

        let lobby_id = lobby.id.clone();
        let next = round.number + 1;
        if let Err(e) = self.session.advance_round(&lobby_id, next).await {
            tracing::warn!(target: LOG_TARGET, lobby_id = %lobby_id, next, "Advance failed: {}", e);
        }
        Flow::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::PromptDeck;
    use crate::state::test_support::{session, session_configured};
    use crate::state::LobbyOptions;

    fn options(mode: GameMode, models: &[&str]) -> LobbyOptions {
        LobbyOptions {
            answer_kind: AnswerKind::Text,
            mode,
            automated_models: models.iter().map(|m| m.to_string()).collect(),
        }
    }

    fn recovering() -> Session {
        let config = GameConfig {
            rounds: 2,
            recovery_seconds: 0,
            ..GameConfig::default()
        };
        session_configured(config, "1")
    }

    /// Replica whose events nobody reads
    fn follow(session: &Session, lobby_id: &str) -> Vec<JoinHandle<()>> {
        let (tx, mut rx) = mpsc::channel(16);
        vec![
            GameClient::new(session.clone(), lobby_id.to_string(), tx).spawn(),
            tokio::spawn(async move { while rx.recv().await.is_some() {} }),
        ]
    }

    async fn wait_status(session: &Session, lobby_id: &str, status: RoundStatus) -> Round {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(round) = session.store.find_round(lobby_id, 1).await.unwrap() {
                    if round.status == status {
                        return round;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("round never reached the expected status")
    }

    /// Start round 1 by hand, without generating anything for the bots
    async fn start_bare(session: &Session, lobby: &Lobby) -> Round {
        let prompt = Prompt {
            id: new_id(),
            text: "The worst thing to find in a sandwich".to_string(),
            created_at: now(),
        };
        session.store.insert_prompt(prompt.clone()).await.unwrap();
        let started = LobbyProgress {
            status: LobbyStatus::Started,
            current_round: 1,
        };
        session
            .store
            .compare_and_set_lobby(&lobby.id, lobby.progress(), started, Some(vec![prompt.id.clone()]))
            .await
            .unwrap();
        let round = Round {
            id: new_id(),
            lobby_id: lobby.id.clone(),
            prompt_id: prompt.id,
            number: 1,
            status: RoundStatus::Answering,
            created_at: now(),
        };
        session.store.insert_round(round.clone()).await.unwrap();
        round
    }

    async fn next_matching<F>(rx: &mut mpsc::Receiver<ClientEvent>, mut pred: F) -> ClientEvent
    where
        F: FnMut(&ClientEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = rx.recv().await.expect("replica stopped");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    #[tokio::test]
    async fn test_replica_drives_answering_to_voting() {
        let session = session();
        let options = LobbyOptions {
            answer_kind: AnswerKind::Text,
            mode: GameMode::Multiplayer,
            automated_models: vec!["echo:bot".to_string()],
        };
        let (lobby, host) = session.create_lobby("u1", "Alice", options).await.unwrap();

        let (tx, mut rx) = mpsc::channel(64);
        let handle = GameClient::new(session.clone(), lobby.id.clone(), tx).spawn();

        session
            .start_game(&lobby.id, &host.id, &PromptDeck::builtin())
            .await
            .unwrap();

        let event = next_matching(&mut rx, |e| matches!(e, ClientEvent::Round { .. })).await;
        let ClientEvent::Round { round, prompt } = event else {
            unreachable!()
        };
        assert_eq!(round.status, RoundStatus::Answering);
        assert!(!prompt.is_empty());

        session
            .submit_answer(&round.id, &host.id, AnswerContent::Text("pancakes".to_string()))
            .await
            .unwrap();

        next_matching(&mut rx, |e| {
            matches!(e, ClientEvent::Round { round, .. } if round.status == RoundStatus::Voting)
        })
        .await;

        handle.abort();
    }

    #[tokio::test]
    async fn test_replica_reports_lobby_closed() {
        let session = session();
        let options = LobbyOptions {
            answer_kind: AnswerKind::Text,
            mode: GameMode::Multiplayer,
            automated_models: Vec::new(),
        };
        let (lobby, host) = session.create_lobby("u1", "Alice", options).await.unwrap();

        let (tx, mut rx) = mpsc::channel(64);
        let handle = GameClient::new(session.clone(), lobby.id.clone(), tx).spawn();
        next_matching(&mut rx, |e| matches!(e, ClientEvent::Lobby(_))).await;

        session.leave_lobby(&host.id).await.unwrap();
        next_matching(&mut rx, |e| matches!(e, ClientEvent::LobbyClosed)).await;

        // The replica stops on its own
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("replica did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_late_replicas_wait_for_a_loaded_view() {
        let session = session();
        let (lobby, host) = session
            .create_lobby("u1", "Alice", options(GameMode::Multiplayer, &["echo:bot"]))
            .await
            .unwrap();
        let (_, bob) = session.join_lobby(&lobby.code, "u2", "Bob").await.unwrap();
        session
            .start_game(&lobby.id, &host.id, &PromptDeck::builtin())
            .await
            .unwrap();

        // Followers arriving mid-round see the queries fill in one by one
        let mut handles = Vec::new();
        for _ in 0..10 {
            let (tx, mut rx) = mpsc::channel(64);
            handles.push(GameClient::new(session.clone(), lobby.id.clone(), tx).spawn());
            next_matching(&mut rx, |e| matches!(e, ClientEvent::Votes { .. })).await;
            handles.push(tokio::spawn(async move { while rx.recv().await.is_some() {} }));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        let round = session.store.find_round(&lobby.id, 1).await.unwrap().unwrap();
        assert_eq!(round.status, RoundStatus::Answering);
        assert_eq!(session.store.list_answers(&round.id).await.unwrap().len(), 1);

        for (p, text) in [(&host, "pickles"), (&bob, "a sock")] {
            session
                .submit_answer(&round.id, &p.id, AnswerContent::Text(text.to_string()))
                .await
                .unwrap();
        }
        wait_status(&session, &lobby.id, RoundStatus::Voting).await;

        for handle in handles {
            handle.abort();
        }
    }

    #[tokio::test]
    async fn test_replica_generates_missing_bot_answer() {
        let session = recovering();
        let (lobby, host) = session
            .create_lobby("u1", "Alice", options(GameMode::Multiplayer, &["echo:bot"]))
            .await
            .unwrap();
        let round = start_bare(&session, &lobby).await;
        let handles = follow(&session, &lobby.id);

        session
            .submit_answer(&round.id, &host.id, AnswerContent::Text("pickles".to_string()))
            .await
            .unwrap();
        let round = wait_status(&session, &lobby.id, RoundStatus::Voting).await;

        let answers = session.store.list_answers(&round.id).await.unwrap();
        assert_eq!(answers.len(), 2);
        let bot_answer = answers.iter().find(|a| a.is_automated).unwrap();
        assert_eq!(bot_answer.content, AnswerContent::Text("answer from echo:bot".to_string()));

        handles.iter().for_each(JoinHandle::abort);
    }

    #[tokio::test]
    async fn test_replica_casts_missing_bot_votes() {
        let session = recovering();
        let (lobby, host) = session
            .create_lobby("u1", "Solo", options(GameMode::SinglePlayer, &["echo:one", "echo:two"]))
            .await
            .unwrap();
        session
            .start_game(&lobby.id, &host.id, &PromptDeck::builtin())
            .await
            .unwrap();
        let round = session.store.find_round(&lobby.id, 1).await.unwrap().unwrap();
        session
            .submit_answer(&round.id, &host.id, AnswerContent::Text("mine".to_string()))
            .await
            .unwrap();

        // VOTING entered without its entry action
        session
            .store
            .compare_and_set_round_status(&round.id, RoundStatus::Answering, RoundStatus::Voting)
            .await
            .unwrap();
        let handles = follow(&session, &lobby.id);

        wait_status(&session, &lobby.id, RoundStatus::Scoring).await;
        assert_eq!(session.store.list_votes(&round.id).await.unwrap().len(), 2);

        handles.iter().for_each(JoinHandle::abort);
    }

    #[tokio::test]
    async fn test_replica_settles_scores_it_did_not_transition() {
        let session = session();
        let (lobby, host) = session
            .create_lobby("u1", "Alice", options(GameMode::Multiplayer, &["echo:bot"]))
            .await
            .unwrap();
        let (_, bob) = session.join_lobby(&lobby.code, "u2", "Bob").await.unwrap();
        session
            .start_game(&lobby.id, &host.id, &PromptDeck::builtin())
            .await
            .unwrap();
        let round = session.store.find_round(&lobby.id, 1).await.unwrap().unwrap();
        for (p, text) in [(&host, "pickles"), (&bob, "a sock")] {
            session
                .submit_answer(&round.id, &p.id, AnswerContent::Text(text.to_string()))
                .await
                .unwrap();
        }
        session
            .store
            .compare_and_set_round_status(&round.id, RoundStatus::Answering, RoundStatus::Voting)
            .await
            .unwrap();
        let answers = session.store.list_answers(&round.id).await.unwrap();
        let bot_answer = answers.iter().find(|a| a.is_automated).unwrap();
        session.submit_vote(&round.id, &host.id, &bot_answer.id).await.unwrap();

        // SCORING reached, but the scores were never written
        session
            .store
            .compare_and_set_round_status(&round.id, RoundStatus::Voting, RoundStatus::Scoring)
            .await
            .unwrap();
        let handles = follow(&session, &lobby.id);

        let voter_points = session.config.scoring.voter;
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let alice = session.store.get_participant(&host.id).await.unwrap().unwrap();
                if alice.score == voter_points {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("scores were never applied");

        handles.iter().for_each(JoinHandle::abort);
    }
}
