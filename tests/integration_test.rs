use async_trait::async_trait;
use genuine::client::{ClientEvent, GameClient};
use genuine::error::GameError;
use genuine::game::{PromptDeck, Transition};
use genuine::llm::{AnswerGenerator, LlmError, LlmResult, VoterOracle};
use genuine::state::{LobbyOptions, Session};
use genuine::store::{InMemoryStore, WriteOutcome};
use genuine::types::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Answers "<model> says hi", counting every call. "down:" models fail,
/// "slow:" models take a while.
#[derive(Default)]
struct CountingGenerator {
    calls: AtomicUsize,
}

#[async_trait]
impl AnswerGenerator for CountingGenerator {
    async fn generate(&self, _prompt: &str, model_id: &str, kind: AnswerKind) -> LlmResult<AnswerContent> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if model_id.starts_with("down:") {
            return Err(LlmError::Timeout(Duration::from_secs(30)));
        }
        if model_id.starts_with("slow:") {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        Ok(match kind {
            AnswerKind::Text => AnswerContent::Text(format!("{} says hi", model_id)),
            AnswerKind::Drawing => AnswerContent::Drawing("<svg><line/></svg>".to_string()),
        })
    }
}

/// Replies with the same text to every question, counting every call
struct ScriptedOracle {
    reply: &'static str,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    fn new(reply: &'static str) -> Self {
        Self {
            reply,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VoterOracle for ScriptedOracle {
    async fn pick_answer(
        &self,
        _prompt: &str,
        _candidates: &[String],
        _model_id: &str,
        _target: AuthorKind,
    ) -> LlmResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.to_string())
    }
}

struct Harness {
    session: Session,
    generator: Arc<CountingGenerator>,
    oracle: Arc<ScriptedOracle>,
    replicas: Vec<JoinHandle<()>>,
}

impl Harness {
    fn new(config: GameConfig, oracle_reply: &'static str) -> Self {
        let generator = Arc::new(CountingGenerator::default());
        let oracle = Arc::new(ScriptedOracle::new(oracle_reply));
        let session = Session::new(
            Arc::new(InMemoryStore::new()),
            config,
            generator.clone(),
            oracle.clone(),
        );
        Self {
            session,
            generator,
            oracle,
            replicas: Vec::new(),
        }
    }

    /// Follow the lobby with a replica whose events are discarded
    fn spawn_replica(&mut self, lobby_id: &str) {
        let (tx, mut rx) = mpsc::channel(16);
        self.replicas
            .push(GameClient::new(self.session.clone(), lobby_id.to_string(), tx).spawn());
        self.replicas.push(tokio::spawn(async move { while rx.recv().await.is_some() {} }));
    }

    /// Follow the lobby with a replica whose events the test reads
    fn watch(&mut self, lobby_id: &str) -> mpsc::Receiver<ClientEvent> {
        let (tx, rx) = mpsc::channel(256);
        self.replicas
            .push(GameClient::new(self.session.clone(), lobby_id.to_string(), tx).spawn());
        rx
    }

    async fn wait_round(&self, lobby_id: &str, number: u32, status: RoundStatus) -> Round {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(round) = self.session.store.find_round(lobby_id, number).await.unwrap() {
                if round.status == status {
                    return round;
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "round {} never reached {:?}",
                number,
                status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn wait_lobby(&self, lobby_id: &str, status: LobbyStatus) -> Lobby {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(lobby) = self.session.store.get_lobby(lobby_id).await.unwrap() {
                if lobby.status == status {
                    return lobby;
                }
            }
            assert!(tokio::time::Instant::now() < deadline, "lobby never reached {:?}", status);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn answer_of(&self, round: &Round, participant_id: &str) -> Answer {
        self.session
            .store
            .list_answers(&round.id)
            .await
            .unwrap()
            .into_iter()
            .find(|a| a.participant_id == participant_id)
            .expect("participant has no answer")
    }

    async fn score(&self, participant_id: &str) -> u32 {
        self.session
            .store
            .get_participant(participant_id)
            .await
            .unwrap()
            .expect("participant missing")
            .score
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        for replica in &self.replicas {
            replica.abort();
        }
    }
}

fn text(s: &str) -> AnswerContent {
    AnswerContent::Text(s.to_string())
}

fn multiplayer(models: &[&str]) -> LobbyOptions {
    LobbyOptions {
        answer_kind: AnswerKind::Text,
        mode: GameMode::Multiplayer,
        automated_models: models.iter().map(|m| m.to_string()).collect(),
    }
}

/// Three humans and one bot play two rounds on four replicas, one of which
/// only starts following once round 1 is open
#[tokio::test]
async fn test_full_game_flow() {
    let config = GameConfig {
        rounds: 2,
        reveal_seconds: 0,
        auto_advance: true,
        ..GameConfig::default()
    };
    let mut h = Harness::new(config, "1");
    let session = h.session.clone();

    let (lobby, alice) = session
        .create_lobby("u-alice", "Alice", multiplayer(&["fake:bot"]))
        .await
        .unwrap();
    let (_, bob) = session.join_lobby(&lobby.code, "u-bob", "Bob").await.unwrap();
    let (_, carol) = session
        .join_lobby(&lobby.code.to_lowercase(), "u-carol", "Carol")
        .await
        .unwrap();
    for _ in 0..3 {
        h.spawn_replica(&lobby.id);
    }

    let outcome = session
        .start_game(&lobby.id, &alice.id, &PromptDeck::builtin())
        .await
        .unwrap();
    assert_eq!(outcome, WriteOutcome::Applied);

    let bot = session
        .store
        .list_participants(&lobby.id)
        .await
        .unwrap()
        .into_iter()
        .find(|p| p.is_automated)
        .unwrap();

    for number in 1..=2 {
        let round = h.wait_round(&lobby.id, number, RoundStatus::Answering).await;
        if number == 1 {
            h.spawn_replica(&lobby.id);
        }
        for (p, answer) in [(&alice, "Tacos"), (&bob, "nachos")] {
            session.submit_answer(&round.id, &p.id, text(answer)).await.unwrap();
        }

        // Still waiting on Carol, whoever joined late
        tokio::time::sleep(Duration::from_millis(50)).await;
        let pending = session.store.get_round(&round.id).await.unwrap().unwrap();
        assert_eq!(pending.status, RoundStatus::Answering);
        session.submit_answer(&round.id, &carol.id, text("Burritos!")).await.unwrap();

        let round = h.wait_round(&lobby.id, number, RoundStatus::Voting).await;
        let bot_answer = h.answer_of(&round, &bot.id).await;
        assert_eq!(bot_answer.content, text("fake:bot says hi"));
        let alice_answer = h.answer_of(&round, &alice.id).await;

        // Alice and Carol spot the bot, Bob falls for Alice
        session.submit_vote(&round.id, &alice.id, &bot_answer.id).await.unwrap();
        session.submit_vote(&round.id, &bob.id, &alice_answer.id).await.unwrap();
        session.submit_vote(&round.id, &carol.id, &bot_answer.id).await.unwrap();

        h.wait_round(&lobby.id, number, RoundStatus::Scoring).await;
    }

    let lobby = h.wait_lobby(&lobby.id, LobbyStatus::Completed).await;
    assert_eq!(lobby.current_round, 2);
    assert!(session.store.find_round(&lobby.id, 3).await.unwrap().is_none());

    assert_eq!(h.score(&alice.id).await, 2 * (100 + 50));
    assert_eq!(h.score(&bob.id).await, 0);
    assert_eq!(h.score(&carol.id).await, 2 * 100);
    assert_eq!(h.score(&bot.id).await, 2 * 50);

    // One generation per bot per round, however many replicas raced
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 2);

    // A completed lobby can no longer be joined
    assert!(matches!(
        session.join_lobby(&lobby.code, "u-dave", "Dave").await,
        Err(GameError::LobbyNotFound)
    ));
}

/// Many clients proposing the same transitions at once
#[tokio::test]
async fn test_concurrent_transitions_apply_once() {
    let mut h = Harness::new(GameConfig::default(), "2");
    let session = h.session.clone();

    let options = LobbyOptions {
        answer_kind: AnswerKind::Text,
        mode: GameMode::SinglePlayer,
        automated_models: vec!["fake:a".to_string(), "fake:b".to_string(), "fake:c".to_string()],
    };
    let (lobby, solo) = session.create_lobby("u1", "Solo", options).await.unwrap();

    // Duplicate starts: one applies
    let deck = PromptDeck::builtin();
    let starts =
        futures::future::join_all((0..5).map(|_| session.start_game(&lobby.id, &solo.id, &deck)))
            .await;
    let applied = starts
        .iter()
        .filter(|r| matches!(r, Ok(WriteOutcome::Applied)))
        .count();
    assert_eq!(applied, 1);
    assert_eq!(session.store.list_rounds(&lobby.id).await.unwrap().len(), 1);
    assert_eq!(h.generator.calls.load(Ordering::SeqCst), 3);

    let round = session.store.find_round(&lobby.id, 1).await.unwrap().unwrap();
    session.submit_answer(&round.id, &solo.id, text("mine")).await.unwrap();

    let to_voting = Transition {
        round_id: round.id.clone(),
        from: RoundStatus::Answering,
        to: RoundStatus::Voting,
    };
    let outcomes =
        futures::future::join_all((0..8).map(|_| session.apply_transition(&to_voting))).await;
    assert_eq!(
        outcomes
            .iter()
            .filter(|r| matches!(r, Ok(WriteOutcome::Applied)))
            .count(),
        1
    );

    // Only the winner consulted the oracle, once per bot
    assert_eq!(h.oracle.calls.load(Ordering::SeqCst), 3);
    let votes = session.store.list_votes(&round.id).await.unwrap();
    assert_eq!(votes.len(), 3);

    let to_scoring = Transition {
        round_id: round.id.clone(),
        from: RoundStatus::Voting,
        to: RoundStatus::Scoring,
    };
    let outcomes =
        futures::future::join_all((0..8).map(|_| session.apply_transition(&to_scoring))).await;
    assert!(outcomes.iter().all(|r| r.is_ok()));

    let totals: u32 = session
        .store
        .list_participants(&lobby.id)
        .await
        .unwrap()
        .iter()
        .map(|p| p.score)
        .sum();
    let once = session
        .apply_scores(&session.store.get_lobby(&lobby.id).await.unwrap().unwrap())
        .await
        .unwrap();
    assert_eq!(totals, once.iter().map(|t| t.score).sum::<u32>());

    // Replicas arriving late do not move anything
    h.spawn_replica(&lobby.id);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let round = session.store.get_round(&round.id).await.unwrap().unwrap();
    assert_eq!(round.status, RoundStatus::Scoring);
    assert_eq!(session.store.list_votes(&round.id).await.unwrap().len(), 3);
}

/// Bots vote in single-player even when the oracle's reply makes no sense
#[tokio::test]
async fn test_single_player_with_unparseable_oracle() {
    let config = GameConfig {
        rounds: 1,
        auto_advance: false,
        ..GameConfig::default()
    };
    let mut h = Harness::new(config, "hmm, hard to say");
    let session = h.session.clone();

    let options = LobbyOptions {
        answer_kind: AnswerKind::Text,
        mode: GameMode::SinglePlayer,
        automated_models: vec!["fake:a".to_string(), "down:b".to_string()],
    };
    let (lobby, solo) = session.create_lobby("u1", "Solo", options).await.unwrap();
    h.spawn_replica(&lobby.id);
    session
        .start_game(&lobby.id, &solo.id, &PromptDeck::builtin())
        .await
        .unwrap();

    let round = h.wait_round(&lobby.id, 1, RoundStatus::Answering).await;
    let answers = session.store.list_answers(&round.id).await.unwrap();
    assert!(answers
        .iter()
        .any(|a| a.content == text(genuine::llm::FALLBACK_TEXT_ANSWER)));

    session.submit_answer(&round.id, &solo.id, text("my own words")).await.unwrap();
    let round = h.wait_round(&lobby.id, 1, RoundStatus::Scoring).await;

    let votes = session.store.list_votes(&round.id).await.unwrap();
    let answers = session.store.list_answers(&round.id).await.unwrap();
    assert_eq!(votes.len(), 2);
    for vote in &votes {
        let picked = answers.iter().find(|a| a.id == vote.answer_id).unwrap();
        assert_ne!(picked.participant_id, vote.participant_id);
    }

    // The human cannot vote in this mode
    assert!(matches!(
        session.submit_vote(&round.id, &solo.id, &answers[0].id).await,
        Err(GameError::WrongPhase { .. }) | Err(GameError::Invalid(_))
    ));

    // Without auto-advance, the round waits for an explicit request
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        session.store.get_lobby(&lobby.id).await.unwrap().unwrap().status,
        LobbyStatus::Started
    );
    assert_eq!(session.advance_round(&lobby.id, 2).await.unwrap(), WriteOutcome::Applied);
    assert_eq!(session.advance_round(&lobby.id, 2).await.unwrap(), WriteOutcome::Skipped);
    h.wait_lobby(&lobby.id, LobbyStatus::Completed).await;
}

/// The client opening a round goes away while its bot is still generating
#[tokio::test]
async fn test_bot_answer_survives_opener_abort() {
    let config = GameConfig {
        rounds: 1,
        auto_advance: false,
        recovery_seconds: 1,
        ..GameConfig::default()
    };
    let mut h = Harness::new(config, "1");
    let session = h.session.clone();

    let (lobby, alice) = session
        .create_lobby("u-alice", "Alice", multiplayer(&["slow:bot"]))
        .await
        .unwrap();
    h.spawn_replica(&lobby.id);

    let opener = {
        let session = session.clone();
        let lobby_id = lobby.id.clone();
        let alice_id = alice.id.clone();
        tokio::spawn(async move {
            session
                .start_game(&lobby_id, &alice_id, &PromptDeck::builtin())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    opener.abort();

    // The round exists, its bot answer was never written
    let round = h.wait_round(&lobby.id, 1, RoundStatus::Answering).await;
    assert!(session.store.list_answers(&round.id).await.unwrap().is_empty());

    session.submit_answer(&round.id, &alice.id, text("mine")).await.unwrap();
    let round = h.wait_round(&lobby.id, 1, RoundStatus::Voting).await;

    let answers = session.store.list_answers(&round.id).await.unwrap();
    assert_eq!(answers.len(), 2);
    let bot_answer = answers.iter().find(|a| a.is_automated).unwrap();
    assert_eq!(bot_answer.content, text("slow:bot says hi"));
}

/// A participant leaving mid-round lets the others carry on
#[tokio::test]
async fn test_departure_completes_phase() {
    let mut h = Harness::new(GameConfig::default(), "1");
    let session = h.session.clone();

    let (lobby, alice) = session.create_lobby("u1", "Alice", multiplayer(&[])).await.unwrap();
    let (_, bob) = session.join_lobby(&lobby.code, "u2", "Bob").await.unwrap();
    let (_, carol) = session.join_lobby(&lobby.code, "u3", "Carol").await.unwrap();
    h.spawn_replica(&lobby.id);
    session
        .start_game(&lobby.id, &alice.id, &PromptDeck::builtin())
        .await
        .unwrap();

    let round = h.wait_round(&lobby.id, 1, RoundStatus::Answering).await;
    session.submit_answer(&round.id, &alice.id, text("one")).await.unwrap();
    session.submit_answer(&round.id, &bob.id, text("two")).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let still = session.store.get_round(&round.id).await.unwrap().unwrap();
    assert_eq!(still.status, RoundStatus::Answering);

    session.leave_lobby(&carol.id).await.unwrap();
    h.wait_round(&lobby.id, 1, RoundStatus::Voting).await;

    // A second leave of the same participant is a no-op
    session.leave_lobby(&carol.id).await.unwrap();
}

/// The host leaving deletes the lobby for everyone following it
#[tokio::test]
async fn test_host_leaving_closes_lobby() {
    let mut h = Harness::new(GameConfig::default(), "1");
    let session = h.session.clone();

    let (lobby, alice) = session
        .create_lobby("u1", "Alice", multiplayer(&["fake:bot"]))
        .await
        .unwrap();
    let (_, bob) = session.join_lobby(&lobby.code, "u2", "Bob").await.unwrap();
    let mut events = h.watch(&lobby.id);

    assert!(matches!(
        session.join_lobby(&lobby.code, "u3", "Bob").await,
        Err(GameError::NameTaken(_))
    ));

    session.leave_lobby(&alice.id).await.unwrap();

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            if matches!(event, ClientEvent::LobbyClosed) {
                return true;
            }
        }
        false
    })
    .await
    .expect("no lobby closed event");
    assert!(closed);

    assert!(session.store.get_participant(&bob.id).await.unwrap().is_none());
    assert!(matches!(
        session.lobby_snapshot(&lobby.code).await,
        Err(GameError::LobbyNotFound)
    ));
}

/// Rounds only ever move forward, one at a time
#[tokio::test]
async fn test_round_numbers_are_monotonic() {
    let config = GameConfig {
        rounds: 3,
        auto_advance: false,
        ..GameConfig::default()
    };
    let h = Harness::new(config, "1");
    let session = h.session.clone();

    let (lobby, alice) = session.create_lobby("u1", "Alice", multiplayer(&[])).await.unwrap();
    session
        .start_game(&lobby.id, &alice.id, &PromptDeck::builtin())
        .await
        .unwrap();

    // Round 1 is still answering
    assert!(session.advance_round(&lobby.id, 2).await.is_err());
    assert!(matches!(
        session.advance_round(&lobby.id, 3).await,
        Err(GameError::Invalid(_))
    ));

    let round = session.store.find_round(&lobby.id, 1).await.unwrap().unwrap();
    session.submit_answer(&round.id, &alice.id, text("solo")).await.unwrap();
    for (from, to) in [
        (RoundStatus::Answering, RoundStatus::Voting),
        (RoundStatus::Voting, RoundStatus::Scoring),
    ] {
        let transition = Transition {
            round_id: round.id.clone(),
            from,
            to,
        };
        assert_eq!(session.apply_transition(&transition).await.unwrap(), WriteOutcome::Applied);
    }

    // A stale proposal cannot rewind the round
    let stale = Transition {
        round_id: round.id.clone(),
        from: RoundStatus::Answering,
        to: RoundStatus::Voting,
    };
    assert_eq!(session.apply_transition(&stale).await.unwrap(), WriteOutcome::Skipped);

    assert_eq!(session.advance_round(&lobby.id, 2).await.unwrap(), WriteOutcome::Applied);
    let lobby = session.store.get_lobby(&lobby.id).await.unwrap().unwrap();
    assert_eq!(lobby.current_round, 2);
    let second = session.store.find_round(&lobby.id, 2).await.unwrap().unwrap();
    assert_eq!(second.status, RoundStatus::Answering);
    assert_ne!(second.prompt_id, round.prompt_id);
}
