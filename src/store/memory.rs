use super::*;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};

/// Change feed granularity: subscribers re-query when their table changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Table {
    Lobbies,
    Participants,
    Prompts,
    Rounds,
    Answers,
    Votes,
}

trait Record: Clone + Send + Sync + 'static {
    fn id(&self) -> &str;
}

macro_rules! impl_record {
    ($($ty:ty),*) => {
        $(impl Record for $ty {
            fn id(&self) -> &str {
                &self.id
            }
        })*
    };
}

impl_record!(Lobby, Participant, Prompt, Round, Answer, Vote);

type Map<V> = Arc<RwLock<HashMap<String, V>>>;

/// Process-local store shared by every client replica in this process
#[derive(Clone)]
pub struct InMemoryStore {
    lobbies: Map<Lobby>,
    participants: Map<Participant>,
    prompts: Map<Prompt>,
    rounds: Map<Round>,
    answers: Map<Answer>,
    votes: Map<Vote>,
    changes: broadcast::Sender<Table>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        let (changes, _rx) = broadcast::channel(256);
        Self {
            lobbies: Arc::new(RwLock::new(HashMap::new())),
            participants: Arc::new(RwLock::new(HashMap::new())),
            prompts: Arc::new(RwLock::new(HashMap::new())),
            rounds: Arc::new(RwLock::new(HashMap::new())),
            answers: Arc::new(RwLock::new(HashMap::new())),
            votes: Arc::new(RwLock::new(HashMap::new())),
            changes,
        }
    }

    fn notify(&self, table: Table) {
        // Ignore send errors (no live queries is fine)
        let _ = self.changes.send(table);
    }

    fn live<V, F>(&self, table: Table, map: &Map<V>, filter: F) -> Subscription<V>
    where
        V: Record,
        F: Fn(&V) -> bool + Send + Sync + 'static,
    {
        let query = LiveQuery {
            rx: self.changes.subscribe(),
            map: map.clone(),
            filter,
            table,
            primed: false,
        };

        stream::unfold(query, |mut query| async move {
            if query.primed {
                query.wait_for_change().await?;
            }
            query.primed = true;
            let items = select(&query.map, &query.filter).await;
            Some((items, query))
        })
        .boxed()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

struct LiveQuery<V, F> {
    rx: broadcast::Receiver<Table>,
    map: Map<V>,
    filter: F,
    table: Table,
    primed: bool,
}

impl<V, F> LiveQuery<V, F> {
    async fn wait_for_change(&mut self) -> Option<()> {
        loop {
            match self.rx.recv().await {
                Ok(table) if table == self.table => return Some(()),
                Ok(_) => continue,
                // Missed some notifications, re-query to catch up
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Live query lagged by {} changes", skipped);
                    return Some(());
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Matching records ordered by id
async fn select<V: Record>(map: &Map<V>, filter: impl Fn(&V) -> bool) -> Vec<V> {
    let mut items: Vec<V> = map
        .read()
        .await
        .values()
        .filter(|v| filter(v))
        .cloned()
        .collect();
    items.sort_by(|a, b| a.id().cmp(b.id()));
    items
}

#[async_trait]
impl ReactiveStore for InMemoryStore {
    async fn insert_lobby(&self, lobby: Lobby) -> StoreResult<()> {
        self.lobbies.write().await.insert(lobby.id.clone(), lobby);
        self.notify(Table::Lobbies);
        Ok(())
    }

    async fn get_lobby(&self, id: &str) -> StoreResult<Option<Lobby>> {
        Ok(self.lobbies.read().await.get(id).cloned())
    }

    async fn find_lobby_by_code(&self, code: &str) -> StoreResult<Option<Lobby>> {
        Ok(self
            .lobbies
            .read()
            .await
            .values()
            .find(|l| l.code == code && l.status.is_active())
            .cloned())
    }

    async fn compare_and_set_lobby(
        &self,
        id: &str,
        expected: LobbyProgress,
        next: LobbyProgress,
        prompt_ids: Option<Vec<PromptId>>,
    ) -> StoreResult<WriteOutcome> {
        {
            let mut lobbies = self.lobbies.write().await;
            let lobby = lobbies.get_mut(id).ok_or(StoreError::NotFound("lobby"))?;

            if lobby.progress() != expected {
                return Ok(WriteOutcome::Skipped);
            }

            lobby.status = next.status;
            lobby.current_round = next.current_round;
            if let Some(prompt_ids) = prompt_ids {
                lobby.prompt_ids = prompt_ids;
            }
        }

        self.notify(Table::Lobbies);
        Ok(WriteOutcome::Applied)
    }

    async fn delete_lobby(&self, id: &str) -> StoreResult<()> {
        // Tables are locked one after another, never nested
        self.lobbies.write().await.remove(id);
        self.participants
            .write()
            .await
            .retain(|_, p| p.lobby_id != id);

        let round_ids: Vec<RoundId> = {
            let mut rounds = self.rounds.write().await;
            let ids = rounds
                .values()
                .filter(|r| r.lobby_id == id)
                .map(|r| r.id.clone())
                .collect();
            rounds.retain(|_, r| r.lobby_id != id);
            ids
        };

        self.answers
            .write()
            .await
            .retain(|_, a| !round_ids.contains(&a.round_id));
        self.votes
            .write()
            .await
            .retain(|_, v| !round_ids.contains(&v.round_id));

        for table in [
            Table::Lobbies,
            Table::Participants,
            Table::Rounds,
            Table::Answers,
            Table::Votes,
        ] {
            self.notify(table);
        }
        Ok(())
    }

    async fn insert_participant(&self, participant: Participant) -> StoreResult<()> {
        self.participants
            .write()
            .await
            .insert(participant.id.clone(), participant);
        self.notify(Table::Participants);
        Ok(())
    }

    async fn get_participant(&self, id: &str) -> StoreResult<Option<Participant>> {
        Ok(self.participants.read().await.get(id).cloned())
    }

    async fn list_participants(&self, lobby_id: &str) -> StoreResult<Vec<Participant>> {
        Ok(select(&self.participants, |p: &Participant| p.lobby_id == lobby_id).await)
    }

    async fn raise_score(&self, participant_id: &str, score: u32) -> StoreResult<WriteOutcome> {
        {
            let mut participants = self.participants.write().await;
            let participant = participants
                .get_mut(participant_id)
                .ok_or(StoreError::NotFound("participant"))?;

            if score <= participant.score {
                return Ok(WriteOutcome::Skipped);
            }
            participant.score = score;
        }

        self.notify(Table::Participants);
        Ok(WriteOutcome::Applied)
    }

    async fn delete_participant(&self, id: &str) -> StoreResult<()> {
        if self.participants.write().await.remove(id).is_none() {
            return Ok(());
        }
        self.answers
            .write()
            .await
            .retain(|_, a| a.participant_id != id);
        self.votes.write().await.retain(|_, v| v.participant_id != id);

        self.notify(Table::Participants);
        self.notify(Table::Answers);
        self.notify(Table::Votes);
        Ok(())
    }

    async fn insert_prompt(&self, prompt: Prompt) -> StoreResult<()> {
        self.prompts.write().await.insert(prompt.id.clone(), prompt);
        self.notify(Table::Prompts);
        Ok(())
    }

    async fn get_prompt(&self, id: &str) -> StoreResult<Option<Prompt>> {
        Ok(self.prompts.read().await.get(id).cloned())
    }

    async fn insert_round(&self, round: Round) -> StoreResult<WriteOutcome> {
        {
            let mut rounds = self.rounds.write().await;
            if rounds
                .values()
                .any(|r| r.lobby_id == round.lobby_id && r.number == round.number)
            {
                return Ok(WriteOutcome::Skipped);
            }
            rounds.insert(round.id.clone(), round);
        }

        self.notify(Table::Rounds);
        Ok(WriteOutcome::Applied)
    }

    async fn get_round(&self, id: &str) -> StoreResult<Option<Round>> {
        Ok(self.rounds.read().await.get(id).cloned())
    }

    async fn find_round(&self, lobby_id: &str, number: u32) -> StoreResult<Option<Round>> {
        Ok(self
            .rounds
            .read()
            .await
            .values()
            .find(|r| r.lobby_id == lobby_id && r.number == number)
            .cloned())
    }

    async fn list_rounds(&self, lobby_id: &str) -> StoreResult<Vec<Round>> {
        let mut rounds = select(&self.rounds, |r: &Round| r.lobby_id == lobby_id).await;
        rounds.sort_by_key(|r| r.number);
        Ok(rounds)
    }

    async fn compare_and_set_round_status(
        &self,
        id: &str,
        from: RoundStatus,
        to: RoundStatus,
    ) -> StoreResult<WriteOutcome> {
        {
            let mut rounds = self.rounds.write().await;
            let round = rounds.get_mut(id).ok_or(StoreError::NotFound("round"))?;

            if round.status != from {
                return Ok(WriteOutcome::Skipped);
            }
            round.status = to;
        }

        self.notify(Table::Rounds);
        Ok(WriteOutcome::Applied)
    }

    async fn insert_answer(&self, answer: Answer) -> StoreResult<WriteOutcome> {
        {
            let mut answers = self.answers.write().await;
            if answers.values().any(|a| {
                a.round_id == answer.round_id && a.participant_id == answer.participant_id
            }) {
                return Ok(WriteOutcome::Skipped);
            }
            answers.insert(answer.id.clone(), answer);
        }

        self.notify(Table::Answers);
        Ok(WriteOutcome::Applied)
    }

    async fn list_answers(&self, round_id: &str) -> StoreResult<Vec<Answer>> {
        Ok(select(&self.answers, |a: &Answer| a.round_id == round_id).await)
    }

    async fn insert_vote(&self, vote: Vote) -> StoreResult<WriteOutcome> {
        {
            let mut votes = self.votes.write().await;
            if votes
                .values()
                .any(|v| v.round_id == vote.round_id && v.participant_id == vote.participant_id)
            {
                return Ok(WriteOutcome::Skipped);
            }
            votes.insert(vote.id.clone(), vote);
        }

        self.notify(Table::Votes);
        Ok(WriteOutcome::Applied)
    }

    async fn list_votes(&self, round_id: &str) -> StoreResult<Vec<Vote>> {
        Ok(select(&self.votes, |v: &Vote| v.round_id == round_id).await)
    }

    fn observe_lobby(&self, id: &str) -> Subscription<Lobby> {
        let id = id.to_string();
        self.live(Table::Lobbies, &self.lobbies, move |l: &Lobby| l.id == id)
    }

    fn observe_participants(&self, lobby_id: &str) -> Subscription<Participant> {
        let lobby_id = lobby_id.to_string();
        self.live(Table::Participants, &self.participants, move |p: &Participant| {
            p.lobby_id == lobby_id
        })
    }

    fn observe_round(&self, lobby_id: &str, number: u32) -> Subscription<Round> {
        let lobby_id = lobby_id.to_string();
        self.live(Table::Rounds, &self.rounds, move |r: &Round| {
            r.lobby_id == lobby_id && r.number == number
        })
    }

    fn observe_answers(&self, round_id: &str) -> Subscription<Answer> {
        let round_id = round_id.to_string();
        self.live(Table::Answers, &self.answers, move |a: &Answer| {
            a.round_id == round_id
        })
    }

    fn observe_votes(&self, round_id: &str) -> Subscription<Vote> {
        let round_id = round_id.to_string();
        self.live(Table::Votes, &self.votes, move |v: &Vote| v.round_id == round_id)
    }
}
