//! Test fixtures shared by the integration tests

#![allow(dead_code)]

use debate_arena::amqp::publisher::MockEventPublisher;
use debate_arena::rating::glicko2::Glicko2RatingCalculator;
use debate_arena::resolution::judge::MockJudgeOracle;
use debate_arena::resolution::resolver::Resolver;
use debate_arena::resolution::transcript::InMemoryTranscriptStore;
use debate_arena::session::{InMemorySessionStore, ManagerSettings, Session, SessionManager};
use debate_arena::types::Vote;
use std::sync::Arc;
use std::time::Duration;

/// Identity the AI opponent posts and wins under in tests
pub const AI_IDENTITY: &str = "ai-opponent";

/// A complete orchestrator over in-memory collaborators
pub struct TestSystem {
    pub manager: SessionManager,
    pub store: Arc<InMemorySessionStore>,
    pub oracle: Arc<MockJudgeOracle>,
    pub publisher: Arc<MockEventPublisher>,
    pub transcripts: Arc<InMemoryTranscriptStore>,
}

impl TestSystem {
    /// System whose Judge always answers for `winner`
    pub fn new(winner: &str) -> Self {
        Self::with_settings(MockJudgeOracle::with_winner(winner), ManagerSettings::default())
    }

    pub fn with_settings(oracle: MockJudgeOracle, settings: ManagerSettings) -> Self {
        let store = Arc::new(InMemorySessionStore::new());
        let oracle = Arc::new(oracle);
        let publisher = Arc::new(MockEventPublisher::new());
        let transcripts = Arc::new(InMemoryTranscriptStore::new());
        let resolver = Resolver::new(
            oracle.clone(),
            transcripts.clone(),
            Duration::from_secs(5),
            AI_IDENTITY,
        );
        let manager = SessionManager::new(
            store.clone(),
            resolver,
            Arc::new(Glicko2RatingCalculator::default()),
            publisher.clone(),
            transcripts.clone(),
            settings,
        );

        Self {
            manager,
            store,
            oracle,
            publisher,
            transcripts,
        }
    }

    /// Pair `a` and `b` into an active human session
    pub async fn active_pair(&self, a: &str, b: &str) -> Session {
        self.manager.request_match(a, false, None).await.unwrap();
        let result = self.manager.request_match(b, false, None).await.unwrap();
        assert!(result.is_paired(), "{} should pair with {}", b, a);
        result.into_session()
    }

    /// Pair `a` and `b`, exchange a line each and end the debate
    pub async fn voting_pair(&self, a: &str, b: &str) -> Session {
        let session = self.active_pair(a, b).await;
        self.manager
            .append_message(session.id, a, "Opening statement")
            .await
            .unwrap();
        self.manager
            .append_message(session.id, b, "Rebuttal")
            .await
            .unwrap();
        self.manager.end_session(session.id, a).await.unwrap();
        session
    }

    /// Run a whole debate ending in votes `(vote_a, vote_b)`
    pub async fn debate(&self, a: &str, b: &str, vote_a: Vote, vote_b: Vote) -> Session {
        let session = self.voting_pair(a, b).await;
        self.manager.submit_vote(session.id, a, vote_a).await.unwrap();
        self.manager.submit_vote(session.id, b, vote_b).await.unwrap();
        self.manager.get_session(session.id).unwrap()
    }
}

/// Settings with short timers for paused-clock tests
pub fn quick_settings() -> ManagerSettings {
    ManagerSettings {
        fallback_delay: Duration::from_secs(15),
        vote_timeout: Duration::from_secs(60),
        max_wait: Duration::from_secs(300),
        ..ManagerSettings::default()
    }
}
