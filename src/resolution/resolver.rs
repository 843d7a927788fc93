//! Vote and arbitration resolver
//!
//! One resolution path for both session kinds. Human pairs that agree are
//! settled from their votes; everything else goes to the Judge oracle.
//! Oracle failures never surface: they resolve as a plain draw.

use crate::error::{DebateError, Result};
use crate::metrics::MetricsCollector;
use crate::resolution::judge::{JudgeOracle, JudgeRequest, Speaker, TranscriptLine};
use crate::resolution::judgment::{parse_judgment, JudgedWinner, Judgment};
use crate::resolution::transcript::TranscriptSource;
use crate::session::record::{Session, SessionKind};
use crate::types::{Outcome, UserId, Vote};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Resolved result of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub outcome: Outcome,
    pub winner_id: Option<UserId>,
    /// Present when the Judge was consulted (or stood in for)
    pub judgment: Option<Judgment>,
}

/// Outcome of two votes that agree, `None` when they disagree
///
/// Each vote is from its caster's perspective: A saying "self" and B saying
/// "opponent" both mean A won.
pub fn agreement(vote_a: Vote, vote_b: Vote) -> Option<Outcome> {
    match (vote_a, vote_b) {
        (Vote::Myself, Vote::Opponent) => Some(Outcome::AWins),
        (Vote::Opponent, Vote::Myself) => Some(Outcome::BWins),
        (Vote::Draw, Vote::Draw) => Some(Outcome::Draw),
        _ => None,
    }
}

enum Arbitration {
    Judged(Judgment),
    Unavailable(String),
}

pub struct Resolver {
    oracle: Arc<dyn JudgeOracle>,
    transcripts: Arc<dyn TranscriptSource>,
    oracle_timeout: Duration,
    ai_identity: UserId,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Resolver {
    pub fn new(
        oracle: Arc<dyn JudgeOracle>,
        transcripts: Arc<dyn TranscriptSource>,
        oracle_timeout: Duration,
        ai_identity: impl Into<UserId>,
    ) -> Self {
        Self {
            oracle,
            transcripts,
            oracle_timeout,
            ai_identity: ai_identity.into(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn ai_identity(&self) -> &str {
        &self.ai_identity
    }

    /// Determine outcome and winner of `session`
    ///
    /// Does not write anything; the caller commits the verdict.
    pub async fn resolve(&self, session: &Session) -> Result<Verdict> {
        match session.kind() {
            SessionKind::HumanPair => self.resolve_human_pair(session).await,
            SessionKind::AiOpponent => self.resolve_ai_opponent(session).await,
        }
    }

    async fn resolve_human_pair(&self, session: &Session) -> Result<Verdict> {
        if session.participant_b_id.is_none() {
            return Err(DebateError::InternalError {
                message: format!("Session {} has no participant B to resolve", session.id),
            });
        }

        if let Some((vote_a, vote_b)) = session.both_votes() {
            if let Some(outcome) = agreement(vote_a, vote_b) {
                info!(
                    "Session {} resolved by agreement: {:?}/{:?} -> {}",
                    session.id, vote_a, vote_b, outcome
                );
                return Ok(self.verdict(session, outcome, None));
            }
        }

        info!(
            "Session {} needs arbitration (votes A={:?}, B={:?})",
            session.id, session.vote_a, session.vote_b
        );

        let verdict = match self.arbitrate(session).await? {
            Arbitration::Judged(judgment) => {
                let outcome = match judgment.winner {
                    JudgedWinner::ParticipantA => Outcome::AWinsAi,
                    JudgedWinner::ParticipantB => Outcome::BWinsAi,
                    JudgedWinner::Draw => Outcome::DrawAi,
                };
                self.verdict(session, outcome, Some(judgment))
            }
            Arbitration::Unavailable(reason) => self.verdict(
                session,
                Outcome::Draw,
                Some(Judgment::draw(format!("Judge unavailable: {}", reason))),
            ),
        };
        Ok(verdict)
    }

    async fn resolve_ai_opponent(&self, session: &Session) -> Result<Verdict> {
        let verdict = match self.arbitrate(session).await? {
            Arbitration::Judged(judgment) => {
                let outcome = match judgment.winner {
                    JudgedWinner::ParticipantA => Outcome::AWins,
                    JudgedWinner::ParticipantB => Outcome::AiWins,
                    JudgedWinner::Draw => Outcome::Draw,
                };
                self.verdict(session, outcome, Some(judgment))
            }
            Arbitration::Unavailable(reason) => self.verdict(
                session,
                Outcome::Draw,
                Some(Judgment::draw(format!("Judge unavailable: {}", reason))),
            ),
        };
        info!(
            "AI session {} judged: {} (winner {:?})",
            session.id, verdict.outcome, verdict.winner_id
        );
        Ok(verdict)
    }

    fn verdict(&self, session: &Session, outcome: Outcome, judgment: Option<Judgment>) -> Verdict {
        let winner_id = match outcome {
            Outcome::AWins | Outcome::AWinsAi => Some(session.participant_a_id.clone()),
            Outcome::BWins | Outcome::BWinsAi => session.participant_b_id.clone(),
            Outcome::AiWins => Some(self.ai_identity.clone()),
            Outcome::Draw | Outcome::DrawAi => None,
        };
        Verdict {
            outcome,
            winner_id,
            judgment,
        }
    }

    /// Consult the Judge about `session`'s transcript
    async fn arbitrate(&self, session: &Session) -> Result<Arbitration> {
        let messages = match session.channel_id {
            Some(channel_id) => self.transcripts.transcript(channel_id).await?,
            None => Vec::new(),
        };
        // Applies to disagreements too: nothing said means nothing to judge
        if messages.is_empty() {
            debug!("Session {} has an empty transcript, skipping Judge", session.id);
            return Ok(Arbitration::Judged(Judgment::no_messages()));
        }

        let request = JudgeRequest {
            topic: session.topic.clone(),
            ai_opponent: session.is_ai_opponent,
            transcript: messages
                .into_iter()
                .map(|m| TranscriptLine {
                    speaker: if m.author_id == session.participant_a_id {
                        Speaker::ParticipantA
                    } else {
                        Speaker::ParticipantB
                    },
                    text: m.text,
                })
                .collect(),
        };

        info!(
            "Calling Judge for session {} ({} lines, timeout {:?})",
            session.id,
            request.transcript.len(),
            self.oracle_timeout
        );
        let started = Instant::now();
        let reply = tokio::time::timeout(self.oracle_timeout, self.oracle.judge(&request)).await;
        let elapsed = started.elapsed();

        let arbitration = match reply {
            Ok(Ok(raw)) => Arbitration::Judged(parse_judgment(&raw)),
            Ok(Err(e)) => {
                warn!("Judge failed for session {}: {}", session.id, e);
                Arbitration::Unavailable(e.to_string())
            }
            Err(_) => {
                warn!(
                    "Judge timed out for session {} after {:?}",
                    session.id, self.oracle_timeout
                );
                Arbitration::Unavailable(format!("timed out after {:?}", self.oracle_timeout))
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_oracle_call(matches!(arbitration, Arbitration::Judged(_)), elapsed);
        }

        Ok(arbitration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolution::judge::MockJudgeOracle;
    use crate::resolution::transcript::InMemoryTranscriptStore;

    struct Fixture {
        oracle: Arc<MockJudgeOracle>,
        transcripts: Arc<InMemoryTranscriptStore>,
        resolver: Resolver,
    }

    fn fixture(oracle: MockJudgeOracle) -> Fixture {
        let oracle = Arc::new(oracle);
        let transcripts = Arc::new(InMemoryTranscriptStore::new());
        let resolver = Resolver::new(
            oracle.clone(),
            transcripts.clone(),
            Duration::from_secs(5),
            "ai-opponent",
        );
        Fixture {
            oracle,
            transcripts,
            resolver,
        }
    }

    fn voting_session(vote_a: Option<Vote>, vote_b: Option<Vote>) -> Session {
        let mut session = Session::new_waiting("alice".into(), "Topic".into(), false, None);
        session.pair_with("bob").unwrap();
        session.open_voting().unwrap();
        session.vote_a = vote_a;
        session.vote_b = vote_b;
        session
    }

    async fn say(fx: &Fixture, session: &Session, author: &str, text: &str) {
        fx.transcripts
            .append(session.channel_id.unwrap(), author, text)
            .await
            .unwrap();
    }

    #[test]
    fn test_agreement_table() {
        use Vote::*;
        assert_eq!(agreement(Myself, Opponent), Some(Outcome::AWins));
        assert_eq!(agreement(Opponent, Myself), Some(Outcome::BWins));
        assert_eq!(agreement(Draw, Draw), Some(Outcome::Draw));
        assert_eq!(agreement(Myself, Myself), None);
        assert_eq!(agreement(Opponent, Opponent), None);
        assert_eq!(agreement(Myself, Draw), None);
        assert_eq!(agreement(Draw, Opponent), None);
    }

    #[tokio::test]
    async fn test_agreement_skips_oracle() {
        let fx = fixture(MockJudgeOracle::with_winner("participantA"));
        let session = voting_session(Some(Vote::Opponent), Some(Vote::Myself));

        let verdict = fx.resolver.resolve(&session).await.unwrap();
        assert_eq!(verdict.outcome, Outcome::BWins);
        assert_eq!(verdict.winner_id.as_deref(), Some("bob"));
        assert!(verdict.judgment.is_none());
        assert_eq!(fx.oracle.call_count(), 0);
    }

    #[tokio::test]
    async fn test_disagreement_calls_oracle_once() {
        let fx = fixture(MockJudgeOracle::with_winner("participantB"));
        let session = voting_session(Some(Vote::Myself), Some(Vote::Myself));
        say(&fx, &session, "alice", "Cars pollute.").await;
        say(&fx, &session, "bob", "Cars enable freedom.").await;

        let verdict = fx.resolver.resolve(&session).await.unwrap();
        assert_eq!(verdict.outcome, Outcome::BWinsAi);
        assert_eq!(verdict.winner_id.as_deref(), Some("bob"));
        assert_eq!(fx.oracle.call_count(), 1);

        let request = &fx.oracle.requests()[0];
        assert_eq!(request.topic, "Topic");
        assert_eq!(request.transcript[0].speaker, Speaker::ParticipantA);
        assert_eq!(request.transcript[1].speaker, Speaker::ParticipantB);
    }

    #[tokio::test]
    async fn test_missing_vote_goes_to_arbitration() {
        let fx = fixture(MockJudgeOracle::with_winner("draw"));
        let session = voting_session(Some(Vote::Myself), None);
        say(&fx, &session, "alice", "Hello?").await;

        let verdict = fx.resolver.resolve(&session).await.unwrap();
        assert_eq!(verdict.outcome, Outcome::DrawAi);
        assert!(verdict.winner_id.is_none());
        assert_eq!(fx.oracle.call_count(), 1);
    }

    #[tokio::test]
    async fn test_oracle_failure_is_plain_draw() {
        let fx = fixture(MockJudgeOracle::with_winner("participantA"));
        fx.oracle.push_failure("model overloaded");
        let session = voting_session(Some(Vote::Myself), Some(Vote::Myself));
        say(&fx, &session, "alice", "Point.").await;

        let verdict = fx.resolver.resolve(&session).await.unwrap();
        assert_eq!(verdict.outcome, Outcome::Draw);
        assert!(verdict.winner_id.is_none());
        assert!(verdict
            .judgment
            .unwrap()
            .reasoning
            .contains("model overloaded"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oracle_timeout_is_plain_draw() {
        let oracle = MockJudgeOracle::with_winner("participantA").with_delay(Duration::from_secs(60));
        let fx = fixture(oracle);
        let session = voting_session(Some(Vote::Draw), Some(Vote::Myself));
        say(&fx, &session, "bob", "Point.").await;

        let verdict = fx.resolver.resolve(&session).await.unwrap();
        assert_eq!(verdict.outcome, Outcome::Draw);
        assert_eq!(fx.oracle.call_count(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_reply_is_arbitrated_draw() {
        let fx = fixture(MockJudgeOracle::new("Honestly, a coin flip."));
        let session = voting_session(Some(Vote::Opponent), Some(Vote::Opponent));
        say(&fx, &session, "alice", "Point.").await;

        let verdict = fx.resolver.resolve(&session).await.unwrap();
        assert_eq!(verdict.outcome, Outcome::DrawAi);
        assert_eq!(verdict.judgment.unwrap().reasoning, "Honestly, a coin flip.");
    }

    #[tokio::test]
    async fn test_empty_transcript_skips_oracle() {
        let fx = fixture(MockJudgeOracle::with_winner("participantA"));
        let session = voting_session(Some(Vote::Myself), Some(Vote::Myself));

        let verdict = fx.resolver.resolve(&session).await.unwrap();
        assert_eq!(verdict.outcome, Outcome::DrawAi);
        assert_eq!(verdict.judgment.unwrap().reasoning, "No messages exchanged.");
        assert_eq!(fx.oracle.call_count(), 0);
    }

    #[tokio::test]
    async fn test_ai_session_outcomes() {
        for (winner, outcome, winner_id) in [
            ("participantA", Outcome::AWins, Some("alice")),
            ("participantB", Outcome::AiWins, Some("ai-opponent")),
            ("draw", Outcome::Draw, None),
        ] {
            let fx = fixture(MockJudgeOracle::with_winner(winner));
            let session = Session::new_ai_opponent("alice".into(), "Topic".into());
            say(&fx, &session, "alice", "My case.").await;
            say(&fx, &session, "ai-opponent", "Counterpoint.").await;

            let verdict = fx.resolver.resolve(&session).await.unwrap();
            assert_eq!(verdict.outcome, outcome);
            assert_eq!(verdict.winner_id.as_deref(), winner_id);
            assert!(fx.oracle.requests()[0].ai_opponent);
        }
    }
}
