//! Matchmaking coordinator
//!
//! Pairs a caller into the oldest compatible waiting session, or gives them
//! a waiting session of their own. Pairing is a single conditional write on
//! `state == waiting`, so a waiting session is paired at most once no matter
//! how many callers race for it.

use crate::error::{DebateError, Result};
use crate::metrics::MetricsCollector;
use crate::session::record::Session;
use crate::session::store::SessionStore;
use crate::types::SessionState;
use crate::utils::{current_timestamp, pick_random};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Scans before falling through to creation: the first, plus one rescan
const PAIRING_PASSES: usize = 2;

/// Topic used when none is configured
pub const DEFAULT_TOPIC: &str = "Open debate";

/// Result of a match request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", content = "session", rename_all = "lowercase")]
pub enum MatchResult {
    /// Joined an existing session as participant B
    Paired(Session),
    /// Owns a waiting session
    Waiting(Session),
}

impl MatchResult {
    pub fn session(&self) -> &Session {
        match self {
            MatchResult::Paired(session) | MatchResult::Waiting(session) => session,
        }
    }

    pub fn into_session(self) -> Session {
        match self {
            MatchResult::Paired(session) | MatchResult::Waiting(session) => session,
        }
    }

    pub fn is_paired(&self) -> bool {
        matches!(self, MatchResult::Paired(_))
    }
}

/// What a match request did, for the orchestrator's side effects
#[derive(Debug, Clone)]
pub enum MatchAttempt {
    /// Paired into another participant's session after they waited `waited`
    Paired { session: Session, waited: Duration },
    /// Caller already had a waiting session
    Existing(Session),
    /// A new waiting session was stored
    Created(Session),
}

impl MatchAttempt {
    pub fn into_result(self) -> MatchResult {
        match self {
            MatchAttempt::Paired { session, .. } => MatchResult::Paired(session),
            MatchAttempt::Existing(session) | MatchAttempt::Created(session) => {
                MatchResult::Waiting(session)
            }
        }
    }
}

pub struct MatchmakingCoordinator {
    store: Arc<dyn SessionStore>,
    topics: Vec<String>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl MatchmakingCoordinator {
    pub fn new(store: Arc<dyn SessionStore>, topics: Vec<String>) -> Self {
        Self {
            store,
            topics,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The requested topic, or a random configured one
    pub fn choose_topic(&self, requested: Option<String>) -> String {
        requested
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .or_else(|| pick_random(&self.topics).cloned())
            .unwrap_or_else(|| DEFAULT_TOPIC.to_string())
    }

    /// Pair `user_id` with a waiting session, or hand them a waiting one
    pub fn request(
        &self,
        user_id: &str,
        is_video: bool,
        topic: Option<String>,
    ) -> Result<MatchAttempt> {
        info!(
            "Match request from '{}' (video: {}, topic: {:?})",
            user_id, is_video, topic
        );

        // A retry must not pair the caller elsewhere while they still wait
        if let Some(existing) = self.store.find_waiting_owned_by(user_id, is_video)? {
            info!(
                "'{}' already waits in session {}, returning it",
                user_id, existing.id
            );
            return Ok(MatchAttempt::Existing(existing));
        }

        for pass in 0..PAIRING_PASSES {
            match self.try_pair(user_id, is_video)? {
                PairAttempt::Paired(attempt) => return Ok(attempt),
                PairAttempt::NoCandidate => break,
                PairAttempt::Lost => {
                    debug!(
                        "Pairing pass {} for '{}' lost its race{}",
                        pass + 1,
                        user_id,
                        if pass + 1 < PAIRING_PASSES {
                            ", rescanning"
                        } else {
                            ""
                        }
                    );
                }
            }
        }

        let session = Session::new_waiting(
            user_id.to_string(),
            self.choose_topic(topic),
            is_video,
            None,
        );
        self.store.insert(session.clone())?;
        info!(
            "Created waiting session {} for '{}' on \"{}\"",
            session.id, user_id, session.topic
        );
        Ok(MatchAttempt::Created(session))
    }

    /// One scan plus one conditional write against the oldest candidate
    fn try_pair(&self, user_id: &str, is_video: bool) -> Result<PairAttempt> {
        let candidates = self.store.find_open_waiting(user_id, is_video)?;
        let Some(candidate) = candidates.into_iter().next() else {
            return Ok(PairAttempt::NoCandidate);
        };

        let opponent = user_id.to_string();
        match self
            .store
            .update_if(candidate.id, SessionState::Waiting, &mut |session| {
                session.pair_with(&opponent)
            }) {
            Ok(session) => {
                let waited = (current_timestamp() - candidate.created_at)
                    .to_std()
                    .unwrap_or_default();
                info!(
                    "Paired '{}' into session {} with '{}' after {:.1}s",
                    user_id,
                    session.id,
                    session.participant_a_id,
                    waited.as_secs_f64()
                );
                Ok(PairAttempt::Paired(MatchAttempt::Paired { session, waited }))
            }
            Err(DebateError::RaceLost { session_id, .. }) => {
                warn!(
                    "'{}' lost the race for waiting session {}",
                    user_id, session_id
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_pairing_race_lost();
                }
                Ok(PairAttempt::Lost)
            }
            Err(e) => Err(e),
        }
    }
}

enum PairAttempt {
    Paired(MatchAttempt),
    NoCandidate,
    Lost,
}
