//! Session orchestrator
//!
//! This module provides the SessionManager that drives a debate from
//! matchmaking through voting to a rated result. There is no global lock:
//! every write is conditional on the session's state, and resolution is
//! serialized per session by an async guard so the Judge is asked at most
//! once per resolution.

use crate::amqp::publisher::EventPublisher;
use crate::config::{AppConfig, MediaSettings};
use crate::error::{DebateError, Result};
use crate::fallback::timer::{TimerKind, TimerRegistry};
use crate::matchmaking::coordinator::{MatchAttempt, MatchResult, MatchmakingCoordinator};
use crate::media::token::{MediaCredential, MediaTokenIssuer};
use crate::metrics::MetricsCollector;
use crate::rating::calculator::RatingCalculator;
use crate::rating::storage::{ParticipantCommit, ParticipantProfile};
use crate::resolution::judgment::Judgment;
use crate::resolution::resolver::{Resolver, Verdict};
use crate::resolution::transcript::{Message, TranscriptSource};
use crate::session::record::{Session, SessionKind};
use crate::session::store::SessionStore;
use crate::types::{
    RatingChange, SessionEvent, SessionEventKind, SessionId, SessionState, Vote,
};
use crate::utils::{current_timestamp, generate_invite_code};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info, warn};

/// Attempts at storing a unique invite code
const INVITE_CODE_ATTEMPTS: usize = 3;

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Wait before offering an AI opponent
    pub fallback_delay: Duration,
    /// Wait in `voting` before resolving with the votes present
    pub vote_timeout: Duration,
    /// Waiting sessions older than this are cancelled by the sweep
    pub max_wait: Duration,
    /// Versioned rating commits before giving up
    pub max_commit_attempts: u32,
    pub topics: Vec<String>,
    pub media: MediaSettings,
}

impl ManagerSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            fallback_delay: config.fallback_delay(),
            vote_timeout: config.vote_timeout(),
            max_wait: config.max_wait(),
            max_commit_attempts: config.rating.max_commit_attempts.max(1),
            topics: config.matchmaking.topics.clone(),
            media: config.media.clone(),
        }
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Final result of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResolution {
    pub session: Session,
    /// Present only on the call that consulted the Judge
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judgment: Option<Judgment>,
    pub rating_changes: Vec<RatingChange>,
    /// The session was completed by an earlier call
    pub already_resolved: bool,
}

impl SessionResolution {
    fn stored(session: Session) -> Self {
        Self {
            rating_changes: session.rating_changes.clone(),
            session,
            judgment: None,
            already_resolved: true,
        }
    }
}

/// Result of an end request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EndOutcome {
    /// Human pair moved to voting
    Voting(Session),
    Completed(SessionResolution),
}

/// Result of a vote
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VoteOutcome {
    /// Vote stored; waiting for the other side
    Recorded(Session),
    Completed(SessionResolution),
}

/// Statistics about session manager operations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManagerStats {
    /// Session counts keyed by state name
    pub sessions_by_state: BTreeMap<String, usize>,
    /// Participants with a committed rating record
    pub participants: usize,
    /// Armed fallback and vote-timeout timers
    pub armed_timers: usize,
}

/// The main session orchestrator
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    coordinator: Arc<MatchmakingCoordinator>,
    resolver: Arc<Resolver>,
    calculator: Arc<dyn RatingCalculator>,
    publisher: Arc<dyn EventPublisher>,
    transcripts: Arc<dyn TranscriptSource>,
    media: Arc<MediaTokenIssuer>,
    timers: TimerRegistry,
    /// Per-session resolution guards, present while a resolution may run
    resolution_guards: Arc<Mutex<HashMap<SessionId, Arc<AsyncMutex<()>>>>>,
    settings: Arc<ManagerSettings>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new(
        store: Arc<dyn SessionStore>,
        resolver: Resolver,
        calculator: Arc<dyn RatingCalculator>,
        publisher: Arc<dyn EventPublisher>,
        transcripts: Arc<dyn TranscriptSource>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            coordinator: Arc::new(MatchmakingCoordinator::new(
                store.clone(),
                settings.topics.clone(),
            )),
            store,
            resolver: Arc::new(resolver),
            calculator,
            publisher,
            transcripts,
            media: Arc::new(MediaTokenIssuer::from_settings(&settings.media)),
            timers: TimerRegistry::new(),
            resolution_guards: Arc::new(Mutex::new(HashMap::new())),
            settings: Arc::new(settings),
            metrics: None,
        }
    }

    /// Record operations on `metrics`
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.coordinator = Arc::new(
            MatchmakingCoordinator::new(self.store.clone(), self.settings.topics.clone())
                .with_metrics(metrics.clone()),
        );
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    /// Pair the caller with a waiting participant, or queue them
    pub async fn request_match(
        &self,
        user_id: &str,
        is_video: bool,
        topic: Option<String>,
    ) -> Result<MatchResult> {
        let started = Instant::now();
        require_user(user_id)?;

        let attempt = self.coordinator.request(user_id, is_video, topic)?;
        match &attempt {
            MatchAttempt::Paired { session, waited } => {
                self.timers.cancel(session.id, TimerKind::Fallback);
                if let Some(metrics) = &self.metrics {
                    metrics.record_session_paired(*waited);
                }
                self.emit(session, SessionEventKind::Activated).await;
            }
            MatchAttempt::Created(session) => {
                self.arm_fallback(session.id);
                // A racer may have paired the session before the timer existed
                if self.load(session.id)?.state != SessionState::Waiting {
                    self.timers.cancel(session.id, TimerKind::Fallback);
                }
                if let Some(metrics) = &self.metrics {
                    metrics.record_session_created("human");
                }
                self.emit(session, SessionEventKind::Created).await;
            }
            MatchAttempt::Existing(session) => {
                debug!(
                    "Match request from '{}' is a retry of session {}",
                    user_id, session.id
                );
            }
        }

        self.observe("request_match", started);
        Ok(attempt.into_result())
    }

    /// Cancel the caller's waiting session
    ///
    /// Cancelling an already cancelled session returns it unchanged.
    pub async fn cancel_waiting(&self, session_id: SessionId, user_id: &str) -> Result<Session> {
        let session = self.load(session_id)?;
        if session.participant_a_id != user_id {
            return Err(DebateError::NotParticipant {
                session_id,
                user_id: user_id.to_string(),
            });
        }
        if session.state == SessionState::Cancelled {
            debug!("Session {} already cancelled", session_id);
            return Ok(session);
        }

        let cancelled = match self
            .store
            .update_if(session_id, SessionState::Waiting, &mut |s| s.cancel())
        {
            Ok(cancelled) => cancelled,
            Err(DebateError::RaceLost { .. }) => {
                let current = self.load(session_id)?;
                if current.state == SessionState::Cancelled {
                    return Ok(current);
                }
                warn!(
                    "Cannot cancel session {}: it moved to {}",
                    session_id, current.state
                );
                return Err(DebateError::InvalidTransition {
                    session_id,
                    from: current.state,
                    to: SessionState::Cancelled,
                });
            }
            Err(e) => return Err(e),
        };

        self.timers.cancel_all(session_id);
        if let Some(metrics) = &self.metrics {
            metrics.record_session_cancelled("user");
        }
        info!("Session {} cancelled by '{}'", session_id, user_id);
        self.emit(&cancelled, SessionEventKind::Cancelled).await;
        Ok(cancelled)
    }

    /// Create a waiting session only joinable with its invite code
    pub async fn create_invite(
        &self,
        user_id: &str,
        is_video: bool,
        topic: Option<String>,
    ) -> Result<Session> {
        require_user(user_id)?;
        let topic = self.coordinator.choose_topic(topic);

        for attempt in 1..=INVITE_CODE_ATTEMPTS {
            let session = Session::new_waiting(
                user_id.to_string(),
                topic.clone(),
                is_video,
                Some(generate_invite_code()),
            );
            match self.store.insert(session.clone()) {
                Ok(()) => {
                    info!(
                        "'{}' created invite session {} (code {:?})",
                        user_id, session.id, session.invite_code
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_session_created("invite");
                    }
                    self.emit(&session, SessionEventKind::Created).await;
                    return Ok(session);
                }
                Err(DebateError::StorageFailure { message }) if attempt < INVITE_CODE_ATTEMPTS => {
                    debug!("Invite code collision ({}), retrying", message);
                }
                Err(e) => return Err(e),
            }
        }

        Err(DebateError::StorageFailure {
            message: "Could not allocate a unique invite code".to_string(),
        })
    }

    /// Join an invite session as participant B
    pub async fn redeem_invite(&self, code: &str, user_id: &str) -> Result<Session> {
        require_user(user_id)?;
        let session = self
            .store
            .find_by_invite(code)?
            .ok_or_else(|| DebateError::InviteNotFound {
                code: code.to_string(),
            })?;

        if session.participant_a_id == user_id {
            return Err(DebateError::InvalidRequest {
                reason: "You cannot accept your own invite".to_string(),
            });
        }

        let opponent = user_id.to_string();
        let paired = match self
            .store
            .update_if(session.id, SessionState::Waiting, &mut |s| {
                s.pair_with(&opponent)
            }) {
            Ok(paired) => paired,
            Err(DebateError::RaceLost { .. }) => {
                let current = self.load(session.id)?;
                if current.participant_b_id.as_deref() == Some(user_id) {
                    debug!("Invite {} already redeemed by '{}'", code, user_id);
                    return Ok(current);
                }
                warn!(
                    "Invite {} no longer open (session {} is {})",
                    code, current.id, current.state
                );
                return Err(DebateError::InvalidTransition {
                    session_id: current.id,
                    from: current.state,
                    to: SessionState::Active,
                });
            }
            Err(e) => return Err(e),
        };

        self.timers.cancel(paired.id, TimerKind::Fallback);
        if let Some(metrics) = &self.metrics {
            let waited = (current_timestamp() - paired.created_at)
                .to_std()
                .unwrap_or_default();
            metrics.record_session_paired(waited);
        }
        info!(
            "'{}' redeemed invite {} into session {}",
            user_id, code, paired.id
        );
        self.emit(&paired, SessionEventKind::Activated).await;
        Ok(paired)
    }

    /// Start a debate against the AI right away
    pub async fn start_ai_session(&self, user_id: &str, topic: Option<String>) -> Result<Session> {
        require_user(user_id)?;
        let session = Session::new_ai_opponent(
            user_id.to_string(),
            self.coordinator.choose_topic(topic),
        );
        self.store.insert(session.clone())?;

        if let Some(metrics) = &self.metrics {
            metrics.record_session_created("ai");
        }
        info!(
            "Started AI session {} for '{}' on \"{}\"",
            session.id, user_id, session.topic
        );
        self.emit(&session, SessionEventKind::Activated).await;
        Ok(session)
    }

    /// Offer an AI opponent to a session still waiting; fired by its timer
    ///
    /// Returns whether an offer was made. Never changes the session's state.
    pub(crate) async fn offer_ai_fallback(&self, session_id: SessionId) -> Result<bool> {
        let mut offered = false;
        let result = self
            .store
            .update_if(session_id, SessionState::Waiting, &mut |s| {
                offered = s.offer_fallback()?;
                Ok(())
            });

        let session = match result {
            Ok(session) => session,
            Err(DebateError::RaceLost { .. }) => {
                debug!(
                    "Session {} left waiting before the fallback offer",
                    session_id
                );
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        if !offered {
            return Ok(false);
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_fallback("offered");
        }
        info!(
            "Offered an AI opponent to '{}' in session {}",
            session.participant_a_id, session_id
        );
        self.emit(&session, SessionEventKind::FallbackOffered).await;
        Ok(true)
    }

    /// Swap an offered waiting session for an active AI session
    pub async fn accept_ai_fallback(&self, session_id: SessionId, user_id: &str) -> Result<Session> {
        let waiting = self.load(session_id)?;
        if waiting.participant_a_id != user_id {
            return Err(DebateError::NotParticipant {
                session_id,
                user_id: user_id.to_string(),
            });
        }
        if !waiting.fallback_offered {
            return Err(DebateError::InvalidRequest {
                reason: format!("No AI opponent was offered for session {}", session_id),
            });
        }

        let cancelled = match self
            .store
            .update_if(session_id, SessionState::Waiting, &mut |s| s.cancel())
        {
            Ok(cancelled) => cancelled,
            Err(DebateError::RaceLost { .. }) => {
                let current = self.load(session_id)?;
                warn!(
                    "Fallback for session {} not accepted: it moved to {}",
                    session_id, current.state
                );
                return Err(DebateError::InvalidTransition {
                    session_id,
                    from: current.state,
                    to: SessionState::Cancelled,
                });
            }
            Err(e) => return Err(e),
        };

        self.timers.cancel_all(session_id);
        if let Some(metrics) = &self.metrics {
            metrics.record_session_cancelled("fallback");
            metrics.record_fallback("accepted");
        }
        self.emit(&cancelled, SessionEventKind::Cancelled).await;

        let ai_session = Session::new_ai_opponent(user_id.to_string(), cancelled.topic.clone());
        self.store.insert(ai_session.clone())?;
        if let Some(metrics) = &self.metrics {
            metrics.record_session_created("ai");
        }
        info!(
            "'{}' accepted the AI fallback: session {} replaces {}",
            user_id, ai_session.id, session_id
        );
        self.emit(&ai_session, SessionEventKind::Activated).await;
        Ok(ai_session)
    }

    /// End the debate
    ///
    /// Human pairs move to voting; AI sessions are judged immediately.
    pub async fn end_session(&self, session_id: SessionId, user_id: &str) -> Result<EndOutcome> {
        let session = self.load(session_id)?;
        session.require_side(user_id)?;

        match session.state {
            SessionState::Completed => {
                return Ok(EndOutcome::Completed(SessionResolution::stored(session)))
            }
            SessionState::Voting => return Ok(EndOutcome::Voting(session)),
            SessionState::Active => {}
            from => {
                return Err(DebateError::InvalidTransition {
                    session_id,
                    from,
                    to: if session.is_ai_opponent {
                        SessionState::Completed
                    } else {
                        SessionState::Voting
                    },
                })
            }
        }

        if session.kind() == SessionKind::AiOpponent {
            info!("'{}' ended AI session {}", user_id, session_id);
            let resolution = self
                .resolve_and_complete(session_id, SessionState::Active)
                .await?;
            return Ok(EndOutcome::Completed(resolution));
        }

        let voting = match self
            .store
            .update_if(session_id, SessionState::Active, &mut |s| s.open_voting())
        {
            Ok(voting) => voting,
            Err(DebateError::RaceLost { .. }) => {
                let current = self.load(session_id)?;
                debug!(
                    "End of session {} raced with another request; now {}",
                    session_id, current.state
                );
                return match current.state {
                    SessionState::Voting => Ok(EndOutcome::Voting(current)),
                    SessionState::Completed => {
                        Ok(EndOutcome::Completed(SessionResolution::stored(current)))
                    }
                    from => Err(DebateError::InvalidTransition {
                        session_id,
                        from,
                        to: SessionState::Voting,
                    }),
                };
            }
            Err(e) => return Err(e),
        };

        self.arm_vote_timeout(session_id);
        info!(
            "'{}' ended session {}; voting open for {:?}",
            user_id, session_id, self.settings.vote_timeout
        );
        self.emit(&voting, SessionEventKind::VotingOpened).await;
        Ok(EndOutcome::Voting(voting))
    }

    /// Cast the caller's vote
    ///
    /// Repeating a vote is a no-op; once both votes are in the session is
    /// resolved. After completion the stored result is returned.
    pub async fn submit_vote(
        &self,
        session_id: SessionId,
        user_id: &str,
        vote: Vote,
    ) -> Result<VoteOutcome> {
        let started = Instant::now();
        let session = self.load(session_id)?;
        let side = session.require_side(user_id)?;

        if session.state == SessionState::Completed {
            return Ok(VoteOutcome::Completed(SessionResolution::stored(session)));
        }

        let mut changed = false;
        let result = self
            .store
            .update_if(session_id, SessionState::Voting, &mut |s| {
                changed = s.record_vote(side, vote)?;
                Ok(())
            });

        let updated = match result {
            Ok(updated) => updated,
            Err(DebateError::RaceLost { .. }) => {
                let current = self.load(session_id)?;
                if current.state == SessionState::Completed {
                    debug!(
                        "Vote from '{}' arrived after session {} was resolved",
                        user_id, session_id
                    );
                    return Ok(VoteOutcome::Completed(SessionResolution::stored(current)));
                }
                return Err(DebateError::InvalidTransition {
                    session_id,
                    from: current.state,
                    to: SessionState::Voting,
                });
            }
            Err(e) => return Err(e),
        };

        if changed {
            if let Some(metrics) = &self.metrics {
                metrics.record_vote();
            }
            info!(
                "'{}' voted {:?} as side {:?} in session {}",
                user_id, vote, side, session_id
            );
            self.emit(&updated, SessionEventKind::VoteRecorded { side })
                .await;
        } else {
            debug!(
                "Repeated vote from '{}' in session {} ignored",
                user_id, session_id
            );
        }

        if updated.both_votes().is_none() {
            self.observe("submit_vote", started);
            return Ok(VoteOutcome::Recorded(updated));
        }

        let resolution = self
            .resolve_and_complete(session_id, SessionState::Voting)
            .await?;
        self.observe("submit_vote", started);
        Ok(VoteOutcome::Completed(resolution))
    }

    /// Judge an AI session; repeated calls return the stored result
    pub async fn resolve_ai_session(
        &self,
        session_id: SessionId,
        user_id: &str,
    ) -> Result<SessionResolution> {
        let session = self.load(session_id)?;
        if !session.is_ai_opponent {
            return Err(DebateError::InvalidRequest {
                reason: format!("Session {} is not an AI session", session_id),
            });
        }
        session.require_side(user_id)?;

        self.resolve_and_complete(session_id, SessionState::Active)
            .await
    }

    /// Resolve a voting session with the votes present; fired by its timer
    pub async fn handle_vote_timeout(
        &self,
        session_id: SessionId,
    ) -> Result<Option<SessionResolution>> {
        let session = self.load(session_id)?;
        if session.state != SessionState::Voting {
            debug!(
                "Vote timeout for session {} ignored: it is {}",
                session_id, session.state
            );
            return Ok(None);
        }

        info!(
            "Voting window of session {} closed with votes A={:?}, B={:?}",
            session_id, session.vote_a, session.vote_b
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_vote_timeout();
        }
        self.resolve_and_complete(session_id, SessionState::Voting)
            .await
            .map(Some)
    }

    pub fn get_session(&self, session_id: SessionId) -> Result<Session> {
        self.load(session_id)
    }

    /// Rating profile of a participant who finished at least one rated debate
    pub fn get_participant(&self, user_id: &str) -> Result<ParticipantProfile> {
        self.store
            .get_participant(user_id)?
            .map(|record| ParticipantProfile::from(&record))
            .ok_or_else(|| DebateError::ParticipantNotFound {
                user_id: user_id.to_string(),
            })
    }

    /// Append a line to an active session's transcript
    pub async fn append_message(
        &self,
        session_id: SessionId,
        author_id: &str,
        text: &str,
    ) -> Result<Message> {
        let session = self.load(session_id)?;
        let is_ai_author = session.is_ai_opponent && author_id == self.resolver.ai_identity();
        if session.side_of(author_id).is_none() && !is_ai_author {
            return Err(DebateError::NotParticipant {
                session_id,
                user_id: author_id.to_string(),
            });
        }
        if session.state != SessionState::Active {
            return Err(DebateError::InvalidRequest {
                reason: format!(
                    "Session {} is {}; messages are only accepted while active",
                    session_id, session.state
                ),
            });
        }
        let channel_id = session.channel_id.ok_or_else(|| DebateError::InternalError {
            message: format!("Active session {} has no channel", session_id),
        })?;

        let message = self.transcripts.append(channel_id, author_id, text).await?;
        debug!(
            "'{}' posted {} chars in session {}",
            author_id,
            message.text.chars().count(),
            session_id
        );
        Ok(message)
    }

    /// Media room credential for a participant of a video session
    pub fn issue_media_token(&self, session_id: SessionId, user_id: &str) -> Result<MediaCredential> {
        let session = self.load(session_id)?;
        if !session.is_video {
            return Err(DebateError::InvalidRequest {
                reason: format!("Session {} is not a video debate", session_id),
            });
        }
        session.require_side(user_id)?;
        self.media.issue(session_id, user_id, user_id)
    }

    /// Cancel waiting sessions older than the maximum wait
    pub async fn cleanup_stale_sessions(&self) -> Result<usize> {
        let max_wait = chrono::Duration::from_std(self.settings.max_wait).map_err(|e| {
            DebateError::ConfigurationError {
                message: format!("Max wait out of range: {}", e),
            }
        })?;
        let cutoff = current_timestamp() - max_wait;
        let stale = self.store.find_waiting_created_before(cutoff)?;

        let mut cancelled_count = 0;
        for session in stale {
            match self
                .store
                .update_if(session.id, SessionState::Waiting, &mut |s| s.cancel())
            {
                Ok(cancelled) => {
                    self.timers.cancel_all(cancelled.id);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_session_cancelled("expired");
                    }
                    info!(
                        "Cancelled stale session {} of '{}' (waiting since {})",
                        cancelled.id, cancelled.participant_a_id, cancelled.created_at
                    );
                    self.emit(&cancelled, SessionEventKind::Cancelled).await;
                    cancelled_count += 1;
                }
                Err(DebateError::RaceLost { .. }) => {
                    debug!("Stale session {} moved on before the sweep", session.id);
                }
                Err(e) => {
                    error!("Failed to cancel stale session {}: {}", session.id, e);
                }
            }
        }

        Ok(cancelled_count)
    }

    /// Get manager statistics
    pub fn get_stats(&self) -> Result<ManagerStats> {
        let counts = self.store.count_by_state()?;
        if let Some(metrics) = &self.metrics {
            metrics.update_session_counts(&counts);
        }

        Ok(ManagerStats {
            sessions_by_state: counts
                .into_iter()
                .map(|(state, count)| (state.to_string(), count))
                .collect(),
            participants: self.store.participant_count()?,
            armed_timers: self.timers.armed_count(),
        })
    }

    /// Abort all pending timers
    pub fn shutdown(&self) {
        self.timers.shutdown();
    }

    fn load(&self, session_id: SessionId) -> Result<Session> {
        self.store
            .get(session_id)?
            .ok_or(DebateError::SessionNotFound { session_id })
    }

    fn arm_fallback(&self, session_id: SessionId) {
        let manager = self.clone();
        self.timers.arm(
            session_id,
            TimerKind::Fallback,
            self.settings.fallback_delay,
            async move {
                if let Err(e) = manager.offer_ai_fallback(session_id).await {
                    warn!("Fallback offer for session {} failed: {}", session_id, e);
                }
            },
        );
    }

    fn arm_vote_timeout(&self, session_id: SessionId) {
        let manager = self.clone();
        self.timers.arm(
            session_id,
            TimerKind::VoteTimeout,
            self.settings.vote_timeout,
            async move {
                if let Err(e) = manager.handle_vote_timeout(session_id).await {
                    error!("Vote timeout resolution of session {} failed: {}", session_id, e);
                }
            },
        );
    }

    fn guards(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<AsyncMutex<()>>>> {
        self.resolution_guards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn resolution_guard(&self, session_id: SessionId) -> ResolutionGuard {
        let lock = self.guards().entry(session_id).or_default().clone();
        ResolutionGuard {
            guards: self.resolution_guards.clone(),
            session_id,
            lock,
        }
    }

    /// Resolve and commit a session, at most once
    async fn resolve_and_complete(
        &self,
        session_id: SessionId,
        expected: SessionState,
    ) -> Result<SessionResolution> {
        let started = Instant::now();
        let guard = self.resolution_guard(session_id);
        let _resolving = guard.lock.lock().await;

        let session = self.load(session_id)?;
        if session.state == SessionState::Completed {
            debug!("Session {} already resolved, returning stored result", session_id);
            return Ok(SessionResolution::stored(session));
        }
        if session.state != expected {
            return Err(DebateError::InvalidTransition {
                session_id,
                from: session.state,
                to: SessionState::Completed,
            });
        }

        let verdict = self.resolver.resolve(&session).await?;
        let committed = match session.kind() {
            SessionKind::HumanPair => self.commit_rated(&session, expected, &verdict),
            SessionKind::AiOpponent => self.commit_unrated(&session, expected, &verdict),
        };

        let completed = match committed {
            Ok(completed) => completed,
            Err(DebateError::RaceLost { .. }) => {
                let current = self.load(session_id)?;
                if current.state == SessionState::Completed {
                    return Ok(SessionResolution::stored(current));
                }
                return Err(DebateError::InvalidTransition {
                    session_id,
                    from: current.state,
                    to: SessionState::Completed,
                });
            }
            Err(e) => {
                error!("Failed to complete session {}: {}", session_id, e);
                return Err(e);
            }
        };

        self.timers.cancel_all(session_id);

        if let Some(metrics) = &self.metrics {
            metrics.record_resolution(verdict.outcome);
        }
        info!(
            "Session {} completed: {} (winner {:?}) in {:.2}ms",
            session_id,
            verdict.outcome,
            verdict.winner_id,
            started.elapsed().as_secs_f64() * 1000.0
        );
        self.emit(
            &completed,
            SessionEventKind::Completed {
                outcome: verdict.outcome,
                winner_id: verdict.winner_id.clone(),
            },
        )
        .await;
        self.observe("resolve", started);

        Ok(SessionResolution {
            rating_changes: completed.rating_changes.clone(),
            session: completed,
            judgment: verdict.judgment,
            already_resolved: false,
        })
    }

    /// Complete a human pair together with both rating records
    ///
    /// Recomputes from a fresh snapshot when a record moved underneath.
    fn commit_rated(
        &self,
        session: &Session,
        expected: SessionState,
        verdict: &Verdict,
    ) -> Result<Session> {
        let b_id = session
            .participant_b_id
            .as_deref()
            .ok_or_else(|| DebateError::InternalError {
                message: format!("Session {} has no participant B to rate", session.id),
            })?;
        let score_for_a = verdict.outcome.score_for_a();
        let initial = self.calculator.initial_rating();
        let max_attempts = self.settings.max_commit_attempts;

        for attempt in 1..=max_attempts {
            let a = self
                .store
                .participant_or_initial(&session.participant_a_id, initial)?;
            let b = self.store.participant_or_initial(b_id, initial)?;

            let calculation = Instant::now();
            let update = self
                .calculator
                .apply_result(&a.rating, &b.rating, score_for_a)?;
            if let Some(metrics) = &self.metrics {
                metrics.record_rating_calculation(calculation.elapsed());
            }

            let next_a = a.after_debate(update.a, score_for_a);
            let next_b = b.after_debate(update.b, 1.0 - score_for_a);
            let changes = vec![a.change_to(&next_a), b.change_to(&next_b)];
            let commits = [
                ParticipantCommit {
                    expected_version: a.version,
                    record: next_a,
                },
                ParticipantCommit {
                    expected_version: b.version,
                    record: next_b,
                },
            ];

            let outcome = verdict.outcome;
            let winner_id = verdict.winner_id.clone();
            match self.store.complete_with_ratings(
                session.id,
                expected,
                &mut |s| s.complete(outcome, winner_id.clone(), changes.clone()),
                &commits,
            ) {
                Ok(completed) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_rating_update(&[
                            commits[0].record.rating.rating,
                            commits[1].record.rating.rating,
                        ]);
                    }
                    for change in &changes {
                        info!(
                            "Rating of '{}' in session {}: {} -> {} ({:+})",
                            change.user_id,
                            session.id,
                            change.old_rating,
                            change.new_rating,
                            change.change
                        );
                    }
                    return Ok(completed);
                }
                Err(DebateError::StorageFailure { message }) if attempt < max_attempts => {
                    warn!(
                        "Rating commit {}/{} for session {} conflicted ({}), recomputing",
                        attempt, max_attempts, session.id, message
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_commit_conflict();
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(DebateError::StorageFailure {
            message: format!(
                "Rating commit for session {} failed after {} attempts",
                session.id, max_attempts
            ),
        })
    }

    /// Complete an AI session; no rating record is touched
    fn commit_unrated(
        &self,
        session: &Session,
        expected: SessionState,
        verdict: &Verdict,
    ) -> Result<Session> {
        let outcome = verdict.outcome;
        let winner_id = verdict.winner_id.clone();
        self.store.update_if(session.id, expected, &mut |s| {
            s.complete(outcome, winner_id.clone(), Vec::new())
        })
    }

    async fn emit(&self, session: &Session, kind: SessionEventKind) {
        let routing_key = kind.routing_key();
        let event = SessionEvent {
            session_id: session.id,
            state: session.state,
            participant_a_id: session.participant_a_id.clone(),
            participant_b_id: session.participant_b_id.clone(),
            kind,
            timestamp: current_timestamp(),
        };

        let published = self.publisher.publish_session_event(event).await;
        if let Some(metrics) = &self.metrics {
            metrics.record_event_published("session", published.is_ok());
        }
        match published {
            Ok(()) => debug!("Published {} for session {}", routing_key, session.id),
            Err(e) => warn!(
                "Failed to publish {} for session {}: {}",
                routing_key, session.id, e
            ),
        }
    }

    fn observe(&self, operation: &str, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_session_operation(operation, started.elapsed());
        }
    }
}

fn require_user(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(DebateError::InvalidRequest {
            reason: "User id cannot be empty".to_string(),
        });
    }
    Ok(())
}

/// Per-session resolution lock, dropped from the table by its last holder
///
/// Later arrivals build a fresh lock and re-read the stored session.
struct ResolutionGuard {
    guards: Arc<Mutex<HashMap<SessionId, Arc<AsyncMutex<()>>>>>,
    session_id: SessionId,
    lock: Arc<AsyncMutex<()>>,
}

impl Drop for ResolutionGuard {
    fn drop(&mut self) {
        let mut guards = self.guards.lock().unwrap_or_else(PoisonError::into_inner);
        // The table and this holder; anyone else still waits on the lock
        let unshared = guards
            .get(&self.session_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &self.lock) && Arc::strong_count(entry) == 2);
        if unshared {
            guards.remove(&self.session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rating::storage::ParticipantStore;
    use crate::amqp::publisher::MockEventPublisher;
    use crate::rating::glicko2::Glicko2RatingCalculator;
    use crate::resolution::judge::MockJudgeOracle;
    use crate::resolution::transcript::InMemoryTranscriptStore;
    use crate::session::store::InMemorySessionStore;
    use crate::types::Outcome;

    struct Harness {
        manager: SessionManager,
        store: Arc<InMemorySessionStore>,
        oracle: Arc<MockJudgeOracle>,
        publisher: Arc<MockEventPublisher>,
    }

    fn harness(oracle: MockJudgeOracle) -> Harness {
        let store = Arc::new(InMemorySessionStore::new());
        let oracle = Arc::new(oracle);
        let publisher = Arc::new(MockEventPublisher::new());
        let transcripts = Arc::new(InMemoryTranscriptStore::new());
        let resolver = Resolver::new(
            oracle.clone(),
            transcripts.clone(),
            Duration::from_secs(5),
            "ai-opponent",
        );
        let manager = SessionManager::new(
            store.clone(),
            resolver,
            Arc::new(Glicko2RatingCalculator::default()),
            publisher.clone(),
            transcripts,
            ManagerSettings::default(),
        );
        Harness {
            manager,
            store,
            oracle,
            publisher,
        }
    }

    async fn active_pair(h: &Harness) -> Session {
        h.manager.request_match("alice", false, None).await.unwrap();
        h.manager
            .request_match("bob", false, None)
            .await
            .unwrap()
            .into_session()
    }

    #[tokio::test]
    async fn test_match_arms_and_pairing_cancels_fallback() {
        let h = harness(MockJudgeOracle::with_winner("draw"));
        let waiting = h
            .manager
            .request_match("alice", false, None)
            .await
            .unwrap()
            .into_session();
        assert!(h.manager.timers().is_armed(waiting.id, TimerKind::Fallback));

        let paired = h
            .manager
            .request_match("bob", false, None)
            .await
            .unwrap()
            .into_session();
        assert_eq!(paired.id, waiting.id);
        assert!(!h.manager.timers().is_armed(waiting.id, TimerKind::Fallback));
        assert_eq!(
            h.publisher.get_published_kinds(),
            vec!["session.created", "session.activated"]
        );
    }

    #[tokio::test]
    async fn test_only_owner_cancels_and_cancel_is_idempotent() {
        let h = harness(MockJudgeOracle::with_winner("draw"));
        let waiting = h
            .manager
            .request_match("alice", false, None)
            .await
            .unwrap()
            .into_session();

        let err = h.manager.cancel_waiting(waiting.id, "mallory").await.unwrap_err();
        assert!(matches!(err, DebateError::NotParticipant { .. }));

        let cancelled = h.manager.cancel_waiting(waiting.id, "alice").await.unwrap();
        assert_eq!(cancelled.state, SessionState::Cancelled);
        assert!(!h.manager.timers().is_armed(waiting.id, TimerKind::Fallback));

        let again = h.manager.cancel_waiting(waiting.id, "alice").await.unwrap();
        assert_eq!(again.state, SessionState::Cancelled);
    }

    #[tokio::test]
    async fn test_cannot_cancel_active_session() {
        let h = harness(MockJudgeOracle::with_winner("draw"));
        let session = active_pair(&h).await;

        let err = h.manager.cancel_waiting(session.id, "alice").await.unwrap_err();
        assert!(matches!(
            err,
            DebateError::InvalidTransition {
                from: SessionState::Active,
                to: SessionState::Cancelled,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_resolution_guard_released_on_every_exit() {
        let h = harness(MockJudgeOracle::with_winner("draw"));
        let session = active_pair(&h).await;

        // Still active, so resolving it as a voting session fails
        let err = h
            .manager
            .resolve_and_complete(session.id, SessionState::Voting)
            .await
            .unwrap_err();
        assert!(matches!(err, DebateError::InvalidTransition { .. }));
        assert!(h.manager.guards().is_empty());

        h.manager.end_session(session.id, "alice").await.unwrap();
        h.manager
            .submit_vote(session.id, "alice", Vote::Draw)
            .await
            .unwrap();
        h.manager
            .submit_vote(session.id, "bob", Vote::Draw)
            .await
            .unwrap();
        assert!(h.manager.guards().is_empty());
    }

    #[tokio::test]
    async fn test_votes_resolve_and_rate() {
        let h = harness(MockJudgeOracle::with_winner("participantA"));
        let session = active_pair(&h).await;

        let ended = h.manager.end_session(session.id, "alice").await.unwrap();
        assert!(matches!(ended, EndOutcome::Voting(_)));
        assert!(h.manager.timers().is_armed(session.id, TimerKind::VoteTimeout));

        let first = h
            .manager
            .submit_vote(session.id, "alice", Vote::Myself)
            .await
            .unwrap();
        assert!(matches!(first, VoteOutcome::Recorded(_)));

        let second = h
            .manager
            .submit_vote(session.id, "bob", Vote::Opponent)
            .await
            .unwrap();
        let VoteOutcome::Completed(resolution) = second else {
            panic!("expected completion");
        };
        assert_eq!(resolution.session.outcome, Some(Outcome::AWins));
        assert_eq!(resolution.session.winner_id.as_deref(), Some("alice"));
        assert_eq!(resolution.rating_changes.len(), 2);
        assert!(resolution.rating_changes[0].change > 0);
        assert!(resolution.rating_changes[1].change < 0);
        assert_eq!(h.oracle.call_count(), 0);
        assert!(!h.manager.timers().is_armed(session.id, TimerKind::VoteTimeout));

        let alice = h.store.get_participant("alice").unwrap().unwrap();
        assert_eq!((alice.total_debates, alice.wins, alice.version), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_outsider_cannot_end_or_vote() {
        let h = harness(MockJudgeOracle::with_winner("draw"));
        let session = active_pair(&h).await;

        assert!(matches!(
            h.manager.end_session(session.id, "mallory").await,
            Err(DebateError::NotParticipant { .. })
        ));
        h.manager.end_session(session.id, "bob").await.unwrap();
        assert!(matches!(
            h.manager.submit_vote(session.id, "mallory", Vote::Draw).await,
            Err(DebateError::NotParticipant { .. })
        ));
    }

    #[tokio::test]
    async fn test_vote_before_voting_is_rejected() {
        let h = harness(MockJudgeOracle::with_winner("draw"));
        let session = active_pair(&h).await;

        let err = h
            .manager
            .submit_vote(session.id, "alice", Vote::Myself)
            .await
            .unwrap_err();
        assert!(matches!(err, DebateError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_participant_profile_requires_rated_debate() {
        let h = harness(MockJudgeOracle::with_winner("draw"));
        assert!(matches!(
            h.manager.get_participant("alice"),
            Err(DebateError::ParticipantNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_append_message_rules() {
        let h = harness(MockJudgeOracle::with_winner("draw"));
        let session = active_pair(&h).await;

        let message = h
            .manager
            .append_message(session.id, "alice", "Opening statement")
            .await
            .unwrap();
        assert_eq!(message.author_id, "alice");

        assert!(matches!(
            h.manager.append_message(session.id, "mallory", "hi").await,
            Err(DebateError::NotParticipant { .. })
        ));

        let ai = h.manager.start_ai_session("carol", None).await.unwrap();
        h.manager
            .append_message(ai.id, "ai-opponent", "Counterpoint")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_media_token_only_for_video_participants() {
        let h = harness(MockJudgeOracle::with_winner("draw"));
        h.manager.request_match("alice", true, None).await.unwrap();
        let video = h
            .manager
            .request_match("bob", true, None)
            .await
            .unwrap()
            .into_session();

        let credential = h.manager.issue_media_token(video.id, "bob").unwrap();
        assert_eq!(credential.room, format!("debate-{}", video.id));
        assert!(matches!(
            h.manager.issue_media_token(video.id, "mallory"),
            Err(DebateError::NotParticipant { .. })
        ));

        let text = active_pair(&h).await;
        assert!(matches!(
            h.manager.issue_media_token(text.id, "alice"),
            Err(DebateError::InvalidRequest { .. })
        ));
    }

    #[tokio::test]
    async fn test_stats_count_sessions() {
        let h = harness(MockJudgeOracle::with_winner("draw"));
        active_pair(&h).await;
        h.manager.request_match("carol", false, None).await.unwrap();

        let stats = h.manager.get_stats().unwrap();
        assert_eq!(stats.sessions_by_state.get("active"), Some(&1));
        assert_eq!(stats.sessions_by_state.get("waiting"), Some(&1));
        assert_eq!(stats.armed_timers, 1);
    }
}
