//! Session storage interface and the in-memory implementation
//!
//! Every write is conditional on the session's current state. A write whose
//! expected state no longer holds fails with `RaceLost` and leaves the record
//! untouched, so callers can re-read and decide what the winner did.

use crate::error::{DebateError, Result};
use crate::rating::storage::{ParticipantCommit, ParticipantRecord, ParticipantStore};
use crate::session::record::Session;
use crate::types::{SessionId, SessionState, UserId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, warn};

/// Mutation applied to a session inside a conditional update
pub type SessionMutation<'a> = &'a mut dyn FnMut(&mut Session) -> Result<()>;

/// Trait for session storage operations
pub trait SessionStore: ParticipantStore {
    /// Store a new session; invite codes must be unique
    fn insert(&self, session: Session) -> Result<()>;

    fn get(&self, session_id: SessionId) -> Result<Option<Session>>;

    fn find_by_invite(&self, code: &str) -> Result<Option<Session>>;

    /// Waiting sessions `user_id` could be paired into, oldest first
    fn find_open_waiting(&self, user_id: &str, is_video: bool) -> Result<Vec<Session>>;

    /// The caller's own open waiting session, if any
    fn find_waiting_owned_by(&self, user_id: &str, is_video: bool) -> Result<Option<Session>>;

    /// Waiting sessions created before `cutoff`
    fn find_waiting_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Session>>;

    /// Apply `mutation` only if the session is still in `expected`
    ///
    /// The mutation runs on a copy; the copy replaces the stored record only
    /// if the mutation succeeds and any state change is a lifecycle edge.
    fn update_if(
        &self,
        session_id: SessionId,
        expected: SessionState,
        mutation: SessionMutation<'_>,
    ) -> Result<Session>;

    /// Complete a session and replace participant records in one step
    ///
    /// Fails with `RaceLost` if the session left `expected`, and with
    /// `StorageFailure` if any participant version moved since the snapshot.
    fn complete_with_ratings(
        &self,
        session_id: SessionId,
        expected: SessionState,
        mutation: SessionMutation<'_>,
        commits: &[ParticipantCommit],
    ) -> Result<Session>;

    /// Session counts keyed by state
    fn count_by_state(&self) -> Result<HashMap<SessionState, usize>>;
}

#[derive(Debug, Default)]
struct StoreInner {
    sessions: HashMap<SessionId, Session>,
    invites: HashMap<String, SessionId>,
    participants: HashMap<UserId, ParticipantRecord>,
}

impl StoreInner {
    /// Run `mutation` against a copy of the session and validate the result
    fn prepare(
        &self,
        session_id: SessionId,
        expected: SessionState,
        mutation: SessionMutation<'_>,
    ) -> Result<Session> {
        let current = self
            .sessions
            .get(&session_id)
            .ok_or(DebateError::SessionNotFound { session_id })?;

        if current.state != expected {
            debug!(
                "Conditional update on session {} lost: expected {}, found {}",
                session_id, expected, current.state
            );
            return Err(DebateError::RaceLost {
                session_id,
                expected,
            });
        }

        let mut next = current.clone();
        mutation(&mut next)?;

        if next.state != current.state {
            current.ensure_transition(next.state)?;
        }
        if next.participant_a_id != current.participant_a_id || next.id != current.id {
            return Err(DebateError::InternalError {
                message: format!("Mutation changed the identity of session {}", session_id),
            });
        }
        if current.participant_b_id.is_some() && next.participant_b_id != current.participant_b_id
        {
            return Err(DebateError::InternalError {
                message: format!("Mutation replaced participant B of session {}", session_id),
            });
        }

        Ok(next)
    }
}

/// In-memory session and participant storage
///
/// Sessions and participant records share one lock so the completion commit
/// is atomic across both.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    inner: RwLock<StoreInner>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions in any state
    pub fn session_count(&self) -> Result<usize> {
        let inner = self
            .inner
            .read()
            .map_err(|_| DebateError::lock_poisoned("sessions read"))?;
        Ok(inner.sessions.len())
    }

    /// Overwrite a participant record outside of a completion (seeding, tests)
    pub fn put_participant(&self, record: ParticipantRecord) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| DebateError::lock_poisoned("sessions write"))?;
        inner.participants.insert(record.user_id.clone(), record);
        Ok(())
    }
}

impl ParticipantStore for InMemorySessionStore {
    fn get_participant(&self, user_id: &str) -> Result<Option<ParticipantRecord>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| DebateError::lock_poisoned("sessions read"))?;
        Ok(inner.participants.get(user_id).cloned())
    }

    fn participant_count(&self) -> Result<usize> {
        let inner = self
            .inner
            .read()
            .map_err(|_| DebateError::lock_poisoned("sessions read"))?;
        Ok(inner.participants.len())
    }
}

impl SessionStore for InMemorySessionStore {
    fn insert(&self, session: Session) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| DebateError::lock_poisoned("sessions write"))?;

        if inner.sessions.contains_key(&session.id) {
            return Err(DebateError::InternalError {
                message: format!("Session {} already exists", session.id),
            });
        }
        if let Some(code) = &session.invite_code {
            if inner.invites.contains_key(code) {
                return Err(DebateError::StorageFailure {
                    message: format!("Invite code {} already in use", code),
                });
            }
            inner.invites.insert(code.clone(), session.id);
        }
        inner.sessions.insert(session.id, session);
        Ok(())
    }

    fn get(&self, session_id: SessionId) -> Result<Option<Session>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| DebateError::lock_poisoned("sessions read"))?;
        Ok(inner.sessions.get(&session_id).cloned())
    }

    fn find_by_invite(&self, code: &str) -> Result<Option<Session>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| DebateError::lock_poisoned("sessions read"))?;
        Ok(inner
            .invites
            .get(code)
            .and_then(|id| inner.sessions.get(id))
            .cloned())
    }

    fn find_open_waiting(&self, user_id: &str, is_video: bool) -> Result<Vec<Session>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| DebateError::lock_poisoned("sessions read"))?;

        let mut candidates: Vec<Session> = inner
            .sessions
            .values()
            .filter(|s| s.is_open_for_matching(is_video) && s.participant_a_id != user_id)
            .cloned()
            .collect();
        candidates.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(candidates)
    }

    fn find_waiting_owned_by(&self, user_id: &str, is_video: bool) -> Result<Option<Session>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| DebateError::lock_poisoned("sessions read"))?;

        Ok(inner
            .sessions
            .values()
            .filter(|s| s.is_open_for_matching(is_video) && s.participant_a_id == user_id)
            .min_by(|a, b| a.created_at.cmp(&b.created_at))
            .cloned())
    }

    fn find_waiting_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Session>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| DebateError::lock_poisoned("sessions read"))?;

        Ok(inner
            .sessions
            .values()
            .filter(|s| s.state == SessionState::Waiting && s.created_at < cutoff)
            .cloned()
            .collect())
    }

    fn update_if(
        &self,
        session_id: SessionId,
        expected: SessionState,
        mutation: SessionMutation<'_>,
    ) -> Result<Session> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| DebateError::lock_poisoned("sessions write"))?;

        let next = inner.prepare(session_id, expected, mutation)?;
        inner.sessions.insert(session_id, next.clone());
        Ok(next)
    }

    fn complete_with_ratings(
        &self,
        session_id: SessionId,
        expected: SessionState,
        mutation: SessionMutation<'_>,
        commits: &[ParticipantCommit],
    ) -> Result<Session> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| DebateError::lock_poisoned("sessions write"))?;

        let next = inner.prepare(session_id, expected, mutation)?;
        if next.state != SessionState::Completed {
            return Err(DebateError::InternalError {
                message: format!(
                    "Completion commit left session {} in {}",
                    session_id, next.state
                ),
            });
        }

        for commit in commits {
            let stored_version = inner
                .participants
                .get(&commit.record.user_id)
                .map(|r| r.version)
                .unwrap_or(0);
            if stored_version != commit.expected_version {
                warn!(
                    "Rating commit for session {} hit a version conflict on {}: expected v{}, found v{}",
                    session_id, commit.record.user_id, commit.expected_version, stored_version
                );
                return Err(DebateError::StorageFailure {
                    message: format!(
                        "Version conflict on participant {} (expected {}, found {})",
                        commit.record.user_id, commit.expected_version, stored_version
                    ),
                });
            }
        }

        for commit in commits {
            inner
                .participants
                .insert(commit.record.user_id.clone(), commit.record.clone());
        }
        inner.sessions.insert(session_id, next.clone());
        Ok(next)
    }

    fn count_by_state(&self) -> Result<HashMap<SessionState, usize>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| DebateError::lock_poisoned("sessions read"))?;

        let mut counts = HashMap::new();
        for session in inner.sessions.values() {
            *counts.entry(session.state).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
