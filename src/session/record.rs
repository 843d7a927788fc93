//! Debate session record and its lifecycle moves
//!
//! The mutation helpers here only change the record in memory. They are
//! applied by the store inside a compare-and-swap on `state`, which is what
//! makes a move take effect at most once.

use crate::error::{DebateError, Result};
use crate::types::{ChannelId, Outcome, RatingChange, SessionId, SessionState, Side, UserId, Vote};
use crate::utils::{current_timestamp, generate_channel_id, generate_session_id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which resolution path a session takes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    HumanPair,
    AiOpponent,
}

/// A debate session between two humans, or a human and the AI opponent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub topic: String,
    pub state: SessionState,
    pub participant_a_id: UserId,
    /// Empty until matched; stays empty for AI-opponent sessions
    pub participant_b_id: Option<UserId>,
    pub is_ai_opponent: bool,
    pub is_video: bool,
    pub vote_a: Option<Vote>,
    pub vote_b: Option<Vote>,
    pub winner_id: Option<UserId>,
    pub outcome: Option<Outcome>,
    pub invite_code: Option<String>,
    pub channel_id: Option<ChannelId>,
    pub fallback_offered: bool,
    /// Rounded rating deltas recorded at completion
    #[serde(default)]
    pub rating_changes: Vec<RatingChange>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub voting_started_at: Option<DateTime<Utc>>,
}

impl Session {
    /// A session waiting for an opponent
    pub fn new_waiting(
        participant_a_id: UserId,
        topic: String,
        is_video: bool,
        invite_code: Option<String>,
    ) -> Self {
        Self {
            id: generate_session_id(),
            topic,
            state: SessionState::Waiting,
            participant_a_id,
            participant_b_id: None,
            is_ai_opponent: false,
            is_video,
            vote_a: None,
            vote_b: None,
            winner_id: None,
            outcome: None,
            invite_code,
            channel_id: None,
            fallback_offered: false,
            rating_changes: Vec::new(),
            created_at: current_timestamp(),
            started_at: None,
            ended_at: None,
            voting_started_at: None,
        }
    }

    /// An AI-opponent session, active from the start
    pub fn new_ai_opponent(participant_a_id: UserId, topic: String) -> Self {
        let now = current_timestamp();
        let mut session = Self::new_waiting(participant_a_id, topic, false, None);
        session.is_ai_opponent = true;
        session.state = SessionState::Active;
        session.channel_id = Some(generate_channel_id());
        session.started_at = Some(now);
        session
    }

    pub fn kind(&self) -> SessionKind {
        if self.is_ai_opponent {
            SessionKind::AiOpponent
        } else {
            SessionKind::HumanPair
        }
    }

    /// Seat of `user_id` in this session, if any
    pub fn side_of(&self, user_id: &str) -> Option<Side> {
        if self.participant_a_id == user_id {
            Some(Side::A)
        } else if self.participant_b_id.as_deref() == Some(user_id) {
            Some(Side::B)
        } else {
            None
        }
    }

    /// Seat of `user_id`, or `NotParticipant`
    pub fn require_side(&self, user_id: &str) -> Result<Side> {
        self.side_of(user_id)
            .ok_or_else(|| DebateError::NotParticipant {
                session_id: self.id,
                user_id: user_id.to_string(),
            })
    }

    pub fn participant_id(&self, side: Side) -> Option<&str> {
        match side {
            Side::A => Some(self.participant_a_id.as_str()),
            Side::B => self.participant_b_id.as_deref(),
        }
    }

    pub fn vote_of(&self, side: Side) -> Option<Vote> {
        match side {
            Side::A => self.vote_a,
            Side::B => self.vote_b,
        }
    }

    pub fn both_votes(&self) -> Option<(Vote, Vote)> {
        self.vote_a.zip(self.vote_b)
    }

    /// Whether the session completed without a winner
    pub fn is_draw(&self) -> bool {
        self.outcome.map(Outcome::is_draw).unwrap_or(false)
    }

    /// Waiting session that random matchmaking may pair
    pub fn is_open_for_matching(&self, is_video: bool) -> bool {
        self.state == SessionState::Waiting
            && self.is_video == is_video
            && self.invite_code.is_none()
            && !self.is_ai_opponent
    }

    /// Reject `self.state -> to` unless it is an edge of the lifecycle
    pub fn ensure_transition(&self, to: SessionState) -> Result<()> {
        if self.state.can_transition_to(to) {
            Ok(())
        } else {
            Err(DebateError::InvalidTransition {
                session_id: self.id,
                from: self.state,
                to,
            })
        }
    }

    /// `waiting -> active` with `opponent_id` as participant B
    pub fn pair_with(&mut self, opponent_id: &str) -> Result<()> {
        self.ensure_transition(SessionState::Active)?;
        if self.participant_a_id == opponent_id {
            return Err(DebateError::InvalidRequest {
                reason: "A participant cannot debate themselves".to_string(),
            });
        }
        self.participant_b_id = Some(opponent_id.to_string());
        self.channel_id = Some(generate_channel_id());
        self.started_at = Some(current_timestamp());
        self.state = SessionState::Active;
        Ok(())
    }

    /// `waiting -> cancelled`
    pub fn cancel(&mut self) -> Result<()> {
        self.ensure_transition(SessionState::Cancelled)?;
        self.state = SessionState::Cancelled;
        self.ended_at = Some(current_timestamp());
        Ok(())
    }

    /// `active -> voting`
    pub fn open_voting(&mut self) -> Result<()> {
        self.ensure_transition(SessionState::Voting)?;
        if self.is_ai_opponent {
            return Err(DebateError::InvalidTransition {
                session_id: self.id,
                from: self.state,
                to: SessionState::Voting,
            });
        }
        let now = current_timestamp();
        self.state = SessionState::Voting;
        self.ended_at = Some(now);
        self.voting_started_at = Some(now);
        Ok(())
    }

    /// Record `vote` for `side`; returns whether anything changed
    ///
    /// Re-sending the same vote is a no-op. Votes never change once cast.
    pub fn record_vote(&mut self, side: Side, vote: Vote) -> Result<bool> {
        if self.state != SessionState::Voting {
            return Err(DebateError::InvalidTransition {
                session_id: self.id,
                from: self.state,
                to: SessionState::Voting,
            });
        }
        let slot = match side {
            Side::A => &mut self.vote_a,
            Side::B => &mut self.vote_b,
        };
        match slot {
            None => {
                *slot = Some(vote);
                Ok(true)
            }
            Some(existing) if *existing == vote => Ok(false),
            Some(existing) => Err(DebateError::InvalidRequest {
                reason: format!(
                    "Side {:?} already voted {:?} in session {}",
                    side, existing, self.id
                ),
            }),
        }
    }

    /// Mark the AI fallback offer; returns false if one was already made
    pub fn offer_fallback(&mut self) -> Result<bool> {
        if self.state != SessionState::Waiting {
            return Err(DebateError::InvalidTransition {
                session_id: self.id,
                from: self.state,
                to: SessionState::Cancelled,
            });
        }
        if self.fallback_offered {
            return Ok(false);
        }
        self.fallback_offered = true;
        Ok(true)
    }

    /// `active|voting -> completed` with the resolved result
    pub fn complete(
        &mut self,
        outcome: Outcome,
        winner_id: Option<UserId>,
        rating_changes: Vec<RatingChange>,
    ) -> Result<()> {
        self.ensure_transition(SessionState::Completed)?;
        // Human pairs always pass through voting
        if self.state == SessionState::Active && !self.is_ai_opponent {
            return Err(DebateError::InvalidTransition {
                session_id: self.id,
                from: self.state,
                to: SessionState::Completed,
            });
        }
        // Exactly one of: a winner, or a draw
        if winner_id.is_some() == outcome.is_draw() {
            return Err(DebateError::InternalError {
                message: format!(
                    "Outcome {} inconsistent with winner {:?} for session {}",
                    outcome, winner_id, self.id
                ),
            });
        }
        let now = current_timestamp();
        self.state = SessionState::Completed;
        self.outcome = Some(outcome);
        self.winner_id = winner_id;
        self.rating_changes = rating_changes;
        if self.ended_at.is_none() {
            self.ended_at = Some(now);
        }
        Ok(())
    }
}
