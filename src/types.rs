//! Common types used throughout the debate orchestrator

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for users (human participants and the AI opponent identity)
pub type UserId = String;

/// Unique identifier for debate sessions
pub type SessionId = Uuid;

/// Unique identifier for a session's communication channel
pub type ChannelId = Uuid;

/// Lifecycle state of a debate session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Created by one participant, waiting for an opponent
    Waiting,
    /// Both sides present, debate in progress
    Active,
    /// Debate ended, collecting the participants' votes
    Voting,
    /// Outcome resolved (terminal)
    Completed,
    /// Abandoned before pairing (terminal)
    Cancelled,
}

impl SessionState {
    /// Whether the transition `self -> next` is an edge of the lifecycle graph
    pub fn can_transition_to(self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (SessionState::Waiting, SessionState::Active)
                | (SessionState::Waiting, SessionState::Cancelled)
                | (SessionState::Active, SessionState::Voting)
                | (SessionState::Active, SessionState::Completed)
                | (SessionState::Voting, SessionState::Completed)
        )
    }

    /// Terminal states never change again
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Cancelled)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Waiting => write!(f, "waiting"),
            SessionState::Active => write!(f, "active"),
            SessionState::Voting => write!(f, "voting"),
            SessionState::Completed => write!(f, "completed"),
            SessionState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Which seat of a session a participant occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

/// A participant's verdict on their own debate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Vote {
    /// "I won"
    #[serde(rename = "self")]
    Myself,
    /// "My opponent won"
    #[serde(rename = "opponent")]
    Opponent,
    #[serde(rename = "draw")]
    Draw,
}

/// Final result tag of a completed session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    #[serde(rename = "A_wins")]
    AWins,
    #[serde(rename = "B_wins")]
    BWins,
    #[serde(rename = "draw")]
    Draw,
    #[serde(rename = "A_wins_ai")]
    AWinsAi,
    #[serde(rename = "B_wins_ai")]
    BWinsAi,
    #[serde(rename = "draw_ai")]
    DrawAi,
    /// The AI opponent beat the human participant
    #[serde(rename = "ai_wins")]
    AiWins,
}

impl Outcome {
    pub fn is_draw(self) -> bool {
        matches!(self, Outcome::Draw | Outcome::DrawAi)
    }

    /// Whether the Judge oracle decided this outcome
    pub fn is_arbitrated(self) -> bool {
        matches!(self, Outcome::AWinsAi | Outcome::BWinsAi | Outcome::DrawAi)
    }

    /// Score credited to participant A (1 win, 0.5 draw, 0 loss)
    pub fn score_for_a(self) -> f64 {
        match self {
            Outcome::AWins | Outcome::AWinsAi => 1.0,
            Outcome::Draw | Outcome::DrawAi => 0.5,
            Outcome::BWins | Outcome::BWinsAi | Outcome::AiWins => 0.0,
        }
    }

    pub fn as_label(self) -> &'static str {
        match self {
            Outcome::AWins => "A_wins",
            Outcome::BWins => "B_wins",
            Outcome::Draw => "draw",
            Outcome::AWinsAi => "A_wins_ai",
            Outcome::BWinsAi => "B_wins_ai",
            Outcome::DrawAi => "draw_ai",
            Outcome::AiWins => "ai_wins",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Rating triple of a participant (Glicko-2 scale)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerRating {
    pub rating: f64,
    pub deviation: f64,
    pub volatility: f64,
}

impl Default for PlayerRating {
    fn default() -> Self {
        Self {
            rating: 1500.0,
            deviation: 350.0,
            volatility: 0.06,
        }
    }
}

/// Rating change of one participant, rounded for display only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingChange {
    pub user_id: UserId,
    pub old_rating: i64,
    pub new_rating: i64,
    pub change: i64,
}

/// Kind of state change carried by a [`SessionEvent`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEventKind {
    Created,
    Activated,
    VotingOpened,
    VoteRecorded { side: Side },
    Completed {
        outcome: Outcome,
        winner_id: Option<UserId>,
    },
    Cancelled,
    /// The waiting participant may switch to an AI opponent
    FallbackOffered,
}

impl SessionEventKind {
    /// AMQP routing key for this kind of event
    pub fn routing_key(&self) -> &'static str {
        match self {
            SessionEventKind::Created => "session.created",
            SessionEventKind::Activated => "session.activated",
            SessionEventKind::VotingOpened => "session.voting",
            SessionEventKind::VoteRecorded { .. } => "session.vote",
            SessionEventKind::Completed { .. } => "session.completed",
            SessionEventKind::Cancelled => "session.cancelled",
            SessionEventKind::FallbackOffered => "session.fallback_offered",
        }
    }
}

/// State-change notification pushed to subscribers of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub state: SessionState,
    pub participant_a_id: UserId,
    pub participant_b_id: Option<UserId>,
    #[serde(flatten)]
    pub kind: SessionEventKind,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use SessionState::*;
        assert!(Waiting.can_transition_to(Active));
        assert!(Waiting.can_transition_to(Cancelled));
        assert!(Active.can_transition_to(Voting));
        assert!(Active.can_transition_to(Completed));
        assert!(Voting.can_transition_to(Completed));

        assert!(!Active.can_transition_to(Waiting));
        assert!(!Voting.can_transition_to(Active));
        assert!(!Active.can_transition_to(Cancelled));
        assert!(!Voting.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Voting));
        assert!(!Cancelled.can_transition_to(Active));
        assert!(!Waiting.can_transition_to(Voting));
    }

    #[test]
    fn test_vote_wire_names() {
        assert_eq!(serde_json::to_string(&Vote::Myself).unwrap(), "\"self\"");
        let vote: Vote = serde_json::from_str("\"opponent\"").unwrap();
        assert_eq!(vote, Vote::Opponent);
    }

    #[test]
    fn test_outcome_scores() {
        assert_eq!(Outcome::AWins.score_for_a(), 1.0);
        assert_eq!(Outcome::BWinsAi.score_for_a(), 0.0);
        assert_eq!(Outcome::DrawAi.score_for_a(), 0.5);
        assert!(Outcome::DrawAi.is_draw());
        assert!(Outcome::AWinsAi.is_arbitrated());
        assert!(!Outcome::AWins.is_arbitrated());
        assert_eq!(
            serde_json::to_string(&Outcome::BWinsAi).unwrap(),
            "\"B_wins_ai\""
        );
    }
}
