//! Integration tests for the debate-arena orchestrator
//!
//! These tests drive complete sessions through the public command surface:
//! - Matchmaking, voting and arbitration end to end
//! - Idempotent votes and resolution
//! - Rating updates on completion
//! - AI sessions, invites and the fallback hand-over

mod fixtures;

use debate_arena::error::DebateError;
use debate_arena::session::{EndOutcome, VoteOutcome};
use debate_arena::types::{Outcome, SessionState, Vote};
use tokio_test::{assert_err, assert_ok};

use fixtures::{TestSystem, AI_IDENTITY};

#[tokio::test]
async fn test_two_new_participants_complete_a_rated_debate() {
    let system = TestSystem::new("draw");

    // A concedes, B claims the win
    let session = system
        .debate("alice", "bob", Vote::Opponent, Vote::Myself)
        .await;

    assert_eq!(session.state, SessionState::Completed);
    assert_eq!(session.outcome, Some(Outcome::BWins));
    assert_eq!(session.winner_id.as_deref(), Some("bob"));
    assert!(session.ended_at.is_some());
    assert_eq!(system.oracle.call_count(), 0);

    let alice = system.manager.get_participant("alice").unwrap();
    let bob = system.manager.get_participant("bob").unwrap();
    assert!(bob.rating > alice.rating);
    assert!(bob.rating > 1500);
    assert!(alice.rating < 1500);
    assert_eq!(alice.total_debates, 1);
    assert_eq!(bob.total_debates, 1);
    assert_eq!((bob.wins, bob.losses), (1, 0));
    assert_eq!((alice.wins, alice.losses), (0, 1));
    assert!(alice.rating_deviation < 350.0);

    // The session keeps the rounded deltas it applied
    assert_eq!(session.rating_changes.len(), 2);
    let bob_change = session
        .rating_changes
        .iter()
        .find(|c| c.user_id == "bob")
        .unwrap();
    assert!(bob_change.change > 0);
    assert_eq!(bob_change.old_rating, 1500);

    assert_eq!(
        system.publisher.get_published_kinds(),
        vec![
            "session.created",
            "session.activated",
            "session.voting",
            "session.vote",
            "session.vote",
            "session.completed",
        ]
    );
}

#[tokio::test]
async fn test_agreement_table() {
    let cases = [
        (Vote::Myself, Vote::Opponent, Outcome::AWins, Some("alice"), 0),
        (Vote::Opponent, Vote::Myself, Outcome::BWins, Some("bob"), 0),
        (Vote::Draw, Vote::Draw, Outcome::Draw, None, 0),
        (Vote::Myself, Vote::Myself, Outcome::DrawAi, None, 1),
        (Vote::Opponent, Vote::Opponent, Outcome::DrawAi, None, 1),
        (Vote::Myself, Vote::Draw, Outcome::DrawAi, None, 1),
    ];

    for (vote_a, vote_b, expected, winner, oracle_calls) in cases {
        let system = TestSystem::new("draw");
        let session = system.debate("alice", "bob", vote_a, vote_b).await;

        assert_eq!(
            session.outcome,
            Some(expected),
            "votes {:?}/{:?}",
            vote_a,
            vote_b
        );
        assert_eq!(session.winner_id.as_deref(), winner);
        assert_eq!(
            system.oracle.call_count(),
            oracle_calls,
            "votes {:?}/{:?}",
            vote_a,
            vote_b
        );
    }
}

#[tokio::test]
async fn test_disagreement_follows_the_judge() {
    let system = TestSystem::new("participantA");
    let session = system
        .debate("alice", "bob", Vote::Myself, Vote::Myself)
        .await;

    assert_eq!(session.outcome, Some(Outcome::AWinsAi));
    assert_eq!(session.winner_id.as_deref(), Some("alice"));
    assert_eq!(system.oracle.call_count(), 1);

    let request = &system.oracle.requests()[0];
    assert_eq!(request.topic, session.topic);
    assert_eq!(request.transcript.len(), 2);
    assert!(!request.ai_opponent);

    let alice = system.manager.get_participant("alice").unwrap();
    assert!(alice.rating > 1500);
}

#[tokio::test]
async fn test_silent_disagreement_is_a_draw_without_the_judge() {
    let system = TestSystem::new("participantA");
    let session = system.active_pair("alice", "bob").await;
    system.manager.end_session(session.id, "alice").await.unwrap();
    system
        .manager
        .submit_vote(session.id, "alice", Vote::Myself)
        .await
        .unwrap();
    let completed = system
        .manager
        .submit_vote(session.id, "bob", Vote::Myself)
        .await
        .unwrap();

    let VoteOutcome::Completed(resolution) = completed else {
        panic!("second vote should complete the session");
    };
    assert_eq!(resolution.session.outcome, Some(Outcome::DrawAi));
    assert_eq!(resolution.session.winner_id, None);
    assert_eq!(system.oracle.call_count(), 0);
    let judgment = resolution.judgment.expect("a judgment is recorded");
    assert_eq!(judgment.reasoning, "No messages exchanged.");
}

#[tokio::test]
async fn test_judge_failure_becomes_a_plain_draw() {
    let system = TestSystem::new("participantA");
    system.oracle.push_failure("connection refused");

    let session = system
        .debate("alice", "bob", Vote::Myself, Vote::Myself)
        .await;

    assert_eq!(session.outcome, Some(Outcome::Draw));
    assert_eq!(session.winner_id, None);
    assert_eq!(system.oracle.call_count(), 1);
    assert_eq!(
        system.manager.get_participant("alice").unwrap().total_debates,
        1
    );
}

#[tokio::test]
async fn test_votes_are_idempotent() {
    let system = TestSystem::new("draw");
    let session = system.voting_pair("alice", "bob").await;

    let first = system
        .manager
        .submit_vote(session.id, "alice", Vote::Myself)
        .await
        .unwrap();
    let repeat = system
        .manager
        .submit_vote(session.id, "alice", Vote::Myself)
        .await
        .unwrap();

    let (VoteOutcome::Recorded(first), VoteOutcome::Recorded(repeat)) = (first, repeat) else {
        panic!("a single side's votes must not complete the session");
    };
    assert_eq!(first, repeat);

    // Changing a cast vote is refused
    let err = system
        .manager
        .submit_vote(session.id, "alice", Vote::Draw)
        .await
        .unwrap_err();
    assert!(matches!(err, DebateError::InvalidRequest { .. }));

    let completed = system
        .manager
        .submit_vote(session.id, "bob", Vote::Opponent)
        .await
        .unwrap();
    let VoteOutcome::Completed(resolution) = completed else {
        panic!("second vote should complete the session");
    };
    assert!(!resolution.already_resolved);
    assert_eq!(resolution.session.outcome, Some(Outcome::AWins));

    // Voting after completion returns the stored result unchanged
    let late = system
        .manager
        .submit_vote(session.id, "bob", Vote::Myself)
        .await
        .unwrap();
    let VoteOutcome::Completed(stored) = late else {
        panic!("a completed session answers with its result");
    };
    assert!(stored.already_resolved);
    assert_eq!(stored.session, resolution.session);
    assert_eq!(stored.rating_changes, resolution.rating_changes);

    let vote_events = system
        .publisher
        .get_published_kinds()
        .into_iter()
        .filter(|kind| *kind == "session.vote")
        .count();
    assert_eq!(vote_events, 2);
    assert_eq!(
        system.manager.get_participant("alice").unwrap().total_debates,
        1
    );
}

#[tokio::test]
async fn test_end_session_is_idempotent() {
    let system = TestSystem::new("draw");
    let session = system.active_pair("alice", "bob").await;

    let first = system.manager.end_session(session.id, "alice").await.unwrap();
    let second = system.manager.end_session(session.id, "bob").await.unwrap();
    assert!(matches!(first, EndOutcome::Voting(_)));
    let EndOutcome::Voting(voting) = second else {
        panic!("ending twice keeps the session in voting");
    };
    assert_eq!(voting.state, SessionState::Voting);
    assert!(system.manager.timers().armed_count() >= 1);
}

#[tokio::test]
async fn test_ai_session_resolves_once() {
    let system = TestSystem::new("participantB");
    let session = system
        .manager
        .start_ai_session("carol", Some("Tabs versus spaces".to_string()))
        .await
        .unwrap();
    assert_eq!(session.state, SessionState::Active);
    assert!(session.is_ai_opponent);
    assert_eq!(session.topic, "Tabs versus spaces");

    system
        .manager
        .append_message(session.id, "carol", "Tabs are accessible")
        .await
        .unwrap();
    system
        .manager
        .append_message(session.id, AI_IDENTITY, "Spaces render the same everywhere")
        .await
        .unwrap();

    let first = system
        .manager
        .resolve_ai_session(session.id, "carol")
        .await
        .unwrap();
    let second = system
        .manager
        .resolve_ai_session(session.id, "carol")
        .await
        .unwrap();

    assert_eq!(first.session.outcome, Some(Outcome::AiWins));
    assert_eq!(first.session.winner_id.as_deref(), Some(AI_IDENTITY));
    assert!(first.judgment.is_some());
    assert!(!first.already_resolved);

    assert!(second.already_resolved);
    assert!(second.judgment.is_none());
    assert_eq!(second.session, first.session);
    assert_eq!(system.oracle.call_count(), 1);
    assert!(system.oracle.requests()[0].ai_opponent);

    // AI debates are unrated
    assert!(first.rating_changes.is_empty());
    assert!(matches!(
        system.manager.get_participant("carol"),
        Err(DebateError::ParticipantNotFound { .. })
    ));
}

#[tokio::test]
async fn test_ending_an_ai_session_judges_it() {
    let system = TestSystem::new("participantA");
    let session = system.manager.start_ai_session("carol", None).await.unwrap();
    system
        .manager
        .append_message(session.id, "carol", "Opening")
        .await
        .unwrap();

    let ended = system.manager.end_session(session.id, "carol").await.unwrap();
    let EndOutcome::Completed(resolution) = ended else {
        panic!("AI sessions skip voting");
    };
    assert_eq!(resolution.session.outcome, Some(Outcome::AWins));
    assert_eq!(resolution.session.winner_id.as_deref(), Some("carol"));

    let again = system
        .manager
        .resolve_ai_session(session.id, "carol")
        .await
        .unwrap();
    assert!(again.already_resolved);
    assert_eq!(system.oracle.call_count(), 1);
}

#[tokio::test]
async fn test_silent_ai_session_is_a_draw_without_the_judge() {
    let system = TestSystem::new("participantB");
    let session = system.manager.start_ai_session("carol", None).await.unwrap();

    let resolution = system
        .manager
        .resolve_ai_session(session.id, "carol")
        .await
        .unwrap();
    assert_eq!(resolution.session.outcome, Some(Outcome::Draw));
    assert_eq!(system.oracle.call_count(), 0);
}

#[tokio::test]
async fn test_invite_flow() {
    let system = TestSystem::new("draw");
    let invite = system
        .manager
        .create_invite("alice", true, Some("Space exploration is worth it".to_string()))
        .await
        .unwrap();
    let code = invite.invite_code.clone().unwrap();
    assert_eq!(invite.state, SessionState::Waiting);

    // Invite sessions are never picked by open matchmaking
    let result = system.manager.request_match("mallory", true, None).await.unwrap();
    assert!(!result.is_paired());

    let err = system.manager.redeem_invite(&code, "alice").await.unwrap_err();
    assert!(matches!(err, DebateError::InvalidRequest { .. }));

    let paired = assert_ok!(system.manager.redeem_invite(&code, "bob").await);
    assert_eq!(paired.id, invite.id);
    assert_eq!(paired.state, SessionState::Active);
    assert_eq!(paired.participant_b_id.as_deref(), Some("bob"));

    // Redeeming again as the same user is a retry
    let retry = assert_ok!(system.manager.redeem_invite(&code, "bob").await);
    assert_eq!(retry.id, invite.id);

    let err = assert_err!(system.manager.redeem_invite(&code, "carol").await);
    assert!(matches!(err, DebateError::InvalidTransition { .. }));

    let err = system.manager.redeem_invite("NOPE42", "carol").await.unwrap_err();
    assert!(matches!(err, DebateError::InviteNotFound { .. }));

    let credential = system.manager.issue_media_token(paired.id, "bob").unwrap();
    assert_eq!(credential.identity, "bob");
    assert_eq!(credential.room, format!("debate-{}", paired.id));
}

#[tokio::test(start_paused = true)]
async fn test_accepting_the_fallback_swaps_in_an_ai_session() {
    let system = TestSystem::with_settings(
        debate_arena::resolution::MockJudgeOracle::with_winner("draw"),
        fixtures::quick_settings(),
    );
    let waiting = system
        .manager
        .request_match("alice", false, Some("Homework should be banned".to_string()))
        .await
        .unwrap()
        .into_session();

    let err = system
        .manager
        .accept_ai_fallback(waiting.id, "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, DebateError::InvalidRequest { .. }));

    // The fallback timer makes the offer
    tokio::time::sleep(std::time::Duration::from_secs(16)).await;
    assert!(system.manager.get_session(waiting.id).unwrap().fallback_offered);

    let err = system
        .manager
        .accept_ai_fallback(waiting.id, "mallory")
        .await
        .unwrap_err();
    assert!(matches!(err, DebateError::NotParticipant { .. }));

    let ai_session = system
        .manager
        .accept_ai_fallback(waiting.id, "alice")
        .await
        .unwrap();
    assert_ne!(ai_session.id, waiting.id);
    assert!(ai_session.is_ai_opponent);
    assert_eq!(ai_session.state, SessionState::Active);
    assert_eq!(ai_session.topic, "Homework should be banned");

    let old = system.manager.get_session(waiting.id).unwrap();
    assert_eq!(old.state, SessionState::Cancelled);
    assert!(!system.manager.timers().is_armed(
        waiting.id,
        debate_arena::fallback::TimerKind::Fallback
    ));

    assert_eq!(
        system.publisher.get_published_kinds(),
        vec![
            "session.created",
            "session.fallback_offered",
            "session.cancelled",
            "session.activated",
        ]
    );
}

#[tokio::test]
async fn test_stale_waiting_sessions_are_swept() {
    let settings = debate_arena::session::ManagerSettings {
        max_wait: std::time::Duration::ZERO,
        ..fixtures::quick_settings()
    };
    let system = TestSystem::with_settings(
        debate_arena::resolution::MockJudgeOracle::with_winner("draw"),
        settings,
    );

    let stale = system
        .manager
        .request_match("alice", false, None)
        .await
        .unwrap()
        .into_session();
    let active = system.manager.start_ai_session("carol", None).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    assert_eq!(system.manager.cleanup_stale_sessions().await.unwrap(), 1);
    assert_eq!(system.manager.cleanup_stale_sessions().await.unwrap(), 0);

    assert_eq!(
        system.manager.get_session(stale.id).unwrap().state,
        SessionState::Cancelled
    );
    assert_eq!(
        system.manager.get_session(active.id).unwrap().state,
        SessionState::Active
    );
    assert_eq!(system.manager.timers().armed_count(), 0);
}

#[tokio::test]
async fn test_unknown_session_and_outsiders() {
    let system = TestSystem::new("draw");
    let missing = uuid::Uuid::new_v4();
    assert!(matches!(
        system.manager.get_session(missing),
        Err(DebateError::SessionNotFound { .. })
    ));
    assert!(matches!(
        system.manager.end_session(missing, "alice").await,
        Err(DebateError::SessionNotFound { .. })
    ));

    let session = system.active_pair("alice", "bob").await;
    let err = system
        .manager
        .append_message(session.id, "mallory", "hi")
        .await
        .unwrap_err();
    assert!(matches!(err, DebateError::NotParticipant { .. }));

    let err = system
        .manager
        .resolve_ai_session(session.id, "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, DebateError::InvalidRequest { .. }));
}
