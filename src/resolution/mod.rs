//! Vote and arbitration resolution
//!
//! This module decides who won a debate: from agreeing votes, or by asking
//! the Judge oracle about the transcript.

pub mod judge;
pub mod judgment;
pub mod resolver;
pub mod transcript;

// Re-export commonly used types
pub use judge::{HttpJudgeOracle, JudgeOracle, JudgeRequest, MockJudgeOracle};
pub use judgment::{parse_judgment, JudgedWinner, Judgment};
pub use resolver::{agreement, Resolver, Verdict};
pub use transcript::{InMemoryTranscriptStore, Message, TranscriptSource};
