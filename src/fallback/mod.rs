//! Deferred session tasks: the AI fallback offer and the vote timeout

pub mod timer;

pub use timer::{TimerKind, TimerRegistry};
