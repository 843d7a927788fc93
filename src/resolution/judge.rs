//! Judge oracle interface and implementations
//!
//! The oracle returns raw reply text. Interpreting it is the resolver's job,
//! so a reply that is not valid JSON still reaches [`parse_judgment`].
//!
//! [`parse_judgment`]: crate::resolution::judgment::parse_judgment

use crate::error::{DebateError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

/// Speaker label of a transcript line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    #[serde(rename = "participantA")]
    ParticipantA,
    #[serde(rename = "participantB")]
    ParticipantB,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptLine {
    pub speaker: Speaker,
    pub text: String,
}

/// What the oracle is asked to judge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeRequest {
    pub topic: String,
    /// Participant B is the AI opponent
    pub ai_opponent: bool,
    pub transcript: Vec<TranscriptLine>,
}

#[async_trait]
pub trait JudgeOracle: Send + Sync {
    /// Ask for a verdict; returns the raw reply text
    async fn judge(&self, request: &JudgeRequest) -> Result<String>;
}

/// Oracle reached over HTTP
///
/// POSTs the request as JSON and returns the response body.
pub struct HttpJudgeOracle {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpJudgeOracle {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DebateError::ConfigurationError {
                message: format!("Failed to build Judge HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl JudgeOracle for HttpJudgeOracle {
    async fn judge(&self, request: &JudgeRequest) -> Result<String> {
        debug!(
            "Posting {} transcript lines to Judge at {}",
            request.transcript.len(),
            self.endpoint
        );

        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| DebateError::OracleFailure {
                reason: format!("Judge request failed: {}", e),
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!("Judge at {} answered {}", self.endpoint, status);
            return Err(DebateError::OracleFailure {
                reason: format!("Judge answered HTTP {}", status),
            });
        }

        response.text().await.map_err(|e| DebateError::OracleFailure {
            reason: format!("Failed to read Judge response: {}", e),
        })
    }
}

/// Mock oracle for testing
///
/// Replies are served in order; once they run out the default reply is used.
#[derive(Debug)]
pub struct MockJudgeOracle {
    replies: Mutex<VecDeque<Result<String>>>,
    default_reply: String,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<JudgeRequest>>,
}

impl MockJudgeOracle {
    /// Always answer with `reply`
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            default_reply: reply.into(),
            delay: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer with a canonical verdict for `winner`
    pub fn with_winner(winner: &str) -> Self {
        Self::new(format!(
            r#"{{"winner": "{}", "reasoning": "Scripted verdict.", "scores": {{"a": 7, "b": 7}}}}"#,
            winner
        ))
    }

    /// Queue a one-off reply ahead of the default
    pub fn push_reply(&self, reply: Result<String>) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }

    /// Queue a one-off failure
    pub fn push_failure(&self, reason: &str) {
        self.push_reply(Err(DebateError::OracleFailure {
            reason: reason.to_string(),
        }));
    }

    /// Sleep this long before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<JudgeRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl JudgeOracle for MockJudgeOracle {
    async fn judge(&self, request: &JudgeRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .replies
            .lock()
            .ok()
            .and_then(|mut replies| replies.pop_front());
        scripted.unwrap_or_else(|| Ok(self.default_reply.clone()))
    }
}
