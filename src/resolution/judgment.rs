//! Judge verdicts and lenient reply parsing

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reasoning attached to a draw when nobody spoke
pub const NO_MESSAGES_REASONING: &str = "No messages exchanged.";

/// Which side the Judge picked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JudgedWinner {
    #[serde(rename = "participantA")]
    ParticipantA,
    #[serde(rename = "participantB")]
    ParticipantB,
    #[serde(rename = "draw")]
    Draw,
}

impl JudgedWinner {
    /// Accepts the canonical names and the common aliases
    fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "participanta" | "participant_a" | "a" | "user1" | "side_a" => {
                Some(JudgedWinner::ParticipantA)
            }
            "participantb" | "participant_b" | "b" | "user2" | "side_b" | "ai" => {
                Some(JudgedWinner::ParticipantB)
            }
            "draw" | "tie" => Some(JudgedWinner::Draw),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JudgmentScores {
    pub a: f64,
    pub b: f64,
}

/// Oracle verdict; forwarded in responses, never stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    pub winner: JudgedWinner,
    pub reasoning: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scores: Option<JudgmentScores>,
}

impl Judgment {
    pub fn draw(reasoning: impl Into<String>) -> Self {
        Self {
            winner: JudgedWinner::Draw,
            reasoning: reasoning.into(),
            scores: None,
        }
    }

    pub fn no_messages() -> Self {
        Self::draw(NO_MESSAGES_REASONING)
    }
}

/// Parse a raw oracle reply
///
/// Tolerates prose or code fences around the JSON object. Anything without
/// a recognisable winner becomes a draw whose reasoning is the raw text.
pub fn parse_judgment(raw: &str) -> Judgment {
    let Some(value) = extract_json_object(raw) else {
        return Judgment::draw(raw.trim());
    };

    let Some(winner) = value
        .get("winner")
        .and_then(Value::as_str)
        .and_then(JudgedWinner::from_label)
    else {
        return Judgment::draw(raw.trim());
    };

    let reasoning = value
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Judgment {
        winner,
        reasoning,
        scores: value.get("scores").and_then(parse_scores),
    }
}

fn extract_json_object(raw: &str) -> Option<Value> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str::<Value>(&raw[start..=end])
        .ok()
        .filter(Value::is_object)
}

fn parse_scores(scores: &Value) -> Option<JudgmentScores> {
    let pick = |keys: &[&str]| keys.iter().find_map(|k| scores.get(*k).and_then(Value::as_f64));
    Some(JudgmentScores {
        a: pick(&["a", "participantA", "user1"])?,
        b: pick(&["b", "participantB", "user2"])?,
    })
}
