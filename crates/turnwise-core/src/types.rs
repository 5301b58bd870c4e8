//! Data model shared by the scoring engine and the runtime.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry in a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

/// Scenario metadata attached to a conversation.
///
/// Policy and fact text are rendered into the system prompt by the
/// context builder. Unknown keys are preserved in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facts_text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<String>,

    /// Scenario axes, e.g. `price_sensitivity=high`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub axes: BTreeMap<String, String>,

    /// Generation parameter overrides (temperature, top_p, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, JsonValue>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

/// A scripted conversation from a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,

    pub turns: Vec<Turn>,

    #[serde(default)]
    pub metadata: ConversationMeta,
}

impl Conversation {
    /// Number of user turns the model has to answer.
    pub fn user_turns(&self) -> usize {
        self.turns.iter().filter(|t| t.is_user()).count()
    }
}

/// Dataset-level metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

/// A versioned set of scripted conversations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub dataset_id: String,

    pub version: String,

    #[serde(default)]
    pub metadata: DatasetMetadata,

    #[serde(default)]
    pub conversations: Vec<Conversation>,
}

impl Dataset {
    /// Domain of the dataset, falling back to `default` when unset.
    pub fn domain_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.metadata.domain.as_deref().unwrap_or(default)
    }
}

/// Resolution the assistant reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Allow,
    Deny,
    Partial,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "ALLOW",
            Decision::Deny => "DENY",
            Decision::Partial => "PARTIAL",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALLOW" | "APPROVE" | "APPROVED" => Ok(Decision::Allow),
            "DENY" | "DENIED" => Ok(Decision::Deny),
            "PARTIAL" => Ok(Decision::Partial),
            other => Err(format!("unknown decision: {}", other)),
        }
    }
}

/// Structured facts extracted from a transcript.
///
/// Every field is optional; an empty snapshot means nothing could be
/// extracted yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_amount: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_action: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub policy_flags: BTreeSet<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl StateSnapshot {
    pub fn is_empty(&self) -> bool {
        self.decision.is_none()
            && self.order_id.is_none()
            && self.refund_amount.is_none()
            && self.reason_code.is_none()
            && self.next_action.is_none()
            && self.policy_flags.is_empty()
            && self.extra.is_empty()
    }

    /// Amounts this state vouches for: the refund amount plus numeric
    /// `totals` / `amount` extras.
    pub fn known_amounts(&self) -> Vec<f64> {
        let mut amounts: Vec<f64> = self.refund_amount.into_iter().collect();
        for key in ["totals", "amount"] {
            if let Some(v) = self.extra.get(key).and_then(JsonValue::as_f64) {
                amounts.push(v);
            }
        }
        amounts
    }
}

/// A chat message sent to a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role: "system", "user", or "assistant"
    pub role: String,

    /// Message content
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

impl From<&Turn> for ChatMessage {
    fn from(turn: &Turn) -> Self {
        match turn.role {
            Role::User => ChatMessage::user(turn.text.clone()),
            Role::Assistant => ChatMessage::assistant(turn.text.clone()),
        }
    }
}
