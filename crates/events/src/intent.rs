use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A side effect a reactor wants performed.
///
/// Intents are data: the reactor pipeline only collects them. Executing them
/// (sending the mail, calling the webhook) is the job of an [`IntentSink`]
/// supplied by the host.
///
/// [`IntentSink`]: crate::IntentSink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReactionIntent {
    /// Send a templated email.
    Email {
        template: String,
        recipient: String,
        context: JsonValue,
    },
    /// Anything else the host knows how to execute.
    Custom { name: String, payload: JsonValue },
}

impl ReactionIntent {
    pub fn email(
        template: impl Into<String>,
        recipient: impl Into<String>,
        context: JsonValue,
    ) -> Self {
        Self::Email {
            template: template.into(),
            recipient: recipient.into(),
            context,
        }
    }

    pub fn custom(name: impl Into<String>, payload: JsonValue) -> Self {
        Self::Custom {
            name: name.into(),
            payload,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ReactionIntent::Email { .. } => "email",
            ReactionIntent::Custom { .. } => "custom",
        }
    }

    /// Template name for email intents, custom name otherwise.
    pub fn name(&self) -> &str {
        match self {
            ReactionIntent::Email { template, .. } => template,
            ReactionIntent::Custom { name, .. } => name,
        }
    }
}
