use std::fs;

use atelier_core::{AppRoot, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    /// Failures are part of the transcript, not a side channel.
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn stamped(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::stamped(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::stamped(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::stamped(MessageRole::Assistant, content)
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self::stamped(MessageRole::Error, content)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            updated_at: Some(Utc::now()),
            messages: Vec::new(),
        }
    }
}

/// Per-module, per-assistant chat history files under `conversations/`.
pub struct ConversationLog {
    root: AppRoot,
}

impl ConversationLog {
    pub fn new(root: AppRoot) -> Self {
        Self { root }
    }

    /// Loads every conversation for one assistant. An older flat list of
    /// messages is wrapped into a single conversation and rewritten in the
    /// current shape before returning.
    pub fn load(&self, module: &str, assistant_id: &str) -> Result<Vec<Conversation>> {
        let path = self.root.conversation_file(module, assistant_id);
        let raw = if path.exists() {
            fs::read_to_string(&path)?
        } else if module == "doc_analyst" && self.root.legacy_doc_conversations_file().exists() {
            fs::read_to_string(self.root.legacy_doc_conversations_file())?
        } else {
            return Ok(Vec::new());
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        let value: Value = serde_json::from_str(&raw)?;
        let conversations = match Self::classify(&value) {
            Shape::Wrapped => serde_json::from_value(value)?,
            Shape::LegacyFlat => {
                info!(module, assistant_id, "migration d'un historique au format plat");
                let messages: Vec<Message> = serde_json::from_value(value)?;
                let migrated = vec![Self::wrap_legacy(messages)];
                self.save(module, assistant_id, &migrated)?;
                migrated
            }
            Shape::Empty => Vec::new(),
        };
        Ok(conversations)
    }

    pub fn save(
        &self,
        module: &str,
        assistant_id: &str,
        conversations: &[Conversation],
    ) -> Result<()> {
        let path = self.root.conversation_file(module, assistant_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_string_pretty(conversations)?)?;
        Ok(())
    }

    /// Appends to the conversation with the given id, creating it when the
    /// id is unknown. Returns the conversation id actually written to.
    pub fn append(
        &self,
        module: &str,
        assistant_id: &str,
        conversation_id: Option<&str>,
        messages: &[Message],
    ) -> Result<String> {
        let mut conversations = self.load(module, assistant_id)?;
        let index = conversation_id
            .and_then(|id| conversations.iter().position(|c| c.id == id));
        let index = match index {
            Some(i) => i,
            None => {
                conversations.push(Conversation::new(Self::title_from(messages)));
                conversations.len() - 1
            }
        };
        let conversation = &mut conversations[index];
        conversation.messages.extend_from_slice(messages);
        conversation.updated_at = Some(Utc::now());
        let id = conversation.id.clone();
        self.save(module, assistant_id, &conversations)?;
        Ok(id)
    }

    fn classify(value: &Value) -> Shape {
        let Some(items) = value.as_array() else {
            return Shape::Empty;
        };
        match items.first() {
            None => Shape::Empty,
            Some(first) if first.get("messages").is_some() => Shape::Wrapped,
            Some(first) if first.get("role").is_some() => Shape::LegacyFlat,
            Some(_) => Shape::Empty,
        }
    }

    fn wrap_legacy(messages: Vec<Message>) -> Conversation {
        let mut conversation = Conversation::new(Self::title_from(&messages));
        conversation.updated_at = messages.last().map(|m| m.timestamp);
        conversation.messages = messages;
        conversation
    }

    fn title_from(messages: &[Message]) -> String {
        messages
            .iter()
            .find(|m| m.role == MessageRole::User)
            .map(|m| {
                let mut title: String = m.content.chars().take(60).collect();
                if m.content.chars().count() > 60 {
                    title.push('…');
                }
                title
            })
            .unwrap_or_else(|| "Nouvelle conversation".to_string())
    }
}

enum Shape {
    Wrapped,
    LegacyFlat,
    Empty,
}
