//! Core data models used throughout Persona Harness.
//!
//! These types represent the records, messages, conversation chunks, and
//! corpus documents that flow through the ingestion and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A row read from the source message store, before any decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub id: i64,
    /// Plain-text column. May be absent or empty for rich-text messages.
    pub text: Option<String>,
    /// Serialized rich-text container, decoded by [`crate::decode`].
    pub body: Option<Vec<u8>>,
    /// `true` when the message was sent by the "self" persona.
    pub sender_flag: bool,
    /// Platform timestamp; see [`crate::timestamp::normalize`].
    pub raw_timestamp: i64,
}

/// Which side of the conversation a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    /// The "self" persona whose voice the generator imitates.
    Me,
    /// The other participant.
    Them,
}

impl Sender {
    pub fn from_flag(is_from_me: bool) -> Self {
        if is_from_me {
            Sender::Me
        } else {
            Sender::Them
        }
    }
}

/// Display labels for the two participants.
///
/// Labels prefix every line of a corpus document (`"<label>: <text>"`) and
/// name the speakers inside assembled prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaLabels {
    pub self_label: String,
    pub other_label: String,
}

impl PersonaLabels {
    pub fn new(self_label: impl Into<String>, other_label: impl Into<String>) -> Self {
        Self {
            self_label: self_label.into(),
            other_label: other_label.into(),
        }
    }

    pub fn label(&self, sender: Sender) -> &str {
        match sender {
            Sender::Me => &self.self_label,
            Sender::Them => &self.other_label,
        }
    }

    /// Line prefix identifying a speaker, e.g. `"Kate:"`.
    pub fn prefix(&self, sender: Sender) -> String {
        format!("{}:", self.label(sender))
    }
}

/// A message with recovered text and a normalized timestamp.
///
/// `text` is never empty: records without extractable text are dropped by
/// the extractor instead of being emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub id: i64,
    pub timestamp: Option<DateTime<Utc>>,
    pub sender: Sender,
    pub text: String,
}

/// One document in the retrieval corpus, built from a single conversation chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalDocument {
    /// `conv_<index>`.
    pub id: String,
    pub text: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub message_count: usize,
}
