//! Raw record → [`NormalizedMessage`] conversion.
//!
//! Resolution order per record:
//!
//! 1. the plain-text column, verbatim, when non-empty;
//! 2. otherwise the rich-text body via [`decode_body`];
//! 3. otherwise the record is dropped and counted.
//!
//! Per-record failures never abort the batch.

use crate::decode::{decode_body, Decoded, MalformedBody};
use crate::models::{NormalizedMessage, RawRecord, Sender};
use crate::timestamp;

/// Messages recovered from a batch of records, plus aggregate failure counts.
#[derive(Debug, Clone, Default)]
pub struct ExtractOutcome {
    pub messages: Vec<NormalizedMessage>,
    /// Records dropped because no text could be recovered (includes `malformed`).
    pub unrecoverable: usize,
    /// Subset of `unrecoverable` whose body matched the container but was truncated.
    pub malformed: usize,
}

/// Normalize one record, or `None` when it carries no extractable text.
pub fn normalize_record(record: &RawRecord) -> Option<NormalizedMessage> {
    match resolve_text(record) {
        Resolution::Text(text) => Some(to_message(record, text)),
        Resolution::Missing | Resolution::Malformed(_) => None,
    }
}

/// Normalize a batch of records, preserving their order.
pub fn normalize_records<I>(records: I) -> ExtractOutcome
where
    I: IntoIterator<Item = RawRecord>,
{
    let mut outcome = ExtractOutcome::default();

    for record in records {
        match resolve_text(&record) {
            Resolution::Text(text) => outcome.messages.push(to_message(&record, text)),
            Resolution::Missing => outcome.unrecoverable += 1,
            Resolution::Malformed(reason) => {
                tracing::warn!(record_id = record.id, %reason, "dropping malformed message body");
                outcome.malformed += 1;
                outcome.unrecoverable += 1;
            }
        }
    }

    outcome
}

enum Resolution {
    Text(String),
    Missing,
    Malformed(MalformedBody),
}

fn resolve_text(record: &RawRecord) -> Resolution {
    if let Some(text) = record.text.as_deref().filter(|t| !t.is_empty()) {
        return Resolution::Text(text.to_string());
    }

    match record.body.as_deref().map(decode_body) {
        Some(Decoded::Text(text)) if !text.is_empty() => Resolution::Text(text),
        Some(Decoded::Malformed(reason)) => Resolution::Malformed(reason),
        _ => Resolution::Missing,
    }
}

fn to_message(record: &RawRecord, text: String) -> NormalizedMessage {
    NormalizedMessage {
        id: record.id,
        timestamp: timestamp::normalize(record.raw_timestamp),
        sender: Sender::from_flag(record.sender_flag),
        text,
    }
}
