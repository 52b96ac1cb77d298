//! Retrieval corpus formatting.
//!
//! Each [`ConversationChunk`] becomes one [`RetrievalDocument`] whose text is
//! the chunk's messages rendered as speaker-labelled lines:
//!
//! ```text
//! Kate: are you still up
//! Harry: yeah
//! Kate: ok good
//! ```
//!
//! Documents are numbered `conv_0`, `conv_1`, ... in chronological order.
//! [`parse_document_text`] reverses the formatting so a stored document can
//! be mapped back to the speaker/text sequence it was built from.

use crate::models::{PersonaLabels, RetrievalDocument, Sender};
use crate::segment::ConversationChunk;

/// Prefix of every corpus document ID.
pub const DOCUMENT_ID_PREFIX: &str = "conv_";

/// Document ID for the chunk at `index`.
pub fn document_id(index: usize) -> String {
    format!("{}{}", DOCUMENT_ID_PREFIX, index)
}

/// Render a chunk as `"<label>: <text>"` lines joined by newlines.
pub fn format_chunk(chunk: &ConversationChunk, labels: &PersonaLabels) -> String {
    chunk
        .messages()
        .iter()
        .map(|m| format!("{} {}", labels.prefix(m.sender), m.text))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build one document per chunk, numbered from zero.
pub fn build_documents(chunks: &[ConversationChunk], labels: &PersonaLabels) -> Vec<RetrievalDocument> {
    chunks
        .iter()
        .enumerate()
        .map(|(index, chunk)| RetrievalDocument {
            id: document_id(index),
            text: format_chunk(chunk, labels),
            start_time: chunk.start_time(),
            end_time: chunk.end_time(),
            message_count: chunk.len(),
        })
        .collect()
}

/// One message recovered from a document's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    pub sender: Sender,
    pub text: String,
}

/// Recover the ordered speaker/text sequence from a document's text.
///
/// A line that does not start with either label continues the previous
/// message (messages may contain newlines). Text before the first labelled
/// line is ignored.
///
/// The format carries no escaping, so the inverse is lossy in one case: a
/// message whose continuation line itself begins with `"<label>: "` is read
/// back as two messages. Document text is shown verbatim to the generator
/// and indexed for search, so it is left unescaped.
pub fn parse_document_text(text: &str, labels: &PersonaLabels) -> Vec<ParsedLine> {
    let me = format!("{} ", labels.prefix(Sender::Me));
    let them = format!("{} ", labels.prefix(Sender::Them));
    let mut parsed: Vec<ParsedLine> = Vec::new();

    for line in text.split('\n') {
        let started = if let Some(rest) = line.strip_prefix(&me) {
            Some((Sender::Me, rest))
        } else {
            line.strip_prefix(&them).map(|rest| (Sender::Them, rest))
        };

        match started {
            Some((sender, rest)) => parsed.push(ParsedLine {
                sender,
                text: rest.to_string(),
            }),
            None => {
                if let Some(previous) = parsed.last_mut() {
                    previous.text.push('\n');
                    previous.text.push_str(line);
                }
            }
        }
    }

    parsed
}
