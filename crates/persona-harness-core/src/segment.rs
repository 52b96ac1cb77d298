//! Inactivity-gap conversation segmenter.
//!
//! Splits an ordered message sequence into [`ConversationChunk`]s: a new
//! chunk starts whenever the time since the previous message exceeds the
//! configured gap. Each chunk becomes one retrieval document.
//!
//! Messages without a timestamp cannot be gap-tested and are skipped
//! entirely. They neither appear in a chunk nor split their neighbours.
//! This mirrors how the corpus has always been built; it is a known
//! limitation rather than something to patch over here.

use chrono::{DateTime, Duration, Utc};

use crate::models::NormalizedMessage;

/// Default inactivity gap between conversations, in minutes.
pub const DEFAULT_GAP_MINUTES: i64 = 30;

/// A maximal run of messages with no internal gap above the threshold.
///
/// Never empty; every message carries a timestamp, ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationChunk {
    messages: Vec<NormalizedMessage>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
}

impl ConversationChunk {
    fn open(message: NormalizedMessage, at: DateTime<Utc>) -> Self {
        Self {
            messages: vec![message],
            start_time: at,
            end_time: at,
        }
    }

    fn push(&mut self, message: NormalizedMessage, at: DateTime<Utc>) {
        self.messages.push(message);
        self.end_time = at;
    }

    pub fn messages(&self) -> &[NormalizedMessage] {
        &self.messages
    }

    pub fn into_messages(self) -> Vec<NormalizedMessage> {
        self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Always `false`; present for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }
}

/// Group messages into conversation chunks separated by more than `gap`.
///
/// Input order is preserved; callers pass messages sorted by timestamp.
/// Returns chunks in order, each non-empty.
pub fn segment_conversations<I>(messages: I, gap: Duration) -> Vec<ConversationChunk>
where
    I: IntoIterator<Item = NormalizedMessage>,
{
    let mut chunks = Vec::new();
    let mut current: Option<ConversationChunk> = None;

    for msg in messages {
        let Some(at) = msg.timestamp else {
            continue;
        };

        let continues = current
            .as_ref()
            .is_some_and(|chunk| at - chunk.end_time <= gap);

        if continues {
            if let Some(chunk) = current.as_mut() {
                chunk.push(msg, at);
            }
        } else if let Some(done) = current.replace(ConversationChunk::open(msg, at)) {
            chunks.push(done);
        }
    }

    // Flush remaining
    if let Some(done) = current {
        chunks.push(done);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sender;
    use chrono::TimeZone;

    fn msg(id: i64, minute: Option<i64>) -> NormalizedMessage {
        let base = Utc.with_ymd_and_hms(2024, 2, 14, 9, 0, 0).unwrap();
        NormalizedMessage {
            id,
            timestamp: minute.map(|m| base + Duration::minutes(m)),
            sender: if id % 2 == 0 { Sender::Me } else { Sender::Them },
            text: format!("message {}", id),
        }
    }

    fn ids(chunks: &[ConversationChunk]) -> Vec<Vec<i64>> {
        chunks
            .iter()
            .map(|c| c.messages().iter().map(|m| m.id).collect())
            .collect()
    }

    fn gap() -> Duration {
        Duration::minutes(DEFAULT_GAP_MINUTES)
    }

    #[test]
    fn test_gap_splits_chunks() {
        let messages = vec![msg(0, Some(0)), msg(1, Some(10)), msg(2, Some(50))];
        let chunks = segment_conversations(messages, gap());
        assert_eq!(ids(&chunks), vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn test_gap_is_measured_from_previous_message() {
        // Each step is 20 minutes: the chunk spans an hour but never breaks.
        let messages = vec![
            msg(0, Some(0)),
            msg(1, Some(20)),
            msg(2, Some(40)),
            msg(3, Some(60)),
        ];
        let chunks = segment_conversations(messages, gap());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 4);
    }

    #[test]
    fn test_exact_gap_does_not_split() {
        let messages = vec![msg(0, Some(0)), msg(1, Some(30)), msg(2, Some(61))];
        let chunks = segment_conversations(messages, gap());
        assert_eq!(ids(&chunks), vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn test_untimestamped_message_is_skipped() {
        let messages = vec![msg(0, Some(0)), msg(1, None), msg(2, Some(10))];
        let chunks = segment_conversations(messages, gap());
        assert_eq!(ids(&chunks), vec![vec![0, 2]]);
    }

    #[test]
    fn test_untimestamped_message_does_not_split() {
        let messages = vec![
            msg(0, Some(0)),
            msg(1, Some(5)),
            msg(2, None),
            msg(3, Some(100)),
            msg(4, None),
            msg(5, Some(110)),
        ];
        let chunks = segment_conversations(messages, gap());
        assert_eq!(ids(&chunks), vec![vec![0, 1], vec![3, 5]]);
    }

    #[test]
    fn test_empty_input() {
        assert!(segment_conversations(Vec::new(), gap()).is_empty());
        assert!(segment_conversations(vec![msg(0, None)], gap()).is_empty());
    }

    #[test]
    fn test_chunk_bounds() {
        let messages = vec![msg(0, Some(0)), msg(1, Some(12)), msg(2, Some(25))];
        let chunks = segment_conversations(messages, gap());
        assert_eq!(chunks.len(), 1);
        let c = &chunks[0];
        assert_eq!(c.end_time() - c.start_time(), Duration::minutes(25));
        assert!(!c.is_empty());
    }

    #[test]
    fn test_custom_gap() {
        let messages = vec![msg(0, Some(0)), msg(1, Some(6)), msg(2, Some(10))];
        let chunks = segment_conversations(messages, Duration::minutes(5));
        assert_eq!(ids(&chunks), vec![vec![0], vec![1, 2]]);
    }
}
