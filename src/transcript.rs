//! Per-session chat transcripts.
//!
//! Each session is one JSON file, `<dir>/<session_id>.json`, holding the
//! session start time and every exchanged message in order. Files are
//! created on the first exchange.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::generation::Role;

const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub session_id: String,
    pub started: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<TranscriptEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub timestamp: DateTime<Utc>,
    pub role: Role,
    pub text: String,
}

/// Appends exchanges to session transcript files under one directory.
pub struct TranscriptLog {
    dir: PathBuf,
}

impl TranscriptLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn session_path(&self, session_id: &str) -> Result<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.dir.join(format!("{}.json", session_id)))
    }

    /// Record one user message and the reply to it.
    ///
    /// `display_label` replaces the user text in the log when given, so a
    /// special-prompt chip is logged by its label rather than its id.
    pub fn append_exchange(
        &self,
        session_id: &str,
        user_text: &str,
        reply: &str,
        display_label: Option<&str>,
    ) -> Result<Transcript> {
        let path = self.session_path(session_id)?;
        let now = Utc::now();

        let mut transcript = match load(&path)? {
            Some(t) => t,
            None => Transcript {
                session_id: session_id.to_string(),
                started: now,
                messages: Vec::new(),
            },
        };

        transcript.messages.push(TranscriptEntry {
            timestamp: now,
            role: Role::User,
            text: display_label.unwrap_or(user_text).to_string(),
        });
        transcript.messages.push(TranscriptEntry {
            timestamp: now,
            role: Role::Assistant,
            text: reply.to_string(),
        });

        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let json = serde_json::to_string_pretty(&transcript)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write transcript: {}", path.display()))?;

        Ok(transcript)
    }
}

fn load(path: &Path) -> Result<Option<Transcript>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read transcript: {}", path.display()))?;
    let transcript = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse transcript: {}", path.display()))?;
    Ok(Some(transcript))
}

/// Session ids become file names, so only `[A-Za-z0-9_-]` is accepted.
pub fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.is_empty() || session_id.len() > MAX_SESSION_ID_LEN {
        bail!(
            "session id must be 1-{} characters, got {}",
            MAX_SESSION_ID_LEN,
            session_id.len()
        );
    }
    if !session_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        bail!(
            "session id '{}' may only contain letters, digits, '_' and '-'",
            session_id
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_session_id_validation() {
        assert!(validate_session_id("abc-123_X").is_ok());
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("../etc/passwd").is_err());
        assert!(validate_session_id("a b").is_err());
        assert!(validate_session_id(&"a".repeat(129)).is_err());
        assert!(validate_session_id(&"a".repeat(128)).is_ok());
    }

    #[test]
    fn test_append_creates_then_extends() {
        let tmp = TempDir::new().unwrap();
        let log = TranscriptLog::new(tmp.path().join("logs"));

        let first = log
            .append_exchange("s1", "be_my_boss", "go do the dishes", Some("Be my boss"))
            .unwrap();
        assert_eq!(first.messages.len(), 2);
        assert_eq!(first.messages[0].text, "Be my boss");
        assert_eq!(first.messages[1].role, Role::Assistant);

        let second = log.append_exchange("s1", "hi", "hey", None).unwrap();
        assert_eq!(second.messages.len(), 4);
        assert_eq!(second.started, first.started);
        assert_eq!(second.messages[2].text, "hi");

        let on_disk: Transcript =
            serde_json::from_str(&std::fs::read_to_string(tmp.path().join("logs/s1.json")).unwrap())
                .unwrap();
        assert_eq!(on_disk, second);
    }

    #[test]
    fn test_rejects_unsafe_session() {
        let tmp = TempDir::new().unwrap();
        let log = TranscriptLog::new(tmp.path());
        assert!(log.append_exchange("../x", "a", "b", None).is_err());
    }
}
