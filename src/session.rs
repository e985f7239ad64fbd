use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::context::ConversationContext;

/// One chat exchange kept for the next turn's prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
}

impl HistoryEntry {
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

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    #[serde(default)]
    pub context: ConversationContext,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            context: ConversationContext::default(),
            history: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Append an exchange and keep only the last `limit` entries.
    pub fn record_exchange(&mut self, user: &str, assistant: &str, limit: usize) {
        self.history.push(HistoryEntry::user(user));
        self.history.push(HistoryEntry::assistant(assistant));
        if self.history.len() > limit {
            let excess = self.history.len() - limit;
            self.history.drain(..excess);
        }
        self.updated_at = Utc::now();
    }
}

/// Persistence for sessions. `load` returns `None` for unknown ids.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<Session>>;
    async fn save(&self, session: &Session) -> Result<()>;
}

/// One pretty-printed JSON file per session under `dir`.
#[derive(Debug, Clone)]
pub struct JsonSessionStore {
    dir: PathBuf,
}

impl JsonSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        let safe: String = session_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

#[async_trait]
impl SessionStore for JsonSessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<Session>> {
        let path = self.path_for(session_id);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }

        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read session file: {}", path.display()))?;
        let session = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse session file: {}", path.display()))?;
        Ok(Some(session))
    }

    async fn save(&self, session: &Session) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create sessions directory: {}", self.dir.display()))?;

        let path = self.path_for(&session.id);
        let raw = serde_json::to_string_pretty(session).context("Failed to serialize session")?;
        tokio::fs::write(&path, raw)
            .await
            .with_context(|| format!("Failed to write session file: {}", path.display()))?;

        log::debug!("Session {} saved to {}", session.id, path.display());
        Ok(())
    }
}
