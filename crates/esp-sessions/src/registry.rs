//! Session registry
//!
//! Keeps the ordered list of issued session ids and persists it after every
//! change. The list only grows: ids are never reused while listed.

use crate::storage::{RawContent, Storage, StorageFile, StorageResult};
use esp_core::SessionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Storage key of the session list
pub const SESSIONS_KEY: &str = "espdisplay.sessions";

const SESSIONS_VERSION: u32 = 1;
const SESSIONS_MINOR_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SessionsData {
    sessions: Vec<SessionId>,
}

/// Ordered, persisted list of issued sessions
pub struct SessionRegistry {
    storage: Storage,
    // Held across persistence so writes land in mutation order
    sessions: Mutex<Vec<SessionId>>,
}

impl SessionRegistry {
    /// An empty registry writing to `storage`
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Load the persisted list
    ///
    /// Entries in the legacy `{"uuid": n}` form are normalized to `n`,
    /// anything that is not a non-negative integer is dropped, and repeated
    /// ids keep their first position. When cleaning changed the list the
    /// cleaned form is written back.
    #[instrument(skip(storage))]
    pub async fn load(storage: Storage) -> StorageResult<Self> {
        let (raw_entries, enveloped) = match storage.load_raw(SESSIONS_KEY).await? {
            None => (Vec::new(), true),
            Some(RawContent::Enveloped { data, .. }) => (sessions_array(data), true),
            Some(RawContent::Bare(data)) => (sessions_array(data), false),
        };

        let mut cleaned: Vec<SessionId> = Vec::with_capacity(raw_entries.len());
        for entry in &raw_entries {
            match normalize_entry(entry) {
                Some(id) if !cleaned.contains(&id) => cleaned.push(id),
                Some(id) => debug!(session = id, "Dropping repeated session entry"),
                None => warn!(entry = %entry, "Dropping invalid session entry"),
            }
        }

        let changed = !enveloped
            || cleaned.len() != raw_entries.len()
            || raw_entries.iter().any(|e| !e.is_u64());

        let registry = Self::new(storage);
        {
            let mut sessions = registry.sessions.lock().await;
            *sessions = cleaned;
            if changed {
                info!(sessions = sessions.len(), "Rewriting normalized session list");
                registry.persist(&sessions).await;
            }
        }
        Ok(registry)
    }

    /// Sessions in first-seen order
    pub async fn list_sessions(&self) -> Vec<SessionId> {
        self.sessions.lock().await.clone()
    }

    pub async fn contains(&self, id: SessionId) -> bool {
        self.sessions.lock().await.contains(&id)
    }

    /// Record a session; a no-op when it is already listed
    ///
    /// Returns whether the id was new.
    #[instrument(skip(self))]
    pub async fn add_session(&self, id: SessionId) -> bool {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains(&id) {
            return false;
        }
        sessions.push(id);
        debug!(session = id, "Added session");
        self.persist(&sessions).await;
        true
    }

    /// Next id that would be handed out; does not reserve it
    pub async fn free_session_id(&self) -> SessionId {
        next_free(&self.sessions.lock().await)
    }

    /// Pick the next free id and record it under one lock
    #[instrument(skip(self))]
    pub async fn allocate(&self) -> SessionId {
        let mut sessions = self.sessions.lock().await;
        let id = next_free(&sessions);
        sessions.push(id);
        info!(session = id, "Allocated session");
        self.persist(&sessions).await;
        id
    }

    async fn persist(&self, sessions: &[SessionId]) {
        let file = StorageFile::new(
            SESSIONS_KEY,
            SessionsData {
                sessions: sessions.to_vec(),
            },
            SESSIONS_VERSION,
            SESSIONS_MINOR_VERSION,
        );
        if let Err(e) = self.storage.save(&file).await {
            warn!(
                path = %self.storage.file_path(SESSIONS_KEY).display(),
                error = %e,
                "Failed to persist sessions"
            );
        }
    }
}

/// One past the highest listed id, or the lowest unlisted id once the
/// highest is `SessionId::MAX`
fn next_free(sessions: &[SessionId]) -> SessionId {
    let Some(max) = sessions.iter().max() else {
        return 0;
    };
    match max.checked_add(1) {
        Some(id) => id,
        None => {
            warn!(session = max, "Highest session id is at the limit, reusing a gap");
            let taken: HashSet<SessionId> = sessions.iter().copied().collect();
            // A list of n ids always leaves a gap in 0..=n
            (0..=sessions.len() as SessionId)
                .find(|id| !taken.contains(id))
                .unwrap_or_default()
        }
    }
}

fn sessions_array(data: Value) -> Vec<Value> {
    match data {
        Value::Object(mut map) => match map.remove("sessions") {
            Some(Value::Array(entries)) => entries,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn normalize_entry(entry: &Value) -> Option<SessionId> {
    match entry {
        Value::Number(n) => n.as_u64(),
        Value::Object(map) => map.get("uuid").and_then(Value::as_u64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_add_session_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let registry = SessionRegistry::new(Storage::new(temp_dir.path()));

        assert!(registry.add_session(2).await);
        assert!(registry.add_session(0).await);
        assert!(!registry.add_session(2).await);

        assert_eq!(registry.list_sessions().await, vec![2, 0]);
    }

    #[tokio::test]
    async fn test_free_session_id() {
        let temp_dir = TempDir::new().unwrap();
        let registry = SessionRegistry::new(Storage::new(temp_dir.path()));
        assert_eq!(registry.free_session_id().await, 0);

        for id in [0, 1, 3] {
            registry.add_session(id).await;
        }
        assert_eq!(registry.free_session_id().await, 4);
        // Computing the id does not reserve it
        assert_eq!(registry.free_session_id().await, 4);
    }

    #[tokio::test]
    async fn test_allocate_records_id() {
        let temp_dir = TempDir::new().unwrap();
        let registry = SessionRegistry::new(Storage::new(temp_dir.path()));

        assert_eq!(registry.allocate().await, 0);
        assert_eq!(registry.allocate().await, 1);
        assert!(registry.contains(1).await);
        assert_eq!(registry.free_session_id().await, 2);
    }

    #[tokio::test]
    async fn test_allocate_after_max_id() {
        let temp_dir = TempDir::new().unwrap();
        let registry = SessionRegistry::new(Storage::new(temp_dir.path()));
        registry.add_session(0).await;
        registry.add_session(SessionId::MAX).await;

        assert_eq!(registry.allocate().await, 1);
        assert_eq!(registry.allocate().await, 2);
        assert_eq!(registry.list_sessions().await, vec![0, SessionId::MAX, 1, 2]);
    }

    #[test]
    fn test_normalize_entry() {
        use serde_json::json;
        assert_eq!(normalize_entry(&json!(3)), Some(3));
        assert_eq!(normalize_entry(&json!({"uuid": 7})), Some(7));
        assert_eq!(normalize_entry(&json!("4")), None);
        assert_eq!(normalize_entry(&json!(-1)), None);
        assert_eq!(normalize_entry(&json!(1.5)), None);
    }
}
