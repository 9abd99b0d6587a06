//! Local persistence for the conversation snapshot.
//!
//! One fixed JSON file mirrors the in-memory message list (write-through, not
//! a log). There is no schema versioning: a snapshot that fails to parse or
//! violates the message invariants is discarded wholesale by the caller.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use crate::types::Message;

const APP_DIR: &str = "medichat";
const SNAPSHOT_FILE: &str = "messages.json";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("failed to access snapshot: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("snapshot contains duplicate message ids")]
    DuplicateIds,
}

/// File-backed store for the message list.
pub struct MessageStore {
    path: PathBuf,
}

impl MessageStore {
    /// `data_dir` overrides the platform data directory (tests, portable
    /// installs).
    pub fn new(data_dir: Option<PathBuf>) -> Self {
        let dir = data_dir
            .or_else(|| dirs::data_local_dir().map(|d| d.join(APP_DIR)))
            .unwrap_or_else(|| PathBuf::from("cache").join(APP_DIR));
        Self {
            path: dir.join(SNAPSHOT_FILE),
        }
    }

    /// Read the snapshot. A missing file is an empty conversation; anything
    /// unreadable or invariant-violating is an error the caller discards.
    pub fn load(&self) -> Result<Vec<Message>, StorageError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        let messages: Vec<Message> = serde_json::from_str(&raw)?;
        if !ids_unique(&messages) {
            return Err(StorageError::DuplicateIds);
        }
        Ok(messages)
    }

    /// Overwrite the snapshot, skipping the write when the serialized
    /// content already matches what is on disk.
    pub fn save(&self, messages: &[Message]) -> Result<(), StorageError> {
        let serialized = serde_json::to_string(messages)?;
        if let Ok(existing) = fs::read_to_string(&self.path) {
            if existing == serialized {
                return Ok(());
            }
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serialized)?;
        Ok(())
    }

    /// Remove the snapshot entirely (new conversation).
    pub fn clear(&self) -> Result<(), StorageError> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

fn ids_unique(messages: &[Message]) -> bool {
    let mut seen = HashSet::new();
    messages.iter().all(|message| seen.insert(message.id))
}
