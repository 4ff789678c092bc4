//! Persisted session records.
//!
//! # Layout
//!
//! ```text
//! <root>/
//!   <session-id>/
//!     session.json   - optional metadata (title, preview, working directory)
//!     ...            - engine-owned files
//! ```
//!
//! A record directory without readable metadata still counts as a session:
//! its id is the directory name and its modification time is the
//! directory's.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const METADATA_FILE: &str = "session.json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A resumable engine session found on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSession {
    pub id: String,
    pub last_modified: DateTime<Utc>,
    pub title: String,
    #[serde(default)]
    pub preview: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

/// Source of persisted session records.
pub trait SessionStore: Send + Sync {
    /// All records, in no particular order.
    fn list(&self) -> Result<Vec<PersistedSession>, StoreError>;

    fn find(&self, id: &str) -> Result<Option<PersistedSession>, StoreError> {
        Ok(self.list()?.into_iter().find(|record| record.id == id))
    }
}

/// On-disk metadata. Every field is optional so partial files still load.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionMetadata {
    title: Option<String>,
    preview: Option<String>,
    working_directory: Option<String>,
    last_modified: Option<DateTime<Utc>>,
}

/// A store backed by one directory per record.
#[derive(Debug, Clone)]
pub struct DirectorySessionStore {
    root: PathBuf,
}

impl DirectorySessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Write a record's metadata file, creating its directory.
    pub fn save(&self, record: &PersistedSession) -> Result<(), StoreError> {
        let dir = self.root.join(&record.id);
        fs::create_dir_all(&dir)?;

        let file_path = dir.join(METADATA_FILE);
        let temp_path = dir.join(format!("{METADATA_FILE}.tmp"));

        let json = serde_json::to_string_pretty(record)?;
        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, &file_path)?;

        Ok(())
    }

    fn read_record(&self, dir: &Path, id: String) -> Result<PersistedSession, StoreError> {
        let metadata = match fs::read_to_string(dir.join(METADATA_FILE)) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                log::warn!("Ignoring malformed metadata for session {}: {}", id, e);
                SessionMetadata::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SessionMetadata::default(),
            Err(e) => return Err(e.into()),
        };

        let last_modified = match metadata.last_modified {
            Some(time) => time,
            None => DateTime::<Utc>::from(fs::metadata(dir)?.modified()?),
        };

        Ok(PersistedSession {
            title: metadata.title.unwrap_or_else(|| id.clone()),
            preview: metadata.preview.unwrap_or_default(),
            working_directory: metadata.working_directory,
            last_modified,
            id,
        })
    }
}

impl SessionStore for DirectorySessionStore {
    /// Returns an empty list if the root doesn't exist.
    fn list(&self) -> Result<Vec<PersistedSession>, StoreError> {
        let mut records = Vec::new();

        if !self.root.exists() {
            return Ok(records);
        }

        // One unreadable record must not hide the others.
        for entry in fs::read_dir(&self.root)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable entry in {}: {}", self.root.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_ok_and(|kind| kind.is_dir()) {
                continue;
            }
            let Some(id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if id.starts_with('.') {
                continue;
            }
            match self.read_record(&entry.path(), id.clone()) {
                Ok(record) => records.push(record),
                Err(e) => log::warn!("Skipping persisted session {}: {}", id, e),
            }
        }

        Ok(records)
    }
}
