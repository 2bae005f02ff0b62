use log::{debug, warn};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use crate::error::HistoryError;

/// Most-recently-selected files, newest first, persisted as one path per line
#[derive(Debug, Clone)]
pub struct PlayHistory {
    entries: VecDeque<String>,
    limit: usize,
    path: Option<PathBuf>,
}

impl PlayHistory {
    /// History kept only in memory
    pub fn in_memory(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit: limit.max(1),
            path: None,
        }
    }

    /// Load the history file at `path`. A missing or unreadable file starts
    /// an empty history.
    pub fn load(path: impl Into<PathBuf>, limit: usize) -> Self {
        let path = path.into();
        let mut history = Self {
            path: Some(path.clone()),
            ..Self::in_memory(limit)
        };

        match std::fs::read_to_string(&path) {
            Ok(content) => {
                for line in content.lines().filter(|l| !l.is_empty()) {
                    if history.entries.len() >= history.limit {
                        break;
                    }
                    if !history.entries.iter().any(|e| e == line) {
                        history.entries.push_back(line.to_string());
                    }
                }
                debug!("Loaded {} history entries from {}", history.entries.len(), path.display());
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Cannot read history file {}: {}", path.display(), e),
        }

        history
    }

    /// Put `entry` at the front, dropping older duplicates and the oldest
    /// entries beyond the limit, then persist.
    pub fn record(&mut self, entry: &str) {
        self.entries.retain(|e| e != entry);
        self.entries.push_front(entry.to_string());
        self.entries.truncate(self.limit);

        if let Err(e) = self.save() {
            warn!("Failed to save play history: {}", e);
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn save(&self) -> Result<(), HistoryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut content = String::new();
        for entry in &self.entries {
            content.push_str(entry);
            content.push('\n');
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}
