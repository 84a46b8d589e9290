//! Durable per-channel epoch state.
//!
//! Each channel owns two files inside the state directory:
//! - `.<channel>-pipe_mode-state`: JSON `EpochState`
//! - `.<channel>-pipe_mode-lock`: advisory lock serialising writers
//!
//! Commits go through a temp file, `sync_all` and an atomic rename, so a crash
//! at any point leaves either the old or the new state on disk.

use crate::error::{StateError, StateResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochState {
    pub channel: String,
    /// Last epoch whose stream reached end of stream, if any.
    pub last_completed_epoch: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

impl EpochState {
    fn new(channel: &str, last_completed_epoch: Option<u64>) -> Self {
        Self { channel: channel.to_string(), last_completed_epoch, updated_at: Utc::now() }
    }

    /// The epoch a reader should open next.
    #[must_use]
    pub fn next_epoch(&self) -> u64 {
        self.last_completed_epoch.map_or(0, |epoch| epoch + 1)
    }
}

/// Exclusive advisory lock, released on drop.
struct StateLock {
    file: File,
}

impl Drop for StateLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[derive(Debug, Clone)]
pub struct EpochStateStore {
    channel: String,
    state_dir: PathBuf,
    state_path: PathBuf,
    temp_path: PathBuf,
    lock_path: PathBuf,
}

impl EpochStateStore {
    /// Open the state for `channel`, creating the directory and an empty state
    /// file if this is the first time the channel is seen.
    pub fn open(state_dir: &Path, channel: &str) -> StateResult<Self> {
        fs::create_dir_all(state_dir).map_err(|source| StateError::Io { path: state_dir.to_path_buf(), source })?;

        let store = Self {
            channel: channel.to_string(),
            state_dir: state_dir.to_path_buf(),
            state_path: state_dir.join(format!(".{channel}-pipe_mode-state")),
            temp_path: state_dir.join(format!(".{channel}-pipe_mode-state.tmp")),
            lock_path: state_dir.join(format!(".{channel}-pipe_mode-lock")),
        };

        let _lock = store.lock()?;
        let exists = store
            .state_path
            .try_exists()
            .map_err(|source| StateError::Io { path: store.state_path.clone(), source })?;
        if !exists {
            store.write(&EpochState::new(channel, None))?;
            info!(channel, path = %store.state_path.display(), "Created epoch state");
        }

        Ok(store)
    }

    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    #[must_use]
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn load(&self) -> StateResult<EpochState> {
        let bytes = fs::read(&self.state_path).map_err(|source| self.io_error(source))?;
        let state: EpochState = serde_json::from_slice(&bytes)
            .map_err(|e| StateError::Corrupt { path: self.state_path.clone(), reason: e.to_string() })?;
        if state.channel != self.channel {
            return Err(StateError::Corrupt {
                path: self.state_path.clone(),
                reason: format!("state belongs to channel {}", state.channel),
            });
        }
        Ok(state)
    }

    pub fn last_completed_epoch(&self) -> StateResult<Option<u64>> {
        Ok(self.load()?.last_completed_epoch)
    }

    /// Durably record that `epoch` has been fully consumed.
    pub fn commit(&self, epoch: u64) -> StateResult<()> {
        let _lock = self.lock()?;
        let current = self.load()?;
        if let Some(last) = current.last_completed_epoch
            && epoch <= last
        {
            return Err(StateError::Regression { last, attempted: epoch });
        }

        self.write(&EpochState::new(&self.channel, Some(epoch)))?;
        debug!(channel = %self.channel, epoch, "Committed epoch state");
        Ok(())
    }

    fn lock(&self) -> StateResult<StateLock> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|source| StateError::Io { path: self.lock_path.clone(), source })?;
        file.lock().map_err(|source| StateError::Io { path: self.lock_path.clone(), source })?;
        Ok(StateLock { file })
    }

    fn write(&self, state: &EpochState) -> StateResult<()> {
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| StateError::Corrupt { path: self.state_path.clone(), reason: e.to_string() })?;

        // Write to a temp file first, then atomically rename over the state file.
        let temp_error = |source| StateError::Io { path: self.temp_path.clone(), source };
        let mut file = File::create(&self.temp_path).map_err(temp_error)?;
        file.write_all(&json).and_then(|()| file.sync_all()).map_err(temp_error)?;
        fs::rename(&self.temp_path, &self.state_path).map_err(|source| self.io_error(source))?;

        #[cfg(unix)]
        File::open(&self.state_dir)
            .and_then(|dir| dir.sync_all())
            .map_err(|source| StateError::Io { path: self.state_dir.clone(), source })?;

        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> StateError {
        StateError::Io { path: self.state_path.clone(), source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_state() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("pipe_state");
        let store = EpochStateStore::open(&dir, "train").unwrap();

        assert!(store.state_path().exists());
        assert!(store.state_path().ends_with(".train-pipe_mode-state"));
        assert!(store.lock_path().ends_with(".train-pipe_mode-lock"));
        assert_eq!(store.last_completed_epoch().unwrap(), None);
        assert_eq!(store.load().unwrap().next_epoch(), 0);
    }

    #[test]
    fn test_commit_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let store = EpochStateStore::open(temp.path(), "train").unwrap();
        store.commit(0).unwrap();
        store.commit(1).unwrap();
        drop(store);

        let reopened = EpochStateStore::open(temp.path(), "train").unwrap();
        assert_eq!(reopened.last_completed_epoch().unwrap(), Some(1));
        assert_eq!(reopened.load().unwrap().next_epoch(), 2);
        assert!(!temp.path().join(".train-pipe_mode-state.tmp").exists());
    }

    #[test]
    fn test_commit_rejects_regression() {
        let temp = TempDir::new().unwrap();
        let store = EpochStateStore::open(temp.path(), "train").unwrap();
        store.commit(2).unwrap();
        let err = store.commit(2).unwrap_err();
        assert!(matches!(err, StateError::Regression { last: 2, attempted: 2 }));
        let err = store.commit(1).unwrap_err();
        assert!(matches!(err, StateError::Regression { last: 2, attempted: 1 }));
    }

    #[test]
    fn test_channels_do_not_collide() {
        let temp = TempDir::new().unwrap();
        let train = EpochStateStore::open(temp.path(), "train").unwrap();
        let validation = EpochStateStore::open(temp.path(), "validation").unwrap();
        train.commit(0).unwrap();
        train.commit(1).unwrap();

        assert_eq!(train.last_completed_epoch().unwrap(), Some(1));
        assert_eq!(validation.last_completed_epoch().unwrap(), None);
    }

    #[test]
    fn test_corrupt_state_is_reported() {
        let temp = TempDir::new().unwrap();
        let store = EpochStateStore::open(temp.path(), "train").unwrap();
        fs::write(store.state_path(), "3").unwrap();
        assert!(matches!(store.last_completed_epoch().unwrap_err(), StateError::Corrupt { .. }));
    }

    #[test]
    fn test_state_for_other_channel_is_corrupt() {
        let temp = TempDir::new().unwrap();
        let store = EpochStateStore::open(temp.path(), "train").unwrap();
        let foreign = EpochState::new("validation", Some(4));
        fs::write(store.state_path(), serde_json::to_vec(&foreign).unwrap()).unwrap();
        assert!(matches!(store.load().unwrap_err(), StateError::Corrupt { .. }));
    }

    #[test]
    fn test_open_preserves_existing_state() {
        let temp = TempDir::new().unwrap();
        EpochStateStore::open(temp.path(), "train").unwrap().commit(5).unwrap();
        let store = EpochStateStore::open(temp.path(), "train").unwrap();
        assert_eq!(store.last_completed_epoch().unwrap(), Some(5));
    }
}
