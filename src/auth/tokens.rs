//! Bearer token allow-list backed by a flat file.
//!
//! The file holds one token per line. Blank lines and lines starting with `#`
//! are ignored, surrounding whitespace is trimmed.
//!
//! # Reload Semantics
//!
//! The active set lives behind an `Arc` that is replaced wholesale on every
//! successful load. Readers take a snapshot of the `Arc` and never observe a
//! half-populated set. A failed read leaves the previous set in place.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use subtle::{Choice, ConstantTimeEq};
use tracing::{info, warn};

use crate::error::TokenStoreError;

/// Default file name inside the token directory.
pub const DEFAULT_TOKEN_FILE_NAME: &str = "allowed_tokens.txt";

/// Thread-safe, atomically reloadable set of valid bearer tokens.
pub struct TokenStore {
    /// Currently active allow-list
    active: RwLock<Arc<HashSet<String>>>,

    /// File the set was last loaded from
    path: Mutex<Option<PathBuf>>,

    /// Modification time observed at the last successful load
    loaded_mtime: Mutex<Option<SystemTime>>,
}

impl TokenStore {
    /// Create a store with no tokens and no backing file.
    pub fn empty() -> Self {
        Self {
            active: RwLock::new(Arc::new(HashSet::new())),
            path: Mutex::new(None),
            loaded_mtime: Mutex::new(None),
        }
    }

    /// Create a store from an in-memory list of tokens.
    pub fn from_tokens<I, T>(tokens: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let store = Self::empty();
        store.swap(tokens.into_iter().map(Into::into).collect());
        store
    }

    /// Create a store and load it from `path`.
    ///
    /// Fails if the file cannot be read.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TokenStoreError> {
        let store = Self::empty();
        store.load(path.as_ref())?;
        Ok(store)
    }

    /// Parse token file contents into a set.
    pub fn parse(text: &str) -> HashSet<String> {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect()
    }

    /// Read `path` and replace the active set with its contents.
    ///
    /// On success the path is remembered for [`reload`](Self::reload).
    /// Returns the number of tokens now active.
    pub fn load(&self, path: &Path) -> Result<usize, TokenStoreError> {
        let read_error = |err: std::io::Error| TokenStoreError::Read {
            path: path.to_path_buf(),
            message: err.to_string(),
        };

        let mtime = std::fs::metadata(path)
            .map_err(read_error)?
            .modified()
            .ok();
        let text = std::fs::read_to_string(path).map_err(read_error)?;

        let tokens = Self::parse(&text);
        let count = tokens.len();
        self.swap(tokens);

        *lock(&self.path) = Some(path.to_path_buf());
        *lock(&self.loaded_mtime) = mtime;

        info!(event = "tokens_loaded", count, path = %path.display(), "Token file loaded");
        Ok(count)
    }

    /// Re-read the remembered file unconditionally.
    pub fn reload(&self) -> Result<usize, TokenStoreError> {
        let path = lock(&self.path).clone().ok_or(TokenStoreError::NoPath)?;
        match self.load(&path) {
            Ok(count) => {
                info!(event = "tokens_reloaded", count, "Token set reloaded");
                Ok(count)
            }
            Err(e) => {
                warn!(event = "token_reload_failed", error = %e, "Keeping previous token set");
                Err(e)
            }
        }
    }

    /// Re-read the remembered file only if its modification time advanced.
    ///
    /// Returns `Ok(true)` when a reload happened.
    pub fn reload_if_changed(&self) -> Result<bool, TokenStoreError> {
        let path = lock(&self.path).clone().ok_or(TokenStoreError::NoPath)?;
        let current = std::fs::metadata(&path)
            .and_then(|meta| meta.modified())
            .map_err(|err| TokenStoreError::Read {
                path: path.clone(),
                message: err.to_string(),
            })?;

        let changed = match *lock(&self.loaded_mtime) {
            Some(previous) => current > previous,
            None => true,
        };

        if changed {
            self.reload()?;
        }
        Ok(changed)
    }

    /// Check whether `token` is in the active set.
    ///
    /// Every stored token is compared in constant time so the position of a
    /// match does not leak through timing.
    pub fn is_valid(&self, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        let snapshot = self.snapshot();
        let matched = snapshot.iter().fold(Choice::from(0), |acc, candidate| {
            acc | candidate.as_bytes().ct_eq(token.as_bytes())
        });
        matched.into()
    }

    /// Number of active tokens.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether no tokens are active.
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Path the store was last loaded from.
    pub fn path(&self) -> Option<PathBuf> {
        lock(&self.path).clone()
    }

    fn snapshot(&self) -> Arc<HashSet<String>> {
        let guard = self
            .active
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    fn swap(&self, tokens: HashSet<String>) {
        let mut guard = self
            .active
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(tokens);
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::empty()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
