//! Process-wide mutable state, made explicit.
//!
//! [`CredentialState`] is initialised from configuration at boot and
//! changed only by the auth callback endpoint. [`TabLocks`] serialises the
//! header-check, range-resolution and write sequence per destination tab.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, SystemTime};

use log::info;

/// An access token for the remote stores.
#[derive(Debug, Clone)]
pub struct Credential {
    pub access_token: String,
    pub expires_at: Option<SystemTime>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, expires_in: Option<Duration>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at: expires_in.map(|d| SystemTime::now() + d),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.access_token.trim().is_empty()
            && self.expires_at.is_none_or(|at| at > SystemTime::now())
    }
}

/// Holder for the live credential.
#[derive(Debug, Default)]
pub struct CredentialState {
    current: RwLock<Option<Credential>>,
}

impl CredentialState {
    /// State seeded with a token from configuration, if any.
    pub fn from_token(token: Option<String>) -> Self {
        let state = Self::default();
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            state.store(Credential::new(token, None));
        }
        state
    }

    /// Replaces the live credential.
    pub fn store(&self, credential: Credential) {
        if let Ok(mut current) = self.current.write() {
            *current = Some(credential);
            info!("access credential updated");
        }
    }

    pub fn clear(&self) {
        if let Ok(mut current) = self.current.write() {
            *current = None;
        }
    }

    /// The current token, if one is present and not expired.
    pub fn access_token(&self) -> Option<String> {
        let current = self.current.read().ok()?;
        current
            .as_ref()
            .filter(|c| c.is_valid())
            .map(|c| c.access_token.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }
}

/// One async mutex per `collection/tab`.
#[derive(Debug, Default)]
pub struct TabLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TabLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock handle for one tab; callers hold `.lock().await` across the
    /// read-then-write sequence.
    ///
    /// Entries nobody holds a handle to are dropped on the way, so the map
    /// only keeps tabs with a batch running or waiting.
    pub fn for_tab(&self, collection_id: &str, tab: &str) -> Arc<tokio::sync::Mutex<()>> {
        let key = format!("{collection_id}/{tab}");
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(key).or_default().clone()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
