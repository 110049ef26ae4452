//! Authentication session lifecycle.
//!
//! The session owns the bearer token for the life of the process. Login flows
//! outside the core write it; the request executor invalidates it when the
//! backend rejects the credential. Invalidation fires the session-expired
//! signal once per logical expiry: the `invalidated` flag is only reset by a
//! later successful login.
//!
//! Every login and every invalidation bumps the session epoch. The executor
//! remembers the epoch it attached a token under, so a late 401 for a token
//! that was already replaced cannot tear down the newer session.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::StoreError;

pub const HEADER_AUTHORIZATION: &str = "authorization";

/// Credential blob persisted between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user: None,
        }
    }

    pub fn with_user(mut self, user: Value) -> Self {
        self.user = Some(user);
        self
    }
}

/// Durable client-side storage for the credential blob.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<Credential>, StoreError>;
    fn save(&self, credential: &Credential) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

/// Process-local store; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    slot: Mutex<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(credential: Credential) -> Self {
        Self {
            slot: Mutex::new(Some(credential)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<Credential>, StoreError> {
        Ok(self
            .slot
            .lock()
            .expect("credential slot should not be poisoned")
            .clone())
    }

    fn save(&self, credential: &Credential) -> Result<(), StoreError> {
        *self
            .slot
            .lock()
            .expect("credential slot should not be poisoned") = Some(credential.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self
            .slot
            .lock()
            .expect("credential slot should not be poisoned") = None;
        Ok(())
    }
}

/// JSON file holding `{"token": ..., "user": ...}`.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<Credential>, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        if contents.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn save(&self, credential: &Credential) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(&self.path, serde_json::to_vec_pretty(credential)?)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == IoErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

/// Fired when the backend rejects the current credential. Carries nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionExpired;

type Listener = Arc<dyn Fn(SessionExpired) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
}

/// Handle returned by [`AuthSession::on_session_expired`].
///
/// Dropping the handle keeps the callback registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    listeners: Weak<Mutex<Listeners>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .lock()
                .expect("session listeners should not be poisoned")
                .entries
                .retain(|(id, _)| *id != self.id);
        }
    }
}

#[derive(Debug, Default)]
struct SessionState {
    credential: Option<Credential>,
    invalidated: bool,
    epoch: u64,
}

/// Process-wide authentication session.
pub struct AuthSession {
    state: RwLock<SessionState>,
    store: Arc<dyn CredentialStore>,
    listeners: Arc<Mutex<Listeners>>,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self
            .state
            .read()
            .expect("session state should not be poisoned");
        f.debug_struct("AuthSession")
            .field("authenticated", &state.credential.is_some())
            .field("invalidated", &state.invalidated)
            .field("epoch", &state.epoch)
            .finish()
    }
}

impl Default for AuthSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthSession {
    /// Empty session backed by an in-memory store.
    pub fn new() -> Self {
        Self::from_parts(Arc::new(MemoryCredentialStore::new()), None)
    }

    /// Session restored from whatever credential the store holds.
    ///
    /// A malformed blob is discarded and the session starts signed out; only
    /// I/O failures are returned.
    pub fn with_store(store: Arc<dyn CredentialStore>) -> Result<Self, StoreError> {
        let credential = match store.load() {
            Ok(credential) => credential,
            Err(StoreError::Malformed(error)) => {
                warn!(%error, "discarding malformed persisted credential");
                if let Err(error) = store.clear() {
                    warn!(%error, "failed to clear malformed persisted credential");
                }
                None
            }
            Err(error) => return Err(error),
        };
        Ok(Self::from_parts(store, credential))
    }

    /// Signed-out session that writes through to `store` without reading it.
    pub fn fresh(store: Arc<dyn CredentialStore>) -> Self {
        Self::from_parts(store, None)
    }

    fn from_parts(store: Arc<dyn CredentialStore>, credential: Option<Credential>) -> Self {
        Self {
            state: RwLock::new(SessionState {
                credential,
                invalidated: false,
                epoch: 0,
            }),
            store,
            listeners: Arc::new(Mutex::new(Listeners::default())),
        }
    }

    /// Adds `Authorization: Bearer <token>` when a token is present.
    ///
    /// Returns the epoch the header was attached under.
    pub fn attach(&self, headers: &mut BTreeMap<String, String>) -> u64 {
        let state = self
            .state
            .read()
            .expect("session state should not be poisoned");
        if let Some(credential) = &state.credential {
            headers.insert(
                String::from(HEADER_AUTHORIZATION),
                format!("Bearer {}", credential.token),
            );
        }
        state.epoch
    }

    /// Stores a fresh credential and re-arms the expiry signal.
    pub fn login(&self, credential: Credential) -> Result<(), StoreError> {
        self.store.save(&credential)?;

        let mut state = self
            .state
            .write()
            .expect("session state should not be poisoned");
        state.credential = Some(credential);
        state.invalidated = false;
        state.epoch = state.epoch.wrapping_add(1);
        Ok(())
    }

    /// User-initiated sign out. Does not fire the expiry signal.
    pub fn logout(&self) -> Result<(), StoreError> {
        {
            let mut state = self
                .state
                .write()
                .expect("session state should not be poisoned");
            state.credential = None;
            state.epoch = state.epoch.wrapping_add(1);
        }
        self.store.clear()
    }

    /// Clears the credential everywhere and fires the expiry signal.
    ///
    /// Returns `false` without side effects when the session is already invalidated.
    pub fn invalidate(&self) -> bool {
        self.invalidate_where(|_| true)
    }

    /// Invalidates only if no login or invalidation happened since `epoch` was observed.
    pub fn invalidate_epoch(&self, epoch: u64) -> bool {
        self.invalidate_where(|state| state.epoch == epoch)
    }

    fn invalidate_where(&self, applies: impl FnOnce(&SessionState) -> bool) -> bool {
        {
            let mut state = self
                .state
                .write()
                .expect("session state should not be poisoned");
            if state.invalidated || !applies(&state) {
                return false;
            }
            state.credential = None;
            state.invalidated = true;
            state.epoch = state.epoch.wrapping_add(1);
        }

        if let Err(error) = self.store.clear() {
            warn!(%error, "failed to clear persisted credential");
        }
        info!("session expired; credential invalidated");
        self.notify();
        true
    }

    fn notify(&self) {
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .expect("session listeners should not be poisoned")
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(SessionExpired);
        }
    }

    pub fn on_session_expired<F>(&self, callback: F) -> Subscription
    where
        F: Fn(SessionExpired) + Send + Sync + 'static,
    {
        let mut listeners = self
            .listeners
            .lock()
            .expect("session listeners should not be poisoned");
        let id = listeners.next_id;
        listeners.next_id = listeners.next_id.wrapping_add(1);
        listeners.entries.push((id, Arc::new(callback)));

        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    pub fn token(&self) -> Option<String> {
        self.state
            .read()
            .expect("session state should not be poisoned")
            .credential
            .as_ref()
            .map(|credential| credential.token.clone())
    }

    pub fn user(&self) -> Option<Value> {
        self.state
            .read()
            .expect("session state should not be poisoned")
            .credential
            .as_ref()
            .and_then(|credential| credential.user.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.state
            .read()
            .expect("session state should not be poisoned")
            .credential
            .is_some()
    }

    pub fn is_invalidated(&self) -> bool {
        self.state
            .read()
            .expect("session state should not be poisoned")
            .invalidated
    }

    pub fn epoch(&self) -> u64 {
        self.state
            .read()
            .expect("session state should not be poisoned")
            .epoch
    }
}
