//! Session context: the bearer credential and cached principal.
//!
//! A [`Session`] is constructed once at start-up (usually via
//! [`Session::restore`]) and handed to the REST client and the event channel.
//! Everything that needs the credential reads it from the session it was
//! given; nothing reads durable storage directly. Signing out goes through
//! [`Session::invalidate`], which clears memory and storage together.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use taskboard_proto::user::User;

/// Errors reading or writing persisted session state.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session file could not be read or written.
    #[error("session file {path}: {source}")]
    Io {
        /// File that was accessed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The session file exists but does not parse.
    #[error("corrupt session file: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// No platform data directory to keep the session in.
    #[error("could not determine data directory (no HOME or XDG_DATA_HOME)")]
    NoDataDir,
}

/// A bearer credential. Its value never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    /// Wraps a token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// What survives a restart: the credential and the principal it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    /// Bearer credential.
    pub token: Credential,
    /// Cached identity and role of the principal.
    pub user: User,
}

/// Durable client-local storage for the session.
pub trait SessionStore: Send + Sync {
    /// Loads the stored session, or `None` if nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if storage exists but cannot be read.
    fn load(&self) -> Result<Option<StoredSession>, SessionError>;

    /// Persists the session, replacing anything stored.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if storage cannot be written.
    fn save(&self, session: &StoredSession) -> Result<(), SessionError>;

    /// Removes any stored session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if storage cannot be cleared.
    fn clear(&self) -> Result<(), SessionError>;
}

/// JSON file store, by default `<data_dir>/taskboard/session.json`.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    /// Store at an explicit path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default session file location.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoDataDir`] if the platform has no data dir.
    pub fn default_path() -> Result<PathBuf, SessionError> {
        dirs::data_dir()
            .map(|dir| dir.join("taskboard").join("session.json"))
            .ok_or(SessionError::NoDataDir)
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> SessionError {
        SessionError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Result<Option<StoredSession>, SessionError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn save(&self, session: &StoredSession) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let contents = serde_json::to_string_pretty(session)?;
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&self.path).map_err(|e| self.io_error(e))?;
        // `mode` only applies on creation; tighten a file left by older runs.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .map_err(|e| self.io_error(e))?;
        }
        std::io::Write::write_all(&mut file, contents.as_bytes()).map_err(|e| self.io_error(e))
    }

    fn clear(&self) -> Result<(), SessionError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

/// In-memory store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    stored: Mutex<Option<StoredSession>>,
}

impl MemorySessionStore {
    /// Store pre-populated with a session.
    #[must_use]
    pub fn with_session(session: StoredSession) -> Self {
        Self {
            stored: Mutex::new(Some(session)),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<StoredSession>, SessionError> {
        Ok(self.stored.lock().clone())
    }

    fn save(&self, session: &StoredSession) -> Result<(), SessionError> {
        *self.stored.lock() = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionError> {
        *self.stored.lock() = None;
        Ok(())
    }
}

struct SessionInner {
    current: RwLock<Option<StoredSession>>,
    store: Box<dyn SessionStore>,
}

/// Shared handle to the session context. Clones observe the same state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("principal", &self.principal())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Restores the session from `store`.
    ///
    /// A stored credential and principal are trusted as-is; no request is
    /// made to re-validate them. A corrupt store is treated as signed out.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Io`] if the store exists but cannot be read.
    pub fn restore(store: impl SessionStore + 'static) -> Result<Self, SessionError> {
        let current = match store.load() {
            Ok(stored) => stored,
            Err(SessionError::Corrupt(e)) => {
                tracing::warn!(err = %e, "ignoring corrupt session store");
                None
            }
            Err(e) => return Err(e),
        };
        if let Some(stored) = &current {
            tracing::info!(user = %stored.user.email, role = %stored.user.role, "session restored");
        }
        Ok(Self {
            inner: Arc::new(SessionInner {
                current: RwLock::new(current),
                store: Box::new(store),
            }),
        })
    }

    /// A signed-out session backed by memory only.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            inner: Arc::new(SessionInner {
                current: RwLock::new(None),
                store: Box::new(MemorySessionStore::default()),
            }),
        }
    }

    /// The bearer credential, if signed in.
    #[must_use]
    pub fn credential(&self) -> Option<Credential> {
        self.inner.current.read().as_ref().map(|s| s.token.clone())
    }

    /// The cached principal, if signed in.
    #[must_use]
    pub fn principal(&self) -> Option<User> {
        self.inner.current.read().as_ref().map(|s| s.user.clone())
    }

    /// Whether a credential is held.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.current.read().is_some()
    }

    /// Records a fresh sign-in and persists it.
    ///
    /// The in-memory state is updated even if persisting fails.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the store cannot be written.
    pub fn establish(&self, token: Credential, user: User) -> Result<(), SessionError> {
        let stored = StoredSession { token, user };
        *self.inner.current.write() = Some(stored.clone());
        tracing::info!(user = %stored.user.email, "session established");
        self.inner.store.save(&stored)
    }

    /// Signs out locally: forgets the credential and clears storage.
    ///
    /// The in-memory state is cleared even if clearing storage fails.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the store cannot be cleared.
    pub fn invalidate(&self) -> Result<(), SessionError> {
        self.inner.current.write().take();
        tracing::info!("session invalidated");
        self.inner.store.clear()
    }
}
