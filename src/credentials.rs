//! Client-side token storage.
//!
//! The token is deliberately readable by the client (not an HTTP-only cookie) because the event
//! stream presents it during its own handshake. It is stored unencrypted with a bounded expiry.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::AppError;

/// Single source of truth for the session token. Both the API client and the event-stream client
/// read from it; neither reads the token from the other.
pub trait CredentialStore: Send + Sync {
    /// The stored token, or `None` when absent or expired.
    fn get(&self) -> Option<String>;
    fn set(&self, token: &str) -> Result<(), AppError>;
    fn clear(&self) -> Result<(), AppError>;
}

/// Token lifetime used when none is configured, or when the configured one is out of range.
pub const DEFAULT_TTL_DAYS: i64 = 7;

pub fn default_ttl() -> Duration {
    Duration::days(DEFAULT_TTL_DAYS)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl StoredToken {
    fn new(token: &str, ttl: Duration) -> Self {
        let now = Utc::now();
        let expires_at = now.checked_add_signed(ttl).unwrap_or_else(|| {
            warn!("Token lifetime {ttl} is out of range; using {DEFAULT_TTL_DAYS} days");
            now + default_ttl()
        });
        Self { token: token.to_string(), expires_at }
    }

    fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Short, log-safe rendering of a token.
pub fn token_preview(token: &str) -> String {
    let head: String = token.chars().take(10).collect();
    format!("{head}...")
}

// ── In-memory store ───────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct MemoryCredentialStore {
    ttl: Duration,
    slot: Mutex<Option<StoredToken>>,
}

impl MemoryCredentialStore {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, slot: Mutex::new(None) }
    }

    pub fn with_token(token: &str, ttl: Duration) -> Self {
        Self { ttl, slot: Mutex::new(Some(StoredToken::new(token, ttl))) }
    }
}

impl Default for MemoryCredentialStore {
    fn default() -> Self {
        Self::new(default_ttl())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> Option<String> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some(stored) if stored.is_expired() => {
                debug!("Stored token expired; discarding");
                *slot = None;
                None
            }
            Some(stored) => Some(stored.token.clone()),
            None => None,
        }
    }

    fn set(&self, token: &str) -> Result<(), AppError> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(StoredToken::new(token, self.ttl));
        Ok(())
    }

    fn clear(&self) -> Result<(), AppError> {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
        Ok(())
    }
}

// ── File-backed store ─────────────────────────────────────────────────────────

/// Persists the token as a small JSON document so it survives restarts.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    ttl: Duration,
    lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self { path: path.into(), ttl, lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Option<StoredToken> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read credentials from {}: {e}", self.path.display());
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(stored) => Some(stored),
            Err(e) => {
                warn!("Ignoring corrupt credentials file {}: {e}", self.path.display());
                None
            }
        }
    }

    fn remove(&self) -> Result<(), AppError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::credentials(
                format!("failed to remove {}", self.path.display()),
                e,
            )),
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> Option<String> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let stored = self.read()?;
        if stored.is_expired() {
            debug!("Stored token expired; removing {}", self.path.display());
            if let Err(e) = self.remove() {
                warn!("{e}");
            }
            return None;
        }
        Some(stored.token)
    }

    fn set(&self, token: &str) -> Result<(), AppError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::credentials(format!("failed to create {}", parent.display()), e)
            })?;
        }
        let json = serde_json::to_string(&StoredToken::new(token, self.ttl))
            .map_err(|e| AppError::decode("stored token", e))?;
        fs::write(&self.path, json).map_err(|e| {
            AppError::credentials(format!("failed to write {}", self.path.display()), e)
        })?;
        restrict_permissions(&self.path)?;
        debug!("Stored token {} in {}", token_preview(token), self.path.display());
        Ok(())
    }

    fn clear(&self) -> Result<(), AppError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.remove()
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), AppError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| {
        AppError::credentials(format!("failed to restrict {}", path.display()), e)
    })
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), AppError> {
    Ok(())
}
