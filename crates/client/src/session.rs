//! Session store: the authenticated identity held by the client.
//!
//! A [`SessionStore`] is constructed once and passed down explicitly to
//! whatever needs credentials (the [`ApiClient`] reads the token from
//! it). Token, role and theme are persisted through a
//! [`SessionStorage`] so a restart resumes the session without logging
//! in again.

use std::sync::RwLock;

use comfyqueue_core::roles::Role;
use comfyqueue_core::theme::Theme;

use crate::api::{parse_role, ApiClient, ApiError, Credentials};
use crate::storage::{SessionStorage, StorageError, KEY_ROLE, KEY_THEME, KEY_TOKEN};

/// The authenticated identity for the current login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub role: Role,
    pub theme: Theme,
}

/// Errors from session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Process-wide holder of the current [`Session`].
///
/// Expiry is not tracked locally: a 401 from the backend is the only
/// signal that a token is no longer valid, and the owner reacts by
/// calling [`logout`](Self::logout).
pub struct SessionStore {
    storage: Box<dyn SessionStorage>,
    current: RwLock<Option<Session>>,
    theme: RwLock<Theme>,
}

impl SessionStore {
    /// Build a store from whatever `storage` already holds.
    ///
    /// A persisted token only counts as a session when a valid role was
    /// persisted with it.
    pub fn restore(storage: Box<dyn SessionStorage>) -> Self {
        let theme = storage
            .get(KEY_THEME)
            .and_then(|raw| raw.parse::<Theme>().ok())
            .unwrap_or_default();

        let current = match (storage.get(KEY_TOKEN), storage.get(KEY_ROLE)) {
            (Some(token), Some(role)) if !token.is_empty() => match role.parse::<Role>() {
                Ok(role) => Some(Session { token, role, theme }),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring persisted session with invalid role");
                    None
                }
            },
            _ => None,
        };

        if let Some(session) = &current {
            tracing::info!(role = %session.role, "Restored persisted session");
        }

        Self {
            storage,
            current: RwLock::new(current),
            theme: RwLock::new(theme),
        }
    }

    /// Authenticate against the backend and persist the new session.
    ///
    /// On any failure nothing is persisted and the previous state is
    /// left untouched.
    pub async fn login(
        &self,
        api: &ApiClient,
        username: &str,
        password: &str,
    ) -> Result<Session, SessionError> {
        if username.trim().is_empty() || password.is_empty() {
            return Err(ApiError::Validation {
                status: None,
                message: "Missing username or password".into(),
            }
            .into());
        }

        let credentials = Credentials {
            username: username.trim().to_string(),
            password: password.to_string(),
        };
        let response = api.login(&credentials).await?;
        let role = parse_role(&response.role)?;

        self.storage.set(KEY_TOKEN, &response.access_token)?;
        if let Err(e) = self.storage.set(KEY_ROLE, role.as_str()) {
            let _ = self.storage.remove(KEY_TOKEN);
            return Err(e.into());
        }

        let session = Session {
            token: response.access_token,
            role,
            theme: self.theme(),
        };
        *write(&self.current) = Some(session.clone());

        tracing::info!(username = %credentials.username, role = %role, "Logged in");
        Ok(session)
    }

    /// Drop the session and clear every persisted field.
    pub fn logout(&self) -> Result<(), StorageError> {
        let had_session = write(&self.current).take().is_some();
        *write(&self.theme) = Theme::default();

        let mut result = Ok(());
        for key in [KEY_TOKEN, KEY_ROLE, KEY_THEME] {
            if let Err(e) = self.storage.remove(key) {
                tracing::error!(key, error = %e, "Failed to clear persisted session field");
                result = Err(e);
            }
        }

        if had_session {
            tracing::info!("Logged out");
        }
        result
    }

    pub fn current(&self) -> Option<Session> {
        read(&self.current).clone()
    }

    pub fn current_role(&self) -> Option<Role> {
        read(&self.current).as_ref().map(|s| s.role)
    }

    pub fn token(&self) -> Option<String> {
        read(&self.current).as_ref().map(|s| s.token.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        read(&self.current).is_some()
    }

    pub fn theme(&self) -> Theme {
        *read(&self.theme)
    }

    pub fn set_theme(&self, theme: Theme) -> Result<(), StorageError> {
        self.storage.set(KEY_THEME, theme.as_str())?;
        *write(&self.theme) = theme;
        if let Some(session) = write(&self.current).as_mut() {
            session.theme = theme;
        }
        Ok(())
    }

    pub fn toggle_theme(&self) -> Result<Theme, StorageError> {
        let next = self.theme().toggled();
        self.set_theme(next)?;
        Ok(next)
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
