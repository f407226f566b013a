//! The authentication context: who is signed in and with which bearer token.
//!
//! Memory is the source of truth. Durable storage is a mirror that is written
//! on every change and read only by [`SessionStore::load`] and
//! [`SessionStore::rehydrate`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{ApiError, ApiErrorKind};
use crate::models::User;
use crate::storage::{DurableStorage, TOKEN_KEY, USER_KEY};
use crate::wire::parse_stored_user;

/// Resolves a bearer token to the account it belongs to.
#[async_trait]
pub trait AccountSource: Send + Sync {
    async fn current_user(&self, token: &str) -> Result<User, ApiError>;
}

/// `is_authenticated()` is derived from the token, so the two can never
/// disagree. `user` may be `None` while a token is held; that state is
/// resolved by a refresh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    user: Option<User>,
    token: Option<String>,
}

impl Session {
    pub fn new(user: Option<User>, token: Option<String>) -> Self {
        Self {
            user: user.filter(|u| !u.id.trim().is_empty()),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.id.as_str())
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    pub fn needs_refresh(&self) -> bool {
        self.token.is_some() && self.user.is_none()
    }

    fn from_storage(storage: &dyn DurableStorage) -> Self {
        let token = storage.get(TOKEN_KEY);
        let user = storage.get(USER_KEY).and_then(|raw| parse_stored_user(&raw));
        Self::new(user, token)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Replace {
        user: Option<User>,
        token: Option<String>,
    },
    Logout,
}

impl SessionCommand {
    pub fn signed_in(user: User, token: impl Into<String>) -> Self {
        SessionCommand::Replace {
            user: Some(user),
            token: Some(token.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// The new state was written as given.
    Applied(Session),
    /// The token was resolved to a user and the session completed.
    Refreshed(Session),
    /// The token was rejected or unusable; the session was cleared.
    Expired(ApiError),
    /// A refresh finished after the token it was resolving had been replaced
    /// or logged out, and was discarded.
    Superseded,
    LoggedOut,
}

impl CommitOutcome {
    pub fn is_expired(&self) -> bool {
        matches!(self, CommitOutcome::Expired(_))
    }
}

pub struct SessionStore {
    state: watch::Sender<Session>,
    storage: Arc<dyn DurableStorage>,
    accounts: Arc<dyn AccountSource>,
}

impl SessionStore {
    /// Reads the initial session from storage. Malformed content reads as
    /// absent; this never fails.
    pub fn load(storage: Arc<dyn DurableStorage>, accounts: Arc<dyn AccountSource>) -> Self {
        let initial = Session::from_storage(storage.as_ref());
        debug!(
            authenticated = initial.is_authenticated(),
            has_user = initial.user().is_some(),
            "session loaded from storage"
        );
        let (state, _) = watch::channel(initial);
        Self {
            state,
            storage,
            accounts,
        }
    }

    pub fn snapshot(&self) -> Session {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    /// Replaces the in-memory session with whatever storage holds now.
    pub fn rehydrate(&self) -> Session {
        let session = Session::from_storage(self.storage.as_ref());
        self.state.send_replace(session.clone());
        session
    }

    pub async fn commit(&self, command: SessionCommand) -> CommitOutcome {
        match command {
            SessionCommand::Logout => {
                self.logout();
                CommitOutcome::LoggedOut
            }
            SessionCommand::Replace { user, token } => {
                let session = Session::new(user, token);
                self.state.send_modify(|current| {
                    persist(self.storage.as_ref(), &session);
                    *current = session.clone();
                });
                match session.token() {
                    Some(token) if session.needs_refresh() => self.refresh(token.to_string()).await,
                    _ => CommitOutcome::Applied(session),
                }
            }
        }
    }

    /// Clears memory and storage. No network call is made.
    pub fn logout(&self) {
        self.state.send_modify(|current| {
            persist(self.storage.as_ref(), &Session::signed_out());
            *current = Session::signed_out();
        });
        info!("session cleared");
    }

    /// Signs out because the server rejected `token`. Does nothing when the
    /// session has already moved on to another token. Returns whether the
    /// session was cleared.
    pub fn expire(&self, token: &str) -> bool {
        let cleared = self.state.send_if_modified(|current| {
            if current.token() != Some(token) {
                return false;
            }
            persist(self.storage.as_ref(), &Session::signed_out());
            *current = Session::signed_out();
            true
        });
        if cleared {
            info!("session expired; signed out");
        } else {
            debug!("ignoring rejection of a replaced token");
        }
        cleared
    }

    /// Resolves `token` to its user. Success completes the session; failure
    /// logs out. Either result is dropped if the session moved on to a
    /// different token while the request was in flight.
    pub async fn refresh(&self, token: String) -> CommitOutcome {
        let result = self.accounts.current_user(&token).await;
        let mut outcome = CommitOutcome::Superseded;
        self.state.send_if_modified(|current| {
            if current.token() != Some(token.as_str()) {
                return false;
            }
            let next = match &result {
                Ok(user) if !user.id.trim().is_empty() => {
                    Session::new(Some(user.clone()), Some(token.clone()))
                }
                _ => Session::signed_out(),
            };
            persist(self.storage.as_ref(), &next);
            *current = next.clone();
            outcome = match &result {
                Ok(_) if next.is_authenticated() => CommitOutcome::Refreshed(next),
                Ok(_) => CommitOutcome::Expired(ApiError::new(
                    ApiErrorKind::Decode,
                    "Invalid user data from server",
                )),
                Err(err) => CommitOutcome::Expired(err.clone()),
            };
            true
        });
        match &outcome {
            CommitOutcome::Superseded => debug!("discarding refresh for a replaced token"),
            CommitOutcome::Expired(err) => warn!(error = %err, "session refresh failed; signed out"),
            _ => info!("session refreshed"),
        }
        outcome
    }

    /// Completes a restored token-only session. Call once at startup.
    pub async fn restore(&self) -> CommitOutcome {
        let current = self.snapshot();
        match current.token() {
            Some(token) if current.needs_refresh() => self.refresh(token.to_string()).await,
            _ => CommitOutcome::Applied(current),
        }
    }
}

/// Mirrors `session` into storage. Failures are logged and otherwise ignored
/// because memory stays authoritative.
fn persist(storage: &dyn DurableStorage, session: &Session) {
    let token_write = match session.token() {
        Some(token) => storage.set(TOKEN_KEY, token),
        None => storage.remove(TOKEN_KEY),
    };
    if let Err(err) = token_write {
        warn!(error = %err, "failed to persist session token");
    }
    let user_write = match session.user() {
        Some(user) => serde_json::to_string(user)
            .map_err(Into::into)
            .and_then(|encoded| storage.set(USER_KEY, &encoded)),
        None => storage.remove(USER_KEY),
    };
    if let Err(err) = user_write {
        warn!(error = %err, "failed to persist session user");
    }
}
