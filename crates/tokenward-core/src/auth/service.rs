//! Session facade: login, logout, restore and lazy renewal.
//!
//! All read-modify-write sequences over session state and persisted data run
//! under one async lock. The refresh coordinator takes the same lock through
//! its [`CredentialSink`] hooks, which is how a logout that cancels a renewal
//! is guaranteed to win over that renewal's late commit.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    CredentialRecord, CredentialSink, FailureReason, LoginCredentials, LoginError, LogoutError,
    LogoutOutcome, RefreshCoordinator, SessionState, SessionStateHandle, UserProfile,
};
use crate::backend::IdentityBackend;
use crate::config::RenewalConfig;
use crate::store::{SecureStore, SessionStorage, StoreError};

/// Undelivered logout events kept per subscriber.
const LOGOUT_EVENT_BUFFER: usize = 16;

/// State, storage and the lock that guards them together.
///
/// The lock holds the expired credential a restore is renewing, if any.
/// That is the only record a renewal may report against while the state
/// is `Pending`.
struct SessionCore {
    state: SessionStateHandle,
    storage: SessionStorage,
    lock: Mutex<Option<CredentialRecord>>,
}

impl SessionCore {
    /// Whether the session a renewal started from is still the live one.
    fn owns(&self, restoring: Option<&CredentialRecord>, source: &CredentialRecord) -> bool {
        match self.state.current() {
            SessionState::Authenticated { credential, .. } => credential == *source,
            SessionState::Pending => restoring == Some(source),
            SessionState::Unauthenticated => false,
        }
    }
}

#[async_trait]
impl CredentialSink for SessionCore {
    fn current(&self) -> Option<CredentialRecord> {
        self.state.current_credential()
    }

    async fn commit(
        &self,
        source: &CredentialRecord,
        record: &CredentialRecord,
        cancel: &CancellationToken,
    ) -> Result<(), FailureReason> {
        let restoring = self.lock.lock().await;
        if cancel.is_cancelled() || !self.owns(restoring.as_ref(), source) {
            debug!("Discarding renewal for a session that has been replaced");
            return Err(FailureReason::Cancelled);
        }
        self.storage
            .save_credential(record)
            .await
            .map_err(|e| FailureReason::StorageError(e.to_string()))?;
        self.state.replace_credential(record.clone());
        debug!(expires_at = %record.expires_at(), "Renewed credential committed");
        Ok(())
    }

    async fn terminate(
        &self,
        source: &CredentialRecord,
        reason: &FailureReason,
        cancel: &CancellationToken,
    ) -> bool {
        let mut restoring = self.lock.lock().await;
        if cancel.is_cancelled() || !self.owns(restoring.as_ref(), source) {
            return false;
        }
        *restoring = None;
        if let Err(e) = self.storage.clear().await {
            error!(error = %e, "Failed to clear persisted session after refresh failure");
        }
        self.state.set(SessionState::Unauthenticated);
        info!(reason = %reason, "Session ended by refresh failure");
        true
    }
}

/// The public face of the session core.
///
/// Clone is cheap; clones share state, storage and the refresh coordinator.
#[derive(Clone)]
pub struct SessionService {
    core: Arc<SessionCore>,
    backend: Arc<dyn IdentityBackend>,
    coordinator: RefreshCoordinator,
    logouts: broadcast::Sender<LogoutOutcome>,
}

impl SessionService {
    pub fn new(
        backend: Arc<dyn IdentityBackend>,
        store: Arc<dyn SecureStore>,
        config: RenewalConfig,
    ) -> Self {
        let core = Arc::new(SessionCore {
            state: SessionStateHandle::new(),
            storage: SessionStorage::new(store),
            lock: Mutex::new(None),
        });
        let coordinator = RefreshCoordinator::new(backend.clone(), core.clone(), config);
        let (logouts, _) = broadcast::channel(LOGOUT_EVENT_BUFFER);
        Self {
            core,
            backend,
            coordinator,
            logouts,
        }
    }

    /// Read-only handle to the session state.
    pub fn state(&self) -> SessionStateHandle {
        self.core.state.clone()
    }

    pub fn current_state(&self) -> SessionState {
        self.core.state.current()
    }

    pub fn is_authenticated(&self) -> bool {
        self.core.state.is_authenticated()
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Automatic session losses (terminal refresh failures).
    pub fn subscribe_failures(&self) -> broadcast::Receiver<FailureReason> {
        self.coordinator.subscribe_failures()
    }

    /// User-initiated logouts that closed a session.
    pub fn subscribe_logouts(&self) -> broadcast::Receiver<LogoutOutcome> {
        self.logouts.subscribe()
    }

    pub async fn login(&self, credentials: &LoginCredentials) -> Result<UserProfile, LoginError> {
        credentials.validate().map_err(LoginError::InvalidInput)?;

        let mut restoring = self.core.lock.lock().await;
        // A renewal for the previous session must not land on the new one
        self.coordinator.cancel_in_flight();
        *restoring = None;
        self.core.state.set(SessionState::Pending);
        info!(username = %credentials.username(), "Logging in");

        let session = match self.backend.login(credentials).await {
            Ok(session) => session,
            Err(e) => {
                let err = LoginError::from(e);
                warn!(error = %err, "Login failed");
                self.core.state.set(SessionState::Unauthenticated);
                return Err(err);
            }
        };

        if session.credential.is_expired() {
            warn!("Login returned an already expired credential");
            self.core.state.set(SessionState::Unauthenticated);
            return Err(LoginError::InvalidResponse(
                "credential already expired".to_string(),
            ));
        }

        if let Err(e) = self.core.storage.save(&session.user, &session.credential).await {
            error!(error = %e, "Failed to persist session");
            if let Err(e) = self.core.storage.clear().await {
                warn!(error = %e, "Failed to roll back partially persisted session");
            }
            self.core.state.set(SessionState::Unauthenticated);
            return Err(LoginError::Storage(e.to_string()));
        }

        self.core.state.set(SessionState::Authenticated {
            user: session.user.clone(),
            credential: session.credential,
        });
        info!(user_id = %session.user.id, "Login successful");
        Ok(session.user)
    }

    /// Close the session.
    ///
    /// With `force_local` the session is always closed locally, even when the
    /// backend cannot be reached. Without it, a failed remote call leaves the
    /// session in place and returns [`LogoutError::Remote`].
    pub async fn logout(&self, force_local: bool) -> Result<LogoutOutcome, LogoutError> {
        let mut restoring = self.core.lock.lock().await;

        let access_value = match self.core.state.current() {
            SessionState::Unauthenticated => {
                debug!("Logout requested with no active session");
                return Ok(LogoutOutcome::AlreadyLoggedOut);
            }
            // Restore in progress; nothing has been published to invalidate
            SessionState::Pending => None,
            SessionState::Authenticated { credential, .. } => {
                Some(credential.access_value().to_string())
            }
        };

        self.coordinator.cancel_in_flight();

        let remote = match access_value {
            Some(access_value) => self.backend.logout(&access_value).await,
            None => Ok(()),
        };

        let outcome = match remote {
            Ok(()) => LogoutOutcome::Success,
            Err(e) if force_local => {
                warn!(error = %e, "Remote logout failed, clearing local session anyway");
                LogoutOutcome::PartialSuccess(e.to_string())
            }
            Err(e) => {
                warn!(error = %e, "Remote logout failed, keeping session");
                return Err(LogoutError::Remote(e));
            }
        };

        *restoring = None;
        let cleared = self.core.storage.clear().await;
        self.core.state.set(SessionState::Unauthenticated);
        let _ = self.logouts.send(outcome.clone());

        match cleared {
            Ok(()) => {
                info!(outcome = ?outcome, "Logged out");
                Ok(outcome)
            }
            Err(e) => {
                error!(error = %e, "Logged out, but persisted session could not be cleared");
                Err(LogoutError::Storage(e.to_string()))
            }
        }
    }

    /// Rebuild the session from persisted data. Returns whether a session
    /// is active afterwards.
    pub async fn restore_session(&self) -> bool {
        let persisted = {
            let mut restoring = self.core.lock.lock().await;
            match self.core.state.current() {
                SessionState::Unauthenticated => {}
                SessionState::Pending | SessionState::Authenticated { .. } => {
                    debug!("Session already active or restoring, skipping restore");
                    return self.core.state.is_authenticated();
                }
            }

            let persisted = match self.core.storage.load().await {
                Ok(Some(persisted)) => persisted,
                Ok(None) => {
                    debug!("No persisted session");
                    return false;
                }
                Err(StoreError::Malformed(reason)) => {
                    warn!(reason = %reason, "Discarding malformed persisted session");
                    if let Err(e) = self.core.storage.clear().await {
                        warn!(error = %e, "Failed to discard malformed session");
                    }
                    return false;
                }
                Err(e) => {
                    warn!(error = %e, "Could not read persisted session");
                    return false;
                }
            };

            if !persisted.credential.is_expired() {
                info!(user_id = %persisted.user.id, "Restored session");
                self.core.state.set(SessionState::Authenticated {
                    user: persisted.user,
                    credential: persisted.credential,
                });
                return true;
            }

            *restoring = Some(persisted.credential.clone());
            self.core.state.set(SessionState::Pending);
            persisted
        };

        // The renewal commits through the session lock, so it must not be held here
        info!(user_id = %persisted.user.id, "Persisted credential expired, renewing");
        let result = self.coordinator.renew_from(persisted.credential.clone()).await;

        let mut restoring = self.core.lock.lock().await;
        if restoring.as_ref() != Some(&persisted.credential) {
            // A logout, login or terminal failure got in first
            return self.core.state.is_authenticated();
        }
        *restoring = None;
        match result {
            Ok(credential) => {
                info!(user_id = %persisted.user.id, "Restored session after renewal");
                self.core.state.set(SessionState::Authenticated {
                    user: persisted.user,
                    credential,
                });
                true
            }
            Err(FailureReason::Cancelled) => {
                // Shutting down; the persisted session may still be renewable next time
                debug!("Restore renewal cancelled");
                self.core.state.set(SessionState::Unauthenticated);
                false
            }
            Err(reason) => {
                warn!(error = %reason, "Could not renew persisted session");
                if let Err(e) = self.core.storage.clear().await {
                    warn!(error = %e, "Failed to clear persisted session");
                }
                self.core.state.set(SessionState::Unauthenticated);
                false
            }
        }
    }

    /// Current access value, renewed first when it is inside the refresh
    /// threshold. `None` only when no usable credential remains.
    pub async fn get_token(&self) -> Option<String> {
        let record = self.core.state.current_credential()?;
        if !self.coordinator.should_refresh(Some(&record)) {
            return Some(record.access_value().to_string());
        }

        match self.coordinator.refresh_if_needed().await {
            Ok(record) => Some(record.access_value().to_string()),
            // The session is being closed or replaced
            Err(FailureReason::Cancelled) => None,
            Err(reason) => {
                debug!(error = %reason, "Refresh failed while fetching token");
                // Still usable if the session survived and the old record has time left
                self.core
                    .state
                    .current_credential()
                    .filter(|record| !record.is_expired())
                    .map(|record| record.access_value().to_string())
            }
        }
    }

    /// True when there is no credential or it has expired.
    pub fn is_expired(&self) -> bool {
        self.core
            .state
            .current_credential()
            .map(|record| record.is_expired())
            .unwrap_or(true)
    }
}
