//! Single-flight credential renewal.
//!
//! Every renewal runs as an *attempt group*: one spawned task that calls the
//! backend, retries transient failures with backoff, then either commits the
//! new record or ends the session. The group's result is a shared future kept
//! in a guarded slot; callers arriving while the slot is occupied await that
//! same future instead of starting another network call. The slot is cleared
//! just before the group settles.
//!
//! ```text
//! Idle -> InFlight -> Success
//!                  -> RetryWait -> InFlight
//!                  -> TerminalFailure
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{CredentialRecord, FailureReason};
use crate::backend::IdentityBackend;
use crate::config::RenewalConfig;

pub type RefreshResult = Result<CredentialRecord, FailureReason>;

type SharedRefresh = Shared<BoxFuture<'static, RefreshResult>>;

/// Undelivered terminal-failure events kept per subscriber.
const FAILURE_EVENT_BUFFER: usize = 16;

/// Where the coordinator reads the current credential and reports results.
///
/// Both hooks receive the record the group started from and the group's
/// cancellation token. Under whatever lock guards the session they must
/// check that the session still holds `source` and that the token is not
/// cancelled, so a group can neither resurrect nor clear a session it did
/// not start from.
#[async_trait]
pub trait CredentialSink: Send + Sync {
    fn current(&self) -> Option<CredentialRecord>;

    /// Persist and publish a renewed record. Waiters are released only after
    /// this returns.
    async fn commit(
        &self,
        source: &CredentialRecord,
        record: &CredentialRecord,
        cancel: &CancellationToken,
    ) -> Result<(), FailureReason>;

    /// End the session after a terminal failure. Returns `false` if the
    /// session was cancelled or replaced first and nothing was touched.
    async fn terminate(
        &self,
        source: &CredentialRecord,
        reason: &FailureReason,
        cancel: &CancellationToken,
    ) -> bool;
}

struct InFlight {
    id: u64,
    result: SharedRefresh,
    cancel: CancellationToken,
}

/// Frees the in-flight slot when its group ends, including by panic.
struct SlotRelease {
    inner: Arc<Inner>,
    id: u64,
}

impl Drop for SlotRelease {
    fn drop(&mut self) {
        let mut slot = self.inner.lock_slot();
        if slot.as_ref().map(|f| f.id) == Some(self.id) {
            *slot = None;
        }
    }
}

struct Inner {
    backend: Arc<dyn IdentityBackend>,
    sink: Arc<dyn CredentialSink>,
    config: RenewalConfig,
    slot: Mutex<Option<InFlight>>,
    next_id: AtomicU64,
    root: CancellationToken,
    failures: broadcast::Sender<FailureReason>,
}

/// Serializes renewals into at most one in-flight backend call.
///
/// Clone is cheap and every clone shares the same in-flight slot.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

impl RefreshCoordinator {
    pub fn new(
        backend: Arc<dyn IdentityBackend>,
        sink: Arc<dyn CredentialSink>,
        config: RenewalConfig,
    ) -> Self {
        let (failures, _) = broadcast::channel(FAILURE_EVENT_BUFFER);
        Self {
            inner: Arc::new(Inner {
                backend,
                sink,
                config,
                slot: Mutex::new(None),
                next_id: AtomicU64::new(1),
                root: CancellationToken::new(),
                failures,
            }),
        }
    }

    pub fn config(&self) -> &RenewalConfig {
        &self.inner.config
    }

    /// True iff the record is absent, expired, or within the refresh threshold.
    pub fn should_refresh(&self, record: Option<&CredentialRecord>) -> bool {
        self.should_refresh_at(record, Utc::now())
    }

    pub fn should_refresh_at(&self, record: Option<&CredentialRecord>, now: DateTime<Utc>) -> bool {
        match record {
            None => true,
            Some(record) => {
                record.is_expired_at(now)
                    || record.expires_at() - now <= self.inner.config.refresh_threshold()
            }
        }
    }

    /// Return the current record untouched if it is fresh enough, otherwise renew.
    pub async fn refresh_if_needed(&self) -> RefreshResult {
        match self.inner.sink.current() {
            Some(record) if !self.should_refresh(Some(&record)) => Ok(record),
            _ => self.force_refresh().await,
        }
    }

    /// Renew unconditionally, joining the in-flight group if there is one.
    pub async fn force_refresh(&self) -> RefreshResult {
        self.join_or_start(None).await
    }

    /// Renew starting from an explicit record rather than the sink's current
    /// one. Used while restoring a session that is not yet published.
    pub async fn renew_from(&self, record: CredentialRecord) -> RefreshResult {
        self.join_or_start(Some(record)).await
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.lock_slot().is_some()
    }

    /// Cancel the in-flight group, if any. Its waiters resolve with
    /// [`FailureReason::Cancelled`].
    pub fn cancel_in_flight(&self) -> bool {
        match self.inner.lock_slot().take() {
            Some(in_flight) => {
                info!(group = in_flight.id, "Cancelling in-flight refresh");
                in_flight.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel the in-flight group and every group started afterwards.
    pub fn shutdown(&self) {
        self.inner.root.cancel();
        self.cancel_in_flight();
    }

    /// Terminal failures, one event per failed attempt group.
    pub fn subscribe_failures(&self) -> broadcast::Receiver<FailureReason> {
        self.inner.failures.subscribe()
    }

    fn join_or_start(&self, seed: Option<CredentialRecord>) -> SharedRefresh {
        let mut slot = self.inner.lock_slot();
        if let Some(in_flight) = slot.as_ref() {
            debug!(group = in_flight.id, "Joining in-flight refresh");
            return in_flight.result.clone();
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.inner.root.child_token();
        debug!(group = id, "Starting refresh");

        let handle = tokio::spawn(Arc::clone(&self.inner).run_group(id, seed, cancel.clone()));
        let result = async move {
            match handle.await {
                Ok(result) => result,
                // The group's slot was released when its task unwound
                Err(e) => {
                    error!(group = id, error = %e, "Refresh task aborted");
                    Err(FailureReason::Cancelled)
                }
            }
        }
        .boxed()
        .shared();

        *slot = Some(InFlight {
            id,
            result: result.clone(),
            cancel,
        });
        result
    }
}

impl Inner {
    fn lock_slot(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_group(
        self: Arc<Self>,
        id: u64,
        seed: Option<CredentialRecord>,
        cancel: CancellationToken,
    ) -> RefreshResult {
        let _release = SlotRelease {
            inner: Arc::clone(&self),
            id,
        };

        let source = match seed.or_else(|| self.sink.current()) {
            Some(source) => source,
            None => {
                // No session, so nothing to end or report
                debug!(group = id, "No session to refresh");
                return Err(FailureReason::NoRefreshCredential);
            }
        };

        let mut result = match self.renew_with_retry(&source, &cancel).await {
            Ok(record) => self
                .sink
                .commit(&source, &record, &cancel)
                .await
                .map(|()| record),
            Err(reason) => Err(reason),
        };

        if let Err(reason) = &result {
            if reason.ends_session() {
                if self.sink.terminate(&source, reason, &cancel).await {
                    warn!(group = id, error = %reason, "Refresh failed, session ended");
                    // No subscribers is fine
                    let _ = self.failures.send(reason.clone());
                } else {
                    result = Err(FailureReason::Cancelled);
                }
            }
        }

        result
    }

    async fn renew_with_retry(
        &self,
        source: &CredentialRecord,
        cancel: &CancellationToken,
    ) -> RefreshResult {
        let renewal_value = match source.renewal_value() {
            Some(value) => value.to_string(),
            None => {
                debug!("No renewal credential");
                return Err(FailureReason::NoRefreshCredential);
            }
        };

        let max_retries = self.config.max_retry_attempts;
        let mut attempt: u32 = 0;
        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FailureReason::Cancelled),
                outcome = self.backend.renew(&renewal_value) => outcome,
            };

            let reason = match outcome {
                Ok(record) if record.is_expired() => {
                    warn!("Backend returned an already expired credential");
                    FailureReason::TokenExpired
                }
                Ok(record) => {
                    if attempt > 0 {
                        info!(attempts = attempt + 1, "Refresh succeeded after retrying");
                    }
                    return Ok(record);
                }
                Err(e) => FailureReason::from(e),
            };

            if !reason.is_retryable() {
                return Err(reason);
            }
            if attempt >= max_retries {
                warn!(attempts = attempt + 1, error = %reason, "Refresh retries exhausted");
                return Err(reason);
            }

            let delay = self.config.backoff_delay(attempt);
            warn!(
                attempt = attempt + 1,
                max_attempts = max_retries + 1,
                backoff_ms = delay.as_millis() as u64,
                error = %reason,
                "Refresh failed, backing off"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FailureReason::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
