//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;
use tokio_util::sync::CancellationToken;

use crate::auth::{
    CredentialRecord, CredentialSink, FailureReason, LoginCredentials, UserProfile,
};
use crate::backend::{AuthenticatedSession, BackendError, IdentityBackend};
use crate::config::RenewalConfig;
use crate::store::{MemoryStore, SecureStore, StoreError};

/// Route `tracing` output through the test harness. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tokenward_core=debug")),
        )
        .with_test_writer()
        .try_init();
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Millisecond backoff, no jitter, 3 retries, 300 second threshold.
pub fn fast_config() -> RenewalConfig {
    RenewalConfig {
        refresh_threshold_secs: 300,
        max_retry_attempts: 3,
        backoff_base_ms: 1,
        backoff_multiplier: 2.0,
        max_backoff_ms: 5,
        jitter: false,
    }
}

pub fn record_expiring_in(secs: i64) -> CredentialRecord {
    CredentialRecord::expiring_in(
        "access-seed",
        Some("renewal-seed".to_string()),
        Duration::seconds(secs),
    )
    .unwrap()
}

pub fn test_user() -> UserProfile {
    UserProfile::new("42", "scout")
}

pub fn test_login() -> LoginCredentials {
    LoginCredentials::new("scout", "hunter2")
}

/// Identity backend with scripted responses and call counters.
///
/// Renewals pop the script first, then fall back to the configured failure,
/// and otherwise mint `access-N`/`renewal-N` records valid for an hour.
pub struct FakeBackend {
    login_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    renew_calls: AtomicUsize,
    panic_next_renewal: AtomicBool,
    login_delay: Mutex<StdDuration>,
    last_login_username: Mutex<Option<String>>,
    login_response: Mutex<Result<AuthenticatedSession, BackendError>>,
    logout_response: Mutex<Result<(), BackendError>>,
    renew_script: Mutex<VecDeque<Result<CredentialRecord, BackendError>>>,
    renew_failure: Mutex<Option<BackendError>>,
    renew_delay: Mutex<StdDuration>,
    last_renewal_value: Mutex<Option<String>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            login_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            renew_calls: AtomicUsize::new(0),
            panic_next_renewal: AtomicBool::new(false),
            login_delay: Mutex::new(StdDuration::ZERO),
            last_login_username: Mutex::new(None),
            login_response: Mutex::new(Ok(AuthenticatedSession {
                user: test_user(),
                credential: CredentialRecord::expiring_in(
                    "access-login",
                    Some("renewal-login".to_string()),
                    Duration::hours(1),
                )
                .unwrap(),
            })),
            logout_response: Mutex::new(Ok(())),
            renew_script: Mutex::new(VecDeque::new()),
            renew_failure: Mutex::new(None),
            renew_delay: Mutex::new(StdDuration::ZERO),
            last_renewal_value: Mutex::new(None),
        }
    }

    pub fn set_login_response(&self, response: Result<AuthenticatedSession, BackendError>) {
        *lock(&self.login_response) = response;
    }

    pub fn set_logout_response(&self, response: Result<(), BackendError>) {
        *lock(&self.logout_response) = response;
    }

    pub fn script_renewals(&self, responses: Vec<Result<CredentialRecord, BackendError>>) {
        lock(&self.renew_script).extend(responses);
    }

    pub fn fail_renewals_with(&self, error: BackendError) {
        *lock(&self.renew_failure) = Some(error);
    }

    pub fn set_login_delay(&self, delay: StdDuration) {
        *lock(&self.login_delay) = delay;
    }

    /// The next `renew` call panics instead of answering.
    pub fn panic_next_renewal(&self) {
        self.panic_next_renewal.store(true, Ordering::SeqCst);
    }

    pub fn last_login_username(&self) -> Option<String> {
        lock(&self.last_login_username).clone()
    }

    pub fn set_renew_delay(&self, delay: StdDuration) {
        *lock(&self.renew_delay) = delay;
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn renew_calls(&self) -> usize {
        self.renew_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.login_calls() + self.logout_calls() + self.renew_calls()
    }

    pub fn last_renewal_value(&self) -> Option<String> {
        lock(&self.last_renewal_value).clone()
    }
}

#[async_trait]
impl IdentityBackend for FakeBackend {
    async fn login(
        &self,
        credentials: &LoginCredentials,
    ) -> Result<AuthenticatedSession, BackendError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_login_username) = Some(credentials.username().to_string());

        let delay = *lock(&self.login_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        lock(&self.login_response).clone()
    }

    async fn logout(&self, _access_value: &str) -> Result<(), BackendError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.logout_response).clone()
    }

    async fn renew(&self, renewal_value: &str) -> Result<CredentialRecord, BackendError> {
        let call = self.renew_calls.fetch_add(1, Ordering::SeqCst) + 1;
        *lock(&self.last_renewal_value) = Some(renewal_value.to_string());
        if self.panic_next_renewal.swap(false, Ordering::SeqCst) {
            panic!("renewal backend crashed");
        }

        let delay = *lock(&self.renew_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(response) = lock(&self.renew_script).pop_front() {
            return response;
        }
        if let Some(error) = lock(&self.renew_failure).clone() {
            return Err(error);
        }
        Ok(CredentialRecord::expiring_in(
            format!("access-{}", call),
            Some(format!("renewal-{}", call)),
            Duration::hours(1),
        )
        .unwrap())
    }
}

/// Sink that keeps the credential in memory and records what happened.
/// It trusts the source record; ownership checks live in the session service.
pub struct RecordingSink {
    current: Mutex<Option<CredentialRecord>>,
    commits: AtomicUsize,
    fail_commits: AtomicBool,
    terminations: Mutex<Vec<FailureReason>>,
}

impl RecordingSink {
    pub fn new(current: Option<CredentialRecord>) -> Self {
        Self {
            current: Mutex::new(current),
            commits: AtomicUsize::new(0),
            fail_commits: AtomicBool::new(false),
            terminations: Mutex::new(Vec::new()),
        }
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn fail_commits(&self) {
        self.fail_commits.store(true, Ordering::SeqCst);
    }

    pub fn terminations(&self) -> Vec<FailureReason> {
        lock(&self.terminations).clone()
    }
}

#[async_trait]
impl CredentialSink for RecordingSink {
    fn current(&self) -> Option<CredentialRecord> {
        lock(&self.current).clone()
    }

    async fn commit(
        &self,
        _source: &CredentialRecord,
        record: &CredentialRecord,
        cancel: &CancellationToken,
    ) -> Result<(), FailureReason> {
        if cancel.is_cancelled() {
            return Err(FailureReason::Cancelled);
        }
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(FailureReason::StorageError("disk full".into()));
        }
        *lock(&self.current) = Some(record.clone());
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn terminate(
        &self,
        _source: &CredentialRecord,
        reason: &FailureReason,
        cancel: &CancellationToken,
    ) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        *lock(&self.current) = None;
        lock(&self.terminations).push(reason.clone());
        true
    }
}

/// Memory store that counts every operation and can be told to fail.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryStore,
    ops: AtomicUsize,
    fail_puts: AtomicBool,
    fail_removes: AtomicBool,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> usize {
        self.ops.load(Ordering::SeqCst)
    }

    pub fn entries(&self) -> usize {
        self.inner.len()
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_removes(&self, fail: bool) {
        self.fail_removes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SecureStore for CountingStore {
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.ops.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("keychain locked".into()));
        }
        self.inner.put(key, value).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.ops.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.ops.fetch_add(1, Ordering::SeqCst);
        if self.fail_removes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("keychain locked".into()));
        }
        self.inner.remove(key).await
    }
}
