use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use super::{CredentialRecord, UserProfile};

/// Buffered transitions per observer before it is resynchronised.
const OBSERVER_BUFFER: usize = 64;

/// Who is logged in, if anyone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    /// A login or session restore is in flight.
    Pending,
    Authenticated {
        user: UserProfile,
        credential: CredentialRecord,
    },
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated { .. })
    }

    pub fn credential(&self) -> Option<&CredentialRecord> {
        match self {
            SessionState::Authenticated { credential, .. } => Some(credential),
            SessionState::Unauthenticated | SessionState::Pending => None,
        }
    }

    pub fn user(&self) -> Option<&UserProfile> {
        match self {
            SessionState::Authenticated { user, .. } => Some(user),
            SessionState::Unauthenticated | SessionState::Pending => None,
        }
    }
}

struct Slot {
    current: SessionState,
    tx: broadcast::Sender<SessionState>,
}

/// Shared, observable session state.
///
/// Cloning yields another handle to the same cell. Reads are open to anyone;
/// mutation is crate-private and only ever happens under the session lock.
#[derive(Clone)]
pub struct SessionStateHandle {
    slot: Arc<Mutex<Slot>>,
}

impl SessionStateHandle {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(OBSERVER_BUFFER);
        Self {
            slot: Arc::new(Mutex::new(Slot {
                current: SessionState::Unauthenticated,
                tx,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn current(&self) -> SessionState {
        self.lock().current.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.lock().current.is_authenticated()
    }

    pub fn current_credential(&self) -> Option<CredentialRecord> {
        self.lock().current.credential().cloned()
    }

    /// Stream of session states: the current value first, then every
    /// transition in the order it happened.
    ///
    /// Nothing is read until the stream is first polled, and each call starts
    /// an independent sequence.
    pub fn observe(&self) -> BoxStream<'static, SessionState> {
        enum Cursor {
            Start,
            Live(broadcast::Receiver<SessionState>),
        }

        let handle = self.clone();
        stream::unfold(Cursor::Start, move |cursor| {
            let handle = handle.clone();
            async move {
                match cursor {
                    Cursor::Start => {
                        let (snapshot, rx) = handle.snapshot_and_subscribe();
                        Some((snapshot, Cursor::Live(rx)))
                    }
                    Cursor::Live(mut rx) => match rx.recv().await {
                        Ok(state) => Some((state, Cursor::Live(rx))),
                        Err(RecvError::Lagged(skipped)) => {
                            // Buffered transitions are older than the current value
                            debug!(skipped, "Session observer lagged, resynchronising");
                            let (snapshot, rx) = handle.snapshot_and_subscribe();
                            Some((snapshot, Cursor::Live(rx)))
                        }
                        Err(RecvError::Closed) => None,
                    },
                }
            }
        })
        .boxed()
    }

    fn snapshot_and_subscribe(&self) -> (SessionState, broadcast::Receiver<SessionState>) {
        let slot = self.lock();
        (slot.current.clone(), slot.tx.subscribe())
    }

    /// Publish a new state. Returns `false` when it equals the current one.
    pub(crate) fn set(&self, next: SessionState) -> bool {
        let mut slot = self.lock();
        if slot.current == next {
            return false;
        }
        debug!(from = state_name(&slot.current), to = state_name(&next), "Session transition");
        slot.current = next.clone();
        // No receivers is fine
        let _ = slot.tx.send(next);
        true
    }

    /// Swap the credential of an authenticated session, keeping its user.
    /// Does nothing unless the session is authenticated.
    pub(crate) fn replace_credential(&self, credential: CredentialRecord) -> bool {
        let mut slot = self.lock();
        let next = match &slot.current {
            SessionState::Authenticated { user, credential: old } if *old != credential => {
                SessionState::Authenticated {
                    user: user.clone(),
                    credential,
                }
            }
            SessionState::Authenticated { .. }
            | SessionState::Unauthenticated
            | SessionState::Pending => return false,
        };
        slot.current = next.clone();
        let _ = slot.tx.send(next);
        true
    }
}

fn state_name(state: &SessionState) -> &'static str {
    match state {
        SessionState::Unauthenticated => "unauthenticated",
        SessionState::Pending => "pending",
        SessionState::Authenticated { .. } => "authenticated",
    }
}
