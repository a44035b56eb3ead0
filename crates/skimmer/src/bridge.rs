//! Drives blocking client code through an async HTTP transport.
//!
//! A bridged call runs a synchronous closure whose HTTP requests go through a
//! [`BridgeSession`] instead of a socket. The session replays responses it has
//! already collected and traps the first request it has no response for. The
//! bridge then performs that one fetch on the async transport, records the
//! exchange, and re-invokes the closure from the top. A call that issues `n`
//! requests settles after `n` fetches and `n + 1` invocations.
//!
//! Closures driven this way must be deterministic: each invocation has to
//! issue the same request sequence as the last one, or the bridge reports a
//! protocol violation. They must also stay free of real I/O of their own.
//!
//! ```ignore
//! let bridge = Bridge::new(transport);
//! let session = bridge.session();
//! let body = bridge
//!     .drive(move || {
//!         let response = session.dispatch(HttpRequest::get("https://api.example.com/items"))?;
//!         Ok(response.body_text())
//!     })
//!     .await?;
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;

use crate::http::{HttpRequest, HttpResponse, HttpTransport};

/// Upper bound on real fetches performed for a single bridged call.
pub const MAX_TRAP_ROUNDS: usize = 8;

/// Error returned by [`BlockingTransport::dispatch`].
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The session has no recorded response for this request. The bridge
    /// intercepts this, performs the fetch, and re-invokes the call.
    #[error("request awaits a bridged fetch: {} {}", .0.method.as_str(), .0.url)]
    Trapped(HttpRequest),

    /// A replayed invocation issued a request that differs from the one
    /// recorded at the same position.
    #[error(
        "replayed request does not match the recorded exchange: expected {} {}, got {} {}",
        .expected.method.as_str(),
        .expected.url,
        .got.method.as_str(),
        .got.url
    )]
    Desync {
        expected: Box<HttpRequest>,
        got: Box<HttpRequest>,
    },

    #[error("dispatch failed: {0}")]
    Failed(String),
}

/// Synchronous request boundary for clients driven by a [`Bridge`].
pub trait BlockingTransport: Send + Sync {
    fn dispatch(&self, request: HttpRequest) -> Result<HttpResponse, DispatchError>;
}

/// Lets the bridge recognize traps and divergence inside a client's own
/// error type.
///
/// Client errors that wrap [`DispatchError`] should forward both methods to
/// the wrapped value.
pub trait TrapError {
    /// The request waiting on a real fetch, if this error is a trap.
    fn trapped_request(&self) -> Option<&HttpRequest>;

    /// Whether this error reports a replay divergence.
    fn is_desync(&self) -> bool;
}

impl TrapError for DispatchError {
    fn trapped_request(&self) -> Option<&HttpRequest> {
        match self {
            DispatchError::Trapped(request) => Some(request),
            _ => None,
        }
    }

    fn is_desync(&self) -> bool {
        matches!(self, DispatchError::Desync { .. })
    }
}

/// Error returned by [`Bridge::drive`].
#[derive(Debug, Error)]
pub enum BridgeError<E> {
    /// The call kept trapping new requests past the fetch budget.
    #[error("bridged call did not settle within {limit} fetches")]
    RoundsExhausted { limit: usize },

    /// The call broke the replay protocol.
    #[error("bridge protocol violation: {message}")]
    Violation { message: String },

    /// The call failed on its own terms.
    #[error(transparent)]
    Call(E),

    /// The async transport failed while performing a trapped fetch.
    #[error("bridged fetch failed: {0}")]
    Transport(String),
}

#[derive(Debug, Default)]
struct SessionState {
    rounds: Vec<(HttpRequest, HttpResponse)>,
    cursor: usize,
}

/// Recorded request/response exchanges for one bridged call.
///
/// The session replays recorded responses in order and traps the first
/// request past the end of the log.
#[derive(Debug, Default)]
pub struct BridgeSession {
    state: Mutex<SessionState>,
}

impl BridgeSession {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Restart replay from the first recorded round.
    pub(crate) fn rewind(&self) {
        self.lock().cursor = 0;
    }

    /// Discard all recorded rounds.
    pub(crate) fn reset(&self) {
        let mut state = self.lock();
        state.rounds.clear();
        state.cursor = 0;
    }

    /// Append a completed exchange to the log.
    ///
    /// Recording is only valid once every earlier round has been replayed.
    pub(crate) fn record(
        &self,
        request: HttpRequest,
        response: HttpResponse,
    ) -> Result<(), DispatchError> {
        let mut state = self.lock();
        if state.cursor != state.rounds.len() {
            return Err(DispatchError::Failed(
                "response recorded before the session finished replaying".to_string(),
            ));
        }
        state.rounds.push((request, response));
        Ok(())
    }
}

impl BlockingTransport for BridgeSession {
    fn dispatch(&self, request: HttpRequest) -> Result<HttpResponse, DispatchError> {
        let mut state = self.lock();
        if state.cursor < state.rounds.len() {
            let (expected, response) = &state.rounds[state.cursor];
            if *expected != request {
                return Err(DispatchError::Desync {
                    expected: Box::new(expected.clone()),
                    got: Box::new(request),
                });
            }
            let response = response.clone();
            state.cursor += 1;
            return Ok(response);
        }
        Err(DispatchError::Trapped(request))
    }
}

/// Runs blocking clients against an async transport by trapping their
/// requests and replaying recorded responses.
pub struct Bridge {
    transport: Arc<dyn HttpTransport>,
    session: Arc<BridgeSession>,
    gate: AsyncMutex<()>,
    max_rounds: usize,
}

impl Bridge {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self::with_max_rounds(transport, MAX_TRAP_ROUNDS)
    }

    pub fn with_max_rounds(transport: Arc<dyn HttpTransport>, max_rounds: usize) -> Self {
        Self {
            transport,
            session: Arc::new(BridgeSession::default()),
            gate: AsyncMutex::new(()),
            max_rounds,
        }
    }

    /// The session blocking clients should dispatch their requests through.
    #[must_use]
    pub fn session(&self) -> Arc<BridgeSession> {
        Arc::clone(&self.session)
    }

    /// Run `call` to completion, fetching each trapped request on the async
    /// transport.
    ///
    /// Concurrent drives on the same bridge are serialized; the session is
    /// cleared on entry and on exit, so stale rounds from an abandoned drive
    /// never leak into the next one.
    pub async fn drive<T, E, F>(&self, call: F) -> Result<T, BridgeError<E>>
    where
        F: Fn() -> Result<T, E>,
        E: TrapError + std::fmt::Display,
    {
        let _gate = self.gate.lock().await;
        self.session.reset();
        let result = self.drive_locked(&call).await;
        self.session.reset();
        result
    }

    async fn drive_locked<T, E, F>(&self, call: &F) -> Result<T, BridgeError<E>>
    where
        F: Fn() -> Result<T, E>,
        E: TrapError + std::fmt::Display,
    {
        let mut performed = 0usize;
        loop {
            self.session.rewind();
            match call() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if err.is_desync() {
                        return Err(BridgeError::Violation {
                            message: err.to_string(),
                        });
                    }
                    let Some(request) = err.trapped_request().cloned() else {
                        return Err(BridgeError::Call(err));
                    };
                    drop(err);
                    if performed == self.max_rounds {
                        return Err(BridgeError::RoundsExhausted {
                            limit: self.max_rounds,
                        });
                    }
                    tracing::debug!(
                        round = performed + 1,
                        method = request.method.as_str(),
                        url = %request.url,
                        "performing bridged fetch"
                    );
                    let response = match self.transport.send(request.clone()).await {
                        Ok(response) => response,
                        Err(err) => return Err(BridgeError::Transport(err.to_string())),
                    };
                    if let Err(err) = self.session.record(request, response) {
                        return Err(BridgeError::Violation {
                            message: err.to_string(),
                        });
                    }
                    performed += 1;
                }
            }
        }
    }
}
