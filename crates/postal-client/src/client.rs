use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use postal_protocol::frames::ReqFrame;
use postal_protocol::methods::{CANCEL_JOB, GET_JOB_ID, SUBMIT_JOB};
use postal_protocol::{CancelJobArgs, GetJobIdArgs, NewJobArgs};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::{ClientError, Result};

/// Result of a call that may have been deferred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery<T> {
    /// The server answered.
    Replied(T),
    /// The server was unreachable; the call sits in the local backlog and
    /// will be replayed after reconnection. Its reply will be discarded.
    Queued,
}

impl<T> Delivery<T> {
    pub fn is_queued(&self) -> bool {
        matches!(self, Delivery::Queued)
    }

    pub fn replied(self) -> Option<T> {
        match self {
            Delivery::Replied(v) => Some(v),
            Delivery::Queued => None,
        }
    }
}

/// Reconnection backoff: starts at `initial_backoff`, doubles per failed
/// attempt, never exceeds `max_backoff`.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// A call waiting in the backlog.
#[derive(Debug, Clone)]
enum QueuedCall {
    Rpc { method: String, params: Value },
    /// Lookup-then-cancel; the job id is only known once connected.
    CancelByUniqueId { unique_id: String },
}

/// Client for the postal office service that survives server restarts.
///
/// Cheap to clone; clones share the connection and the backlog. Calls run
/// concurrently over one multiplexed connection, so a submission waiting
/// for server capacity does not hold up other calls.
#[derive(Clone)]
pub struct PostalClient {
    inner: Arc<Inner>,
}

struct Inner {
    address: String,
    options: ClientOptions,
    state: Mutex<State>,
    /// Held by the single active reconnect task.
    reconnecting: Arc<tokio::sync::Mutex<()>>,
    next_id: AtomicU64,
}

/// `conn` is only published by the reconnect task, and only once the
/// backlog is empty, so queued calls always reach the server first.
struct State {
    conn: Option<Arc<Connection>>,
    backlog: VecDeque<QueuedCall>,
}

impl PostalClient {
    /// Connect to `address` (`host:port`). Never fails: if the server is
    /// unreachable the client starts disconnected and keeps retrying in the
    /// background.
    pub async fn connect(address: impl Into<String>) -> Self {
        Self::connect_with(address, ClientOptions::default()).await
    }

    pub async fn connect_with(address: impl Into<String>, options: ClientOptions) -> Self {
        let inner = Arc::new(Inner {
            address: address.into(),
            options,
            state: Mutex::new(State {
                conn: None,
                backlog: VecDeque::new(),
            }),
            reconnecting: Arc::new(tokio::sync::Mutex::new(())),
            next_id: AtomicU64::new(1),
        });

        match Connection::open(&inner.address).await {
            Ok(conn) => {
                info!(address = %inner.address, "connected to postal office");
                inner.state().conn = Some(Arc::new(conn));
            }
            Err(e) => {
                warn!(address = %inner.address, error = %e, "postal office unreachable; will retry");
                inner.ensure_reconnecting();
            }
        }
        Self { inner }
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .state()
            .conn
            .as_ref()
            .is_some_and(|c| !c.is_closed())
    }

    /// Calls waiting for the connection to come back.
    pub fn backlog_len(&self) -> usize {
        self.inner.state().backlog.len()
    }

    /// Issue `method` with `params`. On connection failure the call is
    /// queued and [`Delivery::Queued`] returned; server-side errors are
    /// returned as [`ClientError::Remote`] and never queued.
    pub async fn call(&self, method: &str, params: Value) -> Result<Delivery<Value>> {
        let queued = || QueuedCall::Rpc {
            method: method.to_string(),
            params: params.clone(),
        };
        let mut lost = None;
        loop {
            let Some(conn) = self.inner.route(queued, lost.as_ref()) else {
                warn!(method, "postal office unreachable; call queued");
                return Ok(Delivery::Queued);
            };
            match self.inner.request(&conn, method, &params).await {
                Ok(value) => return Ok(Delivery::Replied(value)),
                Err(ClientError::ConnectionLost(reason)) => {
                    debug!(method, %reason, "connection lost mid-call");
                    lost = Some(conn);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Submit a job. Returns the server-assigned job id.
    pub async fn new_job(&self, args: &NewJobArgs) -> Result<Delivery<String>> {
        let params = serde_json::to_value(args)?;
        typed(self.call(SUBMIT_JOB, params).await?)
    }

    /// Job id currently registered under `unique_id`.
    pub async fn get_job_id(&self, unique_id: &str) -> Result<Delivery<String>> {
        let params = serde_json::to_value(GetJobIdArgs {
            unique_id: unique_id.to_string(),
        })?;
        typed(self.call(GET_JOB_ID, params).await?)
    }

    pub async fn cancel_job(&self, job_id: &str) -> Result<Delivery<bool>> {
        let params = serde_json::to_value(CancelJobArgs {
            job_id: job_id.to_string(),
        })?;
        typed(self.call(CANCEL_JOB, params).await?)
    }

    /// Look up the job for `unique_id` and cancel it.
    ///
    /// When disconnected the whole lookup-then-cancel sequence is queued,
    /// so it resolves the job id only at replay time.
    pub async fn cancel_job_by_unique_id(&self, unique_id: &str) -> Result<Delivery<bool>> {
        let lookup = serde_json::to_value(GetJobIdArgs {
            unique_id: unique_id.to_string(),
        })?;
        let queued = || QueuedCall::CancelByUniqueId {
            unique_id: unique_id.to_string(),
        };

        let mut lost = None;
        let job_id: String = loop {
            let Some(conn) = self.inner.route(queued, lost.as_ref()) else {
                warn!(%unique_id, "postal office unreachable; cancellation queued");
                return Ok(Delivery::Queued);
            };
            match self.inner.request(&conn, GET_JOB_ID, &lookup).await {
                Ok(value) => {
                    break serde_json::from_value(value).map_err(|e| {
                        ClientError::Protocol(format!("unexpected job id payload: {e}"))
                    })?
                }
                Err(ClientError::ConnectionLost(reason)) => {
                    debug!(%unique_id, %reason, "connection lost mid-lookup");
                    lost = Some(conn);
                }
                Err(e) => return Err(e),
            }
        };

        self.cancel_job(&job_id).await
    }
}

fn typed<T: DeserializeOwned>(delivery: Delivery<Value>) -> Result<Delivery<T>> {
    match delivery {
        Delivery::Replied(value) => serde_json::from_value(value)
            .map(Delivery::Replied)
            .map_err(|e| ClientError::Protocol(format!("unexpected reply payload: {e}"))),
        Delivery::Queued => Ok(Delivery::Queued),
    }
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_request_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    /// Pick the connection for a call, or queue the call if there is none.
    ///
    /// `lost` is a connection that just failed this call; it is retired
    /// unless a newer one has already replaced it, in which case the call
    /// is retried on the newer one.
    fn route(
        self: &Arc<Self>,
        queued: impl FnOnce() -> QueuedCall,
        lost: Option<&Arc<Connection>>,
    ) -> Option<Arc<Connection>> {
        let mut state = self.state();
        if let Some(lost) = lost {
            if state.conn.as_ref().is_some_and(|c| Arc::ptr_eq(c, lost)) {
                state.conn = None;
            }
        }
        if let Some(conn) = &state.conn {
            return Some(Arc::clone(conn));
        }

        state.backlog.push_back(queued());
        debug!(backlog = state.backlog.len(), "call queued");
        drop(state);
        self.ensure_reconnecting();
        None
    }

    async fn request(&self, conn: &Connection, method: &str, params: &Value) -> Result<Value> {
        let req = ReqFrame::new(self.next_request_id(), method, Some(params.clone()));
        conn.call(&req).await
    }

    /// Start the reconnect task unless one is already running.
    fn ensure_reconnecting(self: &Arc<Self>) {
        let Ok(guard) = Arc::clone(&self.reconnecting).try_lock_owned() else {
            debug!("reconnect already in progress");
            return;
        };
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.reconnect_loop(guard).await });
    }

    async fn reconnect_loop(self: Arc<Self>, guard: OwnedMutexGuard<()>) {
        let mut delay = self.options.initial_backoff;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match Connection::open(&self.address).await {
                Ok(conn) => {
                    info!(address = %self.address, attempt, "reconnected to postal office");
                    if self.drain_and_publish(Arc::new(conn)).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!(address = %self.address, attempt, error = %e, "reconnect failed");
                }
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(self.options.max_backoff);
        }

        drop(guard);
        // A caller may have lost the connection after it was published but
        // before the guard was released; its trigger would have been a no-op.
        let stranded = {
            let state = self.state();
            state.conn.is_none() && !state.backlog.is_empty()
        };
        if stranded {
            self.ensure_reconnecting();
        }
    }

    /// Re-issue every queued call in FIFO order over `conn`, discarding
    /// replies, then publish `conn` for direct calls. Calls queued while
    /// the drain runs are drained too. Returns `false` if the connection
    /// dropped midway; the interrupted call goes back to the front.
    async fn drain_and_publish(&self, conn: Arc<Connection>) -> bool {
        let mut replayed = 0usize;
        let mut failed = 0usize;

        loop {
            let next = {
                let mut state = self.state();
                let next = state.backlog.pop_front();
                if next.is_none() {
                    state.conn = Some(Arc::clone(&conn));
                }
                next
            };
            let Some(call) = next else {
                break;
            };

            match self.replay(&conn, call).await {
                Ok(()) => replayed += 1,
                Err(Replay::Lost(call)) => {
                    let remaining = {
                        let mut state = self.state();
                        state.backlog.push_front(call);
                        state.backlog.len()
                    };
                    warn!(replayed, remaining, "connection lost during replay");
                    return false;
                }
                Err(Replay::Failed(e)) => {
                    failed += 1;
                    warn!(error = %e, "replayed call failed");
                }
            }
        }

        if replayed > 0 || failed > 0 {
            info!(replayed, failed, "backlog replayed");
        }
        true
    }

    async fn replay(&self, conn: &Connection, call: QueuedCall) -> std::result::Result<(), Replay> {
        let (method, params) = match &call {
            QueuedCall::Rpc { method, params } => (method.clone(), params.clone()),
            QueuedCall::CancelByUniqueId { unique_id } => {
                let lookup = serde_json::json!({ "unique_id": unique_id });
                let job_id = match self.request(conn, GET_JOB_ID, &lookup).await {
                    Ok(Value::String(id)) => id,
                    Ok(other) => {
                        return Err(Replay::Failed(ClientError::Protocol(format!(
                            "unexpected job id payload: {other}"
                        ))))
                    }
                    Err(ClientError::ConnectionLost(_)) => return Err(Replay::Lost(call.clone())),
                    Err(e) => return Err(Replay::Failed(e)),
                };
                (CANCEL_JOB.to_string(), serde_json::json!({ "job_id": job_id }))
            }
        };

        match self.request(conn, &method, &params).await {
            Ok(_) => Ok(()),
            // The lookup leg already ran; replay only the cancel.
            Err(ClientError::ConnectionLost(_)) => Err(Replay::Lost(QueuedCall::Rpc { method, params })),
            Err(e) => Err(Replay::Failed(e)),
        }
    }
}

enum Replay {
    /// Connection dropped; retry this call after reconnecting.
    Lost(QueuedCall),
    /// The server rejected the call; it is not retried.
    Failed(ClientError),
}
