use std::sync::Arc;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use postal_core::config::MAX_FRAME_BYTES;
use postal_protocol::frames::{InboundFrame, ReqFrame, ResFrame};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

/// Outbound lines buffered before callers wait on the writer.
const OUTBOUND_BUFFER: usize = 64;

type Waiters = DashMap<String, oneshot::Sender<ResFrame>>;

/// One open line-delimited JSON connection to the server.
///
/// Requests are multiplexed: any number of callers may have a request in
/// flight, and each response is routed to its caller by request id. A
/// writer task owns the sink and a reader task owns the stream; when either
/// ends the connection is closed and every waiter fails with
/// [`ClientError::ConnectionLost`].
pub struct Connection {
    outbound: mpsc::Sender<String>,
    waiters: Arc<Waiters>,
    closed: CancellationToken,
}

impl Connection {
    pub async fn open(address: &str) -> std::io::Result<Self> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true)?;
        let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));
        let (mut sink, mut lines) = framed.split();
        let (outbound, mut rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
        let waiters: Arc<Waiters> = Arc::new(DashMap::new());
        let closed = CancellationToken::new();

        let writer_closed = closed.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_closed.cancelled() => break,
                    line = rx.recv() => match line {
                        Some(line) => {
                            if let Err(e) = sink.send(line).await {
                                debug!(error = %e, "write failed");
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            writer_closed.cancel();
        });

        let reader_closed = closed.clone();
        let reader_waiters = Arc::clone(&waiters);
        tokio::spawn(async move {
            loop {
                let text = tokio::select! {
                    _ = reader_closed.cancelled() => break,
                    line = lines.next() => match line {
                        Some(Ok(text)) => text,
                        Some(Err(e)) => {
                            debug!(error = %e, "read failed");
                            break;
                        }
                        None => {
                            debug!("connection closed by server");
                            break;
                        }
                    },
                };
                deliver(&reader_waiters, &text);
            }
            reader_closed.cancel();
            // Dropping the senders wakes every waiter still registered.
            reader_waiters.clear();
        });

        Ok(Self {
            outbound,
            waiters,
            closed,
        })
    }

    /// `true` once the socket has failed or the server hung up.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Send `req` and wait for the response with the same id.
    pub async fn exchange(&self, req: &ReqFrame) -> Result<ResFrame> {
        if self.is_closed() {
            return Err(lost("connection closed"));
        }
        let line = serde_json::to_string(req)?;

        let (tx, mut rx) = oneshot::channel();
        self.waiters.insert(req.id.clone(), tx);
        let _waiter = WaiterGuard {
            waiters: &*self.waiters,
            id: &req.id,
        };

        self.outbound
            .send(line)
            .await
            .map_err(|_| lost("writer stopped"))?;

        tokio::select! {
            biased;
            res = &mut rx => res.map_err(|_| lost("connection closed by server")),
            _ = self.closed.cancelled() => Err(lost("connection closed")),
        }
    }

    /// [`exchange`](Self::exchange), with `ok: false` turned into an error.
    pub async fn call(&self, req: &ReqFrame) -> Result<Value> {
        let res = self.exchange(req).await?;
        if res.ok {
            return Ok(res.payload.unwrap_or(Value::Null));
        }
        let (code, message) = res
            .error
            .map(|e| (e.code, e.message))
            .unwrap_or_else(|| ("UNKNOWN".to_string(), String::new()));
        Err(ClientError::Remote { code, message })
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

/// Removes a waiter whose caller stopped waiting, so a late response is
/// dropped instead of accumulating.
struct WaiterGuard<'a> {
    waiters: &'a Waiters,
    id: &'a str,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.waiters.remove(self.id);
    }
}

/// Route one inbound line to the caller waiting on its id.
fn deliver(waiters: &Waiters, text: &str) {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "malformed frame from server");
            return;
        }
    };
    let Some(res) = frame.as_res() else {
        debug!(frame_type = %frame.frame_type, "ignoring non-response frame");
        return;
    };
    match waiters.remove(&res.id) {
        Some((_, tx)) => {
            let _ = tx.send(res);
        }
        None => debug!(id = %res.id, "discarding response with no waiter"),
    }
}

fn lost(reason: &str) -> ClientError {
    ClientError::ConnectionLost(reason.to_string())
}
