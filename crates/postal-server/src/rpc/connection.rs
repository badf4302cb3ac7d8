use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use postal_core::config::MAX_FRAME_BYTES;
use postal_protocol::frames::{InboundFrame, ResFrame};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app::AppState;
use crate::rpc::dispatch;

/// Outbound lines buffered per connection before request tasks wait.
const OUTBOUND_BUFFER: usize = 64;

/// Per-connection event loop; lives for the whole TCP session.
///
/// Every request runs on its own task so a submission parked at the
/// admission gate does not hold up the rest of the connection. Responses
/// are funnelled through one writer task and may arrive out of order.
pub async fn run_connection(
    stream: TcpStream,
    peer: SocketAddr,
    app: Arc<AppState>,
    shutdown: CancellationToken,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, %peer, "new connection");
    app.clients.insert(conn_id.clone(), peer);

    let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_BYTES));
    let (mut sink, mut lines) = framed.split();
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if sink.send(line).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,

            line = lines.next() => match line {
                Some(Ok(text)) => handle_line(&conn_id, &text, &tx, &app).await,
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    warn!(conn_id, limit = MAX_FRAME_BYTES, "frame too large");
                    let res = ResFrame::err("", "PAYLOAD_TOO_LARGE", "frame exceeds size limit");
                    send_json(&tx, &res).await;
                    break;
                }
                Some(Err(e)) => {
                    warn!(conn_id, error = %e, "read failed");
                    break;
                }
                None => break,
            },
        }
    }

    // In-flight request tasks keep their own sender; the writer exits once
    // the last of them has answered.
    drop(tx);
    drop(writer);
    app.clients.remove(&conn_id);
    info!(conn_id, "connection closed");
}

/// Process one inbound line.
async fn handle_line(
    conn_id: &str,
    text: &str,
    tx: &mpsc::Sender<String>,
    app: &Arc<AppState>,
) {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!(conn_id, error = %e, "malformed frame");
            let res = ResFrame::err("", "INVALID_REQUEST", &format!("malformed frame: {e}"));
            send_json(tx, &res).await;
            return;
        }
    };

    let Some(req) = frame.as_req() else {
        debug!(conn_id, frame_type = %frame.frame_type, "ignoring non-request frame");
        return;
    };

    let tx = tx.clone();
    let app = Arc::clone(app);
    tokio::spawn(async move {
        let res = dispatch::route(&req.method, req.params.as_ref(), &req.id, &app).await;
        send_json(&tx, &res).await;
    });
}

async fn send_json(tx: &mpsc::Sender<String>, res: &ResFrame) {
    match serde_json::to_string(res) {
        Ok(line) => {
            let _ = tx.send(line).await;
        }
        Err(e) => warn!(error = %e, "failed to encode response"),
    }
}
