// The client against a throwaway JSON-lines server that can be started,
// stopped and restarted on a fixed port.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use postal_client::{ClientError, ClientOptions, Delivery, PostalClient};
use postal_protocol::frames::{InboundFrame, ResFrame};
use postal_protocol::{MailMessage, NewJobArgs};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::{Framed, LinesCodec};

type CallLog = Arc<Mutex<Vec<(String, Value)>>>;

struct FakeServer {
    accept: JoinHandle<()>,
}

impl FakeServer {
    async fn start(addr: SocketAddr, log: CallLog) -> Self {
        let listener = TcpListener::bind(addr).await.unwrap();
        let accept = tokio::spawn(async move {
            // Dropping the set on abort tears down every open connection.
            let mut conns = JoinSet::new();
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                conns.spawn(serve_conn(stream, Arc::clone(&log)));
            }
        });
        Self { accept }
    }

    async fn stop(self) {
        self.accept.abort();
        let _ = self.accept.await;
    }
}

async fn serve_conn(stream: tokio::net::TcpStream, log: CallLog) {
    let mut framed = Framed::new(stream, LinesCodec::new());
    let mut next_job = 0u32;
    while let Some(Ok(line)) = framed.next().await {
        let frame: InboundFrame = serde_json::from_str(&line).unwrap();
        let req = frame.as_req().unwrap();
        let params = req.params.clone().unwrap_or(Value::Null);
        log.lock().unwrap().push((req.method.clone(), params.clone()));

        let res = match req.method.as_str() {
            "postal.submit_job" => {
                next_job += 1;
                ResFrame::ok(&req.id, format!("job-{next_job}"))
            }
            "postal.get_job_id" => match params["unique_id"].as_str() {
                Some("missing") => ResFrame::err(&req.id, "NOT_FOUND", "no live job"),
                Some(uid) => ResFrame::ok(&req.id, format!("job-for-{uid}")),
                None => ResFrame::err(&req.id, "INVALID_PARAMS", "missing unique_id"),
            },
            "postal.cancel_job" => ResFrame::ok(&req.id, true),
            _ => ResFrame::err(&req.id, "METHOD_NOT_FOUND", "unknown"),
        };
        let line = serde_json::to_string(&res).unwrap();
        if framed.send(line).await.is_err() {
            return;
        }
    }
}

async fn free_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn fast_retry() -> ClientOptions {
    ClientOptions {
        initial_backoff: Duration::from_millis(20),
        max_backoff: Duration::from_millis(100),
    }
}

fn job(unique_id: &str) -> NewJobArgs {
    NewJobArgs::new(
        unique_id,
        Duration::from_secs(60),
        MailMessage {
            sender_name: "Shop".into(),
            recipient: "buyer@example.com".into(),
            subject: "Your order".into(),
            body: "Shipped.".into(),
        },
    )
}

fn methods(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
}

async fn wait_for_calls(log: &CallLog, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while log.lock().unwrap().len() < n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("server never saw the replayed calls");
}

/// The reconnect task publishes the connection once the backlog is empty,
/// which lands just after the last replayed call reaches the server.
async fn wait_until_connected(client: &PostalClient) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !client.is_connected() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("client never reconnected");
}

#[tokio::test]
async fn connected_calls_return_replies() {
    let addr = free_addr().await;
    let log = CallLog::default();
    let server = FakeServer::start(addr, Arc::clone(&log)).await;

    let client = PostalClient::connect(addr.to_string()).await;
    assert!(client.is_connected());

    let id = client.new_job(&job("order-1")).await.unwrap();
    assert_eq!(id, Delivery::Replied("job-1".to_string()));

    let found = client.get_job_id("order-1").await.unwrap();
    assert_eq!(found.replied().as_deref(), Some("job-for-order-1"));

    assert_eq!(client.cancel_job("job-1").await.unwrap(), Delivery::Replied(true));
    assert_eq!(client.backlog_len(), 0);

    server.stop().await;
}

#[tokio::test]
async fn remote_errors_are_returned_not_queued() {
    let addr = free_addr().await;
    let log = CallLog::default();
    let server = FakeServer::start(addr, Arc::clone(&log)).await;

    let client = PostalClient::connect(addr.to_string()).await;
    let err = client.get_job_id("missing").await.unwrap_err();

    assert!(matches!(err, ClientError::Remote { .. }));
    assert_eq!(err.remote_code(), Some("NOT_FOUND"));
    assert_eq!(client.backlog_len(), 0);
    assert!(client.is_connected());

    server.stop().await;
}

#[tokio::test]
async fn offline_calls_replay_in_order_after_server_starts() {
    let addr = free_addr().await;
    let client = PostalClient::connect_with(addr.to_string(), fast_retry()).await;
    assert!(!client.is_connected());

    assert!(client.new_job(&job("a")).await.unwrap().is_queued());
    assert!(client.new_job(&job("b")).await.unwrap().is_queued());
    assert!(client.cancel_job("job-1").await.unwrap().is_queued());
    assert_eq!(client.backlog_len(), 3);

    let log = CallLog::default();
    let server = FakeServer::start(addr, Arc::clone(&log)).await;
    wait_for_calls(&log, 3).await;

    assert_eq!(
        methods(&log),
        ["postal.submit_job", "postal.submit_job", "postal.cancel_job"]
    );
    let calls = log.lock().unwrap().clone();
    assert_eq!(calls[0].1["unique_id"], "a");
    assert_eq!(calls[1].1["unique_id"], "b");
    assert_eq!(calls[2].1["job_id"], "job-1");
    wait_until_connected(&client).await;
    assert_eq!(client.backlog_len(), 0);

    server.stop().await;
}

#[tokio::test]
async fn lost_connection_queues_then_replays_on_restart() {
    let addr = free_addr().await;
    let log = CallLog::default();
    let server = FakeServer::start(addr, Arc::clone(&log)).await;

    let client = PostalClient::connect_with(addr.to_string(), fast_retry()).await;
    assert!(!client.new_job(&job("before")).await.unwrap().is_queued());

    server.stop().await;

    let delivery = client.new_job(&job("during")).await.unwrap();
    assert!(delivery.is_queued());
    assert!(client.backlog_len() >= 1);

    let server = FakeServer::start(addr, Arc::clone(&log)).await;
    wait_for_calls(&log, 2).await;

    let calls = log.lock().unwrap().clone();
    assert_eq!(calls[0].1["unique_id"], "before");
    assert_eq!(calls[1].1["unique_id"], "during");
    wait_until_connected(&client).await;
    assert_eq!(client.backlog_len(), 0);

    // Live again: calls go straight through.
    assert!(!client.get_job_id("during").await.unwrap().is_queued());

    server.stop().await;
}

#[tokio::test]
async fn offline_cancel_by_unique_id_looks_up_at_replay() {
    let addr = free_addr().await;
    let client = PostalClient::connect_with(addr.to_string(), fast_retry()).await;

    let delivery = client.cancel_job_by_unique_id("order-7").await.unwrap();
    assert!(delivery.is_queued());

    let log = CallLog::default();
    let server = FakeServer::start(addr, Arc::clone(&log)).await;
    wait_for_calls(&log, 2).await;

    let calls = log.lock().unwrap().clone();
    assert_eq!(calls[0].0, "postal.get_job_id");
    assert_eq!(calls[0].1["unique_id"], "order-7");
    assert_eq!(calls[1].0, "postal.cancel_job");
    assert_eq!(calls[1].1["job_id"], "job-for-order-7");

    server.stop().await;
}

#[tokio::test]
async fn connected_cancel_by_unique_id_returns_cancel_reply() {
    let addr = free_addr().await;
    let log = CallLog::default();
    let server = FakeServer::start(addr, Arc::clone(&log)).await;

    let client = PostalClient::connect(addr.to_string()).await;
    let delivery = client.cancel_job_by_unique_id("order-9").await.unwrap();

    assert_eq!(delivery, Delivery::Replied(true));
    assert_eq!(methods(&log), ["postal.get_job_id", "postal.cancel_job"]);

    let err = client.cancel_job_by_unique_id("missing").await.unwrap_err();
    assert_eq!(err.remote_code(), Some("NOT_FOUND"));

    server.stop().await;
}
