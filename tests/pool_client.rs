// tests/pool_client.rs
//! `getwork` client against a scripted HTTP responder
use btc_miner_supervisor::config::PoolSettings;
use btc_miner_supervisor::miner::{ShareOutcome, WorkOrigin, WorkResult, WorkUnit};
use btc_miner_supervisor::network::{PoolClient, WorkSource};
use btc_miner_supervisor::utils::PoolError;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use url::Url;

#[derive(Clone)]
struct Reply {
    status: u16,
    headers: Vec<(&'static str, &'static str)>,
    body: String,
}

impl Reply {
    fn ok(body: Value) -> Self {
        Reply {
            status: 200,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    fn status(status: u16, body: &str) -> Self {
        Reply {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    fn header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers.push((name, value));
        self
    }
}

#[derive(Debug, Clone)]
struct Request {
    path: String,
    authorization: Option<String>,
    body: Value,
}

struct Responder {
    url: Url,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl Responder {
    /// Answers requests with `replies` in order, repeating the last one
    async fn start(replies: Vec<Reply>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let log = requests.clone();

        tokio::spawn(async move {
            let mut served = 0;
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let reply = replies[served.min(replies.len() - 1)].clone();
                served += 1;

                let mut stream = BufReader::new(stream);
                let mut request_line = String::new();
                stream.read_line(&mut request_line).await.unwrap();
                let path = request_line
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or_default()
                    .to_string();

                let mut length = 0;
                let mut authorization = None;
                loop {
                    let mut line = String::new();
                    stream.read_line(&mut line).await.unwrap();
                    let line = line.trim_end();
                    if line.is_empty() {
                        break;
                    }
                    if let Some((name, value)) = line.split_once(':') {
                        match name.to_ascii_lowercase().as_str() {
                            "content-length" => length = value.trim().parse().unwrap(),
                            "authorization" => authorization = Some(value.trim().to_string()),
                            _ => {}
                        }
                    }
                }
                let mut body = vec![0; length];
                stream.read_exact(&mut body).await.unwrap();
                log.lock().unwrap().push(Request {
                    path,
                    authorization,
                    body: serde_json::from_slice(&body).unwrap_or(Value::Null),
                });

                let mut response = format!(
                    "HTTP/1.1 {} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
                    reply.status,
                    reply.body.len()
                );
                for (name, value) in &reply.headers {
                    response.push_str(&format!("{}: {}\r\n", name, value));
                }
                response.push_str("\r\n");
                response.push_str(&reply.body);
                let mut stream = stream.into_inner();
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        Responder { url, requests }
    }

    fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
}

fn client(url: &Url) -> PoolClient {
    let settings = PoolSettings {
        rpc_timeout_secs: 1,
        submit_timeout_secs: 1,
        long_poll_timeout_secs: 1,
        ..PoolSettings::default()
    };
    PoolClient::new(url.clone(), "worker", "x", settings).unwrap()
}

fn work_body() -> Value {
    json!({
        "result": { "data": "00".repeat(128), "target": "ff".repeat(32) },
        "error": null,
        "id": 0
    })
}

fn unit() -> WorkUnit {
    WorkUnit::new(1, vec![0; 128], vec![0xff; 32], WorkOrigin::Poll).unwrap()
}

#[tokio::test]
async fn fetch_sends_getwork_with_basic_auth() {
    let pool = Responder::start(vec![Reply::ok(work_body())]).await;
    let client = client(&pool.url);

    let work = client.fetch_work().await.unwrap();
    assert_eq!(work.data, vec![0; 128]);
    assert_eq!(work.target, vec![0xff; 32]);
    assert_eq!(work.origin, WorkOrigin::Poll);

    let requests = pool.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].body["method"], "getwork");
    assert_eq!(requests[0].body["params"], json!([]));
    assert_eq!(
        requests[0].authorization.as_deref(),
        Some("Basic d29ya2VyOng=")
    );
    assert!(!client.supports_long_poll());
}

#[tokio::test]
async fn long_poll_follows_advertised_path() {
    let pool = Responder::start(vec![
        Reply::ok(work_body()).header("X-Long-Polling", "/LP"),
        Reply::ok(work_body()),
    ])
    .await;
    let client = client(&pool.url);

    let first = client.fetch_work().await.unwrap();
    assert!(client.supports_long_poll());
    let pushed = client.long_poll().await.unwrap();
    assert_eq!(pushed.origin, WorkOrigin::LongPoll);
    assert!(pushed.id > first.id);

    let paths: Vec<String> = pool.requests().into_iter().map(|r| r.path).collect();
    assert_eq!(paths, vec!["/", "/LP"]);
}

#[tokio::test]
async fn rejected_credentials_are_auth_errors() {
    let pool = Responder::start(vec![Reply::status(401, "")]).await;
    match client(&pool.url).fetch_work().await {
        Err(PoolError::Auth(reason)) => assert!(reason.contains("worker"), "{}", reason),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn server_failures_are_network_errors() {
    let pool = Responder::start(vec![Reply::status(503, "")]).await;
    assert!(matches!(
        client(&pool.url).fetch_work().await,
        Err(PoolError::Network(_))
    ));
}

#[tokio::test]
async fn malformed_replies_are_protocol_errors() {
    let pool = Responder::start(vec![
        Reply::status(200, "<html>not json</html>"),
        Reply::ok(json!({ "result": null, "error": { "code": -1, "message": "busy" } })),
        Reply::ok(json!({ "result": { "data": "abcd" } })),
    ])
    .await;
    let client = client(&pool.url);
    for _ in 0..3 {
        assert!(matches!(
            client.fetch_work().await,
            Err(PoolError::Protocol(_))
        ));
    }
}

#[tokio::test]
async fn unreachable_endpoint_is_a_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = Url::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();
    drop(listener);
    assert!(matches!(
        client(&url).fetch_work().await,
        Err(PoolError::Network(_))
    ));
}

#[tokio::test]
async fn silent_server_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = Url::parse(&format!("http://{}/", listener.local_addr().unwrap())).unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let started = std::time::Instant::now();
    assert!(matches!(
        client(&url).fetch_work().await,
        Err(PoolError::Network(_))
    ));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn submission_carries_solved_header() {
    let pool = Responder::start(vec![Reply::ok(json!({ "result": true, "error": null, "id": 1 }))]).await;
    let result = WorkResult {
        work_id: 1,
        nonce: [0x11, 0x22, 0x33, 0x44],
    };

    let outcome = client(&pool.url)
        .submit_work(&unit(), &result, false)
        .await
        .unwrap();
    assert_eq!(outcome, ShareOutcome::Accepted);

    let submitted = pool.requests()[0].body["params"][0]
        .as_str()
        .unwrap()
        .to_string();
    let data = hex::decode(submitted).unwrap();
    assert_eq!(&data[76..80], &[0x11, 0x22, 0x33, 0x44]);
}

#[tokio::test]
async fn rejection_reasons_classify_outcomes() {
    let rejected = json!({ "result": false, "error": null, "id": 1 });
    let pool = Responder::start(vec![
        Reply::ok(rejected.clone()).header("X-Reject-Reason", "stale-prevblk"),
        Reply::ok(json!({ "result": false, "error": null, "reject-reason": "duplicate" })),
        Reply::ok(rejected.clone()),
        Reply::ok(rejected),
    ])
    .await;
    let client = client(&pool.url);
    let result = WorkResult {
        work_id: 1,
        nonce: [0; 4],
    };

    let mut outcomes = Vec::new();
    for superseded in [false, false, true, false] {
        outcomes.push(
            client
                .submit_work(&unit(), &result, superseded)
                .await
                .unwrap(),
        );
    }
    assert_eq!(
        outcomes,
        vec![
            ShareOutcome::Stale,
            ShareOutcome::Duplicate,
            ShareOutcome::Stale,
            ShareOutcome::Invalid
        ]
    );
}
