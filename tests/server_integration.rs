//! End-to-end tests over real TCP connections
//!
//! Each test binds a server on an ephemeral port with a mock fetcher,
//! drives it with raw socket requests (or the real client), and checks
//! the wire responses and final statistics.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Semaphore};

use wordtop::client::Client;
use wordtop::config::{ClientConfig, RetryPolicy, ServerConfig};
use wordtop::error::FetchError;
use wordtop::pipeline::Fetcher;
use wordtop::protocol::Response;
use wordtop::server::Server;

/// Fetcher with canned bodies per URL path
struct ScriptedFetcher;

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        match url {
            "http://ok.test/" => Ok("word1 word2 word1 word3 word2 word1".to_string()),
            "http://empty.test/" => Ok(String::new()),
            "http://missing.test/" => Err(FetchError::Status(404)),
            _ => Err(FetchError::InvalidUrl(url.to_string())),
        }
    }
}

/// Fetcher that blocks until the test releases a permit
struct GatedFetcher {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl Fetcher for GatedFetcher {
    async fn fetch(&self, _url: &str) -> Result<String, FetchError> {
        // Permits are never returned; each fetch consumes one release.
        self.gate
            .acquire()
            .await
            .map_err(|_| FetchError::Connect("gate closed".to_string()))?
            .forget();
        Ok("gated body".to_string())
    }
}

fn test_config() -> ServerConfig {
    ServerConfig {
        port: 0,
        workers: 2,
        top_k: 3,
        request_timeout_secs: 2,
        shutdown_timeout_secs: 2,
        ..Default::default()
    }
}

/// One request/response round trip: connect, send, half-close, read all
async fn request(addr: std::net::SocketAddr, payload: &str) -> Response {
    let mut stream = TcpStream::connect(addr).await.expect("connect failed");
    stream
        .write_all(payload.as_bytes())
        .await
        .expect("write failed");
    stream.shutdown().await.expect("half-close failed");

    let mut body = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut body))
        .await
        .expect("response timed out")
        .expect("read failed");
    Response::decode(&body).expect("undecodable response")
}

#[tokio::test]
async fn test_success_response_counts() {
    let server = Server::bind_with_fetcher(test_config(), Arc::new(ScriptedFetcher))
        .await
        .unwrap();
    let addr = server.local_addr();
    let handle = server.handle();
    let run = tokio::spawn(server.run());

    let response = request(addr, "http://ok.test/").await;
    let Response::Success { result } = response else {
        panic!("expected success, got {response:?}");
    };
    assert_eq!(result.get("word1"), Some(&3));
    assert_eq!(result.get("word2"), Some(&2));
    assert_eq!(result.get("word3"), Some(&1));
    assert_eq!(result.len(), 3);

    handle.shutdown();
    let snapshot = run.await.unwrap();
    assert_eq!(snapshot.accepted, 1);
    assert_eq!(snapshot.processed, 1);
    assert_eq!(snapshot.errors, 0);
}

#[tokio::test]
async fn test_error_responses() {
    let server = Server::bind_with_fetcher(test_config(), Arc::new(ScriptedFetcher))
        .await
        .unwrap();
    let addr = server.local_addr();
    let handle = server.handle();
    let run = tokio::spawn(server.run());

    // Fetch failure becomes an error outcome for that unit only.
    let response = request(addr, "http://missing.test/").await;
    assert!(matches!(response, Response::Error { .. }));

    // Whitespace-only request is malformed; answered without touching
    // the queue.
    let response = request(addr, "   \n").await;
    assert!(matches!(response, Response::Error { .. }));

    // The pool survives both; a good request still succeeds.
    let response = request(addr, "http://ok.test/").await;
    assert!(matches!(response, Response::Success { .. }));

    handle.shutdown();
    let snapshot = run.await.unwrap();
    assert_eq!(snapshot.processed, 1);
    assert_eq!(snapshot.errors, 1);
}

#[tokio::test]
async fn test_busy_rejection_when_queue_full() {
    let gate = Arc::new(Semaphore::new(0));
    let config = ServerConfig {
        workers: 1,
        queue_depth: 1,
        ..test_config()
    };
    let server = Server::bind_with_fetcher(
        config,
        Arc::new(GatedFetcher {
            gate: Arc::clone(&gate),
        }),
    )
    .await
    .unwrap();
    let addr = server.local_addr();
    let handle = server.handle();
    let run = tokio::spawn(server.run());

    // First request: picked up by the lone worker, blocked on the gate.
    let first = tokio::spawn(request(addr, "http://one.test/"));
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Second request: sits in the depth-1 queue.
    let second = tokio::spawn(request(addr, "http://two.test/"));
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Third request: queue full, rejected immediately.
    let response = request(addr, "http://three.test/").await;
    let Response::Retry { error } = response else {
        panic!("expected retry, got {response:?}");
    };
    assert_eq!(error, "Server busy");

    // Release the gate; the admitted requests complete normally.
    gate.add_permits(2);
    assert!(matches!(first.await.unwrap(), Response::Success { .. }));
    assert!(matches!(second.await.unwrap(), Response::Success { .. }));

    handle.shutdown();
    let snapshot = run.await.unwrap();
    assert_eq!(snapshot.accepted, 2);
    assert_eq!(snapshot.processed, 2);
    assert_eq!(snapshot.rejected, 1);
}

#[tokio::test]
async fn test_shutdown_answers_admitted_work() {
    // A unit admitted into the queue before shutdown still gets its
    // response: stop markers sit behind it and workers drain it first.
    let gate = Arc::new(Semaphore::new(0));
    let config = ServerConfig {
        workers: 1,
        queue_depth: 2,
        ..test_config()
    };
    let server = Server::bind_with_fetcher(
        config,
        Arc::new(GatedFetcher {
            gate: Arc::clone(&gate),
        }),
    )
    .await
    .unwrap();
    let addr = server.local_addr();
    let handle = server.handle();
    let run = tokio::spawn(server.run());

    // First request held at the gate by the lone worker, second queued.
    let first = tokio::spawn(request(addr, "http://one.test/"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = tokio::spawn(request(addr, "http://two.test/"));
    tokio::time::sleep(Duration::from_millis(100)).await;

    handle.shutdown();
    tokio::time::sleep(Duration::from_millis(50)).await;
    gate.add_permits(2);

    assert!(matches!(first.await.unwrap(), Response::Success { .. }));
    assert!(matches!(second.await.unwrap(), Response::Success { .. }));

    let snapshot = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("server did not stop")
        .unwrap();
    assert_eq!(snapshot.accepted, 2);
    assert_eq!(snapshot.processed, 2);
}

#[tokio::test]
async fn test_graceful_shutdown_stops_accepting() {
    let server = Server::bind_with_fetcher(test_config(), Arc::new(ScriptedFetcher))
        .await
        .unwrap();
    let addr = server.local_addr();
    let handle = server.handle();
    let run = tokio::spawn(server.run());

    let response = request(addr, "http://ok.test/").await;
    assert!(matches!(response, Response::Success { .. }));

    handle.shutdown();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("server did not stop")
        .unwrap();

    // The listener is gone; new connections either fail to connect or
    // are closed without a response.
    match TcpStream::connect(addr).await {
        Err(_) => {},
        Ok(mut stream) => {
            let _ = stream.write_all(b"http://ok.test/").await;
            let _ = stream.shutdown().await;
            let mut body = Vec::new();
            let n = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut body))
                .await
                .unwrap_or(Ok(0))
                .unwrap_or(0);
            assert_eq!(n, 0, "shut-down server answered a request");
        },
    }
}

#[tokio::test]
async fn test_client_end_to_end() {
    let server = Server::bind_with_fetcher(test_config(), Arc::new(ScriptedFetcher))
        .await
        .unwrap();
    let addr = server.local_addr();
    let handle = server.handle();
    let run = tokio::spawn(server.run());

    let mut file = tempfile::NamedTempFile::new().unwrap();
    for _ in 0..3 {
        writeln!(file, "http://ok.test/").unwrap();
    }
    writeln!(file, "http://missing.test/").unwrap();
    writeln!(file).unwrap();
    file.flush().unwrap();

    let config = ClientConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        producers: 2,
        retry: RetryPolicy {
            delay_ms: 50,
            max_attempts: Some(3),
        },
        ..Default::default()
    };
    let client = Client::new(config).unwrap();
    let urls = wordtop::client::read_url_file(file.path()).unwrap();
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let summary = tokio::time::timeout(Duration::from_secs(10), client.run(urls, shutdown_rx))
        .await
        .expect("client run timed out")
        .unwrap();

    assert_eq!(summary.completed, 3);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.dropped, 0);

    handle.shutdown();
    let snapshot = run.await.unwrap();
    assert_eq!(snapshot.accepted, 4);
    assert_eq!(snapshot.processed, 3);
    assert_eq!(snapshot.errors, 1);
}
