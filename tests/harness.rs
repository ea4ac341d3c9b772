//! Shared fixtures for pool integration tests.
//!
//! Workers are stubbed with `/bin/sh` scripts generated into a tempdir; the
//! loopback endpoint they announce is served by an in-test TCP responder
//! with canned HTTP replies.

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use procpool::{Pool, PoolConfig, PoolStats};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .try_init();
}

/// How the responder answers one accepted connection.
pub enum Reply {
    Body(&'static str),
    /// Read the request, then never answer.
    Hang,
}

/// Bind an ephemeral port and answer incoming requests with `replies`, one
/// per connection in accept order. Returns the bound port.
pub async fn spawn_responder(replies: Vec<Reply>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind responder");
    let port = listener.local_addr().expect("responder addr").port();
    tokio::spawn(async move {
        let mut replies = replies.into_iter();
        loop {
            let Ok((sock, _)) = listener.accept().await else {
                return;
            };
            let Some(reply) = replies.next() else { return };
            tokio::spawn(handle_connection(sock, reply));
        }
    });
    port
}

/// Like [`spawn_responder`], but forwards the raw request of the first
/// connection to `request_tx` before answering with `body`.
pub async fn spawn_capturing_responder(
    body: &'static str,
    request_tx: tokio::sync::mpsc::UnboundedSender<String>,
) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind responder");
    let port = listener.local_addr().expect("responder addr").port();
    tokio::spawn(async move {
        let Ok((mut sock, _)) = listener.accept().await else {
            return;
        };
        let request = read_request(&mut sock).await;
        let _ = request_tx.send(String::from_utf8_lossy(&request).to_string());
        write_response(&mut sock, body).await;
    });
    port
}

async fn handle_connection(mut sock: TcpStream, reply: Reply) {
    let _request = read_request(&mut sock).await;
    match reply {
        Reply::Body(body) => {
            write_response(&mut sock, body).await;
        }
        Reply::Hang => {
            tokio::time::sleep(Duration::from_secs(600)).await;
        }
    }
}

async fn write_response(sock: &mut TcpStream, body: &str) {
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = sock.write_all(response.as_bytes()).await;
    let _ = sock.flush().await;
}

async fn read_request(sock: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(header_end) = find(&buf, b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&buf[..header_end]).to_string();
            let content_length = headers
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    if name.eq_ignore_ascii_case("content-length") {
                        value.trim().parse::<usize>().ok()
                    } else {
                        None
                    }
                })
                .unwrap_or(0);
            if buf.len() >= header_end + 4 + content_length {
                return buf;
            }
        }
        match sock.read(&mut chunk).await {
            Ok(0) | Err(_) => return buf,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Generated stub worker scripts. Keep the tempdir alive for the test.
pub struct WorkerFixture {
    pub dir: tempfile::TempDir,
    pub entrypoint: PathBuf,
    pub worker_file: PathBuf,
}

/// Announces `port` and stays alive until killed.
pub fn announcing_worker(port: u16) -> WorkerFixture {
    fixture(&format!(
        "echo '#|#port#|#{port}'\necho \"worker $1 up\"\nexec sleep 30\n"
    ))
}

/// Never announces a port; holds its slot until killed.
pub fn silent_worker() -> WorkerFixture {
    fixture("exec sleep 30\n")
}

/// Exits before announcing anything.
pub fn crashing_worker() -> WorkerFixture {
    fixture("echo 'boot failed'\nexit 3\n")
}

/// Announces `port` surrounded by free-form chatter and a second,
/// bogus-looking announcement that must be ignored.
pub fn chatty_worker(port: u16) -> WorkerFixture {
    fixture(&format!(
        "echo 'starting up'\necho '#|#port#|#{port}'\n\
         echo 'free text line'\necho '#|#port#|#9999'\nexec sleep 30\n"
    ))
}

/// Announces `port` and then exits immediately.
pub fn exiting_worker(port: u16) -> WorkerFixture {
    fixture(&format!("echo '#|#port#|#{port}'\n"))
}

fn fixture(script: &str) -> WorkerFixture {
    let dir = tempfile::tempdir().expect("create tempdir");
    let entrypoint = dir.path().join("entry.sh");
    std::fs::write(&entrypoint, script).expect("write entrypoint");
    let worker_file = dir.path().join("worker.sh");
    std::fs::write(&worker_file, "# user worker program\n").expect("write worker file");
    WorkerFixture {
        dir,
        entrypoint,
        worker_file,
    }
}

/// Config pointed at `/bin/sh` with test-friendly timings.
pub fn config_for(fixture: &WorkerFixture) -> PoolConfig {
    PoolConfig::new("/bin/sh", &fixture.entrypoint, &fixture.worker_file)
        .with_spawn_retry_delay(Duration::from_millis(20))
        .with_per_job_timeout(Duration::from_secs(5))
}

pub async fn recv_event<T>(rx: &mut UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

pub async fn wait_until(pool: &Pool, cond: impl Fn(PoolStats) -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if cond(pool.stats().await) {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("condition not reached, stats: {:?}", pool.stats().await);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
