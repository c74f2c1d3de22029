//! A scriptable mock of the interpreter's debug server.
//!
//! Binds ephemeral request and event ports, answers requests from a small
//! canned-reply table, records everything the client sends, and emits event
//! lines on demand. It intentionally implements just enough of the protocol
//! to exercise skein-wire and skein-debug without a real interpreter binary.

use std::{collections::HashMap, io, time::Duration};

use parking_lot::Mutex;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    time::{sleep, timeout},
};

use crate::WireConfig;

#[derive(Debug, Clone)]
pub struct MockInterpreterConfig {
    /// Reply to the `source` request: `<path>|<nodeIndex>`.
    pub source_reply: String,
    /// Reply to the `threads` request: `#`-joined `<handle>|<status>` records.
    pub threads_reply: String,
    /// Replies to `stack <handle>` requests, keyed by handle. Unknown handles
    /// get an empty reply.
    pub stack_replies: HashMap<u32, String>,
    /// Reply to every other request (`resume`, `set ...`, `clear ...`, ...).
    pub ack_reply: String,
    /// When set, every request is answered with its own text. Used to prove
    /// that concurrent callers cannot interleave on the request channel.
    pub echo_requests: bool,
    /// When a request matches this text, the mock drops the request
    /// connection without replying, simulating a mid-request I/O failure.
    pub fail_request: Option<String>,
}

impl Default for MockInterpreterConfig {
    fn default() -> Self {
        Self {
            source_reply: "demo/flock.sk|0".to_string(),
            threads_reply: "1|0".to_string(),
            stack_replies: HashMap::new(),
            ack_reply: "ok".to_string(),
            echo_requests: false,
            fail_request: None,
        }
    }
}

pub struct MockInterpreter {
    request_port: u16,
    event_port: u16,
    state: std::sync::Arc<MockState>,
}

struct MockState {
    config: MockInterpreterConfig,
    requests: Mutex<Vec<String>>,
    event_stream: tokio::sync::Mutex<Option<TcpStream>>,
}

impl MockInterpreter {
    pub async fn spawn() -> io::Result<Self> {
        Self::spawn_with_config(MockInterpreterConfig::default()).await
    }

    pub async fn spawn_with_config(config: MockInterpreterConfig) -> io::Result<Self> {
        let request_listener = TcpListener::bind("127.0.0.1:0").await?;
        let event_listener = TcpListener::bind("127.0.0.1:0").await?;
        let request_port = request_listener.local_addr()?.port();
        let event_port = event_listener.local_addr()?.port();

        let state = std::sync::Arc::new(MockState {
            config,
            requests: Mutex::new(Vec::new()),
            event_stream: tokio::sync::Mutex::new(None),
        });

        tokio::spawn(serve_requests(request_listener, state.clone()));
        tokio::spawn(accept_event_channel(event_listener, state.clone()));

        Ok(Self {
            request_port,
            event_port,
            state,
        })
    }

    /// A mock that accepts the request port but refuses the event port,
    /// reproducing an interpreter that died between opening its two sockets.
    pub async fn spawn_request_only() -> io::Result<Self> {
        let request_listener = TcpListener::bind("127.0.0.1:0").await?;
        let request_port = request_listener.local_addr()?.port();
        let event_port = claim_refused_port().await?;

        let state = std::sync::Arc::new(MockState {
            config: MockInterpreterConfig::default(),
            requests: Mutex::new(Vec::new()),
            event_stream: tokio::sync::Mutex::new(None),
        });
        tokio::spawn(serve_requests(request_listener, state.clone()));

        Ok(Self {
            request_port,
            event_port,
            state,
        })
    }

    /// A mock that refuses both ports, reproducing a compile failure where
    /// the interpreter never brings its debug server up.
    pub async fn refusing_both_ports() -> io::Result<Self> {
        let request_port = claim_refused_port().await?;
        let event_port = claim_refused_port().await?;
        Ok(Self {
            request_port,
            event_port,
            state: std::sync::Arc::new(MockState {
                config: MockInterpreterConfig::default(),
                requests: Mutex::new(Vec::new()),
                event_stream: tokio::sync::Mutex::new(None),
            }),
        })
    }

    /// A wire configuration pointing at this mock, with a settle delay short
    /// enough for tests.
    pub fn wire_config(&self) -> WireConfig {
        WireConfig {
            host: "127.0.0.1".to_string(),
            request_port: self.request_port,
            event_port: self.event_port,
            settle_delay: Duration::from_millis(10),
        }
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<String> {
        self.state.requests.lock().clone()
    }

    /// Waits until the client has sent a request exactly matching `needle`.
    ///
    /// Panics after five seconds; the mock is test support and a missing
    /// request is always a test failure.
    pub async fn wait_for_request(&self, needle: &str) {
        let outcome = timeout(Duration::from_secs(5), async {
            loop {
                if self.state.requests.lock().iter().any(|r| r == needle) {
                    return;
                }
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        if outcome.is_err() {
            panic!(
                "timed out waiting for request {needle:?}; saw {:?}",
                self.requests()
            );
        }
    }

    /// Emits one line on the event channel, waiting for the client to
    /// connect first.
    pub async fn emit(&self, event: &str) -> io::Result<()> {
        let outcome = timeout(Duration::from_secs(5), async {
            loop {
                {
                    let mut slot = self.state.event_stream.lock().await;
                    if let Some(stream) = slot.as_mut() {
                        stream.write_all(event.as_bytes()).await?;
                        stream.write_all(b"\n").await?;
                        stream.flush().await?;
                        return Ok(());
                    }
                }
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        match outcome {
            Ok(result) => result,
            Err(_) => panic!("timed out waiting for an event channel connection"),
        }
    }

    /// Closes the event channel, simulating the interpreter exiting.
    pub async fn close_event_channel(&self) {
        self.state.event_stream.lock().await.take();
    }
}

async fn serve_requests(listener: TcpListener, state: std::sync::Arc<MockState>) {
    let Ok((stream, _)) = listener.accept().await else {
        return;
    };
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let reply = reply_for(&state.config, &line);
        state.requests.lock().push(line);
        let Some(reply) = reply else {
            // Scripted failure: drop the connection without replying.
            return;
        };
        if write.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
        if write.write_all(b"\n").await.is_err() {
            return;
        }
    }
}

fn reply_for(config: &MockInterpreterConfig, request: &str) -> Option<String> {
    if config
        .fail_request
        .as_deref()
        .is_some_and(|fail| fail == request)
    {
        return None;
    }
    if config.echo_requests {
        return Some(request.to_string());
    }
    if request == "source" {
        return Some(config.source_reply.clone());
    }
    if request == "threads" {
        return Some(config.threads_reply.clone());
    }
    if let Some(handle) = request.strip_prefix("stack ") {
        let reply = handle
            .trim()
            .parse::<u32>()
            .ok()
            .and_then(|handle| config.stack_replies.get(&handle).cloned())
            .unwrap_or_default();
        return Some(reply);
    }
    Some(config.ack_reply.clone())
}

async fn accept_event_channel(listener: TcpListener, state: std::sync::Arc<MockState>) {
    let Ok((stream, _)) = listener.accept().await else {
        return;
    };
    *state.event_stream.lock().await = Some(stream);
}

/// Binds an ephemeral port and immediately releases it so connecting to it
/// gets refused.
async fn claim_refused_port() -> io::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}
