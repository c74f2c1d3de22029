use std::io;

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::Mutex,
    time::sleep,
};
use tracing::{debug, trace};

use crate::{WireConfig, WireError};

/// Opens the dual-socket connection to the interpreter's debug server.
///
/// Observes the configured settle delay before the first connect attempt and
/// again between the request and event ports, tolerating the interpreter's
/// own startup ordering. A refused connection on either port is absorbed and
/// reported as `Ok(None)`: the interpreter is assumed to have failed to
/// compile the program, and the caller leaves the session inert. Any other
/// I/O failure propagates.
///
/// When the event port is refused after the request port succeeded, the
/// request socket is closed on drop; the session still ends up inert and
/// permanently unstarted.
pub async fn open_channels(
    config: &WireConfig,
) -> crate::Result<Option<(RequestChannel, EventChannel)>> {
    sleep(config.settle_delay).await;
    let request = match TcpStream::connect((config.host.as_str(), config.request_port)).await {
        Ok(stream) => stream,
        Err(err) if err.kind() == io::ErrorKind::ConnectionRefused => {
            debug!(port = config.request_port, "request port refused");
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };

    // The interpreter opens the event socket only once the request socket is
    // accepted.
    sleep(config.settle_delay).await;
    let event = match TcpStream::connect((config.host.as_str(), config.event_port)).await {
        Ok(stream) => stream,
        Err(err) if err.kind() == io::ErrorKind::ConnectionRefused => {
            debug!(port = config.event_port, "event port refused");
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };

    Ok(Some((RequestChannel::new(request), EventChannel::new(event))))
}

/// The synchronous half of the wire protocol: one request line out, exactly
/// one reply line back.
///
/// All traffic is serialized by the single lock around the stream, so
/// concurrent callers can never interleave a request with another caller's
/// reply. A read failure is returned to the caller; it does not by itself
/// terminate the session (termination is driven by the event channel).
pub struct RequestChannel {
    io: Mutex<BufReader<TcpStream>>,
}

impl RequestChannel {
    pub(crate) fn new(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        Self {
            io: Mutex::new(BufReader::new(stream)),
        }
    }

    /// Writes `request` as a single line, flushes, and blocks for one
    /// line-terminated reply.
    pub async fn send(&self, request: &str) -> crate::Result<String> {
        let mut io = self.io.lock().await;
        trace!(%request, "request");
        io.write_all(request.as_bytes()).await?;
        io.write_all(b"\n").await?;
        io.flush().await?;

        let mut reply = String::new();
        let n = io.read_line(&mut reply).await?;
        if n == 0 {
            return Err(WireError::ChannelClosed);
        }
        trim_line_ending(&mut reply);
        trace!(%reply, "reply");
        Ok(reply)
    }
}

/// The asynchronous half of the wire protocol: a continuous stream of
/// notification lines, read one at a time.
pub struct EventChannel {
    reader: BufReader<TcpStream>,
}

impl EventChannel {
    pub(crate) fn new(stream: TcpStream) -> Self {
        Self {
            reader: BufReader::new(stream),
        }
    }

    /// Reads the next event line, or `Ok(None)` on a clean end of stream.
    pub async fn next_line(&mut self) -> crate::Result<Option<String>> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        trim_line_ending(&mut line);
        Ok(Some(line))
    }
}

fn trim_line_ending(line: &mut String) {
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::mock::{MockInterpreter, MockInterpreterConfig};

    use super::*;

    #[tokio::test]
    async fn request_reply_roundtrip() {
        let mock = MockInterpreter::spawn().await.unwrap();
        let (request, _event) = open_channels(&mock.wire_config())
            .await
            .unwrap()
            .expect("channels should open");

        assert_eq!(request.send("resume").await.unwrap(), "ok");
        assert_eq!(mock.requests(), vec!["resume".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_requests_never_interleave() {
        let config = MockInterpreterConfig {
            echo_requests: true,
            ..Default::default()
        };
        let mock = MockInterpreter::spawn_with_config(config).await.unwrap();
        let (request, _event) = open_channels(&mock.wire_config()).await.unwrap().unwrap();
        let request = Arc::new(request);

        let mut tasks = Vec::new();
        for i in 0..16 {
            let request = request.clone();
            tasks.push(tokio::spawn(async move {
                let text = format!("ping {i}");
                (text.clone(), request.send(&text).await.unwrap())
            }));
        }
        for task in tasks {
            let (sent, reply) = task.await.unwrap();
            assert_eq!(sent, reply);
        }
    }

    #[tokio::test]
    async fn dropped_reply_surfaces_as_channel_closed() {
        let config = MockInterpreterConfig {
            fail_request: Some("suspend".to_string()),
            ..Default::default()
        };
        let mock = MockInterpreter::spawn_with_config(config).await.unwrap();
        let (request, _event) = open_channels(&mock.wire_config()).await.unwrap().unwrap();

        assert!(matches!(
            request.send("suspend").await,
            Err(WireError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn refused_request_port_is_absorbed() {
        let mock = MockInterpreter::refusing_both_ports().await.unwrap();
        assert!(open_channels(&mock.wire_config())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn refused_event_port_is_absorbed() {
        let mock = MockInterpreter::spawn_request_only().await.unwrap();
        assert!(open_channels(&mock.wire_config())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn event_channel_yields_lines_then_end_of_stream() {
        let mock = MockInterpreter::spawn().await.unwrap();
        let (_request, mut event) = open_channels(&mock.wire_config()).await.unwrap().unwrap();

        mock.emit("started").await.unwrap();
        mock.emit("suspended breakpoint 4").await.unwrap();
        assert_eq!(event.next_line().await.unwrap().as_deref(), Some("started"));
        assert_eq!(
            event.next_line().await.unwrap().as_deref(),
            Some("suspended breakpoint 4")
        );

        mock.close_event_channel().await;
        assert_eq!(event.next_line().await.unwrap(), None);
    }
}
