use std::time::Duration;

/// Request port. Must match the debug server compiled into the interpreter
/// binary.
pub const REQUEST_PORT: u16 = 48174;

/// Event port. Must match the debug server compiled into the interpreter
/// binary.
pub const EVENT_PORT: u16 = 48474;

/// Delay observed before the first connect attempt and again between opening
/// the request and event channels. The interpreter needs time to parse the
/// program and bring up its debug server, and it opens the event socket only
/// after the request socket; the delay is a heuristic, not a guarantee.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Connection parameters for one interpreter debugging session.
///
/// Constructed explicitly by the launcher and passed down; there is no
/// process-global configuration.
#[derive(Debug, Clone)]
pub struct WireConfig {
    pub host: String,
    pub request_port: u16,
    pub event_port: u16,
    pub settle_delay: Duration,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            request_port: REQUEST_PORT,
            event_port: EVENT_PORT,
            settle_delay: SETTLE_DELAY,
        }
    }
}
