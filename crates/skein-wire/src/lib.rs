//! Wire-protocol client layer for the Skein interpreter's debug server.
//!
//! A debugging interpreter exposes two well-known TCP ports: a *request*
//! port carrying a synchronous line-oriented request/reply exchange, and an
//! *event* port streaming unsolicited notification lines for the lifetime of
//! the program under debug. This crate owns both connections
//! ([`RequestChannel`], [`EventChannel`]), the typed event model parsed once
//! at the channel boundary ([`DebugEvent`]), and the ordered listener
//! registry used to fan events out ([`ListenerSet`]).
//!
//! `skein-debug` builds the session state machine, breakpoints and the
//! thread model on top of this crate.

mod channel;
mod config;
mod event;
mod listener;

use std::io;

use thiserror::Error;

pub use channel::{open_channels, EventChannel, RequestChannel};
pub use config::{WireConfig, EVENT_PORT, REQUEST_PORT, SETTLE_DELAY};
pub use event::{DebugEvent, ResumeReason, SuspendReason};
pub use listener::{EventListener, ListenerSet};

pub type Result<T> = std::result::Result<T, WireError>;

#[derive(Debug, Error)]
pub enum WireError {
    /// The session never established (or has dropped) its channels.
    #[error("not connected to the interpreter")]
    NotConnected,
    /// The remote side closed a channel mid-exchange.
    #[error("channel closed by the interpreter")]
    ChannelClosed,
    #[error(transparent)]
    Io(#[from] io::Error),
}

// The scriptable mock interpreter is only needed for tests and downstream
// integration suites. Compile it for skein-wire's own unit tests
// unconditionally (via `cfg(test)`), while keeping it behind the
// `wire-test-support` feature for normal builds and for downstream crates.
#[cfg(any(test, feature = "wire-test-support"))]
pub mod mock;
