//! Client-side debugging session for the Skein interpreter.
//!
//! A [`Session`] coordinates one launch of the interpreter: it opens the
//! dual-socket wire connection, drains the event channel on a background
//! task, tracks the suspend/resume/step state machine, rebuilds the
//! per-thread snapshot whenever the program suspends, and speaks the
//! breakpoint set/clear protocol on behalf of [`LineBreakpoint`]s owned by
//! the front end's [`BreakpointRegistry`].
//!
//! The session deliberately absorbs most failures: a refused connection
//! leaves it inert (the launch is assumed to have failed upstream), and any
//! I/O failure on the event channel is interpreted as remote termination.
//! The only externally observable failure signal is the terminal state and
//! the capability predicates derived from it.

mod breakpoints;
mod session;
mod threads;

pub use breakpoints::{BreakpointRegistry, LineBreakpoint};
pub use session::{
    ProcessHandle, Session, SessionConfig, SessionNotice, StopReason, WeakSession,
};
pub use threads::{DebugThread, StackFrame, ThreadStatus};

pub use skein_wire as wire;
