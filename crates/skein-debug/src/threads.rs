use tracing::{debug, warn};

use skein_wire::WireError;

use crate::session::WeakSession;

/// Interpreter-reported scheduling state of one thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    Running,
    Waiting,
    Delaying,
}

impl ThreadStatus {
    fn from_wire(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Running),
            1 => Some(Self::Waiting),
            2 => Some(Self::Delaying),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Delaying => "delaying",
        }
    }
}

/// One entry of a thread's call stack, innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    function: String,
    line: u32,
}

impl StackFrame {
    pub fn function(&self) -> &str {
        &self.function
    }

    /// 1-based source line of the frame's current position.
    pub fn line(&self) -> u32 {
        self.line
    }
}

/// An ephemeral snapshot of one interpreter thread.
///
/// The whole thread list is rebuilt from the `threads` reply every time the
/// session suspends; snapshots are never mutated incrementally and identity
/// is positional, not persisted across refreshes. Control operations
/// delegate through the owning session's single request channel; there is no
/// per-thread socket.
#[derive(Clone)]
pub struct DebugThread {
    session: WeakSession,
    handle: u32,
    label: String,
    status: ThreadStatus,
    frames: Vec<StackFrame>,
}

impl DebugThread {
    fn new(session: WeakSession, handle: u32, status: ThreadStatus) -> Self {
        Self {
            session,
            handle,
            label: format!("Thread[{handle}]"),
            status,
            frames: Vec::new(),
        }
    }

    pub fn handle(&self) -> u32 {
        self.handle
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn status(&self) -> ThreadStatus {
        self.status
    }

    /// The call stack captured at the last refresh, innermost frame first.
    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    pub fn has_frames(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Step-return is possible when there is a caller frame to return to.
    pub fn can_step_return(&self) -> bool {
        self.frames.len() > 1
    }

    /// Replaces this thread's stack with a fresh `stack <handle>` snapshot.
    /// A failed refresh leaves the stack empty rather than stale.
    pub(crate) async fn refresh_frames(&mut self) {
        let Some(session) = self.session.upgrade() else {
            return;
        };
        match session.send_request(&format!("stack {}", self.handle)).await {
            Ok(reply) => self.frames = parse_stack_reply(&reply),
            Err(err) => {
                debug!(handle = self.handle, %err, "stack refresh failed");
                self.frames.clear();
            }
        }
    }

    pub async fn resume(&self) -> skein_wire::Result<()> {
        self.request("resume").await
    }

    pub async fn suspend(&self) -> skein_wire::Result<()> {
        self.request("suspend").await
    }

    pub async fn step_into(&self) -> skein_wire::Result<()> {
        self.request("step into").await
    }

    pub async fn step_over(&self) -> skein_wire::Result<()> {
        self.request("step over").await
    }

    pub async fn step_out(&self) -> skein_wire::Result<()> {
        self.request("step out").await
    }

    pub async fn terminate(&self) -> skein_wire::Result<()> {
        self.request("exit").await
    }

    async fn request(&self, request: &str) -> skein_wire::Result<()> {
        let session = self.session.upgrade().ok_or(WireError::NotConnected)?;
        session.send_request(request).await.map(drop)
    }
}

impl std::fmt::Debug for DebugThread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugThread")
            .field("handle", &self.handle)
            .field("status", &self.status)
            .field("frames", &self.frames)
            .finish()
    }
}

/// Parses a `threads` reply: `#`-joined records of exactly
/// `<handle>|<status>`. Malformed records are skipped, never raised.
pub(crate) fn parse_threads_reply(session: WeakSession, reply: &str) -> Vec<DebugThread> {
    let mut threads = Vec::new();
    for record in reply.split('#') {
        let fields: Vec<&str> = record.split('|').collect();
        let &[handle, status] = fields.as_slice() else {
            if !record.is_empty() {
                warn!(%record, "skipping malformed thread record");
            }
            continue;
        };
        let (Ok(handle), Ok(status)) = (handle.trim().parse(), status.trim().parse()) else {
            warn!(%record, "skipping malformed thread record");
            continue;
        };
        let Some(status) = ThreadStatus::from_wire(status) else {
            warn!(%record, "skipping thread record with unknown status");
            continue;
        };
        threads.push(DebugThread::new(session.clone(), handle, status));
    }
    threads
}

/// Parses a `stack <handle>` reply: `#`-joined records of exactly
/// `<function>|<line>`. Malformed records are skipped.
fn parse_stack_reply(reply: &str) -> Vec<StackFrame> {
    let mut frames = Vec::new();
    for record in reply.split('#') {
        let fields: Vec<&str> = record.split('|').collect();
        let &[function, line] = fields.as_slice() else {
            if !record.is_empty() {
                warn!(%record, "skipping malformed stack record");
            }
            continue;
        };
        let Ok(line) = line.trim().parse() else {
            warn!(%record, "skipping stack record with malformed line");
            continue;
        };
        frames.push(StackFrame {
            function: function.to_string(),
            line,
        });
    }
    frames
}
