use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Weak,
    },
};

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use skein_wire::{
    open_channels, DebugEvent, EventChannel, EventListener, ListenerSet, RequestChannel,
    ResumeReason, SuspendReason, WireConfig, WireError,
};

use crate::{
    breakpoints::{BreakpointRegistry, LineBreakpoint},
    threads::{parse_threads_reply, DebugThread},
};

/// Configuration for one interpreter debugging session, constructed by the
/// launcher and passed down explicitly.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub wire: WireConfig,
    /// Path of the program under debug. Registered breakpoints belong to
    /// this session only when their source path matches.
    pub program: PathBuf,
}

/// Handle onto the external interpreter process, consulted for the
/// termination capability. The session's own terminal state is tracked
/// internally and driven by the event channel.
pub trait ProcessHandle: Send + Sync {
    fn is_terminated(&self) -> bool;

    fn can_terminate(&self) -> bool {
        !self.is_terminated()
    }
}

/// Why a thread resumed or suspended, as reported to notice subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Breakpoint,
    Step,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            StopReason::Breakpoint => "breakpoint",
            StopReason::Step => "step",
        }
    }
}

/// Outward notifications raised by the session state machine. Resume and
/// suspend notices are attributed to the focus thread (`threads[0]`) so the
/// front end keeps it selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    Created,
    Terminated,
    ThreadResumed { handle: u32, reason: StopReason },
    ThreadSuspended { handle: u32, reason: StopReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Unstarted,
    Running,
    Suspended,
    Terminated,
}

struct SessionInner {
    config: SessionConfig,
    /// `None` when the connection was refused during setup; the session is
    /// then permanently inert.
    request: Option<RequestChannel>,
    state: Mutex<RunState>,
    stepping: AtomicBool,
    /// The breakpoint that caused the current suspension, if any.
    cause: Mutex<Option<LineBreakpoint>>,
    threads: Mutex<Vec<DebugThread>>,
    source_file: Mutex<String>,
    current_node: AtomicU32,
    listeners: ListenerSet,
    notices: broadcast::Sender<SessionNotice>,
    registry: BreakpointRegistry,
    process: Option<Arc<dyn ProcessHandle>>,
}

/// Client-side coordinator of one interpreter debugging connection.
///
/// Cheap to clone; all clones share one underlying session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Session {}

/// A non-owning session reference, used by snapshot types (threads) that
/// live inside the session so they cannot keep it alive.
#[derive(Clone)]
pub struct WeakSession(Weak<SessionInner>);

impl WeakSession {
    pub fn upgrade(&self) -> Option<Session> {
        self.0.upgrade().map(|inner| Session { inner })
    }

    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self(Weak::new())
    }
}

impl Session {
    /// Opens a session against a freshly launched interpreter.
    ///
    /// Observes the settle delay before connecting, then between the request
    /// and event ports. A refused connection on either port is absorbed (the
    /// launch is assumed to have failed to compile) and yields an inert,
    /// permanently unstarted session. Other I/O failures propagate.
    ///
    /// On success the session attaches to `registry` and spawns the event
    /// dispatch task for its lifetime.
    pub async fn open(
        config: SessionConfig,
        registry: BreakpointRegistry,
        process: Option<Arc<dyn ProcessHandle>>,
    ) -> skein_wire::Result<Session> {
        let channels = open_channels(&config.wire).await?;
        let (request, event) = match channels {
            Some((request, event)) => (Some(request), Some(event)),
            None => (None, None),
        };

        let (notices, _) = broadcast::channel(64);
        let session = Session {
            inner: Arc::new(SessionInner {
                config,
                request,
                state: Mutex::new(RunState::Unstarted),
                stepping: AtomicBool::new(false),
                cause: Mutex::new(None),
                threads: Mutex::new(Vec::new()),
                source_file: Mutex::new(String::new()),
                current_node: AtomicU32::new(0),
                listeners: ListenerSet::new(),
                notices,
                registry: registry.clone(),
                process,
            }),
        };

        if let Some(event) = event {
            registry.attach(&session);
            tokio::spawn(dispatch_events(session.clone(), event));
        }
        Ok(session)
    }

    /// Whether both channels were established during setup.
    pub fn is_connected(&self) -> bool {
        self.inner.request.is_some()
    }

    /// Writes `request` on the request channel and blocks for its single
    /// reply line. Requests from concurrent callers are serialized and never
    /// interleaved. A failure here is reported to the caller only; it does
    /// not itself terminate the session.
    pub async fn send_request(&self, request: &str) -> skein_wire::Result<String> {
        match &self.inner.request {
            Some(channel) => channel.send(request).await,
            None => Err(WireError::NotConnected),
        }
    }

    pub fn add_event_listener(&self, listener: Arc<dyn EventListener>) {
        self.inner.listeners.add(listener);
    }

    pub fn remove_event_listener(&self, listener: &Arc<dyn EventListener>) {
        self.inner.listeners.remove(listener);
    }

    /// Subscribes to the session's outward notices.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.inner.notices.subscribe()
    }

    pub fn program(&self) -> &Path {
        &self.inner.config.program
    }

    /// Whether `breakpoint` belongs to the program this session is
    /// debugging.
    pub fn supports_breakpoint(&self, breakpoint: &LineBreakpoint) -> bool {
        !self.is_terminated() && breakpoint.source() == self.program()
    }

    pub fn is_terminated(&self) -> bool {
        *self.inner.state.lock() == RunState::Terminated
            || self
                .inner
                .process
                .as_ref()
                .is_some_and(|process| process.is_terminated())
    }

    /// True iff the last processed event suspended the session and it has
    /// not terminated since; termination forces this false permanently.
    pub fn is_suspended(&self) -> bool {
        *self.inner.state.lock() == RunState::Suspended && !self.is_terminated()
    }

    pub fn is_stepping(&self) -> bool {
        self.inner.stepping.load(Ordering::SeqCst)
    }

    pub fn can_resume(&self) -> bool {
        !self.is_terminated() && self.is_suspended()
    }

    pub fn can_suspend(&self) -> bool {
        !self.is_terminated() && !self.is_suspended()
    }

    pub fn can_terminate(&self) -> bool {
        match &self.inner.process {
            Some(process) => process.can_terminate(),
            None => !self.is_terminated(),
        }
    }

    /// Step-return is possible when the focus thread has more than one stack
    /// frame.
    pub fn can_step_return(&self) -> bool {
        self.is_suspended()
            && self
                .inner
                .threads
                .lock()
                .first()
                .is_some_and(DebugThread::can_step_return)
    }

    /// The thread snapshot taken at the last suspension. Rebuilt wholesale
    /// on every refresh; identity is positional.
    pub fn threads(&self) -> Vec<DebugThread> {
        self.inner.threads.lock().clone()
    }

    pub fn has_threads(&self) -> bool {
        !self.inner.threads.lock().is_empty()
    }

    /// File name of the source position reported at the last suspension.
    pub fn target_source_file(&self) -> String {
        self.inner.source_file.lock().clone()
    }

    /// Index of the node the interpreter reported at the last suspension.
    pub fn current_node(&self) -> u32 {
        self.inner.current_node.load(Ordering::SeqCst)
    }

    /// The breakpoint that caused the current suspension, if one claimed it.
    pub fn causing_breakpoint(&self) -> Option<LineBreakpoint> {
        self.inner.cause.lock().clone()
    }

    pub fn downgrade(&self) -> WeakSession {
        WeakSession(Arc::downgrade(&self.inner))
    }

    pub async fn resume(&self) -> skein_wire::Result<()> {
        self.send_request("resume").await.map(drop)
    }

    pub async fn suspend(&self) -> skein_wire::Result<()> {
        self.send_request("suspend").await.map(drop)
    }

    pub async fn step_into(&self) -> skein_wire::Result<()> {
        self.send_request("step into").await.map(drop)
    }

    pub async fn step_over(&self) -> skein_wire::Result<()> {
        self.send_request("step over").await.map(drop)
    }

    pub async fn step_out(&self) -> skein_wire::Result<()> {
        self.send_request("step out").await.map(drop)
    }

    /// Asks the interpreter to exit. The terminal transition itself arrives
    /// back through the event channel (or its closure).
    pub async fn terminate(&self) -> skein_wire::Result<()> {
        self.send_request("exit").await.map(drop)
    }

    /// Called by an installed breakpoint that matched a suspension event.
    pub(crate) fn notify_suspended_by(&self, breakpoint: LineBreakpoint) {
        *self.inner.cause.lock() = Some(breakpoint);
        self.notify_suspend(StopReason::Breakpoint);
    }

    /// Applies one event to the state machine. Runs on the dispatch task,
    /// before external listeners observe the event.
    async fn apply_event(&self, event: &DebugEvent) {
        // Terminated is absorbing.
        if self.is_terminated() {
            return;
        }

        // Stale attribution never survives an event boundary.
        self.inner.stepping.store(false, Ordering::SeqCst);
        self.inner.cause.lock().take();

        match event {
            DebugEvent::Started => self.handle_started().await,
            DebugEvent::Terminated => self.mark_terminated(),
            DebugEvent::Resumed(reason) => {
                *self.inner.state.lock() = RunState::Running;
                match reason {
                    ResumeReason::Step => {
                        self.inner.stepping.store(true, Ordering::SeqCst);
                        self.notify_resume(StopReason::Step);
                    }
                    ResumeReason::Breakpoint => self.notify_resume(StopReason::Breakpoint),
                    ResumeReason::Unspecified => {}
                }
            }
            DebugEvent::Suspended(reason) => {
                *self.inner.state.lock() = RunState::Suspended;
                match reason {
                    SuspendReason::Breakpoint { .. } => {
                        self.update_target_data().await;
                        self.notify_suspend(StopReason::Breakpoint);
                    }
                    SuspendReason::Step => {
                        self.update_target_data().await;
                        self.notify_suspend(StopReason::Step);
                    }
                    SuspendReason::Unspecified => {}
                }
            }
        }
    }

    /// The interpreter is up: announce the session, install every breakpoint
    /// already registered for this program, and set it running.
    async fn handle_started(&self) {
        debug!("interpreter session started");
        *self.inner.state.lock() = RunState::Running;
        let _ = self.inner.notices.send(SessionNotice::Created);
        self.inner.registry.install_deferred(self).await;
        if let Err(err) = self.resume().await {
            debug!(%err, "initial resume failed");
        }
    }

    /// The terminal transition. Idempotent: every path into termination
    /// (event line, channel closure, read failure) funnels through here and
    /// only the first call has any effect.
    fn mark_terminated(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == RunState::Terminated {
                return;
            }
            *state = RunState::Terminated;
        }
        debug!("interpreter session terminated");
        self.inner.threads.lock().clear();
        self.inner.stepping.store(false, Ordering::SeqCst);
        self.inner.cause.lock().take();
        self.inner.registry.detach(self);
        self.inner.listeners.clear();
        let _ = self.inner.notices.send(SessionNotice::Terminated);
    }

    /// Rebuilds the source position and the thread snapshot from the target.
    ///
    /// While suspended, issues `source` and `threads`; each thread then
    /// refreshes its own stack. Malformed replies are discarded or skipped,
    /// never surfaced. While running or terminated, the thread list is
    /// forced empty and the source position reset.
    async fn update_target_data(&self) {
        if self.is_suspended() && !self.is_terminated() {
            if let Ok(reply) = self.send_request("source").await {
                self.apply_source_reply(&reply);
            }

            let mut threads = match self.send_request("threads").await {
                Ok(reply) => parse_threads_reply(self.downgrade(), &reply),
                Err(err) => {
                    debug!(%err, "threads refresh failed");
                    Vec::new()
                }
            };
            for thread in &mut threads {
                thread.refresh_frames().await;
            }
            *self.inner.threads.lock() = threads;
        } else {
            self.inner.threads.lock().clear();
            self.inner.source_file.lock().clear();
            self.inner.current_node.store(0, Ordering::SeqCst);
        }
    }

    /// Expects exactly `<path>|<nodeIndex>`; any other shape discards the
    /// update.
    fn apply_source_reply(&self, reply: &str) {
        let fields: Vec<&str> = reply.split('|').collect();
        let &[path, node] = fields.as_slice() else {
            warn!(%reply, "discarding malformed source reply");
            return;
        };
        let Ok(node) = node.trim().parse::<u32>() else {
            warn!(%reply, "discarding source reply with malformed node index");
            return;
        };
        let file = Path::new(path)
            .file_name()
            .map_or_else(|| path.to_string(), |name| name.to_string_lossy().into_owned());
        *self.inner.source_file.lock() = file;
        self.inner.current_node.store(node, Ordering::SeqCst);
    }

    fn notify_resume(&self, reason: StopReason) {
        if let Some(thread) = self.inner.threads.lock().first() {
            let _ = self.inner.notices.send(SessionNotice::ThreadResumed {
                handle: thread.handle(),
                reason,
            });
        }
    }

    fn notify_suspend(&self, reason: StopReason) {
        if let Some(thread) = self.inner.threads.lock().first() {
            let _ = self.inner.notices.send(SessionNotice::ThreadSuspended {
                handle: thread.handle(),
                reason,
            });
        }
    }
}

/// Drains the event channel for the session's lifetime.
///
/// Each line is parsed once, applied to the session state machine, then
/// fanned out to a snapshot of the listener set in registration order. On
/// read failure or end of stream this triggers termination exactly once and
/// stops; the channel is never retried.
async fn dispatch_events(session: Session, mut events: EventChannel) {
    loop {
        if session.is_terminated() {
            break;
        }
        match events.next_line().await {
            Ok(Some(line)) => {
                let Some(event) = DebugEvent::parse(&line) else {
                    trace!(%line, "ignoring unrecognised event line");
                    continue;
                };
                trace!(?event, "event");
                session.apply_event(&event).await;
                session.inner.listeners.dispatch(&event);
            }
            Ok(None) => {
                debug!("event channel closed");
                session.mark_terminated();
                break;
            }
            Err(err) => {
                debug!(%err, "event channel failed");
                session.mark_terminated();
                break;
            }
        }
    }
}
