use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc, Weak,
    },
};

use parking_lot::Mutex;
use tracing::debug;

use skein_wire::{DebugEvent, EventListener, SuspendReason};

use crate::session::Session;

/// A line breakpoint in a Skein program.
///
/// The breakpoint is owned by the front end's persisted marker storage (via
/// the [`BreakpointRegistry`]), not by any session. It can be installed into
/// at most one session at a time and keeps an explicit back-reference to it,
/// used only to forward hit notifications and to support removal. Lines are
/// 1-based.
///
/// The optional *alias condition* narrows the breakpoint to one program
/// instance; 0 means any instance (filter disabled).
#[derive(Clone)]
pub struct LineBreakpoint {
    inner: Arc<BreakpointInner>,
}

struct BreakpointInner {
    this: Weak<BreakpointInner>,
    source: PathBuf,
    line: u32,
    run_to_line: bool,
    /// Run-to-line breakpoints are not persisted in marker storage and are
    /// installable even while the registry toggle is off.
    registered: bool,
    enabled: AtomicBool,
    alias_condition: AtomicU32,
    alias_condition_enabled: AtomicBool,
    session: Mutex<Option<Session>>,
}

impl LineBreakpoint {
    /// Creates a persistent line breakpoint on `source` at the given
    /// 1-based line.
    pub fn new(source: impl Into<PathBuf>, line: u32) -> Self {
        Self::build(source.into(), line, false)
    }

    /// Creates a transient run-to-line breakpoint.
    pub fn run_to_line(source: impl Into<PathBuf>, line: u32) -> Self {
        Self::build(source.into(), line, true)
    }

    fn build(source: PathBuf, line: u32, run_to_line: bool) -> Self {
        let inner = Arc::new_cyclic(|this| BreakpointInner {
            this: this.clone(),
            source,
            line,
            run_to_line,
            registered: !run_to_line,
            enabled: AtomicBool::new(true),
            alias_condition: AtomicU32::new(0),
            alias_condition_enabled: AtomicBool::new(false),
            session: Mutex::new(None),
        });
        Self { inner }
    }

    pub fn source(&self) -> &Path {
        &self.inner.source
    }

    pub fn line(&self) -> u32 {
        self.inner.line
    }

    pub fn is_run_to_line(&self) -> bool {
        self.inner.run_to_line
    }

    pub fn is_registered(&self) -> bool {
        self.inner.registered
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn alias_condition(&self) -> u32 {
        self.inner.alias_condition.load(Ordering::SeqCst)
    }

    pub fn set_alias_condition(&self, alias: u32) {
        self.inner.alias_condition.store(alias, Ordering::SeqCst);
    }

    pub fn is_alias_condition_enabled(&self) -> bool {
        self.inner.alias_condition_enabled.load(Ordering::SeqCst)
    }

    pub fn set_alias_condition_enabled(&self, enabled: bool) {
        self.inner
            .alias_condition_enabled
            .store(enabled, Ordering::SeqCst);
    }

    /// The alias condition as shown in the breakpoint properties; empty when
    /// unset.
    pub fn alias_condition_text(&self) -> String {
        match self.alias_condition() {
            0 => String::new(),
            alias => alias.to_string(),
        }
    }

    /// Sets the alias condition from persisted marker text. Malformed values
    /// fall back to 0 (filter matches any instance).
    pub fn set_alias_condition_text(&self, text: &str) {
        self.set_alias_condition(text.trim().parse().unwrap_or(0));
    }

    /// Human-readable marker label.
    pub fn label(&self) -> String {
        let file = self
            .inner
            .source
            .file_name()
            .map_or_else(String::new, |name| name.to_string_lossy().into_owned());
        format!("Line Breakpoint: {file} [line: {}]", self.inner.line)
    }

    /// The session this breakpoint is currently installed in, if any.
    pub fn installed_session(&self) -> Option<Session> {
        self.inner.session.lock().clone()
    }

    pub fn is_installed(&self) -> bool {
        self.inner.session.lock().is_some()
    }

    /// Installs this breakpoint into `session`: records the back-reference,
    /// registers as an event listener for hit notifications, and sends the
    /// `set` request.
    pub async fn install(&self, session: &Session) -> skein_wire::Result<()> {
        *self.inner.session.lock() = Some(session.clone());
        session.add_event_listener(self.listener());
        self.send_set(session).await
    }

    /// Resends the `set` request to the installed session, picking up a
    /// changed alias condition. There is deliberately no preceding `clear`;
    /// the interpreter replaces the line's alias filter in place. No-op when
    /// not installed.
    pub async fn update(&self) -> skein_wire::Result<()> {
        let session = self.inner.session.lock().clone();
        match session {
            Some(session) => self.send_set(&session).await,
            None => Ok(()),
        }
    }

    /// Removes this breakpoint from `session`: deregisters the listener,
    /// sends `clear`, and drops the back-reference.
    pub async fn remove(&self, session: &Session) -> skein_wire::Result<()> {
        session.remove_event_listener(&self.listener());
        session
            .send_request(&format!("clear {}", self.inner.line))
            .await?;
        self.inner.session.lock().take();
        Ok(())
    }

    async fn send_set(&self, session: &Session) -> skein_wire::Result<()> {
        let alias = if self.is_alias_condition_enabled() {
            self.alias_condition()
        } else {
            0
        };
        session
            .send_request(&format!("set {} {alias}", self.inner.line))
            .await
            .map(drop)
    }

    fn listener(&self) -> Arc<dyn EventListener> {
        self.inner.clone()
    }
}

impl PartialEq for LineBreakpoint {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for LineBreakpoint {}

impl std::fmt::Debug for LineBreakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineBreakpoint")
            .field("source", &self.inner.source)
            .field("line", &self.inner.line)
            .field("run_to_line", &self.inner.run_to_line)
            .finish()
    }
}

impl EventListener for BreakpointInner {
    /// Watches for suspensions caused by this breakpoint's line. The
    /// protocol carries only the line number, so every breakpoint sharing
    /// the line claims the hit, whatever its alias filter.
    fn on_event(&self, event: &DebugEvent) {
        let DebugEvent::Suspended(SuspendReason::Breakpoint { line: Some(line) }) = event else {
            return;
        };
        if *line != self.line {
            return;
        }
        let session = self.session.lock().clone();
        let (Some(session), Some(this)) = (session, self.this.upgrade()) else {
            return;
        };
        session.notify_suspended_by(LineBreakpoint { inner: this });
    }
}

/// The front end's breakpoint store: an ordered set of persisted
/// breakpoints, a global enable/disable toggle, and at most one attached
/// session that mutations are forwarded to.
#[derive(Clone)]
pub struct BreakpointRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    breakpoints: Mutex<Vec<LineBreakpoint>>,
    enabled: AtomicBool,
    session: Mutex<Option<Session>>,
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                breakpoints: Mutex::new(Vec::new()),
                enabled: AtomicBool::new(true),
                session: Mutex::new(None),
            }),
        }
    }

    pub fn breakpoints(&self) -> Vec<LineBreakpoint> {
        self.inner.breakpoints.lock().clone()
    }

    /// The registered breakpoints belonging to `program`, in registration
    /// order.
    pub fn breakpoints_for(&self, program: &Path) -> Vec<LineBreakpoint> {
        self.inner
            .breakpoints
            .lock()
            .iter()
            .filter(|b| b.source() == program)
            .cloned()
            .collect()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Registers a breakpoint and, when a matching session is attached and
    /// the breakpoint is currently installable, installs it immediately.
    pub async fn add(&self, breakpoint: LineBreakpoint) {
        {
            let mut breakpoints = self.inner.breakpoints.lock();
            if !breakpoints.contains(&breakpoint) {
                breakpoints.push(breakpoint.clone());
            }
        }
        if let Some(session) = self.attached() {
            if session.supports_breakpoint(&breakpoint) && self.installable(&breakpoint) {
                if let Err(err) = breakpoint.install(&session).await {
                    debug!(line = breakpoint.line(), %err, "breakpoint install failed");
                }
            }
        }
    }

    /// Deregisters a breakpoint and removes it from the attached session.
    pub async fn remove(&self, breakpoint: &LineBreakpoint) {
        self.inner.breakpoints.lock().retain(|b| b != breakpoint);
        if let Some(session) = self.attached() {
            if session.supports_breakpoint(breakpoint) {
                if let Err(err) = breakpoint.remove(&session).await {
                    debug!(line = breakpoint.line(), %err, "breakpoint removal failed");
                }
            }
        }
    }

    /// Re-evaluates one breakpoint after its enablement or alias changed:
    /// installs it when it should be live, removes it otherwise.
    pub async fn breakpoint_changed(&self, breakpoint: &LineBreakpoint) {
        let Some(session) = self.attached() else {
            return;
        };
        if !session.supports_breakpoint(breakpoint) {
            return;
        }
        if breakpoint.is_enabled() && self.is_enabled() {
            if let Err(err) = breakpoint.install(&session).await {
                debug!(line = breakpoint.line(), %err, "breakpoint install failed");
            }
        } else if let Err(err) = breakpoint.remove(&session).await {
            debug!(line = breakpoint.line(), %err, "breakpoint removal failed");
        }
    }

    /// Flips the global toggle. Disabling removes every registered
    /// breakpoint from the attached session; enabling reinstalls the
    /// eligible ones.
    pub async fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
        let Some(session) = self.attached() else {
            return;
        };
        for breakpoint in self.breakpoints_for(session.program()) {
            if enabled {
                if self.installable(&breakpoint) {
                    if let Err(err) = breakpoint.install(&session).await {
                        debug!(line = breakpoint.line(), %err, "breakpoint install failed");
                    }
                }
            } else if let Err(err) = breakpoint.remove(&session).await {
                debug!(line = breakpoint.line(), %err, "breakpoint removal failed");
            }
        }
    }

    /// Installs every already-registered breakpoint for the session's
    /// program. Called by the session once the interpreter reports
    /// `started`.
    pub(crate) async fn install_deferred(&self, session: &Session) {
        for breakpoint in self.breakpoints_for(session.program()) {
            if self.installable(&breakpoint) {
                if let Err(err) = breakpoint.install(session).await {
                    debug!(line = breakpoint.line(), %err, "deferred install failed");
                }
            }
        }
    }

    pub(crate) fn attach(&self, session: &Session) {
        *self.inner.session.lock() = Some(session.clone());
    }

    pub(crate) fn detach(&self, session: &Session) {
        let mut attached = self.inner.session.lock();
        if attached.as_ref() == Some(session) {
            attached.take();
        }
    }

    fn attached(&self) -> Option<Session> {
        self.inner.session.lock().clone()
    }

    /// Enabled breakpoints install while the global toggle is on;
    /// unregistered (run-to-line) breakpoints install regardless.
    fn installable(&self, breakpoint: &LineBreakpoint) -> bool {
        (breakpoint.is_enabled() && self.is_enabled()) || !breakpoint.is_registered()
    }
}

impl Default for BreakpointRegistry {
    fn default() -> Self {
        Self::new()
    }
}
