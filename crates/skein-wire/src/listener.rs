use std::sync::Arc;

use parking_lot::Mutex;

use crate::DebugEvent;

/// A consumer of interpreter events. Breakpoints register themselves to
/// watch for their own hits; front-end components register to mirror
/// session state.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &DebugEvent);
}

/// An ordered set of event listeners.
///
/// Registration and deregistration are idempotent (pointer identity) and may
/// be performed from inside a listener callback: dispatch iterates a
/// snapshot of the set taken at dispatch time, never the live list.
#[derive(Default)]
pub struct ListenerSet {
    listeners: Mutex<Vec<Arc<dyn EventListener>>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener. Has no effect if it is already registered.
    pub fn add(&self, listener: Arc<dyn EventListener>) {
        let mut listeners = self.listeners.lock();
        if !listeners.iter().any(|l| same_listener(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Deregisters a listener. Has no effect if it is not registered.
    pub fn remove(&self, listener: &Arc<dyn EventListener>) {
        self.listeners
            .lock()
            .retain(|l| !same_listener(l, listener));
    }

    pub fn clear(&self) {
        self.listeners.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    /// The registered listeners, in registration order, as of now.
    pub fn snapshot(&self) -> Vec<Arc<dyn EventListener>> {
        self.listeners.lock().clone()
    }

    /// Delivers `event` to a snapshot of the registered listeners in
    /// registration order.
    pub fn dispatch(&self, event: &DebugEvent) {
        for listener in self.snapshot() {
            listener.on_event(event);
        }
    }
}

fn same_listener(a: &Arc<dyn EventListener>, b: &Arc<dyn EventListener>) -> bool {
    // Compare the data pointers only; comparing fat pointers would also
    // compare vtable addresses, which are not stable across codegen units.
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
