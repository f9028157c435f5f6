//! Signal subscription and fan-out
//!
//! Handlers are kept per signal kind in registration order. Dispatch runs
//! them outside the lock, so a handler may subscribe further handlers
//! without deadlocking; those take effect from the next dispatch.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, RwLock};

use shared::{switch_debug, switch_warn, Role, Signal, SignalKind, Value};

/// A registered signal callback
pub type SignalHandler = Arc<dyn Fn(&Signal) -> anyhow::Result<()> + Send + Sync>;

/// Outcome of one dispatch pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub invoked: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct SignalDispatcher {
    handlers: RwLock<HashMap<SignalKind, Vec<SignalHandler>>>,
}

impl SignalDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for `kind`; duplicates are allowed
    pub fn subscribe<F>(&self, kind: SignalKind, handler: F)
    where
        F: Fn(&Signal) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        handlers.entry(kind).or_default().push(Arc::new(handler));
        switch_debug!(Role::Dispatcher, "Subscribed handler #{} to {}", handlers[&kind].len(), kind);
    }

    pub fn subscriber_count(&self, kind: SignalKind) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Invoke every handler registered for the signal's kind, in order
    ///
    /// A handler that returns an error or panics is logged and counted; the
    /// remaining handlers still run.
    pub fn dispatch(&self, signal: &Signal) -> DispatchReport {
        let kind = signal.kind();
        let snapshot: Vec<SignalHandler> = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        let mut report = DispatchReport::default();
        for (index, handler) in snapshot.iter().enumerate() {
            report.invoked += 1;
            match panic::catch_unwind(AssertUnwindSafe(|| handler(signal))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    report.failed += 1;
                    switch_warn!(Role::Dispatcher, "Handler #{} for {} failed: {:#}", index + 1, kind, e);
                }
                Err(_) => {
                    report.failed += 1;
                    switch_warn!(Role::Dispatcher, "Handler #{} for {} panicked", index + 1, kind);
                }
            }
        }
        report
    }

    /// Decode a raw signal frame and dispatch it
    ///
    /// Unknown names are dropped silently; malformed payloads are logged and
    /// dropped.
    pub fn dispatch_raw(&self, name: &str, args: &[Value]) -> DispatchReport {
        match Signal::decode(name, args) {
            Ok(Some(signal)) => self.dispatch(&signal),
            Ok(None) => {
                switch_debug!(Role::Dispatcher, "Dropping unknown signal {}", name);
                DispatchReport::default()
            }
            Err(e) => {
                switch_warn!(Role::Dispatcher, "Dropping signal: {}", e);
                DispatchReport::default()
            }
        }
    }
}

impl std::fmt::Debug for SignalDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let counts: HashMap<_, _> = handlers.iter().map(|(kind, list)| (*kind, list.len())).collect();
        f.debug_struct("SignalDispatcher").field("handlers", &counts).finish()
    }
}
