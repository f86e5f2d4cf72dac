use log::debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Mutual exclusion around driver-manager calls that mutate the handle
/// table: allocate, free, connect and disconnect.
///
/// The gate is owned by the [`crate::handles::Environment`] and shared by
/// cloning. It must never be held across execute, bind or fetch.
#[derive(Clone, Default)]
pub struct DriverGate {
    inner: Arc<GateInner>,
}

#[derive(Default)]
struct GateInner {
    lock: Mutex<()>,
    acquisitions: AtomicU64,
}

/// Held while inside the gate; releases on drop.
pub struct GateGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl DriverGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) -> GateGuard<'_> {
        // the gate guards no data, so a poisoned lock is still usable
        let guard = self
            .inner
            .lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.inner.acquisitions.fetch_add(1, Ordering::Relaxed);
        GateGuard { _guard: guard }
    }

    /// Runs `f` inside the gate. The gate is released on every exit path,
    /// including unwinding.
    pub fn with_gate<T>(&self, label: &str, f: impl FnOnce() -> T) -> T {
        let _guard = self.acquire();
        debug!("gate: {}", label);
        f()
    }

    /// Number of times the gate has been entered.
    pub fn acquisitions(&self) -> u64 {
        self.inner.acquisitions.load(Ordering::Relaxed)
    }

    /// Whether two gates are the same capability.
    pub fn same_as(&self, other: &DriverGate) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for DriverGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverGate")
            .field("acquisitions", &self.acquisitions())
            .finish()
    }
}
