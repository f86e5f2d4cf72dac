//! Ownership of driver handles.
//!
//! * [`Environment`]: one per driver, allocated once and never freed. Owns
//!   the [`DriverGate`] and the [`HandleRegistry`].
//! * [`OwnedConnection`]: connection handle; released by disconnect-then-free.
//! * [`OwnedStatement`]: statement handle with a single owner at a time.
//!   Moving it transfers ownership; whoever holds it last frees it.
//!
//! Every allocate and free goes through the gate and the registry, so a
//! handle can be freed at most once even if two owners were ever confused.

use crate::driver::{CallLevelInterface, HandleKind, OdbcDriver, RawHandle};
use crate::error::{translate_or_fallback, DriverError, OdbcError, Result};
use crate::gate::DriverGate;
use lazy_static::lazy_static;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

lazy_static! {
    static ref PROCESS_ENVIRONMENT: std::result::Result<SharedEnvironment, OdbcError> =
        Environment::new(Arc::new(OdbcDriver::new()));
}

#[derive(Debug, Clone, Copy)]
struct LiveHandle {
    kind: HandleKind,
    parent: RawHandle,
    ticket: u64,
}

/// Live-handle bookkeeping shared by all owners created from one environment.
///
/// Each registration gets a ticket. Drivers reuse handle values after a
/// free, so owners identify their entry by handle and ticket together.
#[derive(Default)]
pub struct HandleRegistry {
    live: Mutex<HashMap<RawHandle, LiveHandle>>,
    allocated: AtomicU64,
    released: AtomicU64,
}

impl HandleRegistry {
    fn live(&self) -> std::sync::MutexGuard<'_, HashMap<RawHandle, LiveHandle>> {
        // plain bookkeeping; a panic elsewhere leaves it consistent
        self.live.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records `handle` as a live child of `parent` and returns its ticket.
    pub fn register(&self, kind: HandleKind, handle: RawHandle, parent: RawHandle) -> u64 {
        let ticket = self.allocated.fetch_add(1, Ordering::Relaxed) + 1;
        self.live().insert(
            handle,
            LiveHandle {
                kind,
                parent,
                ticket,
            },
        );
        ticket
    }

    /// Removes `handle`; fails if it is not live (already released).
    pub fn unregister(&self, kind: HandleKind, handle: RawHandle) -> Result<()> {
        let mut live = self.live();
        match live.get(&handle) {
            Some(entry) if entry.kind == kind => {
                live.remove(&handle);
                self.released.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            _ => Err(OdbcError::InvalidHandle {
                kind,
                handle: handle.as_raw(),
            }),
        }
    }

    /// Removes the entry registered under `ticket`. `false` when it was
    /// already reclaimed together with its parent.
    fn claim(&self, handle: RawHandle, ticket: u64) -> bool {
        let mut live = self.live();
        match live.get(&handle) {
            Some(entry) if entry.ticket == ticket => {
                live.remove(&handle);
                self.released.fetch_add(1, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    /// Removes and returns every live child of `parent`.
    fn take_children(&self, parent: RawHandle) -> Vec<(HandleKind, RawHandle)> {
        let mut live = self.live();
        let children: Vec<(HandleKind, RawHandle)> = live
            .iter()
            .filter(|(_, entry)| entry.parent == parent)
            .map(|(handle, entry)| (entry.kind, *handle))
            .collect();
        for (_, handle) in &children {
            live.remove(handle);
        }
        self.released
            .fetch_add(children.len() as u64, Ordering::Relaxed);
        children
    }

    pub fn is_live(&self, handle: RawHandle, ticket: u64) -> bool {
        matches!(self.live().get(&handle), Some(entry) if entry.ticket == ticket)
    }

    pub fn contains(&self, handle: RawHandle) -> bool {
        self.live().contains_key(&handle)
    }

    pub fn parent_of(&self, handle: RawHandle) -> Option<RawHandle> {
        self.live().get(&handle).map(|entry| entry.parent)
    }

    pub fn live_count(&self, kind: HandleKind) -> usize {
        self.live().values().filter(|entry| entry.kind == kind).count()
    }

    pub fn allocated(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }

    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }
}

/// Process-scoped driver-manager context.
pub struct Environment {
    driver: Arc<dyn CallLevelInterface>,
    handle: RawHandle,
    gate: DriverGate,
    registry: HandleRegistry,
}

pub type SharedEnvironment = Arc<Environment>;

impl Environment {
    pub fn new(driver: Arc<dyn CallLevelInterface>) -> Result<SharedEnvironment> {
        Self::with_gate(driver, DriverGate::new())
    }

    /// Environment using an existing gate, for drivers shared between
    /// several environments.
    pub fn with_gate(
        driver: Arc<dyn CallLevelInterface>,
        gate: DriverGate,
    ) -> Result<SharedEnvironment> {
        let handle = gate
            .with_gate("allocate environment", || {
                driver.allocate_handle(HandleKind::Environment, RawHandle::NULL)
            })
            .map_err(|status| {
                warn!("environment allocation failed: {:?}", status);
                OdbcError::EnvironmentNotInitialized
            })?;
        debug!("environment {} allocated", handle);
        Ok(Arc::new(Self {
            driver,
            handle,
            gate,
            registry: HandleRegistry::default(),
        }))
    }

    /// The environment over the system driver manager, created on first use.
    pub fn process() -> Result<SharedEnvironment> {
        PROCESS_ENVIRONMENT.as_ref().map(Arc::clone).map_err(Clone::clone)
    }

    pub fn driver(&self) -> &dyn CallLevelInterface {
        self.driver.as_ref()
    }

    pub fn handle(&self) -> RawHandle {
        self.handle
    }

    pub fn gate(&self) -> &DriverGate {
        &self.gate
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    /// Diagnostics for a failed call on `handle`.
    pub fn diagnostics(&self, kind: HandleKind, handle: RawHandle, function: &str) -> DriverError {
        translate_or_fallback(self.driver(), kind, handle, function)
    }

    /// Allocates a child of `parent` inside the gate and returns it with its
    /// registry ticket. Allocation failures are reported from the parent's
    /// diagnostics.
    pub(crate) fn allocate(&self, kind: HandleKind, parent: RawHandle) -> Result<(RawHandle, u64)> {
        let parent_kind = match kind {
            HandleKind::Statement => HandleKind::Connection,
            _ => HandleKind::Environment,
        };
        let result = self.gate.with_gate("SQLAllocHandle", || {
            self.driver
                .allocate_handle(kind, parent)
                .map_err(|_| self.diagnostics(parent_kind, parent, "SQLAllocHandle"))
        });
        let handle = result?;
        let ticket = self.registry.register(kind, handle, parent);
        debug!("allocated {:?} handle {}", kind, handle);
        Ok((handle, ticket))
    }

    /// Frees the handle registered under `ticket` inside the gate. The
    /// registry entry is dropped first, so a second release never reaches
    /// the driver. A handle already reclaimed with its connection is a
    /// no-op.
    pub(crate) fn release(&self, kind: HandleKind, handle: RawHandle, ticket: u64) -> Result<()> {
        if !self.registry.claim(handle, ticket) {
            debug!("{:?} handle {} already reclaimed", kind, handle);
            return Ok(());
        }
        self.gate.with_gate("SQLFreeHandle", || {
            self.driver
                .free_handle(kind, handle)
                .map_err(|_| self.diagnostics(kind, handle, "SQLFreeHandle"))
        })?;
        debug!("freed {:?} handle {}", kind, handle);
        Ok(())
    }

    /// Frees every live child of `parent`. Called with the gate held, before
    /// the parent is disconnected, since that would release them implicitly.
    fn release_children(&self, parent: RawHandle) {
        for (kind, child) in self.registry.take_children(parent) {
            match self.driver.free_handle(kind, child) {
                Ok(()) => debug!("freed {:?} handle {} before its connection", kind, child),
                Err(status) => warn!("failed to free {:?} handle {}: {:?}", kind, child, status),
            }
        }
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("handle", &self.handle)
            .field("gate", &self.gate)
            .finish()
    }
}

/// A connection handle owned by exactly one [`crate::Connection`].
pub struct OwnedConnection {
    env: SharedEnvironment,
    handle: Option<RawHandle>,
}

impl OwnedConnection {
    pub fn allocate(env: &SharedEnvironment) -> Result<Self> {
        let (handle, _) = env.allocate(HandleKind::Connection, env.handle())?;
        Ok(Self {
            env: Arc::clone(env),
            handle: Some(handle),
        })
    }

    pub fn raw(&self) -> Option<RawHandle> {
        self.handle
    }

    pub fn env(&self) -> &SharedEnvironment {
        &self.env
    }

    /// Frees the connection's remaining statements, disconnects (when
    /// `connected`) and frees the handle, all inside one gate acquisition.
    /// Idempotent: a released connection is a no-op.
    ///
    /// The handle is gone afterwards even if the driver reported a failure;
    /// the first failure is returned.
    pub fn release(&mut self, connected: bool) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        let env = &self.env;
        env.registry.unregister(HandleKind::Connection, handle)?;
        env.gate.with_gate("disconnect and free connection", || {
            env.release_children(handle);
            let disconnected = if connected {
                env.driver
                    .disconnect(handle)
                    .map_err(|_| env.diagnostics(HandleKind::Connection, handle, "SQLDisconnect"))
            } else {
                Ok(())
            };
            let freed = env
                .driver
                .free_handle(HandleKind::Connection, handle)
                .map_err(|_| env.diagnostics(HandleKind::Connection, handle, "SQLFreeHandle"));
            disconnected.and(freed)
        })?;
        debug!("released connection handle {}", handle);
        Ok(())
    }
}

impl Drop for OwnedConnection {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let env = &self.env;
        if env
            .registry
            .unregister(HandleKind::Connection, handle)
            .is_err()
        {
            return;
        }
        let freed = env.gate.with_gate("release connection on drop", || {
            env.release_children(handle);
            // connection state is unknown here; disconnecting an unconnected
            // handle fails harmlessly
            let _ = env.driver.disconnect(handle);
            env.driver.free_handle(HandleKind::Connection, handle)
        });
        if let Err(status) = freed {
            warn!("failed to free connection handle {}: {:?}", handle, status);
        }
    }
}

/// A statement handle with exactly one owner.
///
/// The executor holds it until it either frees it or moves it into a
/// [`crate::ResultSet`]. Dropping an owned statement frees it, unless its
/// connection was released first and took the handle with it.
pub struct OwnedStatement {
    env: SharedEnvironment,
    handle: Option<RawHandle>,
    ticket: u64,
}

impl OwnedStatement {
    pub fn allocate(env: &SharedEnvironment, connection: RawHandle) -> Result<Self> {
        let (handle, ticket) = env.allocate(HandleKind::Statement, connection)?;
        Ok(Self {
            env: Arc::clone(env),
            handle: Some(handle),
            ticket,
        })
    }

    /// The raw handle; null only after release.
    pub fn raw(&self) -> RawHandle {
        self.handle.unwrap_or(RawHandle::NULL)
    }

    /// True once the handle is gone, either freed here or released with
    /// its connection.
    pub fn is_reclaimed(&self) -> bool {
        match self.handle {
            Some(handle) => !self.env.registry.is_live(handle, self.ticket),
            None => true,
        }
    }

    /// The raw handle while it is still live.
    pub fn live_raw(&self) -> Result<RawHandle> {
        match self.handle {
            Some(handle) if !self.is_reclaimed() => Ok(handle),
            handle => Err(OdbcError::InvalidHandle {
                kind: HandleKind::Statement,
                handle: handle.unwrap_or(RawHandle::NULL).as_raw(),
            }),
        }
    }

    pub fn env(&self) -> &SharedEnvironment {
        &self.env
    }

    /// Diagnostics currently attached to this statement.
    pub fn diagnostics(&self, function: &str) -> DriverError {
        self.env
            .diagnostics(HandleKind::Statement, self.raw(), function)
    }

    /// Frees the handle now and reports the outcome.
    pub fn free(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => self.env.release(HandleKind::Statement, handle, self.ticket),
            None => Ok(()),
        }
    }
}

impl Drop for OwnedStatement {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(err) = self.env.release(HandleKind::Statement, handle, self.ticket) {
                warn!("failed to free statement handle {}: {}", handle, err);
            }
        }
    }
}

impl std::fmt::Debug for OwnedStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("OwnedStatement").field(&self.handle).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverFunction, RecordingDriver};
    use crate::error::DiagnosticRecord;

    fn setup() -> (Arc<RecordingDriver>, SharedEnvironment) {
        let driver = Arc::new(RecordingDriver::new());
        let env = Environment::new(driver.clone()).unwrap();
        (driver, env)
    }

    fn connected(driver: &RecordingDriver, env: &SharedEnvironment) -> OwnedConnection {
        let conn = OwnedConnection::allocate(env).unwrap();
        driver.driver_connect(conn.raw().unwrap(), "DSN=test").unwrap();
        conn
    }

    #[test]
    fn test_environment_allocated_once_under_gate() {
        let (driver, env) = setup();
        assert_eq!(driver.allocations(HandleKind::Environment), 1);
        assert!(!env.handle().is_null());
        assert_eq!(env.gate().acquisitions(), 1);
    }

    #[test]
    fn test_environment_allocation_failure() {
        let driver = Arc::new(RecordingDriver::new());
        driver.fail_next(
            DriverFunction::AllocHandle,
            DiagnosticRecord::new("HY001", 0, "Memory allocation error"),
        );
        let err = Environment::new(driver).unwrap_err();
        assert!(matches!(err, OdbcError::EnvironmentNotInitialized));
    }

    #[test]
    fn test_registry_refuses_double_release() {
        let registry = HandleRegistry::default();
        let h = RawHandle::from_raw(0x10);
        registry.register(HandleKind::Statement, h, RawHandle::from_raw(0x8));
        assert!(registry.unregister(HandleKind::Statement, h).is_ok());
        assert!(matches!(
            registry.unregister(HandleKind::Statement, h),
            Err(OdbcError::InvalidHandle { .. })
        ));
        assert_eq!(registry.allocated(), 1);
        assert_eq!(registry.released(), 1);
    }

    #[test]
    fn test_registry_checks_kind() {
        let registry = HandleRegistry::default();
        let h = RawHandle::from_raw(0x20);
        registry.register(HandleKind::Connection, h, RawHandle::from_raw(0x8));
        assert!(registry.unregister(HandleKind::Statement, h).is_err());
        assert!(registry.contains(h));
        assert_eq!(registry.live_count(HandleKind::Connection), 1);
    }

    #[test]
    fn test_registry_ticket_tells_reused_values_apart() {
        let registry = HandleRegistry::default();
        let parent = RawHandle::from_raw(0x8);
        let h = RawHandle::from_raw(0x30);
        let first = registry.register(HandleKind::Statement, h, parent);
        assert_eq!(registry.parent_of(h), Some(parent));
        assert_eq!(registry.take_children(parent), vec![(HandleKind::Statement, h)]);
        assert!(!registry.is_live(h, first));

        let second = registry.register(HandleKind::Statement, h, parent);
        assert_ne!(first, second);
        assert!(!registry.claim(h, first));
        assert!(registry.is_live(h, second));
        assert!(registry.claim(h, second));
        assert_eq!(registry.live_count(HandleKind::Statement), 0);
    }

    #[test]
    fn test_connection_release_frees_statements_first() {
        let (driver, env) = setup();
        let mut conn = connected(&driver, &env);
        let dbc = conn.raw().unwrap();
        let stmt = OwnedStatement::allocate(&env, dbc).unwrap();
        let raw = stmt.raw();
        let gate_before = env.gate().acquisitions();

        conn.release(true).unwrap();
        assert_eq!(env.gate().acquisitions(), gate_before + 1);
        assert_eq!(driver.free_count(raw), 1);
        assert!(stmt.is_reclaimed());
        assert!(matches!(
            stmt.live_raw(),
            Err(OdbcError::InvalidHandle { kind: HandleKind::Statement, .. })
        ));

        // the late owner does not reach the driver again
        stmt.free().unwrap();
        assert_eq!(driver.free_count(raw), 1);
        assert!(driver.double_frees().is_empty());
        assert!(driver.implicit_frees().is_empty());

        let freed: Vec<_> = driver
            .calls()
            .into_iter()
            .filter(|c| c.function == DriverFunction::FreeHandle)
            .map(|c| c.handle)
            .collect();
        assert_eq!(freed, vec![raw, dbc]);
    }

    #[test]
    fn test_connection_drop_frees_statements_first() {
        let (driver, env) = setup();
        let conn = connected(&driver, &env);
        let stmt = OwnedStatement::allocate(&env, conn.raw().unwrap()).unwrap();
        let raw = stmt.raw();
        drop(conn);
        drop(stmt);
        assert_eq!(driver.free_count(raw), 1);
        assert!(driver.double_frees().is_empty());
        assert!(driver.implicit_frees().is_empty());
    }

    #[test]
    fn test_connection_release_is_idempotent() {
        let (driver, env) = setup();
        let mut conn = connected(&driver, &env);
        let raw = conn.raw().unwrap();

        conn.release(true).unwrap();
        conn.release(true).unwrap();
        drop(conn);

        assert_eq!(driver.free_count(raw), 1);
        assert_eq!(driver.calls_to(DriverFunction::Disconnect), 1);
        assert!(driver.double_frees().is_empty());
    }

    #[test]
    fn test_unconnected_release_skips_disconnect() {
        let (driver, env) = setup();
        let mut conn = OwnedConnection::allocate(&env).unwrap();
        conn.release(false).unwrap();
        assert_eq!(driver.calls_to(DriverFunction::Disconnect), 0);
        assert_eq!(driver.live_handles(HandleKind::Connection), 0);
    }

    #[test]
    fn test_connection_drop_disconnects_then_frees() {
        let (driver, env) = setup();
        let conn = connected(&driver, &env);
        let raw = conn.raw().unwrap();
        drop(conn);

        let order: Vec<_> = driver
            .calls()
            .into_iter()
            .filter(|c| c.handle == raw)
            .map(|c| c.function)
            .collect();
        assert_eq!(
            order,
            vec![
                DriverFunction::DriverConnect,
                DriverFunction::Disconnect,
                DriverFunction::FreeHandle
            ]
        );
        assert_eq!(driver.free_count(raw), 1);
    }

    #[test]
    fn test_statement_freed_once_on_drop_or_free() {
        let (driver, env) = setup();
        let conn = connected(&driver, &env);

        let stmt = OwnedStatement::allocate(&env, conn.raw().unwrap()).unwrap();
        let raw = stmt.raw();
        stmt.free().unwrap();
        assert_eq!(driver.free_count(raw), 1);

        let stmt = OwnedStatement::allocate(&env, conn.raw().unwrap()).unwrap();
        let raw = stmt.raw();
        drop(stmt);
        assert_eq!(driver.free_count(raw), 1);
        assert!(driver.double_frees().is_empty());
        assert_eq!(env.registry().live_count(HandleKind::Statement), 0);
    }

    #[test]
    fn test_statement_allocation_failure_reports_connection_diagnostics() {
        let (_driver, env) = setup();
        let conn = OwnedConnection::allocate(&env).unwrap();
        // not connected: the driver refuses the statement
        let err = OwnedStatement::allocate(&env, conn.raw().unwrap()).unwrap_err();
        let driver_err = err.as_driver_error().expect("driver error");
        assert_eq!(driver_err.sqlstate, "08003");
        assert_eq!(driver_err.handle_kind, HandleKind::Connection);
        assert_eq!(env.registry().live_count(HandleKind::Statement), 0);
    }
}
