//! Statement objects created by [`Connection::create_statement_sync`].
//!
//! A statement owns its handle until `execute`/`execute_direct` succeeds,
//! at which point the handle moves into a [`ResultSet`] and the statement
//! is left as a tombstone. Operations on a tombstone fail with
//! [`OdbcError::InvalidHandle`].
//!
//! [`Connection::create_statement_sync`]: super::connection::Connection::create_statement_sync

use super::connection::ConnectionInner;
use super::query::QueryOutcome;
use super::result::ResultSet;
use crate::async_bridge::{Dispatcher, WorkKind, WorkUnit};
use crate::driver::{HandleKind, RawHandle};
use crate::error::{OdbcError, Result};
use crate::handles::{OwnedStatement, SharedEnvironment};
use crate::protocol::{bind_parameters, BoundParameters, Parameter};
use log::debug;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

enum StatementSlot {
    // `handle` before `params`: the handle is freed first on drop
    Owned {
        handle: OwnedStatement,
        params: Vec<BoundParameters>,
    },
    Transferred,
    Closed,
}

struct StatementInner {
    env: SharedEnvironment,
    connection: Weak<ConnectionInner>,
    slot: Mutex<StatementSlot>,
}

impl StatementInner {
    fn slot(&self) -> Result<MutexGuard<'_, StatementSlot>> {
        self.slot
            .lock()
            .map_err(|_| OdbcError::InternalError("Failed to lock statement".to_string()))
    }

    fn can_have_more_results(&self) -> bool {
        self.connection
            .upgrade()
            .and_then(|conn| conn.core().ok().map(|core| core.can_have_more_results))
            .unwrap_or(false)
    }

    fn with_owned<T>(
        &self,
        f: impl FnOnce(&OwnedStatement, &mut Vec<BoundParameters>) -> Result<T>,
    ) -> Result<T> {
        let mut slot = self.slot()?;
        match &mut *slot {
            StatementSlot::Owned { handle, params } => {
                handle.live_raw()?;
                f(handle, params)
            }
            _ => Err(gone()),
        }
    }

    fn prepare(&self, sql: &str) -> Result<()> {
        self.with_owned(|handle, _| {
            self.env
                .driver()
                .prepare(handle.raw(), sql)
                .map_err(|_| handle.diagnostics("SQLPrepare").into())
        })
    }

    /// Earlier bindings stay alive until the handle is freed.
    fn bind(&self, params: &[Parameter]) -> Result<()> {
        self.with_owned(|handle, bound| {
            // SAFETY: the buffers are stored next to the handle and dropped
            // only after it is freed.
            let (buffers, status) = unsafe { bind_parameters(self.env.driver(), handle.raw(), params) };
            bound.push(buffers);
            status.map_err(|_| handle.diagnostics("SQLBindParameter").into())
        })
    }

    fn execute(&self) -> Result<QueryOutcome> {
        self.with_owned(|handle, _| {
            // SAFETY: every bound buffer is owned by this statement.
            unsafe { self.env.driver().execute(handle.raw()) }
                .map_err(|_| handle.diagnostics("SQLExecute").into())
        })?;
        self.transfer()
    }

    fn execute_direct(&self, sql: &str) -> Result<QueryOutcome> {
        self.with_owned(|handle, _| {
            self.env
                .driver()
                .exec_direct(handle.raw(), sql)
                .map_err(|_| handle.diagnostics("SQLExecDirect").into())
        })?;
        self.transfer()
    }

    /// Moves the handle and its buffers into a result set.
    fn transfer(&self) -> Result<QueryOutcome> {
        let mut slot = self.slot()?;
        let StatementSlot::Owned { handle, params } =
            std::mem::replace(&mut *slot, StatementSlot::Transferred)
        else {
            return Err(gone());
        };
        drop(slot);

        let output_params = params
            .last()
            .filter(|b| b.has_outputs())
            .map(BoundParameters::read_outputs);
        debug!("statement {} transferred to result set", handle.raw());
        Ok(QueryOutcome {
            result: Some(ResultSet::new(
                handle,
                params,
                self.can_have_more_results(),
                None,
            )),
            output_params,
        })
    }

    fn close(&self) -> Result<()> {
        let mut slot = self.slot()?;
        match std::mem::replace(&mut *slot, StatementSlot::Closed) {
            StatementSlot::Owned { handle, params } => {
                let freed = handle.free();
                drop(params);
                freed
            }
            StatementSlot::Transferred => {
                *slot = StatementSlot::Transferred;
                Ok(())
            }
            StatementSlot::Closed => Ok(()),
        }
    }
}

fn gone() -> OdbcError {
    OdbcError::InvalidHandle {
        kind: HandleKind::Statement,
        handle: 0,
    }
}

/// A statement bound to a connection. Clones share the same handle.
#[derive(Clone)]
pub struct Statement {
    inner: Arc<StatementInner>,
}

impl Statement {
    pub(crate) fn allocate(conn: &Arc<ConnectionInner>) -> Result<Self> {
        let dbc = conn.core()?.native();
        let handle = OwnedStatement::allocate(&conn.env, dbc)?;
        Ok(Self {
            inner: Arc::new(StatementInner {
                env: Arc::clone(&conn.env),
                connection: Arc::downgrade(conn),
                slot: Mutex::new(StatementSlot::Owned {
                    handle,
                    params: Vec::new(),
                }),
            }),
        })
    }

    /// The native handle while this statement still owns it.
    pub fn raw_handle(&self) -> Option<RawHandle> {
        let slot = self.inner.slot().ok()?;
        match &*slot {
            StatementSlot::Owned { handle, .. } => Some(handle.raw()),
            _ => None,
        }
    }

    /// `true` once the handle moved into a result set.
    pub fn is_transferred(&self) -> bool {
        matches!(
            self.inner.slot().as_deref(),
            Ok(StatementSlot::Transferred)
        )
    }

    pub fn prepare_sync(&self, sql: &str) -> Result<()> {
        self.inner.prepare(sql)
    }

    pub fn bind_sync(&self, params: Vec<Parameter>) -> Result<()> {
        self.inner.bind(&params)
    }

    /// Executes the prepared statement. On success the handle moves into the
    /// returned result; on failure it stays with this statement.
    pub fn execute_sync(&self) -> Result<QueryOutcome> {
        self.inner.execute()
    }

    pub fn execute_direct_sync(&self, sql: &str) -> Result<QueryOutcome> {
        self.inner.execute_direct(sql)
    }

    /// Frees the handle if this statement still owns it. Idempotent.
    pub fn close_sync(&self) -> Result<()> {
        self.inner.close()
    }

    fn unit<W>(&self, kind: WorkKind, work: W) -> WorkUnit<W> {
        let unit = WorkUnit::new(kind, work).keep_alive(self.inner.clone());
        match self.inner.connection.upgrade() {
            Some(conn) => unit.keep_alive(conn),
            None => unit,
        }
    }

    pub fn prepare<C>(&self, dispatcher: &Dispatcher, sql: &str, callback: C)
    where
        C: FnOnce(Result<()>) + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let sql = sql.to_string();
        dispatcher.submit(
            self.unit(WorkKind::Prepare, move || inner.prepare(&sql)),
            callback,
        );
    }

    pub fn bind<C>(&self, dispatcher: &Dispatcher, params: Vec<Parameter>, callback: C)
    where
        C: FnOnce(Result<()>) + 'static,
    {
        let inner = Arc::clone(&self.inner);
        dispatcher.submit(
            self.unit(WorkKind::Bind, move || inner.bind(&params)),
            callback,
        );
    }

    pub fn execute<C>(&self, dispatcher: &Dispatcher, callback: C)
    where
        C: FnOnce(Result<QueryOutcome>) + 'static,
    {
        let inner = Arc::clone(&self.inner);
        dispatcher.submit(
            self.unit(WorkKind::Execute, move || inner.execute()),
            callback,
        );
    }

    pub fn execute_direct<C>(&self, dispatcher: &Dispatcher, sql: &str, callback: C)
    where
        C: FnOnce(Result<QueryOutcome>) + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let sql = sql.to_string();
        dispatcher.submit(
            self.unit(WorkKind::ExecuteDirect, move || inner.execute_direct(&sql)),
            callback,
        );
    }
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("handle", &self.raw_handle())
            .field("transferred", &self.is_transferred())
            .finish()
    }
}
