//! Connection state machine.
//!
//! `Unopened -> Opening -> Connected -> Closing -> Closed`. A failed connect
//! goes back to `Unopened` with the handle still allocated. `Closed` is
//! terminal: later operations reach the driver with a null handle and the
//! driver reports the failure.
//!
//! Every operation exists in a blocking form (`*_sync`, runs on the calling
//! thread) and a non-blocking form that takes a [`Dispatcher`] and a
//! continuation. Both forms hold the driver gate the same way.
//!
//! Lock order is connection state first, then the driver gate.

use super::catalog::{self, CatalogRequest};
use super::config::ConnectionConfig;
use super::query::{self, QueryCall, QueryCompletion, QueryOutcome, QueryRequest};
use super::result::ResultSet;
use super::statement::Statement;
use super::transaction::{self, CommitMode, IsolationLevel};
use crate::async_bridge::{Dispatcher, WorkKind, WorkUnit};
use crate::driver::{ConnectAttribute, HandleKind, RawHandle};
use crate::error::{OdbcError, Result};
use crate::handles::{Environment, OwnedConnection, OwnedStatement, SharedEnvironment};
use crate::security::ConnectionString;
use log::{debug, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Unopened,
    Opening,
    Connected,
    Closing,
    Closed,
}

pub(crate) struct ConnectionCore {
    handle: OwnedConnection,
    state: ConnectionState,
    config: ConnectionConfig,
    pub(crate) can_have_more_results: bool,
    pub(crate) commit_mode: CommitMode,
}

impl ConnectionCore {
    /// The native handle, or null once the connection was released.
    pub(crate) fn native(&self) -> RawHandle {
        self.handle.raw().unwrap_or(RawHandle::NULL)
    }
}

pub(crate) struct ConnectionInner {
    pub(crate) env: SharedEnvironment,
    core: Mutex<ConnectionCore>,
}

impl ConnectionInner {
    pub(crate) fn core(&self) -> Result<MutexGuard<'_, ConnectionCore>> {
        self.core
            .lock()
            .map_err(|_| OdbcError::InternalError("Failed to lock connection state".to_string()))
    }

    fn open(&self, connection_string: &ConnectionString) -> Result<()> {
        let mut core = self.core()?;
        let dbc = core.native();
        let previous = core.state;
        core.state = ConnectionState::Opening;
        let driver = self.env.driver();

        if let Some(timeout) = core.config.effective_login_timeout() {
            if let Err(status) = driver.set_connect_attr(dbc, ConnectAttribute::LoginTimeout(timeout)) {
                warn!("login timeout {} not applied to {}: {:?}", timeout, dbc, status);
            }
        }
        if core.config.system_naming {
            if let Err(status) = driver.set_connect_attr(dbc, ConnectAttribute::SystemNaming(true)) {
                warn!("system naming not applied to {}: {:?}", dbc, status);
            }
        }

        let connected = self.env.gate().with_gate("SQLDriverConnect", || {
            driver
                .driver_connect(dbc, connection_string.as_str())
                .map(|()| driver.supports_more_results(dbc).unwrap_or(false))
        });
        match connected {
            Ok(more_results) => {
                core.state = ConnectionState::Connected;
                core.can_have_more_results = more_results;
                core.commit_mode = CommitMode::Auto;
                debug!(
                    "connection {} open ({}), multiple result sets: {}",
                    dbc,
                    connection_string.redacted(),
                    more_results
                );
                Ok(())
            }
            Err(_) => {
                core.state = match previous {
                    ConnectionState::Connected | ConnectionState::Closed => previous,
                    _ => ConnectionState::Unopened,
                };
                Err(self
                    .env
                    .diagnostics(HandleKind::Connection, dbc, "SQLDriverConnect")
                    .into())
            }
        }
    }

    /// Idempotent. Release failures are logged, never returned.
    fn close(&self) -> Result<()> {
        let mut core = self.core()?;
        if core.state == ConnectionState::Closed {
            return Ok(());
        }
        let was_connected = core.state == ConnectionState::Connected;
        core.state = ConnectionState::Closing;
        let dbc = core.native();
        if let Err(err) = core.handle.release(was_connected) {
            warn!("closing connection {}: {}", dbc, err);
        }
        core.state = ConnectionState::Closed;
        debug!("connection {} closed", dbc);
        Ok(())
    }

    /// Runs `sql` on a fresh statement, then releases the connection.
    fn run_and_release(&self, sql: &str) -> Result<()> {
        let dbc = self.core()?.native();
        let mut last_error: Option<OdbcError> = None;

        match OwnedStatement::allocate(&self.env, dbc) {
            Ok(statement) => {
                if self.env.driver().exec_direct(statement.raw(), sql).is_err() {
                    last_error = Some(statement.diagnostics("SQLExecDirect").into());
                }
                if let Err(err) = statement.free() {
                    last_error = Some(err);
                }
            }
            Err(err) => last_error = Some(err),
        }

        let mut core = self.core()?;
        let was_connected = core.state == ConnectionState::Connected;
        core.state = ConnectionState::Closing;
        if let Err(err) = core.handle.release(was_connected) {
            last_error = Some(err);
        }
        core.state = ConnectionState::Closed;
        match last_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        if let Ok(core) = self.core.get_mut() {
            if core.state == ConnectionState::Connected && core.commit_mode == CommitMode::Manual {
                warn!(
                    "connection {} dropped inside a manual-commit transaction",
                    core.native()
                );
            }
        }
    }
}

/// A database connection.
///
/// Cloning yields another reference to the same connection. The native
/// handle is released by [`Connection::close_sync`] / [`Connection::close`]
/// or when the last reference (including ones held by in-flight work) is
/// dropped.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub fn new(env: &SharedEnvironment) -> Result<Self> {
        Self::with_config(env, ConnectionConfig::default())
    }

    pub fn with_config(env: &SharedEnvironment, config: ConnectionConfig) -> Result<Self> {
        let handle = OwnedConnection::allocate(env)?;
        Ok(Self {
            inner: Arc::new(ConnectionInner {
                env: Arc::clone(env),
                core: Mutex::new(ConnectionCore {
                    handle,
                    state: ConnectionState::Unopened,
                    config,
                    can_have_more_results: false,
                    commit_mode: CommitMode::Auto,
                }),
            }),
        })
    }

    /// A connection on the process environment, configured from `ODBC_*`
    /// variables.
    pub fn process() -> Result<Self> {
        Self::with_config(&Environment::process()?, ConnectionConfig::from_env())
    }

    pub(crate) fn inner(&self) -> &Arc<ConnectionInner> {
        &self.inner
    }

    pub fn environment(&self) -> &SharedEnvironment {
        &self.inner.env
    }

    pub fn state(&self) -> ConnectionState {
        self.inner
            .core()
            .map(|c| c.state)
            .unwrap_or(ConnectionState::Closed)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn commit_mode(&self) -> Result<CommitMode> {
        Ok(self.inner.core()?.commit_mode)
    }

    pub fn can_have_more_results(&self) -> bool {
        self.inner
            .core()
            .map(|c| c.can_have_more_results)
            .unwrap_or(false)
    }

    /// The native handle, `None` after close.
    pub fn native_handle(&self) -> Option<RawHandle> {
        self.inner.core().ok().and_then(|c| c.handle.raw())
    }

    pub fn config(&self) -> Result<ConnectionConfig> {
        Ok(self.inner.core()?.config.clone())
    }

    pub fn connect_timeout(&self) -> Result<i64> {
        Ok(self.inner.core()?.config.connect_timeout)
    }

    /// Takes effect on the next open. Values outside `1..=32767` other than
    /// 0 fall back to the default when applied.
    pub fn set_connect_timeout(&self, seconds: i64) -> Result<()> {
        self.inner.core()?.config.connect_timeout = seconds;
        Ok(())
    }

    pub fn system_naming(&self) -> Result<bool> {
        Ok(self.inner.core()?.config.system_naming)
    }

    pub fn set_system_naming(&self, enabled: bool) -> Result<()> {
        self.inner.core()?.config.system_naming = enabled;
        Ok(())
    }

    fn compose(&self, connection_string: &str) -> Result<ConnectionString> {
        let tag = self.inner.core()?.config.driver_tag.clone();
        ConnectionString::compose(tag.as_deref(), connection_string)
    }

    pub fn open_sync(&self, connection_string: &str) -> Result<()> {
        let connection_string = self.compose(connection_string)?;
        self.inner.open(&connection_string)
    }

    /// Argument errors are returned here; driver failures go to `callback`.
    pub fn open<C>(&self, dispatcher: &Dispatcher, connection_string: &str, callback: C) -> Result<()>
    where
        C: FnOnce(Result<()>) + 'static,
    {
        let connection_string = self.compose(connection_string)?;
        let inner = Arc::clone(&self.inner);
        dispatcher.submit(
            WorkUnit::new(WorkKind::Open, move || inner.open(&connection_string))
                .keep_alive(self.inner.clone()),
            callback,
        );
        Ok(())
    }

    pub fn close_sync(&self) -> Result<()> {
        self.inner.close()
    }

    pub fn close<C>(&self, dispatcher: &Dispatcher, callback: C)
    where
        C: FnOnce(Result<()>) + 'static,
    {
        let inner = Arc::clone(&self.inner);
        dispatcher.submit(
            WorkUnit::new(WorkKind::Close, move || inner.close()).keep_alive(self.inner.clone()),
            callback,
        );
    }

    pub fn create_statement_sync(&self) -> Result<Statement> {
        Statement::allocate(&self.inner)
    }

    pub fn create_statement<C>(&self, dispatcher: &Dispatcher, callback: C)
    where
        C: FnOnce(Result<Statement>) + 'static,
    {
        let inner = Arc::clone(&self.inner);
        dispatcher.submit(
            WorkUnit::new(WorkKind::CreateStatement, move || Statement::allocate(&inner))
                .keep_alive(self.inner.clone()),
            callback,
        );
    }

    fn request(call: impl Into<QueryCall>) -> Result<QueryRequest> {
        let request = QueryRequest::from(call.into());
        if request.sql.trim().is_empty() {
            return Err(OdbcError::InvalidArgument("SQL text is empty".to_string()));
        }
        Ok(request)
    }

    /// Runs a query on the calling thread. A failure frees the statement
    /// and is returned; no result object is handed out with an error.
    pub fn query_sync(&self, call: impl Into<QueryCall>) -> Result<QueryOutcome> {
        let request = Self::request(call)?;
        query::run_sync(&self.inner, &request)
    }

    /// Runs a query on a worker. The completion carries the driver error,
    /// if any, together with the result object (unless `no_results` was
    /// requested) and the output parameters.
    pub fn query<C>(&self, dispatcher: &Dispatcher, call: impl Into<QueryCall>, callback: C) -> Result<()>
    where
        C: FnOnce(QueryCompletion) + 'static,
    {
        let request = Self::request(call)?;
        let inner = Arc::clone(&self.inner);
        dispatcher.submit(
            WorkUnit::new(WorkKind::Query, move || Ok(query::run_async(&inner, &request)))
                .keep_alive(self.inner.clone()),
            move |outcome: Result<QueryCompletion>| {
                callback(outcome.unwrap_or_else(QueryCompletion::from_error))
            },
        );
        Ok(())
    }

    pub fn begin_transaction_sync(&self) -> Result<()> {
        transaction::begin(&self.inner)
    }

    pub fn begin_transaction<C>(&self, dispatcher: &Dispatcher, callback: C)
    where
        C: FnOnce(Result<()>) + 'static,
    {
        let inner = Arc::clone(&self.inner);
        dispatcher.submit(
            WorkUnit::new(WorkKind::BeginTransaction, move || transaction::begin(&inner))
                .keep_alive(self.inner.clone()),
            callback,
        );
    }

    pub fn end_transaction_sync(&self, rollback: bool) -> Result<()> {
        transaction::end(&self.inner, rollback)
    }

    pub fn end_transaction<C>(&self, dispatcher: &Dispatcher, rollback: bool, callback: C)
    where
        C: FnOnce(Result<()>) + 'static,
    {
        let inner = Arc::clone(&self.inner);
        dispatcher.submit(
            WorkUnit::new(WorkKind::EndTransaction, move || {
                transaction::end(&inner, rollback)
            })
            .keep_alive(self.inner.clone()),
            callback,
        );
    }

    /// `None` uses the configured level.
    fn isolation_level(&self, level: Option<u32>) -> Result<IsolationLevel> {
        let code = match level {
            Some(code) => code,
            None => self.inner.core()?.config.isolation_level,
        };
        IsolationLevel::try_from(code)
    }

    pub fn set_isolation_level_sync(&self, level: Option<u32>) -> Result<()> {
        let level = self.isolation_level(level)?;
        transaction::set_isolation_level(&self.inner, level)
    }

    pub fn set_isolation_level<C>(
        &self,
        dispatcher: &Dispatcher,
        level: Option<u32>,
        callback: C,
    ) -> Result<()>
    where
        C: FnOnce(Result<()>) + 'static,
    {
        let level = self.isolation_level(level)?;
        let inner = Arc::clone(&self.inner);
        dispatcher.submit(
            WorkUnit::new(WorkKind::SetIsolationLevel, move || {
                transaction::set_isolation_level(&inner, level)
            })
            .keep_alive(self.inner.clone()),
            callback,
        );
        Ok(())
    }

    pub fn tables_sync(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        table_type: Option<&str>,
    ) -> Result<ResultSet> {
        catalog::run_sync(
            &self.inner,
            &CatalogRequest::tables(catalog, schema, table, table_type),
        )
    }

    pub fn tables<C>(
        &self,
        dispatcher: &Dispatcher,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        table_type: Option<&str>,
        callback: C,
    ) where
        C: FnOnce(QueryCompletion) + 'static,
    {
        self.submit_catalog(
            dispatcher,
            WorkKind::Tables,
            CatalogRequest::tables(catalog, schema, table, table_type),
            callback,
        );
    }

    pub fn columns_sync(
        &self,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        column: Option<&str>,
    ) -> Result<ResultSet> {
        catalog::run_sync(
            &self.inner,
            &CatalogRequest::columns(catalog, schema, table, column),
        )
    }

    pub fn columns<C>(
        &self,
        dispatcher: &Dispatcher,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        column: Option<&str>,
        callback: C,
    ) where
        C: FnOnce(QueryCompletion) + 'static,
    {
        self.submit_catalog(
            dispatcher,
            WorkKind::Columns,
            CatalogRequest::columns(catalog, schema, table, column),
            callback,
        );
    }

    fn submit_catalog<C>(
        &self,
        dispatcher: &Dispatcher,
        kind: WorkKind,
        request: CatalogRequest,
        callback: C,
    ) where
        C: FnOnce(QueryCompletion) + 'static,
    {
        let inner = Arc::clone(&self.inner);
        dispatcher.submit(
            WorkUnit::new(kind, move || Ok(catalog::run_async(&inner, &request)))
                .keep_alive(self.inner.clone()),
            move |outcome: Result<QueryCompletion>| {
                callback(outcome.unwrap_or_else(QueryCompletion::from_error))
            },
        );
    }

    /// Executes `sql` (e.g. `CREATE DATABASE ...`), then disconnects and
    /// frees the connection. The connection ends `Closed`; the last failure
    /// is returned.
    pub fn create_database_sync(&self, sql: &str) -> Result<()> {
        Self::request(sql)?;
        self.inner.run_and_release(sql)
    }

    pub fn drop_database_sync(&self, sql: &str) -> Result<()> {
        Self::request(sql)?;
        self.inner.run_and_release(sql)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("handle", &self.native_handle())
            .finish()
    }
}
