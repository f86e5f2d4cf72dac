//! In-memory [`CallLevelInterface`] used by the test suites.
//!
//! Every call is recorded. Handles are plain counters; frees are counted
//! per handle so tests can assert "freed exactly once". Failures are
//! scripted per driver function or per SQL fragment and leave diagnostic
//! records on the handle, as a real driver manager does.

use super::{
    CType, CallLevelInterface, CallResult, CompletionType, ConnectAttribute, HandleKind,
    ParameterBinding, RawHandle, SqlStatus, NULL_DATA,
};
use crate::error::DiagnosticRecord;
use crate::protocol::ParamValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverFunction {
    AllocHandle,
    FreeHandle,
    DriverConnect,
    Disconnect,
    SetConnectAttr,
    GetFunctions,
    ExecDirect,
    Prepare,
    BindParameter,
    Execute,
    EndTran,
    Tables,
    Columns,
    NumResultCols,
    MoreResults,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub function: DriverFunction,
    pub handle: RawHandle,
    pub detail: Option<String>,
}

/// Observable state of one fake connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeConnection {
    pub connected: bool,
    pub autocommit: bool,
    pub isolation: Option<u32>,
    pub login_timeout: Option<u32>,
    pub system_naming: Option<bool>,
    pub connection_string: Option<String>,
}

impl Default for FakeConnection {
    fn default() -> Self {
        Self {
            connected: false,
            autocommit: true,
            isolation: None,
            login_timeout: None,
            system_naming: None,
            connection_string: None,
        }
    }
}

#[derive(Debug)]
struct HandleRecord {
    kind: HandleKind,
    parent: RawHandle,
    live: bool,
    diagnostics: Vec<DiagnosticRecord>,
}

struct SendBinding(ParameterBinding);

// Only dereferenced inside `execute`, whose caller guarantees the buffers
// are alive.
unsafe impl Send for SendBinding {}

#[derive(Default)]
struct FakeStatement {
    sql: Option<String>,
    prepared: bool,
    bindings: BTreeMap<u16, SendBinding>,
    columns: i16,
    extra_result_sets: usize,
}

struct ScriptedFailure {
    function: DriverFunction,
    skip: usize,
    records: Vec<DiagnosticRecord>,
}

struct State {
    next_handle: usize,
    handles: HashMap<RawHandle, HandleRecord>,
    allocation_order: Vec<RawHandle>,
    connections: HashMap<RawHandle, FakeConnection>,
    statements: HashMap<RawHandle, FakeStatement>,
    free_counts: HashMap<RawHandle, usize>,
    double_frees: Vec<RawHandle>,
    implicit_frees: Vec<RawHandle>,
    calls: Vec<RecordedCall>,
    failures: Vec<ScriptedFailure>,
    failing_sql: Vec<(String, DiagnosticRecord)>,
    outputs: HashMap<u16, ParamValue>,
    supports_more_results: bool,
    result_columns: i16,
    result_sets: usize,
}

impl State {
    fn new() -> Self {
        Self {
            next_handle: 0x1000,
            handles: HashMap::new(),
            allocation_order: Vec::new(),
            connections: HashMap::new(),
            statements: HashMap::new(),
            free_counts: HashMap::new(),
            double_frees: Vec::new(),
            implicit_frees: Vec::new(),
            calls: Vec::new(),
            failures: Vec::new(),
            failing_sql: Vec::new(),
            outputs: HashMap::new(),
            supports_more_results: true,
            result_columns: 1,
            result_sets: 1,
        }
    }

    fn record(&mut self, function: DriverFunction, handle: RawHandle, detail: Option<String>) {
        self.calls.push(RecordedCall {
            function,
            handle,
            detail,
        });
    }

    /// Validates `handle` as a live handle of `kind` and clears its
    /// diagnostics, as every ODBC call does on entry.
    fn enter(&mut self, kind: HandleKind, handle: RawHandle) -> CallResult {
        match self.handles.get_mut(&handle) {
            Some(rec) if rec.live && rec.kind == kind => {
                rec.diagnostics.clear();
                Ok(())
            }
            _ => Err(SqlStatus::InvalidHandle),
        }
    }

    fn take_scripted(&mut self, function: DriverFunction) -> Option<Vec<DiagnosticRecord>> {
        let index = self.failures.iter().position(|f| f.function == function)?;
        if self.failures[index].skip > 0 {
            self.failures[index].skip -= 1;
            return None;
        }
        Some(self.failures.remove(index).records)
    }

    fn sql_failure(&self, sql: &str) -> Option<DiagnosticRecord> {
        self.failing_sql
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, record)| record.clone())
    }

    fn fail(&mut self, handle: RawHandle, records: Vec<DiagnosticRecord>) -> SqlStatus {
        if let Some(rec) = self.handles.get_mut(&handle) {
            rec.diagnostics = records;
        }
        SqlStatus::Error
    }

    fn scripted(&mut self, function: DriverFunction, handle: RawHandle) -> CallResult {
        match self.take_scripted(function) {
            Some(records) => Err(self.fail(handle, records)),
            None => Ok(()),
        }
    }

    fn connection_mut(&mut self, handle: RawHandle) -> &mut FakeConnection {
        self.connections.entry(handle).or_default()
    }

    fn require_connected(&mut self, connection: RawHandle) -> CallResult {
        let connected = self
            .connections
            .get(&connection)
            .map(|c| c.connected)
            .unwrap_or(false);
        if connected {
            Ok(())
        } else {
            Err(self.fail(
                connection,
                vec![DiagnosticRecord::new("08003", 0, "Connection not open")],
            ))
        }
    }

    /// Releases the live statements of `connection`, as SQLDisconnect and
    /// freeing the connection do in a real driver manager.
    fn drop_children(&mut self, connection: RawHandle) {
        let children: Vec<RawHandle> = self
            .handles
            .iter()
            .filter(|(_, r)| r.live && r.kind == HandleKind::Statement && r.parent == connection)
            .map(|(h, _)| *h)
            .collect();
        for child in children {
            if let Some(rec) = self.handles.get_mut(&child) {
                rec.live = false;
            }
            self.statements.remove(&child);
            self.implicit_frees.push(child);
        }
    }

    fn columns_for(&self, sql: &str) -> i16 {
        let head = sql.trim_start().to_ascii_uppercase();
        if head.starts_with("SELECT") || head.starts_with("WITH") || head.starts_with("CALL") {
            self.result_columns
        } else {
            0
        }
    }
}

#[derive(Default)]
struct ConcurrencyProbe {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyProbe {
    fn enter(&self) -> ProbeGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        ProbeGuard(self)
    }
}

struct ProbeGuard<'a>(&'a ConcurrencyProbe);

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct RecordingDriver {
    state: Mutex<State>,
    manager_calls: ConcurrencyProbe,
    executes: ConcurrencyProbe,
    manager_delay_ms: AtomicU64,
    execute_delay_ms: AtomicU64,
}

impl Default for RecordingDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::new()),
            manager_calls: ConcurrencyProbe::default(),
            executes: ConcurrencyProbe::default(),
            manager_delay_ms: AtomicU64::new(0),
            execute_delay_ms: AtomicU64::new(0),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // a panicking test thread must not hide the recorded calls
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pause(delay: &AtomicU64) {
        let ms = delay.load(Ordering::SeqCst);
        if ms > 0 {
            std::thread::sleep(Duration::from_millis(ms));
        }
    }

    // ---- scripting ----

    /// Fails the next call to `function` with a single diagnostic record.
    pub fn fail_next(&self, function: DriverFunction, record: DiagnosticRecord) {
        self.fail_call(function, 0, vec![record]);
    }

    pub fn fail_next_with_records(&self, function: DriverFunction, records: Vec<DiagnosticRecord>) {
        self.fail_call(function, 0, records);
    }

    /// Fails a call to `function` after letting `skip` calls succeed. An
    /// empty `records` list fails without leaving diagnostics.
    pub fn fail_call(&self, function: DriverFunction, skip: usize, records: Vec<DiagnosticRecord>) {
        self.state().failures.push(ScriptedFailure {
            function,
            skip,
            records,
        });
    }

    /// Every direct-execute or prepare whose SQL contains `fragment` fails.
    pub fn fail_sql(&self, fragment: &str, record: DiagnosticRecord) {
        self.state()
            .failing_sql
            .push((fragment.to_string(), record));
    }

    /// Value written into output-capable parameter `ordinal` on execute.
    pub fn set_output(&self, ordinal: u16, value: ParamValue) {
        self.state().outputs.insert(ordinal, value);
    }

    pub fn set_supports_more_results(&self, supported: bool) {
        self.state().supports_more_results = supported;
    }

    /// Columns reported for row-returning statements.
    pub fn set_result_columns(&self, columns: i16) {
        self.state().result_columns = columns;
    }

    /// Result sets produced by each executed statement.
    pub fn set_result_sets(&self, count: usize) {
        self.state().result_sets = count.max(1);
    }

    /// Delay applied inside allocate/free/connect/disconnect.
    pub fn set_manager_delay(&self, delay: Duration) {
        self.manager_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set_execute_delay(&self, delay: Duration) {
        self.execute_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    // ---- inspection ----

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state().calls.clone()
    }

    pub fn calls_to(&self, function: DriverFunction) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.function == function)
            .count()
    }

    /// SQL text passed to direct-execute and prepare, in call order.
    pub fn executed_sql(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter(|c| matches!(c.function, DriverFunction::ExecDirect | DriverFunction::Prepare))
            .filter_map(|c| c.detail.clone())
            .collect()
    }

    pub fn allocations(&self, kind: HandleKind) -> usize {
        let state = self.state();
        state
            .allocation_order
            .iter()
            .filter(|h| state.handles.get(h).map(|r| r.kind) == Some(kind))
            .count()
    }

    pub fn frees(&self, kind: HandleKind) -> usize {
        let state = self.state();
        state
            .free_counts
            .iter()
            .filter(|(h, _)| state.handles.get(h).map(|r| r.kind) == Some(kind))
            .map(|(_, n)| *n)
            .sum()
    }

    pub fn free_count(&self, handle: RawHandle) -> usize {
        self.state().free_counts.get(&handle).copied().unwrap_or(0)
    }

    pub fn live_handles(&self, kind: HandleKind) -> usize {
        self.state()
            .handles
            .values()
            .filter(|r| r.kind == kind && r.live)
            .count()
    }

    /// Handles of `kind` in allocation order.
    pub fn handles(&self, kind: HandleKind) -> Vec<RawHandle> {
        let state = self.state();
        state
            .allocation_order
            .iter()
            .copied()
            .filter(|h| state.handles.get(h).map(|r| r.kind) == Some(kind))
            .collect()
    }

    pub fn double_frees(&self) -> Vec<RawHandle> {
        self.state().double_frees.clone()
    }

    /// Statements still live when their connection was disconnected or
    /// freed, and so released implicitly with it.
    pub fn implicit_frees(&self) -> Vec<RawHandle> {
        self.state().implicit_frees.clone()
    }

    pub fn connection(&self, handle: RawHandle) -> Option<FakeConnection> {
        self.state().connections.get(&handle).cloned()
    }

    /// Peak number of allocate/free/connect/disconnect calls in flight.
    pub fn max_concurrent_manager_calls(&self) -> usize {
        self.manager_calls.peak.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_executes(&self) -> usize {
        self.executes.peak.load(Ordering::SeqCst)
    }

    fn prepare_or_exec(
        &self,
        function: DriverFunction,
        statement: RawHandle,
        sql: &str,
        prepare_only: bool,
    ) -> CallResult {
        let mut state = self.state();
        state.enter(HandleKind::Statement, statement)?;
        state.record(function, statement, Some(sql.to_string()));
        state.scripted(function, statement)?;
        if let Some(record) = state.sql_failure(sql) {
            return Err(state.fail(statement, vec![record]));
        }
        let columns = state.columns_for(sql);
        let extra = state.result_sets - 1;
        let stmt = state.statements.entry(statement).or_default();
        stmt.sql = Some(sql.to_string());
        stmt.prepared = prepare_only;
        if !prepare_only {
            stmt.columns = columns;
            stmt.extra_result_sets = extra;
        }
        Ok(())
    }

    fn catalog(
        &self,
        function: DriverFunction,
        statement: RawHandle,
        filters: [Option<&str>; 4],
        columns: i16,
    ) -> CallResult {
        let mut state = self.state();
        state.enter(HandleKind::Statement, statement)?;
        let detail = filters
            .iter()
            .map(|f| f.unwrap_or("<null>"))
            .collect::<Vec<_>>()
            .join(",");
        state.record(function, statement, Some(detail));
        state.scripted(function, statement)?;
        let stmt = state.statements.entry(statement).or_default();
        stmt.columns = columns;
        stmt.extra_result_sets = 0;
        Ok(())
    }
}

/// Writes a scripted output value into a bound buffer.
///
/// # Safety
///
/// `binding` must point at live buffers of the advertised length.
unsafe fn write_output(binding: &ParameterBinding, value: &ParamValue) {
    let capacity = binding.buffer_length.max(0) as usize;
    let copy = |bytes: &[u8], reserve_nul: bool| {
        let room = if reserve_nul {
            capacity.saturating_sub(1)
        } else {
            capacity
        };
        let n = bytes.len().min(room);
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), binding.value_ptr, n);
        if reserve_nul && capacity > 0 {
            *binding.value_ptr.add(n) = 0;
        }
        *binding.indicator_ptr = bytes.len() as isize;
    };
    match (value, binding.c_type) {
        (ParamValue::Null, _) => *binding.indicator_ptr = NULL_DATA,
        (ParamValue::Integer(v), _) => copy(&v.to_ne_bytes(), false),
        (ParamValue::BigInt(v), _) => copy(&v.to_ne_bytes(), false),
        (ParamValue::Double(v), _) => copy(&v.to_ne_bytes(), false),
        (ParamValue::String(s), CType::Char) | (ParamValue::Decimal(s), CType::Char) => {
            copy(s.as_bytes(), true)
        }
        (ParamValue::String(s), _) | (ParamValue::Decimal(s), _) => copy(s.as_bytes(), false),
        (ParamValue::Binary(b), _) => copy(b, false),
    }
}

impl CallLevelInterface for RecordingDriver {
    fn allocate_handle(&self, kind: HandleKind, parent: RawHandle) -> CallResult<RawHandle> {
        let _probe = self.manager_calls.enter();
        Self::pause(&self.manager_delay_ms);
        let mut state = self.state();
        state.record(DriverFunction::AllocHandle, parent, Some(format!("{:?}", kind)));

        let parent_kind = match kind {
            HandleKind::Environment => None,
            HandleKind::Connection => Some(HandleKind::Environment),
            HandleKind::Statement => Some(HandleKind::Connection),
        };
        if let Some(parent_kind) = parent_kind {
            state.enter(parent_kind, parent)?;
        }
        state.scripted(DriverFunction::AllocHandle, parent)?;
        if kind == HandleKind::Statement {
            state.require_connected(parent)?;
        }

        let handle = RawHandle::from_raw(state.next_handle);
        state.next_handle += 0x10;
        state.handles.insert(
            handle,
            HandleRecord {
                kind,
                parent,
                live: true,
                diagnostics: Vec::new(),
            },
        );
        state.allocation_order.push(handle);
        match kind {
            HandleKind::Connection => {
                state.connections.insert(handle, FakeConnection::default());
            }
            HandleKind::Statement => {
                state.statements.insert(handle, FakeStatement::default());
            }
            HandleKind::Environment => {}
        }
        Ok(handle)
    }

    fn free_handle(&self, kind: HandleKind, handle: RawHandle) -> CallResult {
        let _probe = self.manager_calls.enter();
        Self::pause(&self.manager_delay_ms);
        let mut state = self.state();
        state.record(DriverFunction::FreeHandle, handle, Some(format!("{:?}", kind)));

        let known_dead = matches!(state.handles.get(&handle), Some(r) if !r.live);
        if known_dead {
            state.double_frees.push(handle);
        }
        state.enter(kind, handle)?;
        state.scripted(DriverFunction::FreeHandle, handle)?;
        if kind == HandleKind::Connection
            && state.connections.get(&handle).map(|c| c.connected) == Some(true)
        {
            return Err(state.fail(
                handle,
                vec![DiagnosticRecord::new("HY010", 0, "Function sequence error")],
            ));
        }

        if kind == HandleKind::Connection {
            state.drop_children(handle);
        }
        *state.free_counts.entry(handle).or_insert(0) += 1;
        if let Some(rec) = state.handles.get_mut(&handle) {
            rec.live = false;
        }
        state.statements.remove(&handle);
        Ok(())
    }

    fn driver_connect(&self, connection: RawHandle, connection_string: &str) -> CallResult {
        let _probe = self.manager_calls.enter();
        Self::pause(&self.manager_delay_ms);
        let mut state = self.state();
        state.enter(HandleKind::Connection, connection)?;
        state.record(
            DriverFunction::DriverConnect,
            connection,
            Some(connection_string.to_string()),
        );
        state.scripted(DriverFunction::DriverConnect, connection)?;
        if state.connection_mut(connection).connected {
            return Err(state.fail(
                connection,
                vec![DiagnosticRecord::new("08002", 0, "Connection name in use")],
            ));
        }
        let conn = state.connection_mut(connection);
        conn.connected = true;
        conn.connection_string = Some(connection_string.to_string());
        Ok(())
    }

    fn disconnect(&self, connection: RawHandle) -> CallResult {
        let _probe = self.manager_calls.enter();
        Self::pause(&self.manager_delay_ms);
        let mut state = self.state();
        state.enter(HandleKind::Connection, connection)?;
        state.record(DriverFunction::Disconnect, connection, None);
        state.scripted(DriverFunction::Disconnect, connection)?;
        state.require_connected(connection)?;
        state.drop_children(connection);
        state.connection_mut(connection).connected = false;
        Ok(())
    }

    fn set_connect_attr(&self, connection: RawHandle, attribute: ConnectAttribute) -> CallResult {
        let mut state = self.state();
        state.enter(HandleKind::Connection, connection)?;
        state.record(
            DriverFunction::SetConnectAttr,
            connection,
            Some(format!("{:?}", attribute)),
        );
        state.scripted(DriverFunction::SetConnectAttr, connection)?;
        let conn = state.connection_mut(connection);
        match attribute {
            ConnectAttribute::LoginTimeout(v) => conn.login_timeout = Some(v),
            ConnectAttribute::AutoCommit(v) => conn.autocommit = v,
            ConnectAttribute::TxnIsolation(v) => conn.isolation = Some(v),
            ConnectAttribute::SystemNaming(v) => conn.system_naming = Some(v),
        }
        Ok(())
    }

    fn supports_more_results(&self, connection: RawHandle) -> CallResult<bool> {
        let mut state = self.state();
        state.enter(HandleKind::Connection, connection)?;
        state.record(DriverFunction::GetFunctions, connection, None);
        state.scripted(DriverFunction::GetFunctions, connection)?;
        Ok(state.supports_more_results)
    }

    fn exec_direct(&self, statement: RawHandle, sql: &str) -> CallResult {
        let _probe = self.executes.enter();
        Self::pause(&self.execute_delay_ms);
        self.prepare_or_exec(DriverFunction::ExecDirect, statement, sql, false)
    }

    fn prepare(&self, statement: RawHandle, sql: &str) -> CallResult {
        self.prepare_or_exec(DriverFunction::Prepare, statement, sql, true)
    }

    unsafe fn bind_parameter(
        &self,
        statement: RawHandle,
        ordinal: u16,
        binding: ParameterBinding,
    ) -> CallResult {
        let mut state = self.state();
        state.enter(HandleKind::Statement, statement)?;
        state.record(
            DriverFunction::BindParameter,
            statement,
            Some(format!("{}:{:?}:{:?}", ordinal, binding.direction, binding.c_type)),
        );
        state.scripted(DriverFunction::BindParameter, statement)?;
        state
            .statements
            .entry(statement)
            .or_default()
            .bindings
            .insert(ordinal, SendBinding(binding));
        Ok(())
    }

    unsafe fn execute(&self, statement: RawHandle) -> CallResult {
        let _probe = self.executes.enter();
        Self::pause(&self.execute_delay_ms);
        let mut state = self.state();
        state.enter(HandleKind::Statement, statement)?;
        state.record(DriverFunction::Execute, statement, None);
        state.scripted(DriverFunction::Execute, statement)?;

        let (prepared, sql) = match state.statements.get(&statement) {
            Some(stmt) => (stmt.prepared, stmt.sql.clone().unwrap_or_default()),
            None => (false, String::new()),
        };
        if !prepared {
            return Err(state.fail(
                statement,
                vec![DiagnosticRecord::new("HY010", 0, "Function sequence error")],
            ));
        }
        let markers = sql.matches('?').count();
        let missing = match state.statements.get(&statement) {
            Some(stmt) => (1..=markers as u16).any(|o| !stmt.bindings.contains_key(&o)),
            None => markers > 0,
        };
        if missing {
            return Err(state.fail(
                statement,
                vec![DiagnosticRecord::new("07002", 0, "COUNT field incorrect")],
            ));
        }

        let outputs = state.outputs.clone();
        let columns = state.columns_for(&sql);
        let extra = state.result_sets - 1;
        if let Some(stmt) = state.statements.get_mut(&statement) {
            stmt.columns = columns;
            stmt.extra_result_sets = extra;
            for (ordinal, bound) in &stmt.bindings {
                if !bound.0.direction.has_output() {
                    continue;
                }
                if let Some(value) = outputs.get(ordinal) {
                    write_output(&bound.0, value);
                }
            }
        }
        Ok(())
    }

    fn end_transaction(&self, connection: RawHandle, completion: CompletionType) -> CallResult {
        let mut state = self.state();
        state.enter(HandleKind::Connection, connection)?;
        state.record(
            DriverFunction::EndTran,
            connection,
            Some(format!("{:?}", completion)),
        );
        state.scripted(DriverFunction::EndTran, connection)?;
        state.require_connected(connection)
    }

    fn tables(
        &self,
        statement: RawHandle,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        table_type: Option<&str>,
    ) -> CallResult {
        self.catalog(
            DriverFunction::Tables,
            statement,
            [catalog, schema, table, table_type],
            5,
        )
    }

    fn columns(
        &self,
        statement: RawHandle,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        column: Option<&str>,
    ) -> CallResult {
        self.catalog(
            DriverFunction::Columns,
            statement,
            [catalog, schema, table, column],
            18,
        )
    }

    fn num_result_cols(&self, statement: RawHandle) -> CallResult<i16> {
        let mut state = self.state();
        state.enter(HandleKind::Statement, statement)?;
        state.record(DriverFunction::NumResultCols, statement, None);
        state.scripted(DriverFunction::NumResultCols, statement)?;
        Ok(state
            .statements
            .get(&statement)
            .map(|s| s.columns)
            .unwrap_or(0))
    }

    fn more_results(&self, statement: RawHandle) -> CallResult<bool> {
        let mut state = self.state();
        state.enter(HandleKind::Statement, statement)?;
        state.record(DriverFunction::MoreResults, statement, None);
        state.scripted(DriverFunction::MoreResults, statement)?;
        let stmt = state.statements.entry(statement).or_default();
        if stmt.extra_result_sets > 0 {
            stmt.extra_result_sets -= 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn diagnostic_record(
        &self,
        _kind: HandleKind,
        handle: RawHandle,
        record_number: i16,
    ) -> Option<DiagnosticRecord> {
        if record_number < 1 {
            return None;
        }
        let state = self.state();
        state
            .handles
            .get(&handle)
            .and_then(|r| r.diagnostics.get(record_number as usize - 1))
            .cloned()
    }
}

impl RecordingDriver {
    /// Parent handle recorded at allocation.
    pub fn parent_of(&self, handle: RawHandle) -> Option<RawHandle> {
        self.state().handles.get(&handle).map(|r| r.parent)
    }
}
