//! [`CallLevelInterface`] over the system driver manager.
//!
//! Calls go straight to the `odbc_api::sys` bindings. `SQLGetFunctions` is
//! not exported there and is declared locally.

use super::{
    CType, CallLevelInterface, CallResult, CompletionType, ConnectAttribute, HandleKind,
    ParamDirection, ParameterBinding, RawHandle, SqlStatus,
};
use crate::error::DiagnosticRecord;
use log::{debug, warn};
use odbc_api::sys::{
    self, AttrOdbcVersion, CDataType, ConnectionAttribute, DriverConnectOption,
    EnvironmentAttribute, HDbc, HEnv, HStmt, Handle, HandleType, ParamType, Pointer, SqlDataType,
    SqlReturn,
};
use std::ffi::c_void;
use std::ptr::{null, null_mut};

/// IBM CLI extension: `*SYS` (true) vs `*SQL` (false) object naming.
const SQL_ATTR_DBC_SYS_NAMING: ConnectionAttribute = ConnectionAttribute(3017);
const SQL_API_SQLMORERESULTS: u16 = 61;
const SQL_MAX_MESSAGE_LENGTH: usize = 1024;

#[cfg_attr(windows, link(name = "odbc32"))]
#[cfg_attr(not(windows), link(name = "odbc"))]
extern "system" {
    fn SQLGetFunctions(dbc: HDbc, function_id: u16, supported: *mut u16) -> SqlReturn;
}

fn status(ret: SqlReturn) -> CallResult {
    SqlStatus::from_code(ret.0).into_call_result()
}

fn handle_type(kind: HandleKind) -> HandleType {
    match kind {
        HandleKind::Environment => HandleType::Env,
        HandleKind::Connection => HandleType::Dbc,
        HandleKind::Statement => HandleType::Stmt,
    }
}

fn as_handle(raw: RawHandle) -> Handle {
    Handle(raw.as_raw() as *mut c_void)
}

fn as_dbc(raw: RawHandle) -> HDbc {
    HDbc(raw.as_raw() as *mut c_void)
}

fn as_stmt(raw: RawHandle) -> HStmt {
    HStmt(raw.as_raw() as *mut c_void)
}

fn wide(text: &str) -> Vec<u16> {
    text.encode_utf16().collect()
}

/// Optional catalog filter as (pointer, length); `None` is a null pointer,
/// which the driver reads as "no restriction".
fn filter(text: &Option<Vec<u16>>) -> (*const u16, i16) {
    match text {
        Some(buf) => (buf.as_ptr(), buf.len().min(i16::MAX as usize) as i16),
        None => (null(), 0),
    }
}

fn c_data_type(c_type: CType) -> CDataType {
    match c_type {
        CType::Char => CDataType::Char,
        CType::SLong => CDataType::SLong,
        CType::SBigInt => CDataType::SBigInt,
        CType::Double => CDataType::Double,
        CType::Binary => CDataType::Binary,
    }
}

fn param_type(direction: ParamDirection) -> ParamType {
    match direction {
        ParamDirection::Input => ParamType::Input,
        ParamDirection::InputOutput => ParamType::InputOutput,
        ParamDirection::Output => ParamType::Output,
    }
}

/// Driver-manager backed implementation. Stateless; handles are owned by
/// the layers above.
#[derive(Debug, Default, Clone, Copy)]
pub struct OdbcDriver;

impl OdbcDriver {
    pub fn new() -> Self {
        OdbcDriver
    }
}

impl CallLevelInterface for OdbcDriver {
    fn allocate_handle(&self, kind: HandleKind, parent: RawHandle) -> CallResult<RawHandle> {
        let mut out = Handle::null();
        status(unsafe { sys::SQLAllocHandle(handle_type(kind), as_handle(parent), &mut out) })?;
        let handle = RawHandle::from_raw(out.0 as usize);
        if kind == HandleKind::Environment {
            let ret = unsafe {
                sys::SQLSetEnvAttr(
                    HEnv(out.0),
                    EnvironmentAttribute::OdbcVersion,
                    AttrOdbcVersion::Odbc3.into(),
                    0,
                )
            };
            if let Err(err) = status(ret) {
                let freed = unsafe { sys::SQLFreeHandle(HandleType::Env, out) };
                if freed != SqlReturn::SUCCESS {
                    warn!("SQLFreeHandle ENV {} after failed setup -> {:?}", handle, freed);
                }
                return Err(err);
            }
        }
        debug!("SQLAllocHandle {:?} -> {}", kind, handle);
        Ok(handle)
    }

    fn free_handle(&self, kind: HandleKind, handle: RawHandle) -> CallResult {
        let result = status(unsafe { sys::SQLFreeHandle(handle_type(kind), as_handle(handle)) });
        debug!("SQLFreeHandle {:?} {} -> {:?}", kind, handle, result);
        result
    }

    fn driver_connect(&self, connection: RawHandle, connection_string: &str) -> CallResult {
        let text = wide(connection_string);
        let len = text.len().min(i16::MAX as usize) as i16;
        let mut out_len: i16 = 0;
        status(unsafe {
            sys::SQLDriverConnectW(
                as_dbc(connection),
                null_mut(),
                text.as_ptr(),
                len,
                null_mut(),
                0,
                &mut out_len,
                DriverConnectOption::NoPrompt,
            )
        })
    }

    fn disconnect(&self, connection: RawHandle) -> CallResult {
        status(unsafe { sys::SQLDisconnect(as_dbc(connection)) })
    }

    fn set_connect_attr(&self, connection: RawHandle, attribute: ConnectAttribute) -> CallResult {
        let (attr, value) = match attribute {
            ConnectAttribute::LoginTimeout(v) => (ConnectionAttribute::LOGIN_TIMEOUT, v as usize),
            ConnectAttribute::AutoCommit(on) => (ConnectionAttribute::AUTOCOMMIT, usize::from(on)),
            ConnectAttribute::TxnIsolation(v) => (ConnectionAttribute::TXN_ISOLATION, v as usize),
            ConnectAttribute::SystemNaming(on) => (SQL_ATTR_DBC_SYS_NAMING, usize::from(on)),
        };
        status(unsafe {
            sys::SQLSetConnectAttrW(
                as_dbc(connection),
                attr,
                value as Pointer,
                sys::IS_UINTEGER,
            )
        })
    }

    fn supports_more_results(&self, connection: RawHandle) -> CallResult<bool> {
        let mut supported: u16 = 0;
        let ret = unsafe {
            SQLGetFunctions(as_dbc(connection), SQL_API_SQLMORERESULTS, &mut supported)
        };
        status(ret)?;
        Ok(supported != 0)
    }

    fn exec_direct(&self, statement: RawHandle, sql: &str) -> CallResult {
        let text = wide(sql);
        let ret = unsafe { sys::SQLExecDirectW(as_stmt(statement), text.as_ptr(), text.len() as i32) };
        match ret {
            // searched UPDATE/DELETE that touched no rows
            SqlReturn::NO_DATA => Ok(()),
            other => status(other),
        }
    }

    fn prepare(&self, statement: RawHandle, sql: &str) -> CallResult {
        let text = wide(sql);
        status(unsafe { sys::SQLPrepareW(as_stmt(statement), text.as_ptr(), text.len() as i32) })
    }

    unsafe fn bind_parameter(
        &self,
        statement: RawHandle,
        ordinal: u16,
        binding: ParameterBinding,
    ) -> CallResult {
        status(sys::SQLBindParameter(
            as_stmt(statement),
            ordinal,
            param_type(binding.direction),
            c_data_type(binding.c_type),
            SqlDataType(binding.sql_type.code()),
            binding.column_size,
            binding.decimal_digits,
            binding.value_ptr as *mut c_void,
            binding.buffer_length,
            binding.indicator_ptr,
        ))
    }

    unsafe fn execute(&self, statement: RawHandle) -> CallResult {
        match sys::SQLExecute(as_stmt(statement)) {
            SqlReturn::NO_DATA => Ok(()),
            other => status(other),
        }
    }

    fn end_transaction(&self, connection: RawHandle, completion: CompletionType) -> CallResult {
        let completion = match completion {
            CompletionType::Commit => sys::CompletionType::Commit,
            CompletionType::Rollback => sys::CompletionType::Rollback,
        };
        status(unsafe { sys::SQLEndTran(HandleType::Dbc, as_handle(connection), completion) })
    }

    fn tables(
        &self,
        statement: RawHandle,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        table_type: Option<&str>,
    ) -> CallResult {
        let [c, s, t, y] = [catalog, schema, table, table_type].map(|f| f.map(wide));
        let (c, s, t, y) = (filter(&c), filter(&s), filter(&t), filter(&y));
        status(unsafe {
            sys::SQLTablesW(as_stmt(statement), c.0, c.1, s.0, s.1, t.0, t.1, y.0, y.1)
        })
    }

    fn columns(
        &self,
        statement: RawHandle,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        column: Option<&str>,
    ) -> CallResult {
        let [c, s, t, n] = [catalog, schema, table, column].map(|f| f.map(wide));
        let (c, s, t, n) = (filter(&c), filter(&s), filter(&t), filter(&n));
        status(unsafe {
            sys::SQLColumnsW(as_stmt(statement), c.0, c.1, s.0, s.1, t.0, t.1, n.0, n.1)
        })
    }

    fn num_result_cols(&self, statement: RawHandle) -> CallResult<i16> {
        let mut count: i16 = 0;
        status(unsafe { sys::SQLNumResultCols(as_stmt(statement), &mut count) })?;
        Ok(count)
    }

    fn more_results(&self, statement: RawHandle) -> CallResult<bool> {
        match unsafe { sys::SQLMoreResults(as_stmt(statement)) } {
            SqlReturn::NO_DATA => Ok(false),
            other => status(other).map(|()| true),
        }
    }

    fn diagnostic_record(
        &self,
        kind: HandleKind,
        handle: RawHandle,
        record_number: i16,
    ) -> Option<DiagnosticRecord> {
        let mut state = [0u16; 6];
        let mut native: i32 = 0;
        let mut message = vec![0u16; SQL_MAX_MESSAGE_LENGTH];
        let mut text_len: i16 = 0;
        let ret = unsafe {
            sys::SQLGetDiagRecW(
                handle_type(kind),
                as_handle(handle),
                record_number,
                state.as_mut_ptr(),
                &mut native,
                message.as_mut_ptr(),
                message.len() as i16,
                &mut text_len,
            )
        };
        if !SqlStatus::from_code(ret.0).succeeded() {
            return None;
        }
        let text_len = (text_len.max(0) as usize).min(message.len());
        Some(DiagnosticRecord {
            sqlstate: String::from_utf16_lossy(&state[..5]),
            native_code: native,
            message: String::from_utf16_lossy(&message[..text_len]),
        })
    }
}
