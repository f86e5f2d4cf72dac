//! Boundary to the driver manager.
//!
//! Everything above this module talks to ODBC through [`CallLevelInterface`]:
//! allocate/free handles, connect/disconnect, connection attributes,
//! prepare/bind/execute, end-transaction and the catalog calls. The
//! production implementation is [`odbc::OdbcDriver`]; tests use the
//! in-memory [`recording::RecordingDriver`].

pub mod odbc;
#[cfg(any(test, feature = "test-helpers"))]
pub mod recording;

use crate::error::DiagnosticRecord;
use serde::Serialize;
use std::fmt;

pub use odbc::OdbcDriver;
#[cfg(any(test, feature = "test-helpers"))]
pub use recording::{DriverFunction, RecordingDriver};

/// Indicator value denoting SQL NULL (`SQL_NULL_DATA`).
pub const NULL_DATA: isize = -1;

/// The three handle kinds this crate allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HandleKind {
    Environment,
    Connection,
    Statement,
}

/// Opaque driver handle value. Copying it does not copy ownership; owners
/// live in [`crate::handles`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(usize);

impl RawHandle {
    pub const NULL: RawHandle = RawHandle(0);

    pub fn from_raw(value: usize) -> Self {
        Self(value)
    }

    pub fn as_raw(self) -> usize {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Return code of a driver call (`SQLRETURN`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SqlStatus {
    Success,
    SuccessWithInfo,
    NoData,
    NeedData,
    StillExecuting,
    Error,
    InvalidHandle,
}

impl SqlStatus {
    pub fn from_code(code: i16) -> Self {
        match code {
            0 => Self::Success,
            1 => Self::SuccessWithInfo,
            100 => Self::NoData,
            99 => Self::NeedData,
            2 => Self::StillExecuting,
            -2 => Self::InvalidHandle,
            _ => Self::Error,
        }
    }

    pub fn code(self) -> i16 {
        match self {
            Self::Success => 0,
            Self::SuccessWithInfo => 1,
            Self::NoData => 100,
            Self::NeedData => 99,
            Self::StillExecuting => 2,
            Self::Error => -1,
            Self::InvalidHandle => -2,
        }
    }

    /// `SQL_SUCCEEDED`.
    pub fn succeeded(self) -> bool {
        matches!(self, Self::Success | Self::SuccessWithInfo)
    }

    pub(crate) fn into_call_result(self) -> CallResult {
        if self.succeeded() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

/// Result of a driver call. `Err` carries the non-success status; the
/// diagnostics stay attached to the handle until the next call on it.
pub type CallResult<T = ()> = std::result::Result<T, SqlStatus>;

/// Connection attributes applied through `SQLSetConnectAttr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectAttribute {
    LoginTimeout(u32),
    AutoCommit(bool),
    TxnIsolation(u32),
    SystemNaming(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionType {
    Commit,
    Rollback,
}

/// Direction of a bound parameter. Discriminants are the ODBC
/// `SQL_PARAM_*` codes; every even code carries an output component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(i16)]
pub enum ParamDirection {
    Input = 1,
    InputOutput = 2,
    Output = 4,
}

impl ParamDirection {
    const DECODE: [(i16, ParamDirection); 3] = [
        (1, ParamDirection::Input),
        (2, ParamDirection::InputOutput),
        (4, ParamDirection::Output),
    ];

    pub fn from_code(code: i16) -> Option<Self> {
        Self::DECODE
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, d)| *d)
    }

    pub fn code(self) -> i16 {
        self as i16
    }

    /// Whether the driver writes back into this parameter's buffer.
    pub fn has_output(self) -> bool {
        matches!(self, Self::InputOutput | Self::Output)
    }

    pub fn has_input(self) -> bool {
        matches!(self, Self::Input | Self::InputOutput)
    }
}

/// Logical SQL type of a parameter (`SQL_*` type codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SqlType {
    Char,
    VarChar,
    LongVarChar,
    WVarChar,
    Numeric,
    Decimal,
    Integer,
    SmallInt,
    TinyInt,
    BigInt,
    Bit,
    Float,
    Real,
    Double,
    Binary,
    VarBinary,
    LongVarBinary,
    Date,
    Time,
    Timestamp,
}

impl SqlType {
    pub fn code(self) -> i16 {
        match self {
            Self::Char => 1,
            Self::Numeric => 2,
            Self::Decimal => 3,
            Self::Integer => 4,
            Self::SmallInt => 5,
            Self::Float => 6,
            Self::Real => 7,
            Self::Double => 8,
            Self::VarChar => 12,
            Self::Date => 91,
            Self::Time => 92,
            Self::Timestamp => 93,
            Self::LongVarChar => -1,
            Self::Binary => -2,
            Self::VarBinary => -3,
            Self::LongVarBinary => -4,
            Self::BigInt => -5,
            Self::TinyInt => -6,
            Self::Bit => -7,
            Self::WVarChar => -9,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        let t = match code {
            1 => Self::Char,
            2 => Self::Numeric,
            3 => Self::Decimal,
            4 => Self::Integer,
            5 => Self::SmallInt,
            6 => Self::Float,
            7 => Self::Real,
            8 => Self::Double,
            12 => Self::VarChar,
            91 => Self::Date,
            92 => Self::Time,
            93 => Self::Timestamp,
            -1 => Self::LongVarChar,
            -2 => Self::Binary,
            -3 => Self::VarBinary,
            -4 => Self::LongVarBinary,
            -5 => Self::BigInt,
            -6 => Self::TinyInt,
            -7 => Self::Bit,
            -9 => Self::WVarChar,
            _ => return None,
        };
        Some(t)
    }
}

/// C buffer layout handed to the driver (`SQL_C_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CType {
    /// Narrow, NUL-terminated text (UTF-8).
    Char,
    /// `i32`
    SLong,
    /// `i64`
    SBigInt,
    /// `f64`
    Double,
    Binary,
}

impl CType {
    /// Width of fixed-size types; `None` for variable-length buffers.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            Self::SLong => Some(4),
            Self::SBigInt => Some(8),
            Self::Double => Some(8),
            Self::Char | Self::Binary => None,
        }
    }
}

/// Raw description of one parameter buffer as passed to `SQLBindParameter`.
///
/// The pointers reference memory owned by [`crate::protocol::BoundParameters`].
#[derive(Debug, Clone, Copy)]
pub struct ParameterBinding {
    pub direction: ParamDirection,
    pub c_type: CType,
    pub sql_type: SqlType,
    pub column_size: usize,
    pub decimal_digits: i16,
    pub value_ptr: *mut u8,
    pub buffer_length: isize,
    pub indicator_ptr: *mut isize,
}

/// The ODBC call-level interface consumed by this crate.
///
/// Implementations must be callable from any thread. Handle-table mutation
/// (`allocate_handle`, `free_handle`, `driver_connect`, `disconnect`) is
/// serialized by the caller through [`crate::gate::DriverGate`]; all other
/// calls may run concurrently on distinct handles.
pub trait CallLevelInterface: Send + Sync {
    fn allocate_handle(&self, kind: HandleKind, parent: RawHandle) -> CallResult<RawHandle>;

    fn free_handle(&self, kind: HandleKind, handle: RawHandle) -> CallResult;

    fn driver_connect(&self, connection: RawHandle, connection_string: &str) -> CallResult;

    fn disconnect(&self, connection: RawHandle) -> CallResult;

    fn set_connect_attr(&self, connection: RawHandle, attribute: ConnectAttribute) -> CallResult;

    /// Whether `SQLMoreResults` is implemented by the driver.
    fn supports_more_results(&self, connection: RawHandle) -> CallResult<bool>;

    fn exec_direct(&self, statement: RawHandle, sql: &str) -> CallResult;

    fn prepare(&self, statement: RawHandle, sql: &str) -> CallResult;

    /// # Safety
    ///
    /// The buffers referenced by `binding` must stay valid and must not move
    /// until the statement is freed or executed for the last time.
    unsafe fn bind_parameter(
        &self,
        statement: RawHandle,
        ordinal: u16,
        binding: ParameterBinding,
    ) -> CallResult;

    /// # Safety
    ///
    /// Dereferences every buffer bound with [`Self::bind_parameter`].
    unsafe fn execute(&self, statement: RawHandle) -> CallResult;

    fn end_transaction(&self, connection: RawHandle, completion: CompletionType) -> CallResult;

    fn tables(
        &self,
        statement: RawHandle,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        table_type: Option<&str>,
    ) -> CallResult;

    fn columns(
        &self,
        statement: RawHandle,
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        column: Option<&str>,
    ) -> CallResult;

    fn num_result_cols(&self, statement: RawHandle) -> CallResult<i16>;

    /// `Ok(false)` when the driver reports `SQL_NO_DATA`.
    fn more_results(&self, statement: RawHandle) -> CallResult<bool>;

    /// Diagnostic record `record_number` (1-based) of `handle`, if any.
    fn diagnostic_record(
        &self,
        kind: HandleKind,
        handle: RawHandle,
        record_number: i16,
    ) -> Option<DiagnosticRecord>;
}
