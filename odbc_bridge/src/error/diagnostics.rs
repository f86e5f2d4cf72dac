use crate::driver::{CallLevelInterface, HandleKind, RawHandle};
use serde::Serialize;
use std::fmt;

/// Drivers rarely report more than a handful; this only bounds runaway loops.
const MAX_DIAGNOSTIC_RECORDS: i16 = 64;

/// One `SQLGetDiagRec` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticRecord {
    pub sqlstate: String,
    pub native_code: i32,
    pub message: String,
}

impl DiagnosticRecord {
    pub fn new(sqlstate: &str, native_code: i32, message: &str) -> Self {
        Self {
            sqlstate: sqlstate.to_string(),
            native_code,
            message: message.to_string(),
        }
    }
}

impl fmt::Display for DiagnosticRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] (native {}) {}",
            self.sqlstate, self.native_code, self.message
        )
    }
}

/// Structured driver failure: the first record's state, code and message
/// plus every record the driver attached to the handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriverError {
    pub handle_kind: HandleKind,
    pub sqlstate: String,
    pub native_code: i32,
    pub message: String,
    pub records: Vec<DiagnosticRecord>,
}

impl DriverError {
    /// `records` must not be empty; an empty list yields a generic `HY000`.
    pub fn new(
        handle_kind: HandleKind,
        records: Vec<DiagnosticRecord>,
        context: Option<&str>,
    ) -> Self {
        let (sqlstate, native_code, message) = match records.first() {
            Some(first) => (
                first.sqlstate.clone(),
                first.native_code,
                first.message.clone(),
            ),
            None => ("HY000".to_string(), 0, "General error".to_string()),
        };
        let message = match context {
            Some(ctx) if !ctx.is_empty() => format!("{}: {}", ctx, message),
            _ => message,
        };
        Self {
            handle_kind,
            sqlstate,
            native_code,
            message,
            records,
        }
    }

    /// Error for a failed call that left no diagnostic record behind.
    pub fn without_diagnostics(handle_kind: HandleKind, function: &str) -> Self {
        let record = DiagnosticRecord::new(
            "HY000",
            0,
            &format!("{} failed without diagnostic information", function),
        );
        Self::new(handle_kind, vec![record], None)
    }

    pub fn sqlstate_bytes(&self) -> [u8; 5] {
        let mut out = [0u8; 5];
        for (dst, src) in out.iter_mut().zip(self.sqlstate.bytes()) {
            *dst = src;
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.sqlstate, self.message)?;
        for extra in self.records.iter().skip(1) {
            write!(f, "; {}", extra)?;
        }
        Ok(())
    }
}

impl std::error::Error for DriverError {}

/// Collects every diagnostic record attached to `handle`.
///
/// Returns `None` when the driver has nothing to report.
pub fn translate(
    driver: &dyn CallLevelInterface,
    kind: HandleKind,
    handle: RawHandle,
    context: Option<&str>,
) -> Option<DriverError> {
    if handle.is_null() {
        return None;
    }
    let mut records = Vec::new();
    let mut record_number = 1;
    while record_number <= MAX_DIAGNOSTIC_RECORDS {
        match driver.diagnostic_record(kind, handle, record_number) {
            Some(record) => records.push(record),
            None => break,
        }
        record_number += 1;
    }
    if records.is_empty() {
        None
    } else {
        Some(DriverError::new(kind, records, context))
    }
}

/// Like [`translate`], for a call already known to have failed: a failure
/// without diagnostics still produces an error naming `function`.
pub fn translate_or_fallback(
    driver: &dyn CallLevelInterface,
    kind: HandleKind,
    handle: RawHandle,
    function: &str,
) -> DriverError {
    translate(driver, kind, handle, None)
        .unwrap_or_else(|| DriverError::without_diagnostics(kind, function))
}
