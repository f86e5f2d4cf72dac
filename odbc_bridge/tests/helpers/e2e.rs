//! Helpers for tests against a live driver manager.

use super::env::{get_test_dsn, init_logging};
use odbc_bridge::Connection;

/// Runs only when ENABLE_E2E_TESTS is set and ODBC_TEST_DSN is configured.
#[allow(dead_code)]
pub fn should_run_e2e_tests() -> bool {
    get_test_dsn().is_some()
}

/// Opens a connection to ODBC_TEST_DSN on the process environment.
#[allow(dead_code)]
pub fn live_connection() -> Option<Connection> {
    init_logging();
    let dsn = get_test_dsn()?;
    let conn = match Connection::process() {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("[ERROR] Environment unavailable: {}", e);
            return None;
        }
    };
    match conn.open_sync(&dsn) {
        Ok(()) => Some(conn),
        Err(e) => {
            eprintln!("[ERROR] Connection failed: {}", e);
            None
        }
    }
}
