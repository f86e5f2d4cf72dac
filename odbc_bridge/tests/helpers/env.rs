//! Environment and fixture helpers for integration tests.

use odbc_bridge::{Connection, Environment, RecordingDriver, SharedEnvironment};
use std::sync::Arc;

/// ODBC_TEST_DSN, or None when live tests are disabled.
#[allow(dead_code)]
pub fn get_test_dsn() -> Option<String> {
    odbc_bridge::test_helpers::test_dsn()
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A fresh in-memory driver and an environment over it.
#[allow(dead_code)]
pub fn recording_environment() -> (Arc<RecordingDriver>, SharedEnvironment) {
    init_logging();
    let driver = Arc::new(RecordingDriver::new());
    let env = Environment::new(driver.clone()).expect("environment");
    (driver, env)
}

/// An open connection over a fresh in-memory driver.
#[allow(dead_code)]
pub fn recording_connection() -> (Arc<RecordingDriver>, Connection) {
    let (driver, env) = recording_environment();
    let conn = Connection::new(&env).expect("connection");
    conn.open_sync("DSN=recording").expect("open");
    (driver, conn)
}
