//! Helpers shared by unit and integration tests.

use crate::engine::config::parse_bool_flag;
use std::sync::Once;

pub const TEST_DSN_ENV: &str = "ODBC_TEST_DSN";
pub const ENABLE_E2E_ENV: &str = "ENABLE_E2E_TESTS";

/// Loads `.env` from the working directory, once per process.
pub fn load_dotenv() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = dotenvy::dotenv();
    });
}

/// Whether tests against a live driver are enabled.
pub fn e2e_enabled() -> bool {
    load_dotenv();
    std::env::var(ENABLE_E2E_ENV)
        .ok()
        .and_then(|v| parse_bool_flag(&v))
        == Some(true)
}

/// Connection string for live tests, if enabled and configured.
pub fn test_dsn() -> Option<String> {
    if !e2e_enabled() {
        return None;
    }
    std::env::var(TEST_DSN_ENV).ok().filter(|s| !s.trim().is_empty())
}
