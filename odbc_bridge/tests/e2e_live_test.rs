//! Tests against a real driver manager. Enable with ENABLE_E2E_TESTS=1 and
//! ODBC_TEST_DSN (a `.env` file is honoured).

mod helpers;

use helpers::{live_connection, should_run_e2e_tests};
use odbc_bridge::{Dispatcher, QueryOptions};
use std::cell::RefCell;
use std::rc::Rc;

#[test]
#[ignore]
fn test_live_open_query_close() {
    if !should_run_e2e_tests() {
        eprintln!("[WARN] Skipping: ENABLE_E2E_TESTS / ODBC_TEST_DSN not set");
        return;
    }
    let conn = live_connection().expect("live connection");
    assert!(conn.is_connected());

    let outcome = conn.query_sync("SELECT 1 FROM systables WHERE tabid = 1").unwrap();
    let result = outcome.result.unwrap();
    assert_eq!(result.column_count().unwrap(), 1);
    result.close().unwrap();

    conn.close_sync().unwrap();
    conn.close_sync().unwrap();
}

#[test]
#[ignore]
fn test_live_async_query_no_results() {
    if !should_run_e2e_tests() {
        return;
    }
    let conn = live_connection().expect("live connection");
    let dispatcher = Dispatcher::new().unwrap();
    let ok = Rc::new(RefCell::new(None));
    let ok_cb = Rc::clone(&ok);
    conn.query(
        &dispatcher,
        QueryOptions {
            sql: "SELECT 1 FROM systables WHERE tabid = 1".to_string(),
            params: Vec::new(),
            no_results: true,
        },
        move |c| *ok_cb.borrow_mut() = Some(c.is_ok() && c.result.is_none()),
    )
    .unwrap();
    dispatcher.run_until_idle();
    assert_eq!(*ok.borrow(), Some(true));
}

#[test]
#[ignore]
fn test_live_malformed_sql_error() {
    if !should_run_e2e_tests() {
        return;
    }
    let conn = live_connection().expect("live connection");
    let err = conn.query_sync("SELEC FROM").unwrap_err();
    assert!(!err.message().is_empty());
    let json = err.as_driver_error().unwrap().to_json().unwrap();
    assert!(json.contains("sqlstate"));
}
