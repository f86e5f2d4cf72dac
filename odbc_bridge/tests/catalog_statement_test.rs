mod helpers;

use helpers::recording_connection;
use odbc_bridge::{
    ConnectionState, DiagnosticRecord, Dispatcher, DriverFunction, HandleKind, OdbcError,
    Parameter, QueryCompletion, QueryOutcome, Result, Statement,
};
use std::cell::RefCell;
use std::rc::Rc;

#[test]
fn test_tables_passes_missing_filters_as_null() {
    let (driver, conn) = recording_connection();
    let result = conn.tables_sync(None, Some("informix"), None, Some("TABLE")).unwrap();
    assert_eq!(result.column_count().unwrap(), 5);

    let call = driver
        .calls()
        .into_iter()
        .find(|c| c.function == DriverFunction::Tables)
        .unwrap();
    assert_eq!(call.detail.as_deref(), Some("<null>,informix,<null>,TABLE"));
    drop(result);
    assert_eq!(driver.live_handles(HandleKind::Statement), 0);
}

#[test]
fn test_columns_async_hands_over_result() {
    let (driver, conn) = recording_connection();
    let dispatcher = Dispatcher::new().unwrap();
    let got: Rc<RefCell<Option<QueryCompletion>>> = Rc::new(RefCell::new(None));
    let got_cb = Rc::clone(&got);
    conn.columns(&dispatcher, None, None, Some("orders"), None, move |c| {
        *got_cb.borrow_mut() = Some(c);
    });
    dispatcher.run_until_idle();

    let completion = got.borrow_mut().take().unwrap();
    assert!(completion.error.is_none());
    assert!(completion.output_params.is_none());
    let result = completion.result.unwrap();
    assert_eq!(result.column_count().unwrap(), 18);
    assert_eq!(driver.live_handles(HandleKind::Statement), 1);
}

#[test]
fn test_catalog_failure_sync_frees_statement() {
    let (driver, conn) = recording_connection();
    driver.fail_next(
        DriverFunction::Tables,
        DiagnosticRecord::new("HY090", 0, "Invalid string or buffer length"),
    );
    let err = conn.tables_sync(None, None, None, None).unwrap_err();
    assert_eq!(&err.sqlstate(), b"HY090");
    assert_eq!(driver.live_handles(HandleKind::Statement), 0);
}

#[test]
fn test_statement_async_prepare_bind_execute() {
    let (driver, conn) = recording_connection();
    let dispatcher = Dispatcher::new().unwrap();

    let stmt: Rc<RefCell<Option<Statement>>> = Rc::new(RefCell::new(None));
    let stmt_cb = Rc::clone(&stmt);
    conn.create_statement(&dispatcher, move |r: Result<Statement>| {
        *stmt_cb.borrow_mut() = Some(r.unwrap());
    });
    dispatcher.run_until_idle();
    let stmt = stmt.borrow_mut().take().unwrap();
    let raw = stmt.raw_handle().unwrap();

    let steps = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&steps);
    stmt.prepare(&dispatcher, "SELECT * FROM t WHERE a = ? AND b = ?", move |r| {
        s.borrow_mut().push(r.is_ok())
    });
    dispatcher.run_until_idle();
    let s = Rc::clone(&steps);
    stmt.bind(
        &dispatcher,
        vec![Parameter::input(1), Parameter::input("x")],
        move |r| s.borrow_mut().push(r.is_ok()),
    );
    dispatcher.run_until_idle();
    assert_eq!(*steps.borrow(), vec![true, true]);

    let outcome: Rc<RefCell<Option<Result<QueryOutcome>>>> = Rc::new(RefCell::new(None));
    let o = Rc::clone(&outcome);
    stmt.execute(&dispatcher, move |r| *o.borrow_mut() = Some(r));
    dispatcher.run_until_idle();

    let outcome = outcome.borrow_mut().take().unwrap().unwrap();
    let result = outcome.result.unwrap();
    assert_eq!(result.raw_handle(), raw);
    assert!(stmt.is_transferred());

    drop(stmt);
    assert_eq!(driver.free_count(raw), 0);
    result.close().unwrap();
    assert_eq!(driver.free_count(raw), 1);
}

#[test]
fn test_statement_outlives_connection_close() {
    let (driver, conn) = recording_connection();
    let stmt = conn.create_statement_sync().unwrap();
    let raw = stmt.raw_handle().unwrap();
    // the statement still owns its handle; closing it frees exactly once
    stmt.close_sync().unwrap();
    conn.close_sync().unwrap();
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(driver.free_count(raw), 1);
    assert_eq!(driver.live_handles(HandleKind::Connection), 0);
}

#[test]
fn test_result_outliving_its_connection_is_freed_first() {
    let (driver, conn) = recording_connection();
    let dbc = conn.native_handle().unwrap();
    let result = conn.query_sync("SELECT 1").unwrap().result.unwrap();
    let stmt = result.raw_handle();

    conn.close_sync().unwrap();
    drop(conn);
    assert!(matches!(
        result.column_count(),
        Err(OdbcError::InvalidHandle { kind: HandleKind::Statement, .. })
    ));
    drop(result);

    let freed: Vec<_> = driver
        .calls()
        .into_iter()
        .filter(|c| c.function == DriverFunction::FreeHandle)
        .map(|c| c.handle)
        .collect();
    assert_eq!(freed, vec![stmt, dbc]);
    assert_eq!(driver.free_count(stmt), 1);
    assert!(driver.double_frees().is_empty());
    assert!(driver.implicit_frees().is_empty());
}

#[test]
fn test_statement_after_connection_close_is_invalid() {
    let (driver, conn) = recording_connection();
    let stmt = conn.create_statement_sync().unwrap();
    let raw = stmt.raw_handle().unwrap();

    conn.close_sync().unwrap();
    assert_eq!(driver.free_count(raw), 1);
    assert!(matches!(
        stmt.prepare_sync("SELECT 1"),
        Err(OdbcError::InvalidHandle { .. })
    ));
    stmt.close_sync().unwrap();
    drop(stmt);
    assert_eq!(driver.free_count(raw), 1);
    assert!(driver.double_frees().is_empty());
}
