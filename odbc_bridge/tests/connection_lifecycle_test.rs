mod helpers;

use helpers::{init_logging, recording_environment};
use odbc_bridge::{
    CommitMode, Connection, ConnectionConfig, ConnectionState, DiagnosticRecord, Dispatcher,
    DispatcherConfig, DriverFunction, Environment, HandleKind, RecordingDriver,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn test_async_open_delivers_success_and_connects() {
    let (driver, env) = recording_environment();
    let dispatcher = Dispatcher::new().unwrap();
    let conn = Connection::new(&env).unwrap();
    let got = Rc::new(RefCell::new(None));
    let got_cb = Rc::clone(&got);

    conn.open(&dispatcher, "DSN=valid", move |result| {
        *got_cb.borrow_mut() = Some(result);
    })
    .unwrap();
    assert_eq!(dispatcher.run_until_idle(), 1);

    assert!(got.borrow_mut().take().unwrap().is_ok());
    assert!(conn.is_connected());
    assert_eq!(conn.commit_mode().unwrap(), CommitMode::Auto);
    let fake = driver.connection(conn.native_handle().unwrap()).unwrap();
    assert!(fake.connected);
}

#[test]
fn test_async_open_argument_error_is_immediate() {
    let (_driver, env) = recording_environment();
    let dispatcher = Dispatcher::new().unwrap();
    let conn = Connection::new(&env).unwrap();
    let result = conn.open(&dispatcher, "", |_| panic!("continuation must not run"));
    assert!(result.is_err());
    assert_eq!(dispatcher.pending(), 0);
}

#[test]
fn test_async_open_failure_reaches_continuation() {
    let (driver, env) = recording_environment();
    driver.fail_next(
        DriverFunction::DriverConnect,
        DiagnosticRecord::new("28000", -951, "Incorrect password"),
    );
    let dispatcher = Dispatcher::new().unwrap();
    let conn = Connection::new(&env).unwrap();
    let got = Rc::new(RefCell::new(None));
    let got_cb = Rc::clone(&got);
    conn.open(&dispatcher, "DSN=x;PWD=wrong", move |r| *got_cb.borrow_mut() = Some(r))
        .unwrap();
    dispatcher.run_until_idle();

    let err = got.borrow_mut().take().unwrap().unwrap_err();
    let driver_err = err.as_driver_error().unwrap();
    assert_eq!(driver_err.sqlstate, "28000");
    assert_eq!(driver_err.native_code, -951);
    assert!(!driver_err.message.is_empty());
    assert_eq!(conn.state(), ConnectionState::Unopened);
    assert_eq!(driver.live_handles(HandleKind::Connection), 1);

    drop(conn);
    assert_eq!(driver.live_handles(HandleKind::Connection), 0);
}

#[test]
fn test_connect_timeout_forwarding() {
    let (driver, env) = recording_environment();
    for (configured, forwarded) in [
        (1, Some(1)),
        (30, Some(30)),
        (32767, Some(32767)),
        (32768, Some(30)),
        (100_000, Some(30)),
        (-5, Some(30)),
        (0, None),
    ] {
        let config = ConnectionConfig {
            connect_timeout: configured,
            ..ConnectionConfig::default()
        };
        let conn = Connection::with_config(&env, config).unwrap();
        conn.open_sync("DSN=test").unwrap();
        let fake = driver.connection(conn.native_handle().unwrap()).unwrap();
        assert_eq!(fake.login_timeout, forwarded, "timeout {}", configured);
        conn.close_sync().unwrap();
    }
}

#[test]
fn test_close_never_opened_and_closed_is_idempotent() {
    let (driver, env) = recording_environment();
    let dispatcher = Dispatcher::new().unwrap();

    let never_opened = Connection::new(&env).unwrap();
    never_opened.close_sync().unwrap();
    never_opened.close_sync().unwrap();

    let opened = Connection::new(&env).unwrap();
    opened.open_sync("DSN=test").unwrap();
    let closes = Rc::new(RefCell::new(Vec::new()));
    for _ in 0..3 {
        let closes = Rc::clone(&closes);
        opened.close(&dispatcher, move |r| closes.borrow_mut().push(r.is_ok()));
        dispatcher.run_until_idle();
    }
    assert_eq!(*closes.borrow(), vec![true, true, true]);
    assert_eq!(opened.state(), ConnectionState::Closed);

    drop(never_opened);
    drop(opened);
    assert_eq!(driver.calls_to(DriverFunction::Disconnect), 1);
    assert!(driver.double_frees().is_empty());
    assert_eq!(driver.live_handles(HandleKind::Connection), 0);
}

#[test]
fn test_concurrent_opens_are_serialized_and_keep_their_probe() {
    let (driver, env) = recording_environment();
    driver.set_manager_delay(Duration::from_millis(20));
    driver.fail_next(
        DriverFunction::GetFunctions,
        DiagnosticRecord::new("HY000", 0, "probe failed"),
    );
    let dispatcher = Dispatcher::with_config(&DispatcherConfig::new(4)).unwrap();
    let first = Connection::new(&env).unwrap();
    let second = Connection::new(&env).unwrap();
    let opened = Rc::new(RefCell::new(0));

    for conn in [&first, &second] {
        let opened = Rc::clone(&opened);
        conn.open(&dispatcher, "DSN=test", move |r| {
            r.unwrap();
            *opened.borrow_mut() += 1;
        })
        .unwrap();
    }
    assert_eq!(dispatcher.run_until_idle(), 2);

    assert_eq!(*opened.borrow(), 2);
    assert_eq!(driver.max_concurrent_manager_calls(), 1);
    // exactly one open saw the failed probe
    let probes = [first.can_have_more_results(), second.can_have_more_results()];
    assert_eq!(probes.iter().filter(|p| **p).count(), 1);
    assert!(first.is_connected() && second.is_connected());
}

#[test]
fn test_environments_sharing_a_gate() {
    init_logging();
    let driver = Arc::new(RecordingDriver::new());
    let first = Environment::new(driver.clone()).unwrap();
    let second = Environment::with_gate(driver.clone(), first.gate().clone()).unwrap();
    assert!(first.gate().same_as(second.gate()));
    assert_eq!(driver.allocations(HandleKind::Environment), 2);
}

#[test]
fn test_connection_kept_alive_until_continuation_runs() {
    let (driver, env) = recording_environment();
    let dispatcher = Dispatcher::new().unwrap();
    let conn = Connection::new(&env).unwrap();
    let dbc = conn.native_handle().unwrap();
    conn.open(&dispatcher, "DSN=test", |r| r.unwrap()).unwrap();
    drop(conn);

    assert_eq!(driver.free_count(dbc), 0);
    dispatcher.run_until_idle();
    assert_eq!(driver.free_count(dbc), 1);
}
