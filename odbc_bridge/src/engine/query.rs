//! Statement execution protocol.
//!
//! A fresh statement is allocated inside the gate. SQL without parameters is
//! executed directly; otherwise it is prepared, every parameter is bound and
//! the statement is executed, stopping at the first failing step. Only the
//! allocation (and, later, the free) hold the gate.
//!
//! After a successful execute the output-capable parameters are read back in
//! parameter order. Then the statement handle either is freed at once (the
//! caller asked for no result object) or moves into a [`ResultSet`].

use super::connection::ConnectionInner;
use super::result::ResultSet;
use crate::driver::{CallLevelInterface, RawHandle};
use crate::error::{OdbcError, Result};
use crate::handles::OwnedStatement;
use crate::protocol::{BoundParameters, ParamValue, Parameter};
use log::{debug, warn};

/// Query options: SQL, parameters and whether a result object is wanted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    pub sql: String,
    pub params: Vec<Parameter>,
    pub no_results: bool,
}

/// The accepted call shapes of `query`.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryCall {
    Sql(String),
    WithParams(String, Vec<Parameter>),
    Options(QueryOptions),
}

impl From<&str> for QueryCall {
    fn from(sql: &str) -> Self {
        QueryCall::Sql(sql.to_string())
    }
}

impl From<String> for QueryCall {
    fn from(sql: String) -> Self {
        QueryCall::Sql(sql)
    }
}

impl<S: Into<String>> From<(S, Vec<Parameter>)> for QueryCall {
    fn from((sql, params): (S, Vec<Parameter>)) -> Self {
        QueryCall::WithParams(sql.into(), params)
    }
}

impl<S: Into<String>> From<(S, Vec<ParamValue>)> for QueryCall {
    fn from((sql, values): (S, Vec<ParamValue>)) -> Self {
        QueryCall::WithParams(sql.into(), values.into_iter().map(Parameter::input).collect())
    }
}

impl From<QueryOptions> for QueryCall {
    fn from(options: QueryOptions) -> Self {
        QueryCall::Options(options)
    }
}

/// Canonical query request, resolved once from a [`QueryCall`]. Owns copies
/// of every input.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub sql: String,
    pub params: Vec<Parameter>,
    pub no_results: bool,
}

impl From<QueryCall> for QueryRequest {
    fn from(call: QueryCall) -> Self {
        match call {
            QueryCall::Sql(sql) => QueryRequest {
                sql,
                params: Vec::new(),
                no_results: false,
            },
            QueryCall::WithParams(sql, params) => QueryRequest {
                sql,
                params,
                no_results: false,
            },
            QueryCall::Options(o) => QueryRequest {
                sql: o.sql,
                params: o.params,
                no_results: o.no_results,
            },
        }
    }
}

/// Outcome of a blocking query.
#[derive(Debug, Default)]
pub struct QueryOutcome {
    pub result: Option<ResultSet>,
    /// Present only when at least one output-capable parameter was bound.
    pub output_params: Option<Vec<ParamValue>>,
}

/// What a non-blocking query continuation receives.
#[derive(Debug, Default)]
pub struct QueryCompletion {
    pub error: Option<OdbcError>,
    pub result: Option<ResultSet>,
    pub output_params: Option<Vec<ParamValue>>,
}

impl QueryCompletion {
    pub fn from_error(error: OdbcError) -> Self {
        Self {
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// The driver call that makes a statement produce results.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Execution<'a> {
    Sql {
        sql: &'a str,
        params: &'a [Parameter],
    },
    Tables([Option<&'a str>; 4]),
    Columns([Option<&'a str>; 4]),
}

/// A statement after its execution step, still owned by the executor.
pub(crate) struct Executed {
    pub statement: OwnedStatement,
    pub parameters: Vec<BoundParameters>,
    pub error: Option<OdbcError>,
    pub outputs: Option<Vec<ParamValue>>,
    pub can_have_more_results: bool,
}

impl Executed {
    /// Frees the handle now, then the buffers.
    fn discard(self) {
        let Executed {
            statement,
            parameters,
            ..
        } = self;
        if let Err(err) = statement.free() {
            warn!("failed to free statement after execution: {}", err);
        }
        drop(parameters);
    }

    fn into_result(self) -> ResultSet {
        ResultSet::new(
            self.statement,
            self.parameters,
            self.can_have_more_results,
            self.error,
        )
    }
}

/// Runs `execution` on an already allocated statement. The bound buffers
/// are returned whether or not a step failed, since the driver may still
/// reference them.
pub(crate) fn run_on(
    statement: &OwnedStatement,
    execution: Execution<'_>,
) -> (Option<BoundParameters>, Result<()>) {
    let driver = statement.env().driver();
    let stmt = statement.raw();
    match execution {
        Execution::Sql { sql, params } if params.is_empty() => {
            let status = driver
                .exec_direct(stmt, sql)
                .map_err(|_| statement.diagnostics("SQLExecDirect").into());
            (None, status)
        }
        Execution::Sql { sql, params } => {
            if driver.prepare(stmt, sql).is_err() {
                return (None, Err(statement.diagnostics("SQLPrepare").into()));
            }
            let mut bound = BoundParameters::new(params);
            let status = bind_and_execute(driver, statement, stmt, &mut bound);
            (Some(bound), status)
        }
        Execution::Tables([catalog, schema, table, table_type]) => {
            let status = driver
                .tables(stmt, catalog, schema, table, table_type)
                .map_err(|_| statement.diagnostics("SQLTables").into());
            (None, status)
        }
        Execution::Columns([catalog, schema, table, column]) => {
            let status = driver
                .columns(stmt, catalog, schema, table, column)
                .map_err(|_| statement.diagnostics("SQLColumns").into());
            (None, status)
        }
    }
}

pub(crate) fn bind_and_execute(
    driver: &dyn CallLevelInterface,
    statement: &OwnedStatement,
    stmt: RawHandle,
    bound: &mut BoundParameters,
) -> Result<()> {
    // SAFETY: the caller keeps `bound` alive for as long as the statement
    // handle, see `Executed` and `ResultSet` field order.
    if let Err((ordinal, status)) = unsafe { bound.bind(driver, stmt) } {
        debug!("bind of parameter {} failed: {:?}", ordinal, status);
        return Err(statement.diagnostics("SQLBindParameter").into());
    }
    // SAFETY: every bound buffer is owned by `bound`.
    unsafe { driver.execute(stmt) }.map_err(|_| statement.diagnostics("SQLExecute").into())
}

/// Allocates a statement on `conn` and runs `execution` on it. `Err` only
/// when no statement could be allocated.
pub(crate) fn execute(conn: &ConnectionInner, execution: Execution<'_>) -> Result<Executed> {
    let (dbc, can_have_more_results) = {
        let core = conn.core()?;
        (core.native(), core.can_have_more_results)
    };
    let statement = OwnedStatement::allocate(&conn.env, dbc)?;
    let (bound, status) = run_on(&statement, execution);

    let outputs = match (&status, &bound) {
        (Ok(()), Some(b)) if b.has_outputs() => Some(b.read_outputs()),
        _ => None,
    };
    Ok(Executed {
        statement,
        parameters: bound.into_iter().collect(),
        error: status.err(),
        outputs,
        can_have_more_results,
    })
}

/// Non-blocking shape: errors travel inside the completion. With
/// `no_results` the statement is freed before this returns; otherwise the
/// handle moves into the result, even on failure.
pub(crate) fn complete(executed: Result<Executed>, no_results: bool) -> QueryCompletion {
    let executed = match executed {
        Ok(executed) => executed,
        Err(err) => return QueryCompletion::from_error(err),
    };
    if no_results {
        let error = executed.error.clone();
        let outputs = executed.outputs.clone();
        executed.discard();
        return QueryCompletion {
            error,
            result: None,
            output_params: outputs,
        };
    }
    let error = executed.error.clone();
    let outputs = executed.outputs.clone();
    QueryCompletion {
        error,
        result: Some(executed.into_result()),
        output_params: outputs,
    }
}

/// Blocking shape: a failed execution frees the statement and returns the
/// error; no result object is handed out with an error.
pub(crate) fn complete_sync(executed: Executed, no_results: bool) -> Result<QueryOutcome> {
    if let Some(err) = executed.error.clone() {
        executed.discard();
        return Err(err);
    }
    let output_params = executed.outputs.clone();
    if no_results {
        executed.discard();
        return Ok(QueryOutcome {
            result: None,
            output_params,
        });
    }
    Ok(QueryOutcome {
        result: Some(executed.into_result()),
        output_params,
    })
}

pub(crate) fn run_async(conn: &ConnectionInner, request: &QueryRequest) -> QueryCompletion {
    debug!("query: {}", request.sql);
    let executed = execute(
        conn,
        Execution::Sql {
            sql: &request.sql,
            params: &request.params,
        },
    );
    complete(executed, request.no_results)
}

pub(crate) fn run_sync(conn: &ConnectionInner, request: &QueryRequest) -> Result<QueryOutcome> {
    debug!("query (sync): {}", request.sql);
    let executed = execute(
        conn,
        Execution::Sql {
            sql: &request.sql,
            params: &request.params,
        },
    )?;
    complete_sync(executed, request.no_results)
}
