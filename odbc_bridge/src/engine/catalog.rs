//! Catalog calls (`SQLTables`, `SQLColumns`) run like queries without
//! parameters. A `None` filter is passed to the driver as a null pointer,
//! meaning "no filter".

use super::connection::ConnectionInner;
use super::query::{self, Execution, QueryCompletion};
use super::result::ResultSet;
use crate::error::{OdbcError, Result};
use log::debug;

/// Owned catalog request; copied into the work unit before submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogRequest {
    Tables {
        catalog: Option<String>,
        schema: Option<String>,
        table: Option<String>,
        table_type: Option<String>,
    },
    Columns {
        catalog: Option<String>,
        schema: Option<String>,
        table: Option<String>,
        column: Option<String>,
    },
}

fn owned(filter: Option<&str>) -> Option<String> {
    filter.map(str::to_string)
}

impl CatalogRequest {
    pub fn tables(
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        table_type: Option<&str>,
    ) -> Self {
        CatalogRequest::Tables {
            catalog: owned(catalog),
            schema: owned(schema),
            table: owned(table),
            table_type: owned(table_type),
        }
    }

    pub fn columns(
        catalog: Option<&str>,
        schema: Option<&str>,
        table: Option<&str>,
        column: Option<&str>,
    ) -> Self {
        CatalogRequest::Columns {
            catalog: owned(catalog),
            schema: owned(schema),
            table: owned(table),
            column: owned(column),
        }
    }

    fn execution(&self) -> Execution<'_> {
        match self {
            CatalogRequest::Tables {
                catalog,
                schema,
                table,
                table_type,
            } => Execution::Tables([
                catalog.as_deref(),
                schema.as_deref(),
                table.as_deref(),
                table_type.as_deref(),
            ]),
            CatalogRequest::Columns {
                catalog,
                schema,
                table,
                column,
            } => Execution::Columns([
                catalog.as_deref(),
                schema.as_deref(),
                table.as_deref(),
                column.as_deref(),
            ]),
        }
    }
}

pub(crate) fn run_async(conn: &ConnectionInner, request: &CatalogRequest) -> QueryCompletion {
    debug!("catalog: {:?}", request);
    query::complete(query::execute(conn, request.execution()), false)
}

pub(crate) fn run_sync(conn: &ConnectionInner, request: &CatalogRequest) -> Result<ResultSet> {
    debug!("catalog (sync): {:?}", request);
    let executed = query::execute(conn, request.execution())?;
    let outcome = query::complete_sync(executed, false)?;
    outcome
        .result
        .ok_or_else(|| OdbcError::InternalError("catalog call produced no result".to_string()))
}
