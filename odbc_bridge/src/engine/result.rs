use crate::driver::RawHandle;
use crate::error::{OdbcError, Result};
use crate::handles::OwnedStatement;
use crate::protocol::BoundParameters;

/// Owner of an executed statement handle.
///
/// Created by a query, a catalog call or [`crate::Statement::execute`]. If
/// execution failed the result set still owns the handle and carries the
/// error. Dropping or closing it frees the handle exactly once.
pub struct ResultSet {
    // declaration order is drop order: the handle is freed before the
    // parameter buffers it may reference
    statement: OwnedStatement,
    parameters: Vec<BoundParameters>,
    can_have_more_results: bool,
    error: Option<OdbcError>,
}

impl ResultSet {
    pub(crate) fn new(
        statement: OwnedStatement,
        parameters: Vec<BoundParameters>,
        can_have_more_results: bool,
        error: Option<OdbcError>,
    ) -> Self {
        Self {
            statement,
            parameters,
            can_have_more_results,
            error,
        }
    }

    /// The execution failure this result was created with, if any.
    pub fn error(&self) -> Option<&OdbcError> {
        self.error.as_ref()
    }

    pub fn raw_handle(&self) -> RawHandle {
        self.statement.raw()
    }

    /// Fails with an invalid-handle error once the connection was closed,
    /// which releases the statement along with it.
    pub fn column_count(&self) -> Result<i16> {
        let stmt = self.statement.live_raw()?;
        let env = self.statement.env();
        env.driver()
            .num_result_cols(stmt)
            .map_err(|_| self.statement.diagnostics("SQLNumResultCols").into())
    }

    /// Advances to the next result set. Without driver support for multiple
    /// result sets this is `false` and no driver call is made.
    pub fn more_results(&self) -> Result<bool> {
        if !self.can_have_more_results {
            return Ok(false);
        }
        let stmt = self.statement.live_raw()?;
        let env = self.statement.env();
        env.driver()
            .more_results(stmt)
            .map_err(|_| self.statement.diagnostics("SQLMoreResults").into())
    }

    pub fn can_have_more_results(&self) -> bool {
        self.can_have_more_results
    }

    /// Frees the statement handle and reports the outcome.
    pub fn close(self) -> Result<()> {
        let ResultSet {
            statement,
            parameters,
            ..
        } = self;
        let freed = statement.free();
        drop(parameters);
        freed
    }
}

impl std::fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSet")
            .field("statement", &self.statement)
            .field("error", &self.error)
            .finish()
    }
}
