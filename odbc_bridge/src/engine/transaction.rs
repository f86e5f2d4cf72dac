use super::connection::ConnectionInner;
use crate::driver::{CompletionType, ConnectAttribute, HandleKind};
use crate::error::{OdbcError, Result};
use log::{debug, warn};
use serde::Serialize;

/// `SQL_ATTR_TXN_ISOLATION` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::ReadUncommitted),
            2 => Some(Self::ReadCommitted),
            4 => Some(Self::RepeatableRead),
            8 => Some(Self::Serializable),
            _ => None,
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::ReadUncommitted => 1,
            Self::ReadCommitted => 2,
            Self::RepeatableRead => 4,
            Self::Serializable => 8,
        }
    }
}

impl Default for IsolationLevel {
    fn default() -> Self {
        Self::ReadCommitted
    }
}

impl TryFrom<u32> for IsolationLevel {
    type Error = OdbcError;

    fn try_from(code: u32) -> Result<Self> {
        Self::from_code(code).ok_or_else(|| {
            OdbcError::InvalidArgument(format!("unknown isolation level {}", code))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommitMode {
    Auto,
    Manual,
}

/// Switches the connection to manual commit.
pub(crate) fn begin(conn: &ConnectionInner) -> Result<()> {
    let mut core = conn.core()?;
    let dbc = core.native();
    let driver = conn.env.driver();
    driver
        .set_connect_attr(dbc, ConnectAttribute::AutoCommit(false))
        .map_err(|_| conn.env.diagnostics(HandleKind::Connection, dbc, "SQLSetConnectAttr"))?;
    core.commit_mode = CommitMode::Manual;
    debug!("connection {} in manual commit mode", dbc);
    Ok(())
}

/// Commits or rolls back, then always restores autocommit. When both steps
/// fail the end-transaction failure is returned.
pub(crate) fn end(conn: &ConnectionInner, rollback: bool) -> Result<()> {
    let mut core = conn.core()?;
    let dbc = core.native();
    let driver = conn.env.driver();
    let completion = if rollback {
        CompletionType::Rollback
    } else {
        CompletionType::Commit
    };

    let ended = driver
        .end_transaction(dbc, completion)
        .map_err(|_| conn.env.diagnostics(HandleKind::Connection, dbc, "SQLEndTran"));
    let reset = driver
        .set_connect_attr(dbc, ConnectAttribute::AutoCommit(true))
        .map_err(|_| conn.env.diagnostics(HandleKind::Connection, dbc, "SQLSetConnectAttr"));

    if reset.is_ok() {
        core.commit_mode = CommitMode::Auto;
    }
    match (ended, reset) {
        (Err(first), Err(second)) => {
            warn!("autocommit reset also failed after {:?}: {}", completion, second);
            Err(first.into())
        }
        (Err(err), Ok(())) | (Ok(()), Err(err)) => Err(err.into()),
        (Ok(()), Ok(())) => Ok(()),
    }
}

pub(crate) fn set_isolation_level(conn: &ConnectionInner, level: IsolationLevel) -> Result<()> {
    let core = conn.core()?;
    let dbc = core.native();
    conn.env
        .driver()
        .set_connect_attr(dbc, ConnectAttribute::TxnIsolation(level.code()))
        .map_err(|_| conn.env.diagnostics(HandleKind::Connection, dbc, "SQLSetConnectAttr"))?;
    debug!("connection {} isolation {:?}", dbc, level);
    Ok(())
}
