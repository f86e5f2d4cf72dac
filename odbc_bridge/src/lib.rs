//! Connection, statement and result-set operations over an ODBC call-level
//! interface, in blocking (`*_sync`) and non-blocking (dispatcher plus
//! continuation) forms.

pub mod async_bridge;
pub mod driver;
pub mod engine;
pub mod error;
pub mod gate;
pub mod handles;
pub mod protocol;
pub mod security;
#[cfg(feature = "test-helpers")]
pub mod test_helpers;

pub use async_bridge::{Dispatcher, WorkKind, WorkUnit};
pub use driver::{CallLevelInterface, HandleKind, OdbcDriver, ParamDirection, RawHandle, SqlType};
#[cfg(any(test, feature = "test-helpers"))]
pub use driver::{DriverFunction, RecordingDriver};
pub use engine::{
    CommitMode, Connection, ConnectionConfig, ConnectionState, DispatcherConfig, IsolationLevel,
    QueryCall, QueryCompletion, QueryOptions, QueryOutcome, ResultSet, Statement,
};
pub use error::{DiagnosticRecord, DriverError, ErrorCategory, OdbcError, Result};
pub use gate::DriverGate;
pub use handles::{Environment, SharedEnvironment};
pub use protocol::{deserialize_params, serialize_params, ParamValue, Parameter};
