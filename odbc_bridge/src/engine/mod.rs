pub mod catalog;
pub mod config;
pub mod connection;
pub mod query;
pub mod result;
pub mod statement;
pub mod transaction;

pub use catalog::CatalogRequest;
pub use config::{ConnectionConfig, DispatcherConfig};
pub use connection::{Connection, ConnectionState};
pub use query::{QueryCall, QueryCompletion, QueryOptions, QueryOutcome, QueryRequest};
pub use result::ResultSet;
pub use statement::Statement;
pub use transaction::{CommitMode, IsolationLevel};
