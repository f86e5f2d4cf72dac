mod connection_string;

pub use connection_string::ConnectionString;
