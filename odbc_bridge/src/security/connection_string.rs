use crate::error::{OdbcError, Result};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

const SECRET_KEYS: [&str; 3] = ["PWD", "PASSWORD", "AUTHENTICATION"];

/// Owned copy of a connection string. The bytes are wiped when dropped and
/// secret attributes never appear in `Debug`/`Display` output.
#[derive(Clone, ZeroizeOnDrop)]
pub struct ConnectionString {
    text: String,
}

impl ConnectionString {
    /// Copies `text`, prefixed by `driver_tag` when one is configured.
    pub fn compose(driver_tag: Option<&str>, text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Err(OdbcError::EmptyConnectionString);
        }
        let text = match driver_tag.filter(|t| !t.is_empty()) {
            Some(tag) if tag.ends_with(';') => format!("{}{}", tag, text),
            Some(tag) => format!("{};{}", tag, text),
            None => text.to_string(),
        };
        Ok(Self { text })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The string with secret attribute values masked.
    pub fn redacted(&self) -> String {
        self.text
            .split(';')
            .map(|pair| match pair.split_once('=') {
                Some((key, _)) if SECRET_KEYS.contains(&key.trim().to_ascii_uppercase().as_str()) => {
                    format!("{}=***", key)
                }
                _ => pair.to_string(),
            })
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl Zeroize for ConnectionString {
    fn zeroize(&mut self) {
        self.text.zeroize();
    }
}

impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConnectionString")
            .field(&self.redacted())
            .finish()
    }
}

impl fmt::Display for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}
