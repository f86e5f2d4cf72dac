use crate::driver::{ParamDirection, SqlType};
use crate::error::{OdbcError, Result};
use serde::Serialize;

const TAG_NULL: u8 = 0;
const TAG_STRING: u8 = 1;
const TAG_INTEGER: u8 = 2;
const TAG_BIGINT: u8 = 3;
const TAG_DECIMAL: u8 = 4;
const TAG_BINARY: u8 = 5;
const TAG_DOUBLE: u8 = 6;

/// A caller-visible value, either bound as a parameter or read back from an
/// output-capable parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Integer(i32),
    BigInt(i64),
    Double(f64),
    /// Exact numeric carried as text so no precision is lost.
    Decimal(String),
    String(String),
    Binary(Vec<u8>),
}

impl ParamValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }

    /// SQL type used when the caller does not declare one.
    pub fn default_sql_type(&self) -> SqlType {
        match self {
            ParamValue::Null | ParamValue::String(_) => SqlType::VarChar,
            ParamValue::Integer(_) => SqlType::Integer,
            ParamValue::BigInt(_) => SqlType::BigInt,
            ParamValue::Double(_) => SqlType::Double,
            ParamValue::Decimal(_) => SqlType::Decimal,
            ParamValue::Binary(_) => SqlType::VarBinary,
        }
    }

    /// Tagged encoding used by hosts that ship parameter lists as bytes:
    /// `[tag:1][len:4 LE][payload:len]`.
    pub fn serialize(&self) -> Vec<u8> {
        let (tag, payload): (u8, Vec<u8>) = match self {
            ParamValue::Null => (TAG_NULL, Vec::new()),
            ParamValue::String(s) => (TAG_STRING, s.as_bytes().to_vec()),
            ParamValue::Integer(n) => (TAG_INTEGER, n.to_le_bytes().to_vec()),
            ParamValue::BigInt(n) => (TAG_BIGINT, n.to_le_bytes().to_vec()),
            ParamValue::Double(n) => (TAG_DOUBLE, n.to_le_bytes().to_vec()),
            ParamValue::Decimal(s) => (TAG_DECIMAL, s.as_bytes().to_vec()),
            ParamValue::Binary(b) => (TAG_BINARY, b.clone()),
        };
        let mut out = Vec::with_capacity(5 + payload.len());
        out.push(tag);
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&payload);
        out
    }

    /// Decodes one value, returning it with the number of bytes consumed.
    pub fn deserialize(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < 5 {
            return Err(OdbcError::ValidationError(
                "ParamValue buffer too short".to_string(),
            ));
        }
        let tag = data[0];
        let len = u32::from_le_bytes([data[1], data[2], data[3], data[4]]) as usize;
        let consumed = 5usize.saturating_add(len);
        if data.len() < consumed {
            return Err(OdbcError::ValidationError(
                "ParamValue buffer truncated".to_string(),
            ));
        }
        let payload = &data[5..consumed];

        let value = match tag {
            TAG_NULL => ParamValue::Null,
            TAG_STRING => ParamValue::String(utf8(payload, "String")?),
            TAG_DECIMAL => ParamValue::Decimal(utf8(payload, "Decimal")?),
            TAG_INTEGER => ParamValue::Integer(i32::from_le_bytes(fixed(payload, "Integer")?)),
            TAG_BIGINT => ParamValue::BigInt(i64::from_le_bytes(fixed(payload, "BigInt")?)),
            TAG_DOUBLE => ParamValue::Double(f64::from_le_bytes(fixed(payload, "Double")?)),
            TAG_BINARY => ParamValue::Binary(payload.to_vec()),
            other => {
                return Err(OdbcError::ValidationError(format!(
                    "Unknown ParamValue tag: {}",
                    other
                )))
            }
        };
        Ok((value, consumed))
    }
}

fn utf8(payload: &[u8], variant: &str) -> Result<String> {
    std::str::from_utf8(payload)
        .map(str::to_string)
        .map_err(|_| OdbcError::ValidationError(format!("Invalid UTF-8 in ParamValue::{}", variant)))
}

fn fixed<const N: usize>(payload: &[u8], variant: &str) -> Result<[u8; N]> {
    payload.try_into().map_err(|_| {
        OdbcError::ValidationError(format!("ParamValue::{} expected {} bytes", variant, N))
    })
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Integer(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::BigInt(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Double(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::String(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::String(v)
    }
}

impl From<Vec<u8>> for ParamValue {
    fn from(v: Vec<u8>) -> Self {
        ParamValue::Binary(v)
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(ParamValue::Null)
    }
}

/// One bound parameter: value, direction and optional declared type/size.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub value: ParamValue,
    pub direction: ParamDirection,
    pub sql_type: Option<SqlType>,
    /// Declared column size; for output text/binary this sizes the buffer.
    pub length: Option<usize>,
    /// Declared scale; decimal text without one is bound with the scale it
    /// is written in.
    pub decimal_digits: Option<i16>,
}

impl Parameter {
    pub fn input(value: impl Into<ParamValue>) -> Self {
        Self::with_direction(value.into(), ParamDirection::Input)
    }

    pub fn input_output(value: impl Into<ParamValue>) -> Self {
        Self::with_direction(value.into(), ParamDirection::InputOutput)
    }

    /// Output-only parameter. `template` selects the buffer type; its
    /// content is not sent to the driver.
    pub fn output(template: impl Into<ParamValue>) -> Self {
        Self::with_direction(template.into(), ParamDirection::Output)
    }

    fn with_direction(value: ParamValue, direction: ParamDirection) -> Self {
        Self {
            value,
            direction,
            sql_type: None,
            length: None,
            decimal_digits: None,
        }
    }

    pub fn with_sql_type(mut self, sql_type: SqlType) -> Self {
        self.sql_type = Some(sql_type);
        self
    }

    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_decimal_digits(mut self, digits: i16) -> Self {
        self.decimal_digits = Some(digits);
        self
    }

    pub fn sql_type(&self) -> SqlType {
        self.sql_type
            .unwrap_or_else(|| self.value.default_sql_type())
    }
}

impl From<ParamValue> for Parameter {
    fn from(value: ParamValue) -> Self {
        Parameter::input(value)
    }
}

pub fn serialize_params(params: &[ParamValue]) -> Vec<u8> {
    params.iter().flat_map(|p| p.serialize()).collect()
}

pub fn deserialize_params(data: &[u8]) -> Result<Vec<ParamValue>> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let (p, n) = ParamValue::deserialize(&data[offset..])?;
        out.push(p);
        offset += n;
    }
    Ok(out)
}
