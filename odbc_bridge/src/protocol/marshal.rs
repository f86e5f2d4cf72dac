//! Parameter buffers for prepare/bind/execute.
//!
//! Every [`Parameter`] becomes one heap buffer plus a boxed length/indicator
//! cell. Both stay at a fixed address for as long as the owning
//! [`BoundParameters`] lives, which must cover the driver's use of the
//! statement (execute and output retrieval).

use super::param_value::{ParamValue, Parameter};
use crate::driver::{
    CType, CallLevelInterface, CallResult, ParamDirection, ParameterBinding, RawHandle, SqlType,
    NULL_DATA,
};

/// Buffer size for variable-length output parameters without a declared length.
pub const DEFAULT_OUTPUT_BUFFER_LEN: usize = 8192;

#[derive(Debug)]
struct ParameterBuffer {
    direction: ParamDirection,
    c_type: CType,
    sql_type: SqlType,
    column_size: usize,
    decimal_digits: i16,
    data: Vec<u8>,
    indicator: Box<isize>,
}

impl ParameterBuffer {
    fn new(param: &Parameter) -> Self {
        let sql_type = param.sql_type();
        let c_type = c_type_for(&param.value, sql_type);
        let direction = param.direction;
        let send_value = direction.has_input() && !param.value.is_null();

        let mut decimal_digits = param.decimal_digits.unwrap_or(0);
        let (data, indicator, column_size) = match c_type {
            CType::SLong => {
                let v = match (&param.value, send_value) {
                    (ParamValue::Integer(v), true) => *v,
                    _ => 0,
                };
                (v.to_ne_bytes().to_vec(), 4, 10)
            }
            CType::SBigInt => {
                let v = match (&param.value, send_value) {
                    (ParamValue::BigInt(v), true) => *v,
                    _ => 0,
                };
                (v.to_ne_bytes().to_vec(), 8, 19)
            }
            CType::Double => {
                let v = match (&param.value, send_value) {
                    (ParamValue::Double(v), true) => *v,
                    _ => 0.0,
                };
                (v.to_ne_bytes().to_vec(), 8, 15)
            }
            CType::Char => {
                let text: &[u8] = match (&param.value, send_value) {
                    (ParamValue::String(s), true) | (ParamValue::Decimal(s), true) => s.as_bytes(),
                    _ => &[],
                };
                let capacity = variable_capacity(direction, param.length, text.len());
                // +1 for the terminating NUL
                let mut data = vec![0u8; capacity + 1];
                data[..text.len()].copy_from_slice(text);
                let mut size = param.length.unwrap_or(capacity).max(1);
                if let ParamValue::Decimal(d) = &param.value {
                    if let Some((precision, scale)) = decimal_shape(d) {
                        size = param.length.unwrap_or(precision);
                        decimal_digits = param.decimal_digits.unwrap_or(scale);
                    }
                }
                (data, text.len() as isize, size)
            }
            CType::Binary => {
                let bytes: &[u8] = match (&param.value, send_value) {
                    (ParamValue::Binary(b), true) => b,
                    _ => &[],
                };
                let capacity = variable_capacity(direction, param.length, bytes.len()).max(1);
                let mut data = vec![0u8; capacity];
                data[..bytes.len()].copy_from_slice(bytes);
                let size = param.length.unwrap_or(capacity);
                (data, bytes.len() as isize, size)
            }
        };

        let indicator = if send_value { indicator } else { NULL_DATA };

        Self {
            direction,
            c_type,
            sql_type,
            column_size,
            decimal_digits,
            data,
            indicator: Box::new(indicator),
        }
    }

    fn binding(&mut self) -> ParameterBinding {
        ParameterBinding {
            direction: self.direction,
            c_type: self.c_type,
            sql_type: self.sql_type,
            column_size: self.column_size,
            decimal_digits: self.decimal_digits,
            value_ptr: self.data.as_mut_ptr(),
            buffer_length: self.data.len() as isize,
            indicator_ptr: &mut *self.indicator as *mut isize,
        }
    }

    fn read_back(&self) -> ParamValue {
        let indicator = *self.indicator;
        if indicator == NULL_DATA {
            return ParamValue::Null;
        }
        match self.c_type {
            CType::SLong => ParamValue::Integer(i32::from_ne_bytes(self.fixed())),
            CType::SBigInt => ParamValue::BigInt(i64::from_ne_bytes(self.fixed())),
            CType::Double => ParamValue::Double(f64::from_ne_bytes(self.fixed())),
            CType::Char => {
                // never past the NUL terminator slot
                let limit = self.data.len().saturating_sub(1);
                let end = if indicator >= 0 {
                    (indicator as usize).min(limit)
                } else {
                    limit
                };
                let raw = if indicator >= 0 {
                    &self.data[..end]
                } else {
                    // no total length reported; the driver NUL-terminates
                    let raw = &self.data[..end];
                    match raw.iter().position(|b| *b == 0) {
                        Some(nul) => &raw[..nul],
                        None => raw,
                    }
                };
                let text = String::from_utf8_lossy(raw).into_owned();
                match self.sql_type {
                    SqlType::Decimal | SqlType::Numeric => ParamValue::Decimal(text),
                    _ => ParamValue::String(text),
                }
            }
            CType::Binary => {
                let end = if indicator >= 0 {
                    (indicator as usize).min(self.data.len())
                } else {
                    self.data.len()
                };
                ParamValue::Binary(self.data[..end].to_vec())
            }
        }
    }

    fn fixed<const N: usize>(&self) -> [u8; N] {
        let mut out = [0u8; N];
        let n = N.min(self.data.len());
        out[..n].copy_from_slice(&self.data[..n]);
        out
    }
}

/// Precision and scale of decimal text such as `-10.50`: every digit counts
/// towards the precision, those after the point towards the scale.
fn decimal_shape(text: &str) -> Option<(usize, i16)> {
    let digits = text.trim().trim_start_matches(['+', '-']);
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }
    let precision = (whole.len() + fraction.len()).max(1);
    Some((precision, fraction.len().min(i16::MAX as usize) as i16))
}

fn variable_capacity(direction: ParamDirection, declared: Option<usize>, input_len: usize) -> usize {
    if direction.has_output() {
        declared
            .unwrap_or(DEFAULT_OUTPUT_BUFFER_LEN)
            .max(input_len)
    } else {
        input_len
    }
}

fn c_type_for(value: &ParamValue, sql_type: SqlType) -> CType {
    match value {
        ParamValue::Integer(_) => CType::SLong,
        ParamValue::BigInt(_) => CType::SBigInt,
        ParamValue::Double(_) => CType::Double,
        ParamValue::Decimal(_) | ParamValue::String(_) => CType::Char,
        ParamValue::Binary(_) => CType::Binary,
        ParamValue::Null => match sql_type {
            SqlType::Integer | SqlType::SmallInt | SqlType::TinyInt | SqlType::Bit => CType::SLong,
            SqlType::BigInt => CType::SBigInt,
            SqlType::Double | SqlType::Float | SqlType::Real => CType::Double,
            SqlType::Binary | SqlType::VarBinary | SqlType::LongVarBinary => CType::Binary,
            _ => CType::Char,
        },
    }
}

/// Native buffers for one statement's parameter list, in ordinal order.
#[derive(Debug, Default)]
pub struct BoundParameters {
    buffers: Vec<ParameterBuffer>,
}

impl BoundParameters {
    pub fn new(params: &[Parameter]) -> Self {
        Self {
            buffers: params.iter().map(ParameterBuffer::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn has_outputs(&self) -> bool {
        self.buffers.iter().any(|b| b.direction.has_output())
    }

    /// Registers every buffer at its 1-based ordinal, stopping at the first
    /// failure. On failure the ordinal that was rejected is returned.
    ///
    /// # Safety
    ///
    /// `self` must outlive every driver call on `statement` that may touch
    /// the bound buffers (execute, output retrieval) and must not be dropped
    /// before the statement is freed or re-bound.
    pub unsafe fn bind(
        &mut self,
        driver: &dyn CallLevelInterface,
        statement: RawHandle,
    ) -> Result<(), (u16, crate::driver::SqlStatus)> {
        for (index, buffer) in self.buffers.iter_mut().enumerate() {
            let ordinal = (index + 1) as u16;
            driver
                .bind_parameter(statement, ordinal, buffer.binding())
                .map_err(|status| (ordinal, status))?;
        }
        Ok(())
    }

    /// Values of the output-capable parameters, in parameter order.
    pub fn read_outputs(&self) -> Vec<ParamValue> {
        self.buffers
            .iter()
            .filter(|b| b.direction.has_output())
            .map(ParameterBuffer::read_back)
            .collect()
    }
}

/// Builds buffers for `params` and binds them to `statement`.
///
/// The returned buffers must be kept alive as described on
/// [`BoundParameters::bind`], whether or not binding succeeded.
///
/// # Safety
///
/// See [`BoundParameters::bind`].
pub unsafe fn bind_parameters(
    driver: &dyn CallLevelInterface,
    statement: RawHandle,
    params: &[Parameter],
) -> (BoundParameters, CallResult) {
    let mut bound = BoundParameters::new(params);
    let status = bound.bind(driver, statement).map_err(|(_, status)| status);
    (bound, status)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(param: Parameter) -> ParamValue {
        let bound = BoundParameters::new(&[param]);
        let mut outputs = bound.read_outputs();
        assert_eq!(outputs.len(), 1);
        outputs.remove(0)
    }

    #[test]
    fn test_input_output_buffers_read_back_their_input() {
        let values = vec![
            ParamValue::Integer(-42),
            ParamValue::BigInt(9_000_000_000),
            ParamValue::Double(3.25),
            ParamValue::String("hello".to_string()),
            ParamValue::Decimal("10.50".to_string()),
            ParamValue::Binary(vec![1, 2, 3, 0, 4]),
            ParamValue::Null,
        ];
        for value in values {
            let param = Parameter::input_output(value.clone());
            assert_eq!(roundtrip(param), value);
        }
    }

    #[test]
    fn test_output_only_reads_null_until_written() {
        assert_eq!(roundtrip(Parameter::output(0)), ParamValue::Null);
        assert_eq!(roundtrip(Parameter::output("")), ParamValue::Null);
    }

    #[test]
    fn test_input_only_parameters_have_no_outputs() {
        let bound = BoundParameters::new(&[Parameter::input(1), Parameter::input("x")]);
        assert!(!bound.has_outputs());
        assert!(bound.read_outputs().is_empty());
        assert_eq!(bound.len(), 2);
    }

    #[test]
    fn test_outputs_keep_parameter_order() {
        let bound = BoundParameters::new(&[
            Parameter::input_output(1),
            Parameter::input(2),
            Parameter::input_output("b"),
        ]);
        assert_eq!(
            bound.read_outputs(),
            vec![ParamValue::Integer(1), ParamValue::String("b".to_string())]
        );
    }

    #[test]
    fn test_output_text_buffer_uses_default_length() {
        let mut buffer = ParameterBuffer::new(&Parameter::output(""));
        assert_eq!(buffer.data.len(), DEFAULT_OUTPUT_BUFFER_LEN + 1);
        assert_eq!(buffer.binding().buffer_length, (DEFAULT_OUTPUT_BUFFER_LEN + 1) as isize);

        let buffer = ParameterBuffer::new(&Parameter::output("").with_length(16));
        assert_eq!(buffer.data.len(), 17);

        let buffer = ParameterBuffer::new(&Parameter::output(Vec::<u8>::new()));
        assert_eq!(buffer.data.len(), DEFAULT_OUTPUT_BUFFER_LEN);
    }

    #[test]
    fn test_input_text_buffer_is_sized_to_value() {
        let buffer = ParameterBuffer::new(&Parameter::input("abc"));
        assert_eq!(buffer.data, b"abc\0".to_vec());
        assert_eq!(*buffer.indicator, 3);
        assert_eq!(buffer.c_type, CType::Char);
    }

    #[test]
    fn test_null_uses_declared_sql_type_for_c_type() {
        let buffer = ParameterBuffer::new(
            &Parameter::input(ParamValue::Null).with_sql_type(SqlType::Integer),
        );
        assert_eq!(buffer.c_type, CType::SLong);
        assert_eq!(*buffer.indicator, NULL_DATA);

        let buffer = ParameterBuffer::new(&Parameter::input(ParamValue::Null));
        assert_eq!(buffer.c_type, CType::Char);
    }

    #[test]
    fn test_text_read_back_is_bounded_by_indicator() {
        let mut buffer = ParameterBuffer::new(&Parameter::input_output("abcdef"));
        *buffer.indicator = 3;
        assert_eq!(buffer.read_back(), ParamValue::String("abc".to_string()));

        // indicator larger than the buffer means truncated data
        *buffer.indicator = 10_000;
        let ParamValue::String(s) = buffer.read_back() else {
            panic!("expected string");
        };
        assert!(s.starts_with("abcdef"));
    }

    #[test]
    fn test_text_read_back_keeps_embedded_nul() {
        let mut buffer = ParameterBuffer::new(&Parameter::output("").with_length(8));
        buffer.data[..3].copy_from_slice(b"a\0b");
        *buffer.indicator = 3;
        assert_eq!(buffer.read_back(), ParamValue::String("a\0b".to_string()));
    }

    #[test]
    fn test_decimal_binds_with_its_written_scale() {
        let mut buffer = ParameterBuffer::new(&Parameter::input(ParamValue::Decimal(
            "10.50".to_string(),
        )));
        let binding = buffer.binding();
        assert_eq!(binding.sql_type, SqlType::Decimal);
        assert_eq!(binding.decimal_digits, 2);
        assert_eq!(binding.column_size, 4);

        let mut buffer = ParameterBuffer::new(&Parameter::input(ParamValue::Decimal(
            "-7".to_string(),
        )));
        let binding = buffer.binding();
        assert_eq!(binding.decimal_digits, 0);
        assert_eq!(binding.column_size, 1);
    }

    #[test]
    fn test_declared_decimal_shape_wins() {
        let mut buffer = ParameterBuffer::new(
            &Parameter::input(ParamValue::Decimal("10.5".to_string()))
                .with_length(12)
                .with_decimal_digits(4),
        );
        let binding = buffer.binding();
        assert_eq!(binding.column_size, 12);
        assert_eq!(binding.decimal_digits, 4);
    }

    #[test]
    fn test_bound_parameters_move_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BoundParameters>();
    }

    #[test]
    fn test_fixed_width_bindings() {
        let mut buffer = ParameterBuffer::new(&Parameter::input(7i64));
        let binding = buffer.binding();
        assert_eq!(binding.c_type, CType::SBigInt);
        assert_eq!(binding.sql_type, SqlType::BigInt);
        assert_eq!(binding.buffer_length, 8);
        assert_eq!(unsafe { *binding.indicator_ptr }, 8);
    }
}
