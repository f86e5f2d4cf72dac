pub mod marshal;
pub mod param_value;

pub use crate::driver::{ParamDirection, SqlType};
pub use marshal::{bind_parameters, BoundParameters, DEFAULT_OUTPUT_BUFFER_LEN};
pub use param_value::{deserialize_params, serialize_params, ParamValue, Parameter};
