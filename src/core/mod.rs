pub mod error;
pub mod value;

pub use error::{DaoError, DaoResult, ErrorCategory};
pub use value::{Value, ValueType};
