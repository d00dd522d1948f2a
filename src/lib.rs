//! sqlweave - a query templating and execution engine
//!
//! Query definitions are compiled into element trees holding literal text,
//! inline substitutions, bound-parameter placeholders, inline function calls
//! and conditional nodes. A caller supplied filter drives a multi-phase
//! renderer that produces parameterized SQL plus an ordered parameter list,
//! which the query manager executes inside nested, thread scoped transactions.

pub mod config;
pub mod core;
pub mod expression;
pub mod query;
pub mod storage;
pub mod transaction;
pub mod utils;

pub use crate::core::error::{DaoError, DaoResult};
pub use crate::core::value::{Value, ValueType};
