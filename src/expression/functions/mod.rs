//! 函数注册与内置函数库

pub mod builtin;
pub mod registry;
pub mod signature;

pub use builtin::BuiltinFunctions;
pub use registry::{FunctionRegistry, RegisteredFunction};
pub use signature::{FunctionBody, FunctionDefinition, FunctionSignature, FunctionSource};
