//! # lumen-ir
//!
//! In-memory form of GPU-lowered programs: modules of functions whose bodies
//! are operations from the `lmhlo`, `mhlo`, `std` and `lmhlo_gpu` dialects.
//!
//! - [`Context`] holds the dialect registry and parses textual IR
//! - [`ModuleBuilder`] / [`FunctionBuilder`] build modules in code
//! - [`Module`] prints back to text through `Display`
//! - [`verify_module`] checks structural well-formedness
//!
//! ## Example
//!
//! ```
//! use lumen_ir::{verify_module, Context, DialectSet};
//!
//! let context = Context::new(DialectSet::gpu_lowering());
//! let module = context
//!     .parse_source_string(
//!         r#"func @main(%arg0: memref<4xi8>, %arg1: memref<4xi8>) {
//!              "lmhlo.copy"(%arg0, %arg1) : (memref<4xi8>, memref<4xi8>) -> ()
//!              "lmhlo.terminator"() : () -> ()
//!            }"#,
//!     )
//!     .unwrap();
//! verify_module(&module).unwrap();
//! ```

pub mod attributes;
pub mod builder;
pub mod context;
pub mod dialect;
pub mod ir;
pub mod lexer;
pub mod parser;
mod printer;
pub mod types;
pub mod verify;

pub use attributes::{Attribute, Attributes, DenseElements, DenseValues, Scalar};
pub use builder::{FunctionBuilder, ModuleBuilder};
pub use context::Context;
pub use dialect::{Dialect, DialectSet};
pub use ir::{Argument, Function, Location, Module, Operation, OperationName, Region, Value, ValueInfo};
pub use parser::{ParseError, ParseResult};
pub use types::{ElementType, ShapedType, Type};
pub use verify::{verify_module, VerifyError};
