//! Platform implementations

pub mod interpreter;

pub use interpreter::{InterpreterConfig, InterpreterExecutor, InterpreterPlatform, INTERPRETER_PLATFORM_NAME};
