//! Compiler interface
//!
//! A [`Compiler`] turns a module of the lowered-buffer dialect family into an
//! [`Executable`] for one platform. The reference implementation lives in the
//! `lumen-compiler` crate; platforms and compilers meet in
//! [`crate::PlatformRegistry`].

mod context;
mod options;

use std::sync::Arc;

use lumen_ir::{Module, VerifyError};

use crate::device::ComputeCapability;
use crate::error::BackendError;
use crate::executable::Executable;
use crate::executor::StreamExecutor;

pub use context::{CodegenUnit, EmitterContext, GpuDeviceInfo};
pub use options::{CompileOptions, DebugOptions, ModuleConfig, FLAGS_ENV_VAR};

/// Errors reported while compiling a module.
///
/// These are the recoverable failures of the harness: a module that does not
/// compile is a test outcome, not an environment problem.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    /// Operation from a dialect the module's context did not register
    #[error("operation '{op}' belongs to unregistered dialect '{namespace}'")]
    UnregisteredOperation { op: String, namespace: String },

    /// Known dialect, but no lowering exists
    #[error("operation '{op}' is not supported: {reason}")]
    UnsupportedOperation { op: String, reason: String },

    /// Operation needs a newer (or any) compute capability
    #[error("operation '{op}' requires compute capability {required}, device has {}", describe_capability(.actual))]
    CapabilityRequired {
        op: String,
        required: ComputeCapability,
        actual: Option<ComputeCapability>,
    },

    /// The entry function does not exist
    #[error("entry point '{0}' not found")]
    EntryPointNotFound(String),

    /// Operands, attributes or types that the lowering cannot accept
    #[error("invalid '{op}': {reason}")]
    InvalidOperation { op: String, reason: String },

    /// Entry function arguments are annotated inconsistently
    #[error("invalid signature of '{function}': {reason}")]
    InvalidSignature { function: String, reason: String },

    /// Module failed structural verification
    #[error("verification failed: {0}")]
    Verification(#[from] VerifyError),

    /// Options do not fit this compiler
    #[error("invalid compile options: {0}")]
    InvalidOptions(String),

    /// Device-side failure while compiling
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
}

fn describe_capability(capability: &Option<ComputeCapability>) -> String {
    match capability {
        Some(capability) => capability.to_string(),
        None => "none".to_string(),
    }
}

impl CompileError {
    /// Create an unsupported operation error
    pub fn unsupported(op: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            op: op.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid operation error
    pub fn invalid(op: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidOperation {
            op: op.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for compilation
pub type CompileResult<T> = std::result::Result<T, CompileError>;

/// Lowers modules into executables for one platform.
pub trait Compiler: Send + Sync {
    /// Platform whose devices the produced executables run on.
    fn platform_name(&self) -> &str;

    /// Compile `module`, binding the executable to `entry_point`.
    ///
    /// `executor` is the device the executable will run on; `context`
    /// carries its capabilities and the empty unit kernels are emitted into.
    #[allow(clippy::too_many_arguments)]
    fn compile_lowered_module(
        &self,
        module: &Module,
        module_name: &str,
        config: &ModuleConfig,
        options: &CompileOptions,
        entry_point: &str,
        executor: &Arc<dyn StreamExecutor>,
        context: EmitterContext,
    ) -> CompileResult<Box<dyn Executable>>;
}
