//! Error types for platform, memory, stream and execution operations

use std::fmt;

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors that can occur while selecting a platform or driving a device
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    /// No platform with this name is registered
    #[error("platform '{name}' not found (registered: {available:?})")]
    PlatformNotFound { name: String, available: Vec<String> },

    /// The platform exists but could not produce a usable device
    #[error("platform '{name}' failed to initialize: {reason}")]
    PlatformInitialization { name: String, reason: String },

    /// No compiler is registered for the platform
    #[error("no compiler registered for platform '{0}'")]
    CompilerNotFound(String),

    /// Device ordinal outside the visible (or allowed) devices
    #[error("invalid device ordinal {ordinal} (device count: {count})")]
    InvalidDeviceOrdinal { ordinal: usize, count: usize },

    /// Device allocation failed
    #[error("out of device memory: requested {requested} bytes, available {available} bytes")]
    OutOfMemory { requested: usize, available: usize },

    /// Pointer that the device did not hand out
    #[error("invalid device pointer: {0:#x}")]
    InvalidDevicePointer(u64),

    /// Access past the end of an allocation
    #[error("device access out of bounds: {address:#x} + {size} exceeds allocation of {allocation_size} bytes")]
    OutOfBounds {
        address: u64,
        size: usize,
        allocation_size: usize,
    },

    /// Source and destination sizes disagree
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// Stream worker could not be started
    #[error("failed to create stream: {0}")]
    StreamCreation(String),

    /// An earlier command on the stream failed; the stream is unusable
    #[error("stream failed: {0}")]
    StreamFailed(Box<BackendError>),

    /// Result of a device-to-host copy was read before it completed
    #[error("device-to-host copy did not complete")]
    TransferIncomplete,

    /// Invalid launch configuration
    #[error("invalid launch configuration: {0}")]
    InvalidLaunchConfig(String),

    /// Executable called with the wrong number of arguments
    #[error("executable '{executable}' expects {expected} arguments, got {actual}")]
    ArgumentCount {
        executable: String,
        expected: usize,
        actual: usize,
    },

    /// Argument buffer does not match the parameter shape
    #[error("argument {index} of '{executable}' has {actual} bytes, parameter needs {expected}")]
    ArgumentSize {
        executable: String,
        index: usize,
        expected: usize,
        actual: usize,
    },

    /// An execution input leaf was never given a buffer
    #[error("argument {index} has no buffer at {shape_index}")]
    MissingArgumentBuffer { index: usize, shape_index: String },

    /// Shape index not present in the shape
    #[error("shape index {index} is not a leaf of {shape}")]
    InvalidShapeIndex { index: String, shape: String },

    /// Kernel launched with the wrong number of buffers
    #[error("kernel '{kernel}' expects {expected} buffers, got {actual}")]
    KernelArgumentCount {
        kernel: String,
        expected: usize,
        actual: usize,
    },

    /// Kernel buffer too small for its parameter
    #[error("kernel '{kernel}' buffer {index} has {actual} bytes, parameter needs {expected}")]
    KernelArgumentSize {
        kernel: String,
        index: usize,
        expected: usize,
        actual: usize,
    },

    /// Invalid register index
    #[error("invalid register index: {0}")]
    InvalidRegister(u8),

    /// Register read before written
    #[error("uninitialized register: r{0}")]
    UninitializedRegister(u8),

    /// Type mismatch
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Unsupported operation
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Execution error
    #[error("execution error: {0}")]
    ExecutionError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Create a type mismatch error
    pub fn type_mismatch(expected: impl fmt::Display, actual: impl fmt::Display) -> Self {
        Self::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Create an execution error
    pub fn execution_error(msg: impl Into<String>) -> Self {
        Self::ExecutionError(msg.into())
    }

    /// Create an unsupported operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedOperation(msg.into())
    }
}
