//! Compilation options
//!
//! [`DebugOptions`] can be read from a flag string in the `LUMEN_FLAGS`
//! environment variable:
//!
//! ```text
//! LUMEN_FLAGS="--kernel_block_size=64 --ftz --dump_to=/tmp/kernels"
//! ```
//!
//! Test code that needs reproducible behavior uses
//! [`DebugOptions::default_ignoring_flags`], which never reads the environment.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use super::CompileError;
use crate::memory::DeviceMemoryAllocator;

/// Environment variable holding debug flags.
pub const FLAGS_ENV_VAR: &str = "LUMEN_FLAGS";

/// Knobs that change code generation but not semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugOptions {
    /// Lanes per block for elementwise kernels, clamped to the device limit
    pub kernel_block_size: u32,
    /// Flush f32 denormal results to zero
    pub flush_denormals_to_zero: bool,
    /// Run the structural verifier before lowering
    pub verify_module: bool,
    /// Directory to write emitted kernels to as JSON
    pub dump_to: Option<PathBuf>,
}

impl DebugOptions {
    /// Built-in defaults; environment flags are not consulted.
    pub fn default_ignoring_flags() -> Self {
        Self {
            kernel_block_size: 128,
            flush_denormals_to_zero: false,
            verify_module: true,
            dump_to: None,
        }
    }

    /// Parse a whitespace-separated flag string on top of the defaults.
    ///
    /// # Errors
    ///
    /// [`CompileError::InvalidOptions`] for unknown flags or malformed values.
    pub fn from_flags(flags: &str) -> Result<Self, CompileError> {
        let mut options = Self::default_ignoring_flags();
        for flag in flags.split_whitespace() {
            let body = flag
                .strip_prefix("--")
                .ok_or_else(|| CompileError::InvalidOptions(format!("flag '{flag}' must start with --")))?;
            let (name, value) = match body.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (body, None),
            };
            match name {
                "kernel_block_size" => {
                    let value = require_value(name, value)?;
                    let size: u32 = value.parse().map_err(|_| {
                        CompileError::InvalidOptions(format!("kernel_block_size '{value}' is not a number"))
                    })?;
                    if size == 0 {
                        return Err(CompileError::InvalidOptions("kernel_block_size must be positive".into()));
                    }
                    options.kernel_block_size = size;
                }
                "ftz" | "flush_denormals_to_zero" => options.flush_denormals_to_zero = parse_bool(name, value)?,
                "verify_module" => options.verify_module = parse_bool(name, value)?,
                "dump_to" => options.dump_to = Some(PathBuf::from(require_value(name, value)?)),
                _ => return Err(CompileError::InvalidOptions(format!("unknown flag '--{name}'"))),
            }
        }
        Ok(options)
    }

    /// Defaults overridden by `LUMEN_FLAGS`, if set.
    pub fn from_env() -> Result<Self, CompileError> {
        match std::env::var(FLAGS_ENV_VAR) {
            Ok(flags) => Self::from_flags(&flags),
            Err(_) => Ok(Self::default_ignoring_flags()),
        }
    }
}

impl Default for DebugOptions {
    fn default() -> Self {
        Self::default_ignoring_flags()
    }
}

fn require_value<'a>(name: &str, value: Option<&'a str>) -> Result<&'a str, CompileError> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CompileError::InvalidOptions(format!("flag '--{name}' needs a value")))
}

fn parse_bool(name: &str, value: Option<&str>) -> Result<bool, CompileError> {
    match value {
        None | Some("true") | Some("1") => Ok(true),
        Some("false") | Some("0") => Ok(false),
        Some(other) => Err(CompileError::InvalidOptions(format!(
            "flag '--{name}' expects a boolean, got '{other}'"
        ))),
    }
}

/// Per-module compilation configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleConfig {
    debug_options: DebugOptions,
}

impl ModuleConfig {
    pub fn new(debug_options: DebugOptions) -> Self {
        Self { debug_options }
    }

    pub fn debug_options(&self) -> &DebugOptions {
        &self.debug_options
    }
}

/// Options for one compile call.
#[derive(Clone, Default)]
pub struct CompileOptions {
    /// Allocator for compile-time device memory; must belong to the
    /// compiler's platform when set.
    pub device_allocator: Option<Arc<dyn DeviceMemoryAllocator>>,
}

impl fmt::Debug for CompileOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompileOptions")
            .field(
                "device_allocator",
                &self.device_allocator.as_ref().map(|a| a.platform_name().to_string()),
            )
            .finish()
    }
}
