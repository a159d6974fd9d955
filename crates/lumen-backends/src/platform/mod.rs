//! Platforms and the registry that resolves them by name
//!
//! The registry is an ordinary value: callers build one, register what they
//! need, and hand it to [`crate::Backend::create`]. Nothing is process-global.
//!
//! ## Example
//!
//! ```rust
//! use lumen_backends::{BackendError, PlatformRegistry};
//!
//! let registry = PlatformRegistry::with_default_platforms();
//! assert!(registry.platform_with_name("interpreter").is_ok());
//! assert!(matches!(
//!     registry.platform_with_name("cuda"),
//!     Err(BackendError::PlatformNotFound { .. })
//! ));
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backends::interpreter::InterpreterPlatform;
use crate::compiler::Compiler;
use crate::error::{BackendError, Result};
use crate::executor::StreamExecutor;

/// Target triple of the kernel ISA executed by lumen platforms.
pub const KERNEL_ISA_TRIPLE: &str = "lumen-kernel-isa";

/// A family of devices sharing one driver.
pub trait Platform: Send + Sync {
    fn name(&self) -> &str;

    /// Target the compiler emits code for.
    fn target_triple(&self) -> &str {
        KERNEL_ISA_TRIPLE
    }

    fn visible_device_count(&self) -> usize;

    /// Executor for device `ordinal`; the same executor on every call.
    fn executor(&self, ordinal: usize) -> Result<Arc<dyn StreamExecutor>>;
}

/// Named platforms and the compilers that target them.
#[derive(Default, Clone)]
pub struct PlatformRegistry {
    platforms: BTreeMap<String, Arc<dyn Platform>>,
    compilers: BTreeMap<String, Arc<dyn Compiler>>,
}

impl PlatformRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the interpreter platform.
    ///
    /// Compilers are registered separately by the crates that provide them.
    pub fn with_default_platforms() -> Self {
        let mut registry = Self::new();
        registry.register_platform(Arc::new(InterpreterPlatform::new()));
        registry
    }

    /// Register `platform` under its name, replacing any previous one.
    pub fn register_platform(&mut self, platform: Arc<dyn Platform>) {
        tracing::debug!(
            platform = platform.name(),
            devices = platform.visible_device_count(),
            "platform_registered"
        );
        self.platforms.insert(platform.name().to_string(), platform);
    }

    /// Register `compiler` for the platform it names.
    pub fn register_compiler(&mut self, compiler: Arc<dyn Compiler>) {
        tracing::debug!(platform = compiler.platform_name(), "compiler_registered");
        self.compilers.insert(compiler.platform_name().to_string(), compiler);
    }

    /// Names of all registered platforms, sorted.
    pub fn platform_names(&self) -> Vec<String> {
        self.platforms.keys().cloned().collect()
    }

    /// Look up a platform.
    ///
    /// # Errors
    ///
    /// [`BackendError::PlatformNotFound`] listing the registered names.
    pub fn platform_with_name(&self, name: &str) -> Result<Arc<dyn Platform>> {
        self.platforms
            .get(name)
            .cloned()
            .ok_or_else(|| BackendError::PlatformNotFound {
                name: name.to_string(),
                available: self.platform_names(),
            })
    }

    /// Look up the compiler for a platform.
    ///
    /// # Errors
    ///
    /// [`BackendError::CompilerNotFound`].
    pub fn compiler_for(&self, platform_name: &str) -> Result<Arc<dyn Compiler>> {
        self.compilers
            .get(platform_name)
            .cloned()
            .ok_or_else(|| BackendError::CompilerNotFound(platform_name.to_string()))
    }
}

impl std::fmt::Debug for PlatformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformRegistry")
            .field("platforms", &self.platforms.keys().collect::<Vec<_>>())
            .field("compilers", &self.compilers.keys().collect::<Vec<_>>())
            .finish()
    }
}
