//! # lumen-compiler
//!
//! Reference [`Compiler`] for the lowered-buffer dialect family. It lowers the
//! entry function of a module into a sequence of thunks (copies, constant
//! uploads, kernel launches, gemms) and emits one ISA kernel per elementwise
//! op or fusion.
//!
//! # Architecture
//!
//! ```text
//! Module ──► verify ──► dialect check ──► BufferAssignment ──► IrEmitter
//!                                              │                  │
//!                                              ▼                  ▼
//!                                      parameter / output /   Vec<Thunk> + kernels
//!                                      temp slots             in the CodegenUnit
//!                                              └───────┬──────────┘
//!                                                      ▼
//!                                                GpuExecutable
//! ```
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use lumen_backends::{
//!     CodegenUnit, CompileOptions, Compiler, DebugOptions, EmitterContext, InterpreterPlatform, ModuleConfig,
//!     Platform,
//! };
//! use lumen_compiler::GpuCompiler;
//! use lumen_ir::{Context, DialectSet};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let module = Context::new(DialectSet::gpu_lowering()).parse_source_string(
//!     r#"func @main(%in: memref<4xf32> {lmhlo.params = 0 : index},
//!                   %out: memref<4xf32> {lmhlo.output_index = dense<[0]> : tensor<1xindex>}) {
//!          "lmhlo.negate"(%in, %out) : (memref<4xf32>, memref<4xf32>) -> ()
//!          "lmhlo.terminator"() : () -> ()
//!        }"#,
//! )?;
//!
//! let platform = InterpreterPlatform::new();
//! let executor = platform.executor(0)?;
//! let context = EmitterContext::new(
//!     platform.name(),
//!     executor.description(),
//!     CodegenUnit::new("doc", platform.target_triple()),
//! );
//! let compiler = GpuCompiler::new(platform.name());
//! let executable = compiler.compile_lowered_module(
//!     &module,
//!     "doc",
//!     &ModuleConfig::new(DebugOptions::default_ignoring_flags()),
//!     &CompileOptions::default(),
//!     "main",
//!     &executor,
//!     context,
//! )?;
//! assert_eq!(executable.parameter_shapes().len(), 1);
//! assert_eq!(executable.result_shape().leaf_count(), 1);
//! # Ok(())
//! # }
//! ```

pub mod buffer_assignment;
pub mod emitter;
pub mod executable;
pub mod thunk;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use lumen_backends::{
    CodegenUnit, CompileError, CompileOptions, CompileResult, Compiler, EmitterContext, Executable, ModuleConfig,
    PlatformRegistry, StreamExecutor,
};
use lumen_ir::{verify_module, Function, Module};
use lumen_tracing::perf_span;

pub use buffer_assignment::{BufferAssignment, BufferSlot, OUTPUT_INDEX_ATTR, PARAMS_ATTR};
pub use emitter::IrEmitter;
pub use executable::GpuExecutable;
pub use thunk::Thunk;

/// Compiler for one platform name.
#[derive(Debug, Clone)]
pub struct GpuCompiler {
    platform_name: String,
}

impl GpuCompiler {
    pub fn new(platform_name: impl Into<String>) -> Self {
        Self {
            platform_name: platform_name.into(),
        }
    }

    /// Compile to the concrete executable type.
    ///
    /// # Errors
    ///
    /// See [`Compiler::compile_lowered_module`].
    #[allow(clippy::too_many_arguments)]
    #[tracing::instrument(
        skip(self, module, config, options, executor, context),
        fields(platform = %self.platform_name, device = executor.ordinal())
    )]
    pub fn compile(
        &self,
        module: &Module,
        module_name: &str,
        config: &ModuleConfig,
        options: &CompileOptions,
        entry_point: &str,
        executor: &Arc<dyn StreamExecutor>,
        mut context: EmitterContext,
    ) -> CompileResult<GpuExecutable> {
        let _span = perf_span!("compile_lowered_module", module = module_name);
        self.check_target(options, executor)?;
        let debug_options = config.debug_options();

        if debug_options.verify_module {
            verify_module(module)?;
        }
        let function = module
            .function(entry_point)
            .ok_or_else(|| CompileError::EntryPointNotFound(entry_point.to_string()))?;
        check_dialects(module, function)?;

        let assignment = BufferAssignment::new(function)?;
        let thunks = IrEmitter::new(function, &assignment, &mut context, debug_options).emit()?;

        if let Some(dir) = &debug_options.dump_to {
            dump_kernels(dir, module_name, &context.unit)?;
        }
        tracing::debug!(
            module = module_name,
            parameters = assignment.parameter_shapes().len(),
            result = %assignment.result_shape(),
            thunks = thunks.len(),
            "compiled"
        );
        Ok(GpuExecutable::new(module_name, entry_point, assignment, thunks, context.unit))
    }

    fn check_target(&self, options: &CompileOptions, executor: &Arc<dyn StreamExecutor>) -> CompileResult<()> {
        if executor.platform_name() != self.platform_name {
            return Err(CompileError::InvalidOptions(format!(
                "executor belongs to platform '{}', compiler targets '{}'",
                executor.platform_name(),
                self.platform_name
            )));
        }
        if let Some(allocator) = &options.device_allocator {
            if allocator.platform_name() != self.platform_name {
                return Err(CompileError::InvalidOptions(format!(
                    "device allocator belongs to platform '{}', compiler targets '{}'",
                    allocator.platform_name(),
                    self.platform_name
                )));
            }
        }
        Ok(())
    }
}

impl Compiler for GpuCompiler {
    fn platform_name(&self) -> &str {
        &self.platform_name
    }

    fn compile_lowered_module(
        &self,
        module: &Module,
        module_name: &str,
        config: &ModuleConfig,
        options: &CompileOptions,
        entry_point: &str,
        executor: &Arc<dyn StreamExecutor>,
        context: EmitterContext,
    ) -> CompileResult<Box<dyn Executable>> {
        let executable = self.compile(module, module_name, config, options, entry_point, executor, context)?;
        Ok(Box::new(executable))
    }
}

/// Register a [`GpuCompiler`] for every platform in `registry`.
pub fn register_compilers(registry: &mut PlatformRegistry) {
    for name in registry.platform_names() {
        registry.register_compiler(Arc::new(GpuCompiler::new(name)));
    }
}

/// Registry with the default platforms and their compilers.
pub fn default_registry() -> PlatformRegistry {
    let mut registry = PlatformRegistry::with_default_platforms();
    register_compilers(&mut registry);
    registry
}

/// Every op in `function`, nested ones included, must come from a dialect the
/// module's context registered.
fn check_dialects(module: &Module, function: &Function) -> CompileResult<()> {
    match function.walk().into_iter().find(|op| !module.is_registered(&op.name)) {
        Some(op) => Err(CompileError::UnregisteredOperation {
            op: op.name.to_string(),
            namespace: op.name.namespace().to_string(),
        }),
        None => Ok(()),
    }
}

fn dump_kernels(dir: &Path, module_name: &str, unit: &CodegenUnit) -> CompileResult<()> {
    let dump_error = |e: String| CompileError::InvalidOptions(format!("cannot dump kernels to {}: {e}", dir.display()));
    std::fs::create_dir_all(dir).map_err(|e| dump_error(e.to_string()))?;
    for kernel in unit.kernels() {
        let path = dir.join(format!("{module_name}.{}.json", kernel.name));
        let json = kernel.to_json().map_err(|e| dump_error(e.to_string()))?;
        std::fs::write(&path, json).map_err(|e| dump_error(e.to_string()))?;
        tracing::debug!(path = %path.display(), "dumped kernel");
    }
    Ok(())
}
