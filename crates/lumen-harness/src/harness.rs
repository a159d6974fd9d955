//! [`GpuTestHarness`]: compile a module, run it, hand back the buffers
//!
//! ## Architecture
//!
//! ```text
//! run_text_with_host_buffers(text, host)
//!   │ parse under HarnessConfig::dialects (panics on malformed text)
//!   ▼
//! run_module_with_host_buffers(module, host)
//!   │ compile ─► allocate + upload ─► execute ─► download ─► drain
//!   ▼
//! run_module(module, stream, device buffers)
//!   │ compile ─► bind borrowed inputs ─► execute ─► drain
//!   ▼
//! ExecutionOutput (result tree owned by the caller)
//! ```
//!
//! Compilation failures come back as [`CompileError`]. Every other failure
//! panics through [`check_ok`].

use lumen_backends::{
    Backend, BackendOptions, CodegenUnit, CompileError, CompileOptions, DebugOptions, DeviceMemoryBase,
    EmitterContext, Executable, ExecutableRunOptions, ExecutionInput, ExecutionOutput, ModuleConfig,
    OwningDeviceMemory, PlatformRegistry, Stream,
};
use lumen_ir::{Context, Module};
use lumen_tracing::perf_span;

use crate::config::HarnessConfig;
use crate::phase::{check_ok, Invocation, InvocationPhase};

/// Name every module is compiled under.
pub const MODULE_NAME: &str = "TestModule";
/// Entry function every module must define.
pub const ENTRY_POINT: &str = "main";

/// Single-shot compile-and-run fixture bound to one backend.
///
/// Nothing is cached between calls: every operation compiles the module
/// afresh. The harness does no locking and expects sequential use.
#[derive(Debug)]
pub struct GpuTestHarness {
    backend: Backend,
    config: HarnessConfig,
}

impl Default for GpuTestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuTestHarness {
    /// Harness on the platform named by the environment, or the interpreter.
    ///
    /// # Panics
    ///
    /// When the platform cannot be brought up.
    #[track_caller]
    pub fn new() -> Self {
        Self::with_config(HarnessConfig::from_env())
    }

    /// # Panics
    ///
    /// When the platform cannot be brought up.
    #[track_caller]
    pub fn with_config(config: HarnessConfig) -> Self {
        Self::with_registry(&lumen_compiler::default_registry(), config)
    }

    /// Harness on a platform from `registry`, which must also hold its compiler.
    ///
    /// # Panics
    ///
    /// When the platform is unknown, has no compiler or no usable device.
    #[track_caller]
    pub fn with_registry(registry: &PlatformRegistry, config: HarnessConfig) -> Self {
        let backend = check_ok(
            Backend::create(registry, &BackendOptions::new(config.platform_name.as_str())),
            format_args!("cannot create backend for platform '{}'", config.platform_name),
        );
        tracing::debug!(?backend, dialects = %config.dialects, "harness_ready");
        Self { backend, config }
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Compile `module` for the device behind `stream` and run it on
    /// `arguments`, each bound as a borrowed `u8[size]` parameter.
    ///
    /// Returns once the stream has drained. The caller keeps ownership of
    /// `arguments`; the result buffers belong to the returned output.
    ///
    /// # Errors
    ///
    /// Any [`CompileError`] from the backend's compiler.
    ///
    /// # Panics
    ///
    /// When execution fails or the stream does not drain.
    #[tracing::instrument(skip_all, fields(arguments = arguments.len(), stream = stream.id()))]
    pub fn run_module(
        &self,
        module: &Module,
        stream: &Stream,
        arguments: &[DeviceMemoryBase],
    ) -> Result<ExecutionOutput, CompileError> {
        let mut invocation = Invocation::new();
        let executable = self.compile(&mut invocation, module, stream)?;
        let output = self.execute(&mut invocation, executable.as_ref(), stream, arguments);
        Ok(output)
    }

    /// Upload `arguments`, run `module`, and download every result leaf.
    ///
    /// Device buffers are allocated on the default device and released
    /// before returning. Results come back in tuple-leaf order.
    ///
    /// # Errors
    ///
    /// Any [`CompileError`] from the backend's compiler.
    ///
    /// # Panics
    ///
    /// When allocation, execution or a copy fails.
    #[tracing::instrument(skip_all, fields(arguments = arguments.len()))]
    pub fn run_module_with_host_buffers(
        &self,
        module: &Module,
        arguments: &[&[u8]],
    ) -> Result<Vec<Vec<u8>>, CompileError> {
        let ordinal = self.backend.default_device_ordinal();
        let stream = check_ok(self.backend.borrow_stream(ordinal), "borrow stream");
        let mut invocation = Invocation::new();
        let executable = self.compile(&mut invocation, module, &stream)?;

        let allocator = self.backend.memory_allocator();
        let device_arguments: Vec<OwningDeviceMemory> = arguments
            .iter()
            .map(|bytes| {
                let memory = invocation.check(allocator.allocate(ordinal, bytes.len()));
                stream.then_memcpy_host_to_device(memory.as_base(), bytes);
                memory
            })
            .collect();
        let views: Vec<DeviceMemoryBase> = device_arguments.iter().map(OwningDeviceMemory::as_base).collect();

        let output = self.execute(&mut invocation, executable.as_ref(), &stream, &views);
        let pending: Vec<_> = output
            .result()
            .leaf_buffers()
            .into_iter()
            .map(|buffer| stream.then_memcpy_device_to_host(buffer))
            .collect();
        invocation.check(stream.block_host_until_done());

        invocation.enter(InvocationPhase::ResultsExtracted);
        let results: Vec<Vec<u8>> = pending.iter().map(|buffer| invocation.check(buffer.take())).collect();
        tracing::debug!(
            phase = %invocation.phase(),
            results = results.len(),
            bytes = results.iter().map(Vec::len).sum::<usize>(),
            "host_results"
        );
        Ok(results)
    }

    /// Parse `text` with the configured dialects, then
    /// [`run_module_with_host_buffers`](Self::run_module_with_host_buffers).
    ///
    /// # Errors
    ///
    /// Any [`CompileError`] from the backend's compiler.
    ///
    /// # Panics
    ///
    /// When `text` does not parse, and in every case the delegate panics.
    #[track_caller]
    pub fn run_text_with_host_buffers(&self, text: &str, arguments: &[&[u8]]) -> Result<Vec<Vec<u8>>, CompileError> {
        let context = Context::new(self.config.dialects);
        let module = check_ok(context.parse_source_string(text), "cannot parse module");
        self.run_module_with_host_buffers(&module, arguments)
    }

    // ============================================================================
    // Phases
    // ============================================================================

    fn compile(
        &self,
        invocation: &mut Invocation,
        module: &Module,
        stream: &Stream,
    ) -> Result<Box<dyn Executable>, CompileError> {
        invocation.enter(InvocationPhase::Compiling);
        let _span = perf_span!("harness_compile");

        let executor = stream.parent();
        let platform = self.backend.platform();
        let unit = CodegenUnit::new(MODULE_NAME, platform.target_triple());
        let context = EmitterContext::new(platform.name(), executor.description(), unit);
        if context.compute_capability.is_none() {
            tracing::debug!(device = executor.ordinal(), "device reports no compute capability");
        }
        let config = ModuleConfig::new(DebugOptions::default_ignoring_flags());

        let executable = self
            .backend
            .compiler()
            .compile_lowered_module(
                module,
                MODULE_NAME,
                &config,
                &CompileOptions::default(),
                ENTRY_POINT,
                executor,
                context,
            )
            .map_err(|error| {
                tracing::debug!(%error, "compilation failed");
                error
            })?;
        invocation.enter(InvocationPhase::Compiled);
        Ok(executable)
    }

    /// Bind, launch and drain. Panics on any failure.
    fn execute(
        &self,
        invocation: &mut Invocation,
        executable: &dyn Executable,
        stream: &Stream,
        arguments: &[DeviceMemoryBase],
    ) -> ExecutionOutput {
        let inputs: Vec<ExecutionInput> = arguments.iter().map(|&memory| ExecutionInput::borrowed_bytes(memory)).collect();
        invocation.enter(InvocationPhase::InputsBound);

        let run_options = ExecutableRunOptions::new(stream, self.backend.memory_allocator());
        invocation.enter(InvocationPhase::Launched);
        let output = invocation.check(executable.execute_async_on_stream(&run_options, inputs));
        invocation.check(stream.block_host_until_done());
        invocation.enter(InvocationPhase::Drained);

        tracing::debug!(
            module = executable.module_name(),
            result = %output.result().on_device_shape(),
            "executed"
        );
        output
    }
}
