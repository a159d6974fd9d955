//! Integration tests for backend selection, streams and kernel execution

use std::sync::Arc;

use lumen_backends::isa::{Address, Condition, Instruction, KernelFunction, KernelParam, Register, Type};
use lumen_backends::{
    Backend, BackendError, BackendOptions, CompileOptions, CompileResult, Compiler, DeviceDescription,
    EmitterContext, Executable, InterpreterPlatform, LaunchConfig, ModuleConfig, Platform, PlatformRegistry,
    StreamExecutor,
};
use proptest::prelude::*;

/// Compiler that never produces anything; enough to bind a backend.
struct NullCompiler(String);

impl Compiler for NullCompiler {
    fn platform_name(&self) -> &str {
        &self.0
    }

    fn compile_lowered_module(
        &self,
        _module: &lumen_ir::Module,
        _module_name: &str,
        _config: &ModuleConfig,
        _options: &CompileOptions,
        entry_point: &str,
        _executor: &Arc<dyn StreamExecutor>,
        _context: EmitterContext,
    ) -> CompileResult<Box<dyn Executable>> {
        Err(lumen_backends::CompileError::EntryPointNotFound(entry_point.to_string()))
    }
}

fn registry_with(platform: InterpreterPlatform) -> PlatformRegistry {
    let compiler = NullCompiler(platform.name().to_string());
    let mut registry = PlatformRegistry::new();
    registry.register_platform(Arc::new(platform));
    registry.register_compiler(Arc::new(compiler));
    registry
}

// ================================================================================================
// Backend selection
// ================================================================================================

#[test]
fn test_backend_binds_platform_and_compiler() -> lumen_backends::Result<()> {
    let registry = registry_with(InterpreterPlatform::new());
    let backend = Backend::create(&registry, &BackendOptions::new("interpreter"))?;

    assert_eq!(backend.platform().name(), "interpreter");
    assert_eq!(backend.compiler().platform_name(), "interpreter");
    assert_eq!(backend.device_count(), 1);
    assert_eq!(backend.default_device_ordinal(), 0);
    assert_eq!(backend.memory_allocator().platform_name(), "interpreter");
    Ok(())
}

#[test]
fn test_unknown_platform_is_not_found() {
    let registry = registry_with(InterpreterPlatform::new());
    let err = Backend::create(&registry, &BackendOptions::new("cuda")).unwrap_err();
    assert!(matches!(err, BackendError::PlatformNotFound { .. }));
}

#[test]
fn test_platform_without_compiler() {
    let registry = PlatformRegistry::with_default_platforms();
    let err = Backend::create(&registry, &BackendOptions::new("interpreter")).unwrap_err();
    assert_eq!(err, BackendError::CompilerNotFound("interpreter".to_string()));
}

#[test]
fn test_platform_without_devices_fails_to_initialize() {
    let registry = registry_with(InterpreterPlatform::with_devices(Vec::new()));
    let err = Backend::create(&registry, &BackendOptions::new("interpreter")).unwrap_err();
    assert!(matches!(err, BackendError::PlatformInitialization { .. }));
}

#[test]
fn test_allowed_devices_pick_default_ordinal() -> lumen_backends::Result<()> {
    let devices = vec![DeviceDescription::default(); 3];
    let registry = registry_with(InterpreterPlatform::with_devices(devices));

    let options = BackendOptions::new("interpreter").with_allowed_devices([2, 1]);
    let backend = Backend::create(&registry, &options)?;
    assert_eq!(backend.device_count(), 2);
    assert_eq!(backend.default_device_ordinal(), 1);
    assert_eq!(backend.default_stream_executor().ordinal(), 1);
    assert!(matches!(
        backend.stream_executor(0),
        Err(BackendError::InvalidDeviceOrdinal { ordinal: 0, .. })
    ));
    assert!(backend.borrow_stream(0).is_err());

    let none_allowed = BackendOptions::new("interpreter").with_allowed_devices([7]);
    assert!(matches!(
        Backend::create(&registry, &none_allowed),
        Err(BackendError::PlatformInitialization { .. })
    ));
    Ok(())
}

#[test]
fn test_borrowed_stream_runs_on_its_device() -> lumen_backends::Result<()> {
    let registry = registry_with(InterpreterPlatform::with_devices(vec![DeviceDescription::default(); 2]));
    let backend = Backend::create(&registry, &BackendOptions::new("interpreter"))?;

    let stream = backend.borrow_stream(1)?;
    assert_eq!(stream.parent().ordinal(), 1);

    let allocator = backend.memory_allocator();
    let buffer = allocator.allocate(1, 3)?;
    stream.then_memset(buffer.as_base(), 0x5A);
    let pending = stream.then_memcpy_device_to_host(buffer.as_base());
    stream.block_host_until_done()?;
    assert_eq!(pending.take()?, vec![0x5A; 3]);
    Ok(())
}

// ================================================================================================
// Kernels on a stream
// ================================================================================================

/// out[i] = a[i] > b[i] ? a[i] - b[i] : 0
fn saturating_sub_kernel(elements: usize) -> KernelFunction {
    let ty = Type::I32;
    KernelFunction {
        name: "saturating_sub".to_string(),
        params: vec![KernelParam::new(ty, elements); 3],
        instructions: vec![
            Instruction::LDG {
                ty,
                dst: Register(0),
                addr: Address::Lane { param: 0 },
            },
            Instruction::LDG {
                ty,
                dst: Register(1),
                addr: Address::Lane { param: 1 },
            },
            Instruction::SUB {
                ty,
                dst: Register(2),
                src1: Register(0),
                src2: Register(1),
            },
            Instruction::MOV_IMM {
                ty,
                dst: Register(3),
                value: 0,
            },
            Instruction::SETcc {
                ty,
                cond: Condition::GT,
                dst: Register(4),
                src1: Register(0),
                src2: Register(1),
            },
            Instruction::SEL {
                ty,
                dst: Register(5),
                pred: Register(4),
                src_true: Register(2),
                src_false: Register(3),
            },
            Instruction::STG {
                ty,
                src: Register(5),
                addr: Address::Lane { param: 2 },
            },
        ],
        element_count: elements,
        flush_denormals: false,
    }
}

fn to_bytes(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn from_bytes(bytes: &[u8]) -> Vec<i32> {
    bytes
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn run_saturating_sub(a: &[i32], b: &[i32], block_size: u32) -> lumen_backends::Result<Vec<i32>> {
    let registry = registry_with(InterpreterPlatform::new());
    let backend = Backend::create(&registry, &BackendOptions::new("interpreter"))?;
    let allocator = backend.memory_allocator();
    let stream = backend.borrow_stream(0)?;

    let bytes = a.len() * 4;
    let lhs = allocator.allocate(0, bytes)?;
    let rhs = allocator.allocate(0, bytes)?;
    let out = allocator.allocate(0, bytes)?;

    stream
        .then_memcpy_host_to_device(lhs.as_base(), &to_bytes(a))
        .then_memcpy_host_to_device(rhs.as_base(), &to_bytes(b))
        .then_launch(
            Arc::new(saturating_sub_kernel(a.len())),
            LaunchConfig::linear(a.len(), block_size),
            vec![lhs.as_base(), rhs.as_base(), out.as_base()],
        );
    let pending = stream.then_memcpy_device_to_host(out.as_base());
    stream.block_host_until_done()?;
    Ok(from_bytes(&pending.take()?))
}

#[test]
fn test_kernel_with_partial_last_block() -> lumen_backends::Result<()> {
    let a: Vec<i32> = (0..300).collect();
    let b: Vec<i32> = (0..300).map(|i| 150 - i / 2).collect();
    let result = run_saturating_sub(&a, &b, 64)?;
    assert_eq!(result.len(), 300);
    for i in 0..300 {
        let expected = if a[i] > b[i] { a[i] - b[i] } else { 0 };
        assert_eq!(result[i], expected, "element {i}");
    }
    Ok(())
}

#[test]
fn test_kernel_argument_count_fails_stream() -> lumen_backends::Result<()> {
    let registry = registry_with(InterpreterPlatform::new());
    let backend = Backend::create(&registry, &BackendOptions::new("interpreter"))?;
    let buffer = backend.memory_allocator().allocate(0, 16)?;
    let stream = backend.borrow_stream(0)?;

    stream.then_launch(
        Arc::new(saturating_sub_kernel(4)),
        LaunchConfig::linear(4, 128),
        vec![buffer.as_base()],
    );
    match stream.block_host_until_done() {
        Err(BackendError::StreamFailed(inner)) => assert!(matches!(
            *inner,
            BackendError::KernelArgumentCount {
                expected: 3,
                actual: 1,
                ..
            }
        )),
        other => panic!("expected a failed stream, got {other:?}"),
    }
    Ok(())
}

proptest! {
    #[test]
    fn kernel_matches_host_reference(
        pairs in prop::collection::vec((any::<i32>(), any::<i32>()), 1..200),
        block_size in 1u32..300,
    ) {
        let (a, b): (Vec<i32>, Vec<i32>) = pairs.into_iter().unzip();
        let result = run_saturating_sub(&a, &b, block_size).unwrap();
        let expected: Vec<i32> = a
            .iter()
            .zip(&b)
            .map(|(&x, &y)| if x > y { x.wrapping_sub(y) } else { 0 })
            .collect();
        prop_assert_eq!(result, expected);
    }
}
