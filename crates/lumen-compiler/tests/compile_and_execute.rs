//! Compile modules with GpuCompiler and run them on the interpreter platform

use std::sync::Arc;

use lumen_backends::{
    CodegenUnit, CompileError, CompileOptions, ComputeCapability, DebugOptions, DeviceDescription,
    DeviceMemoryAllocator, EmitterContext, Executable, ExecutableRunOptions, ExecutionInput, InterpreterPlatform,
    ModuleConfig, Platform, Stream, StreamExecutor, StreamExecutorMemoryAllocator,
};
use lumen_compiler::{GpuCompiler, GpuExecutable, Thunk};
use lumen_ir::{Attribute, Attributes, Context, DialectSet, ElementType, FunctionBuilder, Module, ModuleBuilder, Type};
use proptest::prelude::*;

// ================================================================================================
// Fixture
// ================================================================================================

struct Device {
    platform: InterpreterPlatform,
    executor: Arc<dyn StreamExecutor>,
    allocator: Arc<dyn DeviceMemoryAllocator>,
    stream: Stream,
}

impl Device {
    fn new(description: DeviceDescription) -> Self {
        let platform = InterpreterPlatform::with_devices(vec![description]);
        let executor = platform.executor(0).unwrap();
        let allocator: Arc<dyn DeviceMemoryAllocator> =
            StreamExecutorMemoryAllocator::new(platform.name(), vec![Arc::clone(&executor)]);
        let stream = Stream::new(Arc::clone(&executor)).unwrap();
        Self {
            platform,
            executor,
            allocator,
            stream,
        }
    }

    fn default_device() -> Self {
        Self::new(DeviceDescription::default())
    }

    fn compile_with(&self, module: &Module, debug_options: DebugOptions) -> Result<GpuExecutable, CompileError> {
        let context = EmitterContext::new(
            self.platform.name(),
            self.executor.description(),
            CodegenUnit::new("TestModule", self.platform.target_triple()),
        );
        GpuCompiler::new(self.platform.name()).compile(
            module,
            "TestModule",
            &ModuleConfig::new(debug_options),
            &CompileOptions::default(),
            "main",
            &self.executor,
            context,
        )
    }

    fn compile(&self, text: &str) -> Result<GpuExecutable, CompileError> {
        self.compile_with(&parse(text), DebugOptions::default_ignoring_flags())
    }

    /// Upload `inputs`, execute, and download every result leaf.
    fn run(&self, executable: &GpuExecutable, inputs: &[&[u8]]) -> lumen_backends::Result<Vec<Vec<u8>>> {
        let mut owned = Vec::new();
        let mut arguments = Vec::new();
        for bytes in inputs {
            let memory = self.allocator.allocate(0, bytes.len())?;
            self.stream.then_memcpy_host_to_device(memory.as_base(), bytes);
            arguments.push(ExecutionInput::borrowed_bytes(memory.as_base()));
            owned.push(memory);
        }
        let options = ExecutableRunOptions::new(&self.stream, Arc::clone(&self.allocator));
        let output = executable.execute_async_on_stream(&options, arguments)?;
        let pending: Vec<_> = output
            .result()
            .leaf_buffers()
            .into_iter()
            .map(|buffer| self.stream.then_memcpy_device_to_host(buffer))
            .collect();
        self.stream.block_host_until_done()?;
        pending.iter().map(|p| p.take()).collect()
    }
}

fn parse(text: &str) -> Module {
    Context::new(DialectSet::gpu_lowering()).parse_source_string(text).unwrap()
}

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(values).to_vec()
}

fn to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes.chunks_exact(4).map(bytemuck::pod_read_unaligned::<f32>).collect()
}

fn to_i32(bytes: &[u8]) -> Vec<i32> {
    bytes.chunks_exact(4).map(bytemuck::pod_read_unaligned::<i32>).collect()
}

// ================================================================================================
// Lowerings
// ================================================================================================

#[test]
fn test_elementwise_add_with_rank0_broadcast() -> Result<(), Box<dyn std::error::Error>> {
    let device = Device::default_device();
    let executable = device.compile(
        r#"func @main(%a: memref<5xf32> {lmhlo.params = 0 : index},
                      %b: memref<f32> {lmhlo.params = 1 : index},
                      %out: memref<5xf32> {lmhlo.output_index = dense<[0]> : tensor<1xindex>}) {
             "lmhlo.add"(%a, %b, %out) : (memref<5xf32>, memref<f32>, memref<5xf32>) -> ()
             "lmhlo.terminator"() : () -> ()
           }"#,
    )?;
    assert_eq!(executable.codegen_unit().kernels().len(), 1);

    let outputs = device.run(&executable, &[&f32_bytes(&[1.0, 2.0, 3.0, 4.0, 5.0]), &f32_bytes(&[0.5])])?;
    assert_eq!(to_f32(&outputs[0]), vec![1.5, 2.5, 3.5, 4.5, 5.5]);
    Ok(())
}

#[test]
fn test_fusion_relu_scale() -> Result<(), Box<dyn std::error::Error>> {
    let device = Device::default_device();
    let executable = device.compile(
        r#"func @main(%x: memref<6xf32> {lmhlo.params = 0 : index},
                      %y: memref<6xf32> {lmhlo.output_index = dense<[0]> : tensor<1xindex>}) {
             "lmhlo.fusion"() ({
               %v = "std.tensor_load"(%x) : (memref<6xf32>) -> tensor<6xf32>
               %zero = "mhlo.constant"() {value = dense<0.0> : tensor<f32>} : () -> tensor<f32>
               %two = "mhlo.constant"() {value = dense<2.0> : tensor<f32>} : () -> tensor<f32>
               %pos = "mhlo.compare"(%v, %zero) {comparison_direction = "GT"} : (tensor<6xf32>, tensor<f32>) -> tensor<6xi1>
               %relu = "mhlo.select"(%pos, %v, %zero) : (tensor<6xi1>, tensor<6xf32>, tensor<f32>) -> tensor<6xf32>
               %scaled = "mhlo.multiply"(%relu, %two) : (tensor<6xf32>, tensor<f32>) -> tensor<6xf32>
               "std.tensor_store"(%scaled, %y) : (tensor<6xf32>, memref<6xf32>) -> ()
               "lmhlo.terminator"() : () -> ()
             }) : () -> ()
             "lmhlo.terminator"() : () -> ()
           }"#,
    )?;
    let kernels = executable.codegen_unit().kernels();
    assert_eq!(kernels.len(), 1);
    assert_eq!(kernels[0].name, "fusion");
    // Registers of dead values are reused.
    assert!(kernels[0].num_registers() < kernels[0].instructions.len());

    let outputs = device.run(&executable, &[&f32_bytes(&[-2.0, -0.5, 0.0, 0.25, 1.0, 3.0])])?;
    assert_eq!(to_f32(&outputs[0]), vec![0.0, 0.0, 0.0, 0.5, 2.0, 6.0]);
    Ok(())
}

#[test]
fn test_constant_then_copy_through_temporary() -> Result<(), Box<dyn std::error::Error>> {
    let device = Device::default_device();
    let executable = device.compile(
        r#"func @main(%tmp: memref<4xi32>,
                      %out: memref<4xi32> {lmhlo.output_index = dense<[0]> : tensor<1xindex>}) {
             "lmhlo.constant"(%tmp) {value = dense<[7, -1, 0, 42]> : tensor<4xi32>} : (memref<4xi32>) -> ()
             "lmhlo.copy"(%tmp, %out) : (memref<4xi32>, memref<4xi32>) -> ()
             "lmhlo.terminator"() : () -> ()
           }"#,
    )?;
    assert!(matches!(executable.thunks()[0], Thunk::Constant { .. }));
    assert!(matches!(executable.thunks()[1], Thunk::Copy { size: 16, .. }));

    let outputs = device.run(&executable, &[])?;
    assert_eq!(to_i32(&outputs[0]), vec![7, -1, 0, 42]);
    Ok(())
}

#[test]
fn test_convert_saturates() -> Result<(), Box<dyn std::error::Error>> {
    let device = Device::default_device();
    let executable = device.compile(
        r#"func @main(%in: memref<4xf32> {lmhlo.params = 0 : index},
                      %out: memref<4xi8> {lmhlo.output_index = dense<[0]> : tensor<1xindex>}) {
             "lmhlo.convert"(%in, %out) : (memref<4xf32>, memref<4xi8>) -> ()
             "lmhlo.terminator"() : () -> ()
           }"#,
    )?;
    let outputs = device.run(&executable, &[&f32_bytes(&[1.9, -3.2, 300.0, -300.0])])?;
    let bytes: Vec<i8> = outputs[0].iter().map(|&b| b as i8).collect();
    assert_eq!(bytes, vec![1, -3, 127, -128]);
    Ok(())
}

#[test]
fn test_gemm_with_transposed_rhs() -> Result<(), Box<dyn std::error::Error>> {
    let device = Device::default_device();
    let executable = device.compile(
        r#"func @main(%lhs: memref<2x3xf32> {lmhlo.params = 0 : index},
                      %rhs: memref<2x3xf32> {lmhlo.params = 1 : index},
                      %out: memref<2x2xf32> {lmhlo.output_index = dense<[0]> : tensor<1xindex>}) {
             "lmhlo_gpu.gemm"(%lhs, %rhs, %out) {alpha_real = 2.0, beta = 0.0, transpose_rhs = true} : (memref<2x3xf32>, memref<2x3xf32>, memref<2x2xf32>) -> ()
             "lmhlo.terminator"() : () -> ()
           }"#,
    )?;
    let lhs = f32_bytes(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let rhs = f32_bytes(&[1.0, 0.0, 1.0, 0.0, 1.0, 0.0]);
    let outputs = device.run(&executable, &[&lhs, &rhs])?;
    // lhs * rhs^T = [[4, 2], [10, 5]], doubled by alpha
    assert_eq!(to_f32(&outputs[0]), vec![8.0, 4.0, 20.0, 10.0]);
    Ok(())
}

const BF16_GEMM: &str = r#"func @main(%lhs: memref<1x2xbf16> {lmhlo.params = 0 : index},
                      %rhs: memref<2x1xbf16> {lmhlo.params = 1 : index},
                      %out: memref<1x1xbf16> {lmhlo.output_index = dense<[0]> : tensor<1xindex>}) {
             "lmhlo_gpu.gemm"(%lhs, %rhs, %out) {alpha_real = 1.0, beta = 0.0} : (memref<1x2xbf16>, memref<2x1xbf16>, memref<1x1xbf16>) -> ()
             "lmhlo.terminator"() : () -> ()
           }"#;

#[test]
fn test_bf16_gemm_requires_ampere() {
    let unknown = Device::default_device();
    assert_eq!(
        unknown.compile(BF16_GEMM).unwrap_err(),
        CompileError::CapabilityRequired {
            op: "lmhlo_gpu.gemm".to_string(),
            required: ComputeCapability::AMPERE,
            actual: None,
        }
    );

    let volta = Device::new(DeviceDescription::default().with_compute_capability(ComputeCapability::new(7, 0)));
    assert!(matches!(
        volta.compile(BF16_GEMM),
        Err(CompileError::CapabilityRequired {
            actual: Some(ComputeCapability { major: 7, minor: 0 }),
            ..
        })
    ));
}

#[test]
fn test_bf16_gemm_on_ampere() -> Result<(), Box<dyn std::error::Error>> {
    let device = Device::new(DeviceDescription::default().with_compute_capability(ComputeCapability::AMPERE));
    let executable = device.compile(BF16_GEMM)?;
    let bf16 = |values: &[f32]| -> Vec<u8> {
        values
            .iter()
            .flat_map(|&v| half::bf16::from_f32(v).to_bits().to_le_bytes())
            .collect()
    };
    let outputs = device.run(&executable, &[&bf16(&[1.5, 2.0]), &bf16(&[4.0, 0.25])])?;
    let result = half::bf16::from_bits(u16::from_le_bytes([outputs[0][0], outputs[0][1]]));
    assert_eq!(result.to_f32(), 6.5);
    Ok(())
}

// ================================================================================================
// Rejections
// ================================================================================================

#[test]
fn test_unregistered_dialect() {
    let module = Context::new(DialectSet::gpu_lowering().without(lumen_ir::Dialect::LmhloGpu))
        .parse_source_string(
            r#"func @main(%a: memref<1x1xf32> {lmhlo.params = 0 : index},
                          %out: memref<1x1xf32> {lmhlo.output_index = dense<[0]> : tensor<1xindex>}) {
                 "lmhlo_gpu.gemm"(%a, %a, %out) : (memref<1x1xf32>, memref<1x1xf32>, memref<1x1xf32>) -> ()
                 "lmhlo.terminator"() : () -> ()
               }"#,
        )
        .unwrap();
    let device = Device::default_device();
    assert_eq!(
        device
            .compile_with(&module, DebugOptions::default_ignoring_flags())
            .unwrap_err(),
        CompileError::UnregisteredOperation {
            op: "lmhlo_gpu.gemm".to_string(),
            namespace: "lmhlo_gpu".to_string(),
        }
    );
}

#[test]
fn test_unknown_namespace_is_unregistered() {
    let device = Device::default_device();
    let err = device
        .compile(
            r#"func @main(%a: memref<4xi8> {lmhlo.params = 0 : index}) {
                 "xla_cpu.frobnicate"(%a) : (memref<4xi8>) -> ()
                 "lmhlo.terminator"() : () -> ()
               }"#,
        )
        .unwrap_err();
    assert!(matches!(err, CompileError::UnregisteredOperation { ref namespace, .. } if namespace == "xla_cpu"));
}

#[test]
fn test_value_op_outside_fusion_is_unsupported() {
    let device = Device::default_device();
    let err = device
        .compile(
            r#"func @main(%a: memref<4xi8> {lmhlo.params = 0 : index}) {
                 %t = "std.tensor_load"(%a) : (memref<4xi8>) -> tensor<4xi8>
                 %n = "mhlo.negate"(%t) : (tensor<4xi8>) -> tensor<4xi8>
                 "lmhlo.terminator"() : () -> ()
               }"#,
        )
        .unwrap_err();
    assert!(matches!(err, CompileError::UnsupportedOperation { .. }), "{err}");
}

#[test]
fn test_missing_entry_point() {
    let device = Device::default_device();
    let err = device
        .compile(
            r#"func @not_main(%a: memref<4xi8>) {
                 "lmhlo.terminator"() : () -> ()
               }"#,
        )
        .unwrap_err();
    assert_eq!(err, CompileError::EntryPointNotFound("main".to_string()));
}

#[test]
fn test_shape_mismatch_is_invalid() {
    let device = Device::default_device();
    let err = device
        .compile(
            r#"func @main(%a: memref<4xf32> {lmhlo.params = 0 : index},
                          %b: memref<3xf32> {lmhlo.params = 1 : index},
                          %out: memref<4xf32> {lmhlo.output_index = dense<[0]> : tensor<1xindex>}) {
                 "lmhlo.add"(%a, %b, %out) : (memref<4xf32>, memref<3xf32>, memref<4xf32>) -> ()
                 "lmhlo.terminator"() : () -> ()
               }"#,
        )
        .unwrap_err();
    assert!(matches!(err, CompileError::InvalidOperation { ref op, .. } if op == "lmhlo.add"));
}

#[test]
fn test_oversized_buffer_is_invalid_signature() {
    let device = Device::default_device();
    let err = device
        .compile(
            r#"func @main(%a: memref<4294967296x4294967296xf32> {lmhlo.params = 0 : index},
                          %out: memref<4294967296x4294967296xf32> {lmhlo.output_index = dense<[0]> : tensor<1xindex>}) {
                 "lmhlo.negate"(%a, %out) : (memref<4294967296x4294967296xf32>, memref<4294967296x4294967296xf32>) -> ()
                 "lmhlo.terminator"() : () -> ()
               }"#,
        )
        .unwrap_err();
    assert!(matches!(err, CompileError::InvalidSignature { ref function, .. } if function == "main"), "{err}");
}

fn unterminated_module() -> Module {
    let context = Context::new(DialectSet::gpu_lowering());
    let mut main = FunctionBuilder::new("main");
    let a = main.argument_with_attributes(
        Type::memref(vec![4], ElementType::I8),
        Attributes::new().with("lmhlo.params", Attribute::index(0)),
    );
    let out = main.argument_with_attributes(
        Type::memref(vec![4], ElementType::I8),
        Attributes::new().with("lmhlo.output_index", Attribute::index(0)),
    );
    let _ = main.op("lmhlo.copy", &[a, out], Vec::new(), Attributes::new());
    ModuleBuilder::new(&context).function(main.build()).build()
}

#[test]
fn test_verifier_runs_unless_disabled() -> Result<(), Box<dyn std::error::Error>> {
    let device = Device::default_device();
    let module = unterminated_module();
    assert!(matches!(
        device.compile_with(&module, DebugOptions::default_ignoring_flags()),
        Err(CompileError::Verification(_))
    ));

    let lenient = DebugOptions {
        verify_module: false,
        ..DebugOptions::default_ignoring_flags()
    };
    let executable = device.compile_with(&module, lenient)?;
    let outputs = device.run(&executable, &[&[1, 2, 3, 4]])?;
    assert_eq!(outputs, vec![vec![1, 2, 3, 4]]);
    Ok(())
}

#[test]
fn test_foreign_allocator_is_rejected() {
    let device = Device::default_device();
    let foreign_platform = InterpreterPlatform::named("elsewhere", vec![DeviceDescription::default()]);
    let foreign = StreamExecutorMemoryAllocator::new("elsewhere", vec![foreign_platform.executor(0).unwrap()]);
    let options = CompileOptions {
        device_allocator: Some(foreign),
    };
    let context = EmitterContext::new("interpreter", device.executor.description(), CodegenUnit::new("m", "t"));
    let err = GpuCompiler::new("interpreter")
        .compile(
            &unterminated_module(),
            "m",
            &ModuleConfig::default(),
            &options,
            "main",
            &device.executor,
            context,
        )
        .unwrap_err();
    assert!(matches!(err, CompileError::InvalidOptions(_)));
}

// ================================================================================================
// Execution checks
// ================================================================================================

const COPY_4: &str = r#"func @main(%in: memref<4xi8> {lmhlo.params = 0 : index},
                      %out: memref<4xi8> {lmhlo.output_index = dense<[0]> : tensor<1xindex>}) {
             "lmhlo.copy"(%in, %out) : (memref<4xi8>, memref<4xi8>) -> ()
             "lmhlo.terminator"() : () -> ()
           }"#;

#[test]
fn test_argument_checks() {
    let device = Device::default_device();
    let executable = device.compile(COPY_4).unwrap();
    assert!(matches!(
        device.run(&executable, &[]),
        Err(lumen_backends::BackendError::ArgumentCount {
            expected: 1,
            actual: 0,
            ..
        })
    ));
    assert!(matches!(
        device.run(&executable, &[&[1, 2, 3]]),
        Err(lumen_backends::BackendError::ArgumentSize {
            index: 0,
            expected: 4,
            actual: 3,
            ..
        })
    ));
}

#[test]
fn test_launch_block_clamped_to_device_limit() -> Result<(), Box<dyn std::error::Error>> {
    let description = DeviceDescription {
        threads_per_block_limit: 32,
        ..DeviceDescription::default()
    };
    let device = Device::new(description);
    let executable = device.compile(
        r#"func @main(%in: memref<100xi32> {lmhlo.params = 0 : index},
                      %out: memref<100xi32> {lmhlo.output_index = dense<[0]> : tensor<1xindex>}) {
             "lmhlo.negate"(%in, %out) : (memref<100xi32>, memref<100xi32>) -> ()
             "lmhlo.terminator"() : () -> ()
           }"#,
    )?;
    match &executable.thunks()[0] {
        Thunk::Kernel { config, .. } => {
            assert_eq!(config.block.x, 32);
            assert_eq!(config.grid.x, 4);
        }
        other => panic!("expected a kernel thunk, got {other}"),
    }

    let input: Vec<i32> = (0..100).collect();
    let outputs = device.run(&executable, &[bytemuck::cast_slice(&input)])?;
    let expected: Vec<i32> = (0..100).map(|v: i32| -v).collect();
    assert_eq!(to_i32(&outputs[0]), expected);
    Ok(())
}

#[test]
fn test_dump_kernels() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let device = Device::default_device();
    let options = DebugOptions {
        dump_to: Some(dir.path().to_path_buf()),
        ..DebugOptions::default_ignoring_flags()
    };
    device.compile_with(
        &parse(
            r#"func @main(%in: memref<4xi32> {lmhlo.params = 0 : index},
                          %out: memref<4xi32> {lmhlo.output_index = dense<[0]> : tensor<1xindex>}) {
                 "lmhlo.abs"(%in, %out) : (memref<4xi32>, memref<4xi32>) -> ()
                 "lmhlo.terminator"() : () -> ()
               }"#,
        ),
        options,
    )?;
    let dumped = std::fs::read_to_string(dir.path().join("TestModule.abs.json"))?;
    let kernel: lumen_backends::isa::KernelFunction = serde_json::from_str(&dumped)?;
    assert_eq!(kernel.name, "abs");
    assert_eq!(kernel.element_count, 4);
    Ok(())
}

proptest! {
    #[test]
    fn integer_kernels_match_host(values in prop::collection::vec((any::<i32>(), any::<i32>()), 1..64)) {
        let device = Device::default_device();
        let n = values.len();
        let text = format!(
            r#"func @main(%a: memref<{n}xi32> {{lmhlo.params = 0 : index}},
                          %b: memref<{n}xi32> {{lmhlo.params = 1 : index}},
                          %sum: memref<{n}xi32> {{lmhlo.output_index = dense<[0]> : tensor<1xindex>}},
                          %max: memref<{n}xi32> {{lmhlo.output_index = dense<[1]> : tensor<1xindex>}}) {{
                 "lmhlo.add"(%a, %b, %sum) : (memref<{n}xi32>, memref<{n}xi32>, memref<{n}xi32>) -> ()
                 "lmhlo.maximum"(%a, %b, %max) : (memref<{n}xi32>, memref<{n}xi32>, memref<{n}xi32>) -> ()
                 "lmhlo.terminator"() : () -> ()
               }}"#
        );
        let executable = device.compile(&text).unwrap();
        let (a, b): (Vec<i32>, Vec<i32>) = values.into_iter().unzip();
        let outputs = device.run(&executable, &[bytemuck::cast_slice(&a), bytemuck::cast_slice(&b)]).unwrap();

        let sum: Vec<i32> = a.iter().zip(&b).map(|(x, y)| x.wrapping_add(*y)).collect();
        let max: Vec<i32> = a.iter().zip(&b).map(|(x, y)| *x.max(y)).collect();
        prop_assert_eq!(to_i32(&outputs[0]), sum);
        prop_assert_eq!(to_i32(&outputs[1]), max);
    }
}
