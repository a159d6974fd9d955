//! Device side of lumen: platforms, streams, memory and the compiler seams
//!
//! This crate provides:
//! - **Platforms**: named device families resolved through a [`PlatformRegistry`]
//! - **Stream executors**: per-device memory, copies, kernel launches and gemm
//! - **Streams**: ordered command queues with sticky errors, pooled per device
//! - **Kernel ISA**: the lane-parallel instruction set kernels are compiled to
//! - **Compiler / Executable traits**: the seam between a compiler and a device
//! - **Interpreter platform**: reference device that executes the ISA on the host
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │        Compiler  →  Box<dyn Executable>      │
//! └──────────────────────┬───────────────────────┘
//!                        │ enqueue thunks
//!                        ▼
//! ┌──────────────────────────────────────────────┐
//! │   Stream (worker thread, in-order commands)  │
//! └──────────────────────┬───────────────────────┘
//!                        ▼
//! ┌──────────────────────────────────────────────┐
//! │    StreamExecutor (one per device)           │
//! │    └── InterpreterExecutor                   │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use lumen_backends::isa::{Address, Instruction, KernelFunction, KernelParam, Register, Type};
//! use lumen_backends::{InterpreterPlatform, LaunchConfig, Platform, Stream};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = InterpreterPlatform::new().executor(0)?;
//! let stream = Stream::new(Arc::clone(&executor))?;
//!
//! let data = [1.0f32, 2.0, 3.0, 4.0];
//! let input = executor.allocate(16)?;
//! let output = executor.allocate(16)?;
//! stream.then_memcpy_host_to_device(input, bytemuck::cast_slice(&data));
//!
//! // output[i] = input[i] + input[i]
//! let kernel = KernelFunction {
//!     name: "double".to_string(),
//!     params: vec![KernelParam::new(Type::F32, 4), KernelParam::new(Type::F32, 4)],
//!     instructions: vec![
//!         Instruction::LDG { ty: Type::F32, dst: Register(0), addr: Address::Lane { param: 0 } },
//!         Instruction::ADD { ty: Type::F32, dst: Register(1), src1: Register(0), src2: Register(0) },
//!         Instruction::STG { ty: Type::F32, src: Register(1), addr: Address::Lane { param: 1 } },
//!     ],
//!     element_count: 4,
//!     flush_denormals: false,
//! };
//! stream.then_launch(Arc::new(kernel), LaunchConfig::linear(4, 128), vec![input, output]);
//! let result = stream.then_memcpy_device_to_host(output);
//! stream.block_host_until_done()?;
//!
//! let bytes = result.take()?;
//! assert_eq!(bytes.len(), 16);
//! assert_eq!(f32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]), 8.0);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod backends;
pub mod compiler;
pub mod device;
pub mod error;
pub mod executable;
pub mod executor;
pub mod isa;
pub mod launch;
pub mod memory;
pub mod platform;
pub mod shape;
pub mod stream;
pub mod stream_pool;

// Re-export public API
pub use backend::{Backend, BackendOptions};
pub use backends::{InterpreterConfig, InterpreterExecutor, InterpreterPlatform, INTERPRETER_PLATFORM_NAME};
pub use compiler::{
    CodegenUnit, CompileError, CompileOptions, CompileResult, Compiler, DebugOptions, EmitterContext, GpuDeviceInfo,
    ModuleConfig,
};
pub use device::{ComputeCapability, DeviceDescription, UNKNOWN_COMPUTE_CAPABILITY};
pub use error::{BackendError, Result};
pub use executable::{Executable, ExecutableRunOptions, ExecutionInput, ExecutionOutput, ShapedBuffer};
pub use executor::{GemmConfig, MemoryUsage, StreamExecutor};
pub use launch::{BlockDim, GridDim, LaunchConfig};
pub use memory::{DeviceMemoryAllocator, DeviceMemoryBase, MaybeOwningDeviceMemory, OwningDeviceMemory, StreamExecutorMemoryAllocator};
pub use platform::{Platform, PlatformRegistry, KERNEL_ISA_TRIPLE};
pub use shape::{PrimitiveType, Shape, ShapeError, ShapeIndex, ShapeTree};
pub use stream::{PendingHostBuffer, Stream};
pub use stream_pool::{PooledStream, StreamPool};
