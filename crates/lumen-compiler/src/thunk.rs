//! Thunks: the unit of work an executable enqueues
//!
//! A thunk names its buffers by [`BufferSlot`]; the executable resolves the
//! slots to device memory once per execution.

use std::fmt;
use std::sync::Arc;

use lumen_backends::isa::KernelFunction;
use lumen_backends::{DeviceMemoryBase, GemmConfig, LaunchConfig, Stream};

use crate::buffer_assignment::BufferSlot;

/// One step of a compiled program.
#[derive(Debug, Clone, PartialEq)]
pub enum Thunk {
    /// Device-to-device copy of `size` bytes
    Copy {
        src: BufferSlot,
        dst: BufferSlot,
        size: usize,
    },
    /// Upload of bytes baked into the executable
    Constant { dst: BufferSlot, bytes: Arc<[u8]> },
    /// Kernel launch with one buffer per kernel parameter
    Kernel {
        kernel: Arc<KernelFunction>,
        config: LaunchConfig,
        args: Vec<BufferSlot>,
    },
    /// Matrix multiply
    Gemm {
        config: GemmConfig,
        lhs: BufferSlot,
        rhs: BufferSlot,
        out: BufferSlot,
    },
}

impl Thunk {
    /// Enqueue on `stream`, with `resolve` mapping slots to device memory.
    pub fn enqueue(&self, stream: &Stream, resolve: impl Fn(BufferSlot) -> DeviceMemoryBase) {
        match self {
            Thunk::Copy { src, dst, size } => {
                stream.then_memcpy_device_to_device(resolve(*dst), resolve(*src), *size);
            }
            Thunk::Constant { dst, bytes } => {
                stream.then_memcpy_host_to_device(resolve(*dst), bytes);
            }
            Thunk::Kernel { kernel, config, args } => {
                let args = args.iter().map(|slot| resolve(*slot)).collect();
                stream.then_launch(Arc::clone(kernel), *config, args);
            }
            Thunk::Gemm { config, lhs, rhs, out } => {
                stream.then_gemm(*config, resolve(*lhs), resolve(*rhs), resolve(*out));
            }
        }
    }

    /// Slots this thunk touches.
    pub fn slots(&self) -> Vec<BufferSlot> {
        match self {
            Thunk::Copy { src, dst, .. } => vec![*src, *dst],
            Thunk::Constant { dst, .. } => vec![*dst],
            Thunk::Kernel { args, .. } => args.clone(),
            Thunk::Gemm { lhs, rhs, out, .. } => vec![*lhs, *rhs, *out],
        }
    }
}

impl fmt::Display for Thunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Thunk::Copy { src, dst, size } => write!(f, "copy {size}B {src:?} -> {dst:?}"),
            Thunk::Constant { dst, bytes } => write!(f, "constant {}B -> {dst:?}", bytes.len()),
            Thunk::Kernel { kernel, config, args } => write!(f, "kernel {} [{config}] {args:?}", kernel.name),
            Thunk::Gemm { config, lhs, rhs, out } => write!(
                f,
                "gemm {}x{}x{} {} {lhs:?} {rhs:?} -> {out:?}",
                config.m, config.n, config.k, config.element
            ),
        }
    }
}
