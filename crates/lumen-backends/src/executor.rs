//! Per-device execution interface
//!
//! A [`StreamExecutor`] is one device of a platform. Streams enqueue work
//! against it; the executor performs each command synchronously when the
//! stream's worker reaches it.

use crate::device::DeviceDescription;
use crate::error::Result;
use crate::isa::{KernelFunction, Type};
use crate::launch::LaunchConfig;
use crate::memory::DeviceMemoryBase;

/// Allocation statistics of one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryUsage {
    pub live_allocations: usize,
    pub live_bytes: usize,
    pub peak_bytes: usize,
}

/// Row-major matrix multiply: `out = alpha * op(lhs) * op(rhs) + beta * out`.
///
/// `op` transposes its operand when the matching flag is set. `lhs` is `m x k`
/// and `rhs` is `k x n` after transposition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GemmConfig {
    pub element: Type,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub alpha: f64,
    pub beta: f64,
    pub lhs_transposed: bool,
    pub rhs_transposed: bool,
}

impl GemmConfig {
    pub fn lhs_bytes(&self) -> usize {
        self.m * self.k * self.element.size_bytes()
    }

    pub fn rhs_bytes(&self) -> usize {
        self.k * self.n * self.element.size_bytes()
    }

    pub fn output_bytes(&self) -> usize {
        self.m * self.n * self.element.size_bytes()
    }
}

/// One device of a platform.
///
/// Methods block until the command completes; ordering is the stream's job.
pub trait StreamExecutor: Send + Sync {
    /// Device ordinal within the platform.
    fn ordinal(&self) -> usize;

    fn platform_name(&self) -> &str;

    fn description(&self) -> &DeviceDescription;

    /// Allocate `size` bytes of zeroed device memory.
    fn allocate(&self, size: usize) -> Result<DeviceMemoryBase>;

    /// Free memory returned by [`StreamExecutor::allocate`].
    fn deallocate(&self, memory: DeviceMemoryBase) -> Result<()>;

    fn memory_usage(&self) -> MemoryUsage;

    fn memcpy_host_to_device(&self, dst: DeviceMemoryBase, src: &[u8]) -> Result<()>;

    fn memcpy_device_to_host(&self, dst: &mut [u8], src: DeviceMemoryBase) -> Result<()>;

    fn memcpy_device_to_device(&self, dst: DeviceMemoryBase, src: DeviceMemoryBase, size: usize) -> Result<()>;

    fn memset(&self, dst: DeviceMemoryBase, value: u8) -> Result<()>;

    /// Run `kernel` with `args` bound to its parameters in order.
    fn launch_kernel(&self, kernel: &KernelFunction, config: &LaunchConfig, args: &[DeviceMemoryBase]) -> Result<()>;

    fn gemm(
        &self,
        config: &GemmConfig,
        lhs: DeviceMemoryBase,
        rhs: DeviceMemoryBase,
        out: DeviceMemoryBase,
    ) -> Result<()>;
}

