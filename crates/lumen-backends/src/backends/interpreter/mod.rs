//! Interpreter platform
//!
//! Reference platform that executes kernel ISA on the host. Each device owns a
//! memory manager behind `Arc<RwLock<_>>`; kernels and gemms run with rayon.
//!
//! # Architecture
//!
//! ```text
//! InterpreterPlatform
//! └── InterpreterExecutor × N
//!     ├── MemoryManager  - fake device addresses over host vectors
//!     ├── kernel         - lane interpreter, rayon over blocks
//!     └── gemm           - f64-accumulating matrix multiply
//! ```
//!
//! # Usage
//!
//! ```rust
//! use lumen_backends::{ComputeCapability, DeviceDescription, InterpreterPlatform, Platform};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let platform = InterpreterPlatform::from_json(
//!     r#"{"devices": [{"name": "sim-a100", "compute_capability_major": 8, "compute_capability_minor": 0}]}"#,
//! )?;
//! let executor = platform.executor(0)?;
//! assert_eq!(executor.description().compute_capability(), Some(ComputeCapability::AMPERE));
//! # Ok(())
//! # }
//! ```

mod gemm;
mod kernel;
pub(crate) mod memory;

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::device::DeviceDescription;
use crate::error::{BackendError, Result};
use crate::executor::{GemmConfig, MemoryUsage, StreamExecutor};
use crate::isa::KernelFunction;
use crate::launch::LaunchConfig;
use crate::memory::DeviceMemoryBase;
use crate::platform::Platform;
use memory::MemoryManager;

/// Name the interpreter platform registers under by default.
pub const INTERPRETER_PLATFORM_NAME: &str = "interpreter";

/// JSON configuration of an interpreter platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Platform name; the default name when absent
    pub name: Option<String>,
    pub devices: Vec<DeviceDescription>,
}

/// Host-executed platform with a configurable set of devices.
pub struct InterpreterPlatform {
    name: String,
    executors: Vec<Arc<dyn StreamExecutor>>,
}

impl InterpreterPlatform {
    /// One device with the default description (no compute capability).
    pub fn new() -> Self {
        Self::with_devices(vec![DeviceDescription::default()])
    }

    pub fn with_devices(devices: Vec<DeviceDescription>) -> Self {
        Self::named(INTERPRETER_PLATFORM_NAME, devices)
    }

    /// Platform registered under `name`, for running several configurations side by side.
    pub fn named(name: impl Into<String>, devices: Vec<DeviceDescription>) -> Self {
        let name = name.into();
        let executors = devices
            .into_iter()
            .enumerate()
            .map(|(ordinal, description)| {
                Arc::new(InterpreterExecutor::new(ordinal, name.clone(), description)) as Arc<dyn StreamExecutor>
            })
            .collect();
        Self { name, executors }
    }

    /// Build from an [`InterpreterConfig`] in JSON.
    ///
    /// # Errors
    ///
    /// [`BackendError::PlatformInitialization`] if the JSON does not parse.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: InterpreterConfig =
            serde_json::from_str(json).map_err(|e| BackendError::PlatformInitialization {
                name: INTERPRETER_PLATFORM_NAME.to_string(),
                reason: format!("invalid platform JSON: {e}"),
            })?;
        let name = config.name.unwrap_or_else(|| INTERPRETER_PLATFORM_NAME.to_string());
        Ok(Self::named(name, config.devices))
    }
}

impl Default for InterpreterPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for InterpreterPlatform {
    fn name(&self) -> &str {
        &self.name
    }

    fn visible_device_count(&self) -> usize {
        self.executors.len()
    }

    fn executor(&self, ordinal: usize) -> Result<Arc<dyn StreamExecutor>> {
        self.executors
            .get(ordinal)
            .cloned()
            .ok_or(BackendError::InvalidDeviceOrdinal {
                ordinal,
                count: self.executors.len(),
            })
    }
}

/// One interpreter device.
pub struct InterpreterExecutor {
    ordinal: usize,
    platform_name: String,
    description: DeviceDescription,
    memory: Arc<RwLock<MemoryManager>>,
}

impl InterpreterExecutor {
    pub fn new(ordinal: usize, platform_name: impl Into<String>, description: DeviceDescription) -> Self {
        let memory = Arc::new(RwLock::new(MemoryManager::new(description.memory_bytes)));
        Self {
            ordinal,
            platform_name: platform_name.into(),
            description,
            memory,
        }
    }
}

impl StreamExecutor for InterpreterExecutor {
    fn ordinal(&self) -> usize {
        self.ordinal
    }

    fn platform_name(&self) -> &str {
        &self.platform_name
    }

    fn description(&self) -> &DeviceDescription {
        &self.description
    }

    fn allocate(&self, size: usize) -> Result<DeviceMemoryBase> {
        let memory = self.memory.write().allocate(size)?;
        tracing::trace!(device_ordinal = self.ordinal, %memory, "allocate");
        Ok(memory)
    }

    fn deallocate(&self, memory: DeviceMemoryBase) -> Result<()> {
        tracing::trace!(device_ordinal = self.ordinal, %memory, "deallocate");
        self.memory.write().deallocate(memory)
    }

    fn memory_usage(&self) -> MemoryUsage {
        self.memory.read().usage()
    }

    fn memcpy_host_to_device(&self, dst: DeviceMemoryBase, src: &[u8]) -> Result<()> {
        if src.len() > dst.size() {
            return Err(BackendError::SizeMismatch {
                expected: dst.size(),
                actual: src.len(),
            });
        }
        let mut guard = self.memory.write();
        guard.bytes_mut(dst.slice(0, src.len())?)?.copy_from_slice(src);
        Ok(())
    }

    fn memcpy_device_to_host(&self, dst: &mut [u8], src: DeviceMemoryBase) -> Result<()> {
        if dst.len() > src.size() {
            return Err(BackendError::SizeMismatch {
                expected: src.size(),
                actual: dst.len(),
            });
        }
        let guard = self.memory.read();
        dst.copy_from_slice(guard.bytes(src.slice(0, dst.len())?)?);
        Ok(())
    }

    fn memcpy_device_to_device(&self, dst: DeviceMemoryBase, src: DeviceMemoryBase, size: usize) -> Result<()> {
        let mut guard = self.memory.write();
        let staged = guard.bytes(src.slice(0, size)?)?.to_vec();
        guard.bytes_mut(dst.slice(0, size)?)?.copy_from_slice(&staged);
        Ok(())
    }

    fn memset(&self, dst: DeviceMemoryBase, value: u8) -> Result<()> {
        self.memory.write().bytes_mut(dst)?.fill(value);
        Ok(())
    }

    fn launch_kernel(&self, kernel: &KernelFunction, config: &LaunchConfig, args: &[DeviceMemoryBase]) -> Result<()> {
        config.validate(&self.description)?;
        kernel::launch(&self.memory, kernel, config, args)
    }

    fn gemm(
        &self,
        config: &GemmConfig,
        lhs: DeviceMemoryBase,
        rhs: DeviceMemoryBase,
        out: DeviceMemoryBase,
    ) -> Result<()> {
        gemm::gemm(&self.memory, config, lhs, rhs, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ComputeCapability;

    #[test]
    fn test_from_json() {
        let platform = InterpreterPlatform::from_json(
            r#"{"name": "sim", "devices": [{"name": "d0"}, {"name": "d1", "compute_capability_major": 8}]}"#,
        )
        .unwrap();
        assert_eq!(platform.name(), "sim");
        assert_eq!(platform.visible_device_count(), 2);
        let d1 = platform.executor(1).unwrap();
        assert_eq!(d1.ordinal(), 1);
        assert_eq!(d1.platform_name(), "sim");
        assert_eq!(
            d1.description().compute_capability(),
            Some(ComputeCapability::new(8, 0))
        );
        assert!(platform.executor(2).is_err());
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            InterpreterPlatform::from_json("{devices: nope}"),
            Err(BackendError::PlatformInitialization { .. })
        ));
    }

    #[test]
    fn test_executor_is_stable_across_calls() {
        let platform = InterpreterPlatform::new();
        let a = platform.executor(0).unwrap();
        let b = platform.executor(0).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_copies_check_sizes() {
        let executor = InterpreterPlatform::new().executor(0).unwrap();
        let buffer = executor.allocate(4).unwrap();
        assert!(matches!(
            executor.memcpy_host_to_device(buffer, &[0; 8]),
            Err(BackendError::SizeMismatch { .. })
        ));
        executor.memcpy_host_to_device(buffer, &[1, 2]).unwrap();
        let mut host = [0u8; 4];
        executor.memcpy_device_to_host(&mut host, buffer).unwrap();
        assert_eq!(host, [1, 2, 0, 0]);
    }

    #[test]
    fn test_device_to_device_within_one_allocation() {
        let executor = InterpreterPlatform::new().executor(0).unwrap();
        let buffer = executor.allocate(4).unwrap();
        executor.memcpy_host_to_device(buffer, &[1, 2, 3, 4]).unwrap();
        executor
            .memcpy_device_to_device(buffer.slice(1, 3).unwrap(), buffer, 3)
            .unwrap();
        let mut host = [0u8; 4];
        executor.memcpy_device_to_host(&mut host, buffer).unwrap();
        assert_eq!(host, [1, 1, 2, 3]);
    }
}
