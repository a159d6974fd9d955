//! Code generation context handed to a compiler

use std::sync::Arc;

use crate::device::{ComputeCapability, DeviceDescription};
use crate::isa::KernelFunction;

/// Device limits the emitter sizes kernels against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuDeviceInfo {
    pub threads_per_block_limit: u32,
    pub threads_per_warp: u32,
    pub shared_memory_per_block: usize,
    pub core_count: u32,
}

impl From<&DeviceDescription> for GpuDeviceInfo {
    fn from(description: &DeviceDescription) -> Self {
        Self {
            threads_per_block_limit: description.threads_per_block_limit,
            threads_per_warp: description.threads_per_warp,
            shared_memory_per_block: description.shared_memory_per_block,
            core_count: description.core_count,
        }
    }
}

/// Container that receives the kernels emitted for one module.
#[derive(Debug, Clone, PartialEq)]
pub struct CodegenUnit {
    name: String,
    target_triple: String,
    kernels: Vec<Arc<KernelFunction>>,
}

impl CodegenUnit {
    /// Empty unit for `name` targeting `target_triple`.
    pub fn new(name: impl Into<String>, target_triple: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_triple: target_triple.into(),
            kernels: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target_triple(&self) -> &str {
        &self.target_triple
    }

    pub fn kernels(&self) -> &[Arc<KernelFunction>] {
        &self.kernels
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }

    /// Add a kernel; returns the shared handle stored in the unit.
    pub fn add_kernel(&mut self, kernel: KernelFunction) -> Arc<KernelFunction> {
        let kernel = Arc::new(kernel);
        self.kernels.push(Arc::clone(&kernel));
        kernel
    }

    /// A name not yet used by any kernel in the unit, derived from `base`.
    pub fn unique_kernel_name(&self, base: &str) -> String {
        let taken = |name: &str| self.kernels.iter().any(|k| k.name == name);
        if !taken(base) {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{base}_{n}"))
            .find(|name| !taken(name))
            .unwrap_or_else(|| base.to_string())
    }
}

/// Everything the emitter knows about its target.
#[derive(Debug, Clone)]
pub struct EmitterContext {
    pub platform_name: String,
    pub device_info: GpuDeviceInfo,
    /// `None` when the device reports no compute capability
    pub compute_capability: Option<ComputeCapability>,
    pub unit: CodegenUnit,
}

impl EmitterContext {
    /// Context for compiling against `description`.
    pub fn new(platform_name: impl Into<String>, description: &DeviceDescription, unit: CodegenUnit) -> Self {
        Self {
            platform_name: platform_name.into(),
            device_info: GpuDeviceInfo::from(description),
            compute_capability: description.compute_capability(),
            unit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::{KernelFunction, Type};

    fn kernel(name: &str) -> KernelFunction {
        KernelFunction {
            name: name.to_string(),
            params: vec![crate::isa::KernelParam::new(Type::U8, 1)],
            instructions: Vec::new(),
            element_count: 1,
            flush_denormals: false,
        }
    }

    #[test]
    fn test_unique_kernel_names() {
        let mut unit = CodegenUnit::new("TestModule", "lumen-kernel-isa");
        assert!(unit.is_empty());
        assert_eq!(unit.unique_kernel_name("add"), "add");
        unit.add_kernel(kernel("add"));
        assert_eq!(unit.unique_kernel_name("add"), "add_1");
        unit.add_kernel(kernel("add_1"));
        assert_eq!(unit.unique_kernel_name("add"), "add_2");
        assert_eq!(unit.kernels().len(), 2);
    }

    #[test]
    fn test_context_carries_capability_sentinel() {
        let description = DeviceDescription::default();
        let context = EmitterContext::new("interpreter", &description, CodegenUnit::new("m", "t"));
        assert_eq!(context.compute_capability, None);
        assert_eq!(context.device_info.threads_per_block_limit, 1024);

        let ampere = description.with_compute_capability(ComputeCapability::AMPERE);
        let context = EmitterContext::new("interpreter", &ampere, CodegenUnit::new("m", "t"));
        assert_eq!(context.compute_capability, Some(ComputeCapability::AMPERE));
    }
}
