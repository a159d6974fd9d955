//! A platform bound to its compiler, devices, allocator and stream pools
//!
//! ## Architecture
//!
//! ```text
//! Backend
//! ├── Platform                     - resolved by name from a PlatformRegistry
//! ├── Compiler                     - registered for the same platform
//! ├── StreamExecutor × N           - one per allowed device
//! ├── StreamExecutorMemoryAllocator
//! └── StreamPool × N               - one per allowed device
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::compiler::Compiler;
use crate::error::{BackendError, Result};
use crate::executor::StreamExecutor;
use crate::memory::{DeviceMemoryAllocator, StreamExecutorMemoryAllocator};
use crate::platform::{Platform, PlatformRegistry};
use crate::stream_pool::{PooledStream, StreamPool};

/// Which platform and devices a [`Backend`] uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendOptions {
    pub platform: String,
    /// Device ordinals to use; `None` means every visible device
    pub allowed_devices: Option<BTreeSet<usize>>,
}

impl BackendOptions {
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            allowed_devices: None,
        }
    }

    pub fn with_allowed_devices(mut self, devices: impl IntoIterator<Item = usize>) -> Self {
        self.allowed_devices = Some(devices.into_iter().collect());
        self
    }
}

/// Compute backend used for the lifetime of a harness.
pub struct Backend {
    platform: Arc<dyn Platform>,
    compiler: Arc<dyn Compiler>,
    executors: BTreeMap<usize, Arc<dyn StreamExecutor>>,
    allocator: Arc<StreamExecutorMemoryAllocator>,
    stream_pools: BTreeMap<usize, StreamPool>,
    default_device_ordinal: usize,
}

impl Backend {
    /// Resolve the platform and compiler and bring up every allowed device.
    ///
    /// # Errors
    ///
    /// - [`BackendError::PlatformNotFound`] if no platform has that name
    /// - [`BackendError::CompilerNotFound`] if no compiler targets it
    /// - [`BackendError::PlatformInitialization`] if it has no usable device
    #[tracing::instrument(skip(registry))]
    pub fn create(registry: &PlatformRegistry, options: &BackendOptions) -> Result<Self> {
        let platform = registry.platform_with_name(&options.platform)?;
        let compiler = registry.compiler_for(platform.name())?;

        let visible = platform.visible_device_count();
        let ordinals: Vec<usize> = (0..visible)
            .filter(|ordinal| {
                options
                    .allowed_devices
                    .as_ref()
                    .map_or(true, |allowed| allowed.contains(ordinal))
            })
            .collect();

        let Some(&default_device_ordinal) = ordinals.first() else {
            return Err(BackendError::PlatformInitialization {
                name: platform.name().to_string(),
                reason: format!(
                    "no usable device ({visible} visible, allowed: {:?})",
                    options.allowed_devices
                ),
            });
        };

        let mut executors = BTreeMap::new();
        for ordinal in ordinals {
            let executor = platform
                .executor(ordinal)
                .map_err(|e| BackendError::PlatformInitialization {
                    name: platform.name().to_string(),
                    reason: format!("device {ordinal}: {e}"),
                })?;
            executors.insert(ordinal, executor);
        }

        let allocator = StreamExecutorMemoryAllocator::new(platform.name(), executors.values().cloned().collect());
        let stream_pools = executors
            .iter()
            .map(|(&ordinal, executor)| (ordinal, StreamPool::new(Arc::clone(executor))))
            .collect();

        tracing::debug!(
            platform = platform.name(),
            devices = executors.len(),
            default_device_ordinal,
            "backend_created"
        );

        Ok(Self {
            platform,
            compiler,
            executors,
            allocator,
            stream_pools,
            default_device_ordinal,
        })
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    pub fn compiler(&self) -> &Arc<dyn Compiler> {
        &self.compiler
    }

    /// Executors of the allowed devices, by ordinal.
    pub fn stream_executors(&self) -> impl Iterator<Item = &Arc<dyn StreamExecutor>> {
        self.executors.values()
    }

    pub fn stream_executor(&self, ordinal: usize) -> Result<&Arc<dyn StreamExecutor>> {
        self.executors.get(&ordinal).ok_or(BackendError::InvalidDeviceOrdinal {
            ordinal,
            count: self.executors.len(),
        })
    }

    pub fn default_stream_executor(&self) -> &Arc<dyn StreamExecutor> {
        // The default ordinal is always one of the executors.
        &self.executors[&self.default_device_ordinal]
    }

    pub fn memory_allocator(&self) -> Arc<dyn DeviceMemoryAllocator> {
        Arc::clone(&self.allocator) as Arc<dyn DeviceMemoryAllocator>
    }

    pub fn default_device_ordinal(&self) -> usize {
        self.default_device_ordinal
    }

    pub fn device_count(&self) -> usize {
        self.executors.len()
    }

    /// Borrow a stream on device `ordinal`.
    pub fn borrow_stream(&self, ordinal: usize) -> Result<PooledStream<'_>> {
        self.stream_pools
            .get(&ordinal)
            .ok_or(BackendError::InvalidDeviceOrdinal {
                ordinal,
                count: self.executors.len(),
            })?
            .borrow_stream()
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("platform", &self.platform.name())
            .field("devices", &self.executors.keys().collect::<Vec<_>>())
            .field("default_device_ordinal", &self.default_device_ordinal)
            .finish()
    }
}
