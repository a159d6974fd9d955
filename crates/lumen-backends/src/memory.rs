//! Device memory handles and allocators
//!
//! Three handle types describe device memory:
//!
//! - [`DeviceMemoryBase`]: a non-owning `(address, size)` view
//! - [`OwningDeviceMemory`]: frees itself through its allocator when dropped
//! - [`MaybeOwningDeviceMemory`]: either of the above, never conflated
//!
//! [`StreamExecutorMemoryAllocator`] routes allocations to the stream executor
//! of the requested device ordinal.

use std::fmt;
use std::sync::{Arc, Weak};

use crate::error::{BackendError, Result};
use crate::executor::StreamExecutor;

// ================================================================================================
// Views
// ================================================================================================

/// Non-owning view of a span of device memory.
///
/// The opaque value is a device address and is only meaningful to the
/// platform that produced it. A zero address is the null buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceMemoryBase {
    opaque: u64,
    size: usize,
}

impl DeviceMemoryBase {
    pub const fn new(opaque: u64, size: usize) -> Self {
        Self { opaque, size }
    }

    /// Null buffer of size zero.
    pub const fn null() -> Self {
        Self { opaque: 0, size: 0 }
    }

    pub const fn is_null(&self) -> bool {
        self.opaque == 0
    }

    pub const fn opaque(&self) -> u64 {
        self.opaque
    }

    pub const fn size(&self) -> usize {
        self.size
    }

    /// Sub-view of `size` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::OutOfBounds`] if the range leaves this view.
    pub fn slice(&self, offset: usize, size: usize) -> Result<Self> {
        let address = self.opaque.checked_add(offset as u64);
        match (offset.checked_add(size), address) {
            (Some(end), Some(address)) if end <= self.size => Ok(Self::new(address, size)),
            _ => Err(BackendError::OutOfBounds {
                address: self.opaque.saturating_add(offset as u64),
                size,
                allocation_size: self.size,
            }),
        }
    }
}

impl fmt::Display for DeviceMemoryBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}+{}", self.opaque, self.size)
    }
}

// ================================================================================================
// Allocators
// ================================================================================================

/// Source of device memory for executables and the harness.
pub trait DeviceMemoryAllocator: Send + Sync {
    /// Platform whose devices this allocator serves.
    fn platform_name(&self) -> &str;

    /// Allocate `size` bytes on device `ordinal`.
    ///
    /// A zero-sized request yields a null buffer without touching the device.
    fn allocate(&self, ordinal: usize, size: usize) -> Result<OwningDeviceMemory>;

    /// Return memory to device `ordinal`.
    fn deallocate(&self, ordinal: usize, memory: DeviceMemoryBase) -> Result<()>;
}

/// Allocator that forwards to the stream executor of each device.
pub struct StreamExecutorMemoryAllocator {
    platform_name: String,
    executors: Vec<Arc<dyn StreamExecutor>>,
    this: Weak<StreamExecutorMemoryAllocator>,
}

impl StreamExecutorMemoryAllocator {
    /// Build an allocator over `executors`, indexed by device ordinal.
    pub fn new(platform_name: impl Into<String>, executors: Vec<Arc<dyn StreamExecutor>>) -> Arc<Self> {
        let platform_name = platform_name.into();
        Arc::new_cyclic(|this| Self {
            platform_name,
            executors,
            this: this.clone(),
        })
    }

    fn executor(&self, ordinal: usize) -> Result<&Arc<dyn StreamExecutor>> {
        self.executors
            .iter()
            .find(|executor| executor.ordinal() == ordinal)
            .ok_or(BackendError::InvalidDeviceOrdinal {
                ordinal,
                count: self.executors.len(),
            })
    }
}

impl DeviceMemoryAllocator for StreamExecutorMemoryAllocator {
    fn platform_name(&self) -> &str {
        &self.platform_name
    }

    fn allocate(&self, ordinal: usize, size: usize) -> Result<OwningDeviceMemory> {
        let executor = self.executor(ordinal)?;
        if size == 0 {
            return Ok(OwningDeviceMemory::null(ordinal));
        }
        let memory = executor.allocate(size)?;
        let allocator = self
            .this
            .upgrade()
            .map(|this| this as Arc<dyn DeviceMemoryAllocator>);
        Ok(OwningDeviceMemory {
            memory,
            device_ordinal: ordinal,
            allocator,
        })
    }

    fn deallocate(&self, ordinal: usize, memory: DeviceMemoryBase) -> Result<()> {
        if memory.is_null() {
            return Ok(());
        }
        self.executor(ordinal)?.deallocate(memory)
    }
}

// ================================================================================================
// Owning handles
// ================================================================================================

/// Device memory that is returned to its allocator on drop.
pub struct OwningDeviceMemory {
    memory: DeviceMemoryBase,
    device_ordinal: usize,
    allocator: Option<Arc<dyn DeviceMemoryAllocator>>,
}

impl OwningDeviceMemory {
    fn null(device_ordinal: usize) -> Self {
        Self {
            memory: DeviceMemoryBase::null(),
            device_ordinal,
            allocator: None,
        }
    }

    /// Non-owning view of this memory.
    pub fn as_base(&self) -> DeviceMemoryBase {
        self.memory
    }

    pub fn device_ordinal(&self) -> usize {
        self.device_ordinal
    }

    pub fn size(&self) -> usize {
        self.memory.size()
    }

    pub fn is_null(&self) -> bool {
        self.memory.is_null()
    }

    /// Give up ownership without freeing.
    pub fn release(mut self) -> DeviceMemoryBase {
        self.allocator = None;
        self.memory
    }
}

impl fmt::Debug for OwningDeviceMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwningDeviceMemory")
            .field("memory", &self.memory)
            .field("device_ordinal", &self.device_ordinal)
            .finish()
    }
}

impl Drop for OwningDeviceMemory {
    fn drop(&mut self) {
        let Some(allocator) = self.allocator.take() else {
            return;
        };
        if let Err(e) = allocator.deallocate(self.device_ordinal, self.memory) {
            tracing::warn!(
                device_ordinal = self.device_ordinal,
                memory = %self.memory,
                error = %e,
                "device_deallocation_failed"
            );
        }
    }
}

/// Buffer that is either owned by the holder or borrowed from the caller.
#[derive(Debug)]
pub enum MaybeOwningDeviceMemory {
    Owned(OwningDeviceMemory),
    Borrowed(DeviceMemoryBase),
}

impl MaybeOwningDeviceMemory {
    pub fn as_base(&self) -> DeviceMemoryBase {
        match self {
            MaybeOwningDeviceMemory::Owned(memory) => memory.as_base(),
            MaybeOwningDeviceMemory::Borrowed(memory) => *memory,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, MaybeOwningDeviceMemory::Owned(_))
    }

    /// Take the owning handle, if any.
    pub fn into_owned(self) -> Option<OwningDeviceMemory> {
        match self {
            MaybeOwningDeviceMemory::Owned(memory) => Some(memory),
            MaybeOwningDeviceMemory::Borrowed(_) => None,
        }
    }
}

impl From<OwningDeviceMemory> for MaybeOwningDeviceMemory {
    fn from(memory: OwningDeviceMemory) -> Self {
        MaybeOwningDeviceMemory::Owned(memory)
    }
}

impl From<DeviceMemoryBase> for MaybeOwningDeviceMemory {
    fn from(memory: DeviceMemoryBase) -> Self {
        MaybeOwningDeviceMemory::Borrowed(memory)
    }
}
