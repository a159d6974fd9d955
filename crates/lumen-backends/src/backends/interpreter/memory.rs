//! Memory manager for the interpreter device
//!
//! Allocations live in host vectors keyed by a fake device address. Addresses
//! are handed out by a bump pointer starting at [`BASE_ADDRESS`] and are never
//! reused, so stale pointers fail instead of aliasing new allocations.

use std::collections::BTreeMap;

use crate::error::{BackendError, Result};
use crate::executor::MemoryUsage;
use crate::memory::DeviceMemoryBase;

/// First device address handed out.
pub const BASE_ADDRESS: u64 = 0x1000_0000;

/// Alignment of every allocation.
pub const ALIGNMENT: u64 = 256;

pub(crate) struct MemoryManager {
    allocations: BTreeMap<u64, Vec<u8>>,
    next_address: u64,
    capacity: usize,
    live_bytes: usize,
    peak_bytes: usize,
}

impl MemoryManager {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            allocations: BTreeMap::new(),
            next_address: BASE_ADDRESS,
            capacity,
            live_bytes: 0,
            peak_bytes: 0,
        }
    }

    // ============================================================================================
    // Allocation
    // ============================================================================================

    pub(crate) fn allocate(&mut self, size: usize) -> Result<DeviceMemoryBase> {
        let available = self.capacity.saturating_sub(self.live_bytes);
        if size > available {
            return Err(BackendError::OutOfMemory {
                requested: size,
                available,
            });
        }

        let address = self.next_address;
        let span = (size.max(1) as u64).div_ceil(ALIGNMENT) * ALIGNMENT;
        self.next_address += span;

        self.allocations.insert(address, vec![0u8; size]);
        self.live_bytes += size;
        self.peak_bytes = self.peak_bytes.max(self.live_bytes);

        Ok(DeviceMemoryBase::new(address, size))
    }

    /// Free an allocation; `memory` must point at its start.
    pub(crate) fn deallocate(&mut self, memory: DeviceMemoryBase) -> Result<()> {
        let freed = self
            .allocations
            .remove(&memory.opaque())
            .ok_or(BackendError::InvalidDevicePointer(memory.opaque()))?;
        self.live_bytes -= freed.len();
        Ok(())
    }

    pub(crate) fn usage(&self) -> MemoryUsage {
        MemoryUsage {
            live_allocations: self.allocations.len(),
            live_bytes: self.live_bytes,
            peak_bytes: self.peak_bytes,
        }
    }

    // ============================================================================================
    // Access
    // ============================================================================================

    /// Allocation containing `memory.opaque()` and the offset into it.
    fn locate(&self, memory: DeviceMemoryBase) -> Result<(u64, usize)> {
        let (&base, bytes) = self
            .allocations
            .range(..=memory.opaque())
            .next_back()
            .ok_or(BackendError::InvalidDevicePointer(memory.opaque()))?;

        let offset = (memory.opaque() - base) as usize;
        if offset > bytes.len() {
            return Err(BackendError::InvalidDevicePointer(memory.opaque()));
        }
        if offset + memory.size() > bytes.len() {
            return Err(BackendError::OutOfBounds {
                address: memory.opaque(),
                size: memory.size(),
                allocation_size: bytes.len(),
            });
        }
        Ok((base, offset))
    }

    /// Bytes viewed by `memory`. Empty views always succeed.
    pub(crate) fn bytes(&self, memory: DeviceMemoryBase) -> Result<&[u8]> {
        if memory.size() == 0 {
            return Ok(&[]);
        }
        let (base, offset) = self.locate(memory)?;
        Ok(&self.allocations[&base][offset..offset + memory.size()])
    }

    pub(crate) fn bytes_mut(&mut self, memory: DeviceMemoryBase) -> Result<&mut [u8]> {
        if memory.size() == 0 {
            return Ok(&mut []);
        }
        let (base, offset) = self.locate(memory)?;
        let allocation = self
            .allocations
            .get_mut(&base)
            .ok_or(BackendError::InvalidDevicePointer(memory.opaque()))?;
        Ok(&mut allocation[offset..offset + memory.size()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocations_are_aligned_and_zeroed() {
        let mut memory = MemoryManager::new(1 << 20);
        let a = memory.allocate(10).unwrap();
        let b = memory.allocate(300).unwrap();
        assert_eq!(a.opaque(), BASE_ADDRESS);
        assert_eq!(b.opaque() % ALIGNMENT, 0);
        assert!(b.opaque() >= a.opaque() + 10);
        assert!(memory.bytes(b).unwrap().iter().all(|&byte| byte == 0));
    }

    #[test]
    fn test_interior_pointers_resolve() {
        let mut memory = MemoryManager::new(1 << 20);
        let buffer = memory.allocate(8).unwrap();
        memory.bytes_mut(buffer).unwrap().copy_from_slice(&[0, 1, 2, 3, 4, 5, 6, 7]);
        let tail = buffer.slice(4, 4).unwrap();
        assert_eq!(memory.bytes(tail).unwrap(), &[4, 5, 6, 7]);
    }

    #[test]
    fn test_out_of_bounds_and_foreign_pointers() {
        let mut memory = MemoryManager::new(1 << 20);
        let buffer = memory.allocate(8).unwrap();
        let too_long = DeviceMemoryBase::new(buffer.opaque() + 4, 8);
        assert!(matches!(memory.bytes(too_long), Err(BackendError::OutOfBounds { .. })));
        assert!(matches!(
            memory.bytes(DeviceMemoryBase::new(0x10, 1)),
            Err(BackendError::InvalidDevicePointer(0x10))
        ));
    }

    #[test]
    fn test_deallocate_requires_base_pointer() {
        let mut memory = MemoryManager::new(1 << 20);
        let buffer = memory.allocate(16).unwrap();
        assert!(memory.deallocate(buffer.slice(8, 8).unwrap()).is_err());
        memory.deallocate(buffer).unwrap();
        assert!(memory.deallocate(buffer).is_err());
        assert!(memory.bytes(buffer).is_err());
    }

    #[test]
    fn test_capacity_and_usage() {
        let mut memory = MemoryManager::new(100);
        let a = memory.allocate(60).unwrap();
        assert!(matches!(
            memory.allocate(50),
            Err(BackendError::OutOfMemory {
                requested: 50,
                available: 40
            })
        ));
        memory.deallocate(a).unwrap();
        let _b = memory.allocate(50).unwrap();
        let usage = memory.usage();
        assert_eq!(usage.live_allocations, 1);
        assert_eq!(usage.live_bytes, 50);
        assert_eq!(usage.peak_bytes, 60);
    }
}
