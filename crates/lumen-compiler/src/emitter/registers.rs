//! Register allocation for emitted kernels

use lumen_backends::isa::Register;

/// Hands out kernel registers, reusing freed ones first.
///
/// # Example
///
/// ```text
/// let mut allocator = RegisterAllocator::new();
/// let r0 = allocator.alloc()?;  // r0
/// let r1 = allocator.alloc()?;  // r1
/// allocator.free(r0);
/// let r2 = allocator.alloc()?;  // r0 again
/// ```
#[derive(Debug, Default)]
pub struct RegisterAllocator {
    /// Next never-used register index
    next_reg: u16,

    /// Freed registers, reused LIFO
    free_list: Vec<u8>,
}

impl RegisterAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a register; `None` once all 256 are live.
    pub fn alloc(&mut self) -> Option<Register> {
        if let Some(index) = self.free_list.pop() {
            return Some(Register::new(index));
        }
        let index = u8::try_from(self.next_reg).ok()?;
        self.next_reg += 1;
        Some(Register::new(index))
    }

    /// Return a register for reuse.
    pub fn free(&mut self, reg: Register) {
        debug_assert!(!self.free_list.contains(&reg.index()), "{reg} freed twice");
        self.free_list.push(reg.index());
    }

    /// Registers currently live.
    pub fn active_count(&self) -> usize {
        self.next_reg as usize - self.free_list.len()
    }

    /// Registers ever handed out; the kernel's register file size.
    pub fn high_water(&self) -> usize {
        self.next_reg as usize
    }
}
