//! Kernel launch dimensions

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::device::DeviceDescription;
use crate::error::{BackendError, Result};

/// Grid dimensions for kernel launch
///
/// Defines the 3D iteration space of blocks that execute the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridDim {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl GridDim {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    pub const fn linear(size: u32) -> Self {
        Self { x: size, y: 1, z: 1 }
    }

    pub const fn total_blocks(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }
}

impl Default for GridDim {
    fn default() -> Self {
        Self { x: 1, y: 1, z: 1 }
    }
}

impl fmt::Display for GridDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Block dimensions
///
/// Defines the 3D arrangement of lanes within a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockDim {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl BlockDim {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    pub const fn linear(size: u32) -> Self {
        Self { x: size, y: 1, z: 1 }
    }

    pub const fn total_lanes(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }
}

impl Default for BlockDim {
    fn default() -> Self {
        Self { x: 1, y: 1, z: 1 }
    }
}

impl fmt::Display for BlockDim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Grid and block dimensions of one launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct LaunchConfig {
    pub grid: GridDim,
    pub block: BlockDim,
}

impl LaunchConfig {
    pub const fn new(grid: GridDim, block: BlockDim) -> Self {
        Self { grid, block }
    }

    /// One lane per element, `block_size` lanes per block.
    ///
    /// Small element counts shrink the block so no block is entirely idle.
    pub fn linear(elements: usize, block_size: u32) -> Self {
        let block = (block_size.max(1) as usize).min(elements.max(1)) as u32;
        let grid = elements.div_ceil(block as usize).max(1) as u32;
        Self {
            grid: GridDim::linear(grid),
            block: BlockDim::linear(block),
        }
    }

    pub const fn total_lanes(&self) -> u64 {
        self.grid.total_blocks() * self.block.total_lanes()
    }

    /// Check the configuration against the device limits.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::InvalidLaunchConfig`] for empty grids or blocks and
    /// for blocks larger than the device's thread limit.
    pub fn validate(&self, description: &DeviceDescription) -> Result<()> {
        if self.grid.total_blocks() == 0 || self.block.total_lanes() == 0 {
            return Err(BackendError::InvalidLaunchConfig(format!(
                "empty launch: grid {} block {}",
                self.grid, self.block
            )));
        }
        if self.block.total_lanes() > description.threads_per_block_limit as u64 {
            return Err(BackendError::InvalidLaunchConfig(format!(
                "block {} exceeds {} threads per block on '{}'",
                self.block, description.threads_per_block_limit, description.name
            )));
        }
        Ok(())
    }
}

impl fmt::Display for LaunchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "grid {} block {}", self.grid, self.block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_covers_every_element() {
        let config = LaunchConfig::linear(1000, 128);
        assert_eq!(config.block.x, 128);
        assert_eq!(config.grid.x, 8);
        assert!(config.total_lanes() >= 1000);
    }

    #[test]
    fn linear_shrinks_block_for_small_inputs() {
        let config = LaunchConfig::linear(4, 128);
        assert_eq!(config.block.x, 4);
        assert_eq!(config.grid.x, 1);

        let empty = LaunchConfig::linear(0, 128);
        assert_eq!(empty.total_lanes(), 1);
    }

    #[test]
    fn validate_against_block_limit() {
        let description = DeviceDescription {
            threads_per_block_limit: 64,
            ..DeviceDescription::default()
        };
        assert!(LaunchConfig::linear(100, 64).validate(&description).is_ok());
        assert!(matches!(
            LaunchConfig::linear(100, 128).validate(&description),
            Err(BackendError::InvalidLaunchConfig(_))
        ));
        assert!(LaunchConfig::new(GridDim::new(0, 1, 1), BlockDim::linear(1))
            .validate(&description)
            .is_err());
    }
}
