//! Device descriptions and compute capability

use std::fmt;

use serde::{Deserialize, Serialize};

/// Major version reported by devices without a GPU compute capability.
pub const UNKNOWN_COMPUTE_CAPABILITY: i32 = -1;

/// GPU compute capability (`major.minor`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComputeCapability {
    pub major: u32,
    pub minor: u32,
}

impl ComputeCapability {
    /// First generation with native bf16 matrix multiply.
    pub const AMPERE: ComputeCapability = ComputeCapability::new(8, 0);

    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn is_at_least(self, other: ComputeCapability) -> bool {
        self >= other
    }
}

impl fmt::Display for ComputeCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Static properties of one device, as reported by its platform.
///
/// Serializable so platforms can be configured from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceDescription {
    pub name: String,
    /// [`UNKNOWN_COMPUTE_CAPABILITY`] when the device has none.
    pub compute_capability_major: i32,
    pub compute_capability_minor: i32,
    pub threads_per_block_limit: u32,
    pub threads_per_warp: u32,
    pub shared_memory_per_block: usize,
    pub core_count: u32,
    /// Total device memory in bytes.
    pub memory_bytes: usize,
}

impl Default for DeviceDescription {
    fn default() -> Self {
        Self {
            name: "lumen interpreter".to_string(),
            compute_capability_major: UNKNOWN_COMPUTE_CAPABILITY,
            compute_capability_minor: UNKNOWN_COMPUTE_CAPABILITY,
            threads_per_block_limit: 1024,
            threads_per_warp: 32,
            shared_memory_per_block: 48 * 1024,
            core_count: 1,
            memory_bytes: 1 << 30,
        }
    }
}

impl DeviceDescription {
    /// Description of a device with the given compute capability.
    pub fn with_compute_capability(mut self, capability: ComputeCapability) -> Self {
        self.compute_capability_major = capability.major as i32;
        self.compute_capability_minor = capability.minor as i32;
        self
    }

    /// Raw `(major, minor)` pair, sentinel included.
    pub fn raw_compute_capability(&self) -> (i32, i32) {
        (self.compute_capability_major, self.compute_capability_minor)
    }

    /// `None` when the device reports the sentinel major version.
    pub fn compute_capability(&self) -> Option<ComputeCapability> {
        if self.compute_capability_major < 0 {
            return None;
        }
        Some(ComputeCapability::new(
            self.compute_capability_major as u32,
            self.compute_capability_minor.max(0) as u32,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_means_no_capability() {
        let description = DeviceDescription::default();
        assert_eq!(description.raw_compute_capability().0, UNKNOWN_COMPUTE_CAPABILITY);
        assert_eq!(description.compute_capability(), None);
    }

    #[test]
    fn capability_ordering() {
        let volta = ComputeCapability::new(7, 5);
        assert!(!volta.is_at_least(ComputeCapability::AMPERE));
        assert!(ComputeCapability::new(8, 6).is_at_least(ComputeCapability::AMPERE));
        assert_eq!(ComputeCapability::AMPERE.to_string(), "8.0");
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let description: DeviceDescription =
            serde_json::from_str(r#"{"name": "a100", "compute_capability_major": 8, "compute_capability_minor": 0}"#)
                .unwrap();
        assert_eq!(description.compute_capability(), Some(ComputeCapability::AMPERE));
        assert_eq!(description.threads_per_block_limit, 1024);
    }
}
