//! Memory subsystem configuration.
//!
//! Sizing of the zone registry and the choice of allocator installed at
//! startup.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

/// Allocator installed in the underlying slot at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocatorKind {
    /// Plain system heap, no zone accounting.
    System,
    /// System heap wrapped in per-zone accounting.
    #[default]
    Zoned,
}

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct MemoryConfig {
    /// Number of zone slots; every configured zone id must be below it.
    #[serde(default = "default_registry_capacity")]
    #[validate(range(min = 1, max = 65536))]
    pub registry_capacity: usize,

    /// Smallest alignment the backing allocator accepts. Must be a power of two.
    #[serde(default = "default_min_align")]
    #[validate(range(min = 1, max = 4096))]
    pub min_align: usize,

    #[serde(default)]
    pub allocator: AllocatorKind,

    /// Zero pool slots before handing them out.
    #[serde(default)]
    pub zero_pool_slots: bool,
}

fn default_registry_capacity() -> usize {
    64
}

fn default_min_align() -> usize {
    1
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            registry_capacity: default_registry_capacity(),
            min_align: default_min_align(),
            allocator: AllocatorKind::default(),
            zero_pool_slots: false,
        }
    }
}
