//! Settings for bootstrapping a new arena.

use super::constants::{BLOCK_SIZE, DEFAULT_EXTENT, PARAMETER_BLOCKS, ROOT_OBJECT_NAME};
use super::layout::DESCRIPTOR_SIZE;
use serde::{Deserialize, Serialize};

/// Settings used when a new arena is bootstrapped.
///
/// Existing arenas carry their own parameters in the parameter block; a
/// config passed when re-attaching them is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Bytes of arena the initial Block Table must describe.
    pub initial_extent: usize,
    /// Name under which the parameter block is registered.
    pub root_name: String,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            initial_extent: DEFAULT_EXTENT,
            root_name: ROOT_OBJECT_NAME.to_owned(),
        }
    }
}

impl ArenaConfig {
    /// Descriptors in the initial Block Table.
    ///
    /// A power of two, and always large enough to describe the parameter
    /// block and the table itself.
    pub fn initial_table_capacity(&self) -> usize {
        let mut capacity = (self.initial_extent / BLOCK_SIZE).max(1).next_power_of_two();
        loop {
            let table_blocks = (capacity * DESCRIPTOR_SIZE).div_ceil(BLOCK_SIZE);
            // Indices 1..=PARAMETER_BLOCKS + table_blocks must fit, plus the anchor.
            if PARAMETER_BLOCKS + table_blocks < capacity {
                return capacity;
            }
            capacity *= 2;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_covers_default_extent() {
        let config = ArenaConfig::default();
        assert_eq!(config.initial_table_capacity(), 1024);
    }

    #[test]
    fn tiny_extent_still_covers_bookkeeping() {
        let config = ArenaConfig { initial_extent: 0, ..Default::default() };
        let capacity = config.initial_table_capacity();
        let table_blocks = (capacity * DESCRIPTOR_SIZE).div_ceil(BLOCK_SIZE);
        assert!(PARAMETER_BLOCKS + table_blocks < capacity);
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: ArenaConfig = serde_json::from_str(r#"{ "initial_extent": 65536 }"#).unwrap();
        assert_eq!(config.initial_extent, 65536);
        assert_eq!(config.root_name, ROOT_OBJECT_NAME);
        assert_eq!(config.initial_table_capacity(), 16);
    }
}
