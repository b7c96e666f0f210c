//! VM and collector configuration
//!
//! Tunables live in a plain struct that deserializes from TOML, so an
//! embedding host can ship a config file next to its scripts:
//!
//! ```toml
//! [gc]
//! min_threshold = 1048576
//! promotion_age = 2
//! ```
//!
//! Every field has a default matching the collector's contract; a partial
//! file overrides only what it names.

use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GcConfig {
    /// Floor for the allocation trigger; `gc_next` never drops below this.
    pub min_threshold: usize,
    /// Multiplier applied to surviving/live bytes when computing the next
    /// trigger.
    pub growth_factor: f64,
    /// Young cycles an object must survive before promotion to old.
    pub promotion_age: u8,
    /// When a minor cycle promotes more than this fraction of its surviving
    /// bytes, the next triggered cycle is forced major.
    pub promotion_rate_limit: f64,
}

impl Default for GcConfig {
    fn default() -> Self {
        GcConfig {
            min_threshold: 1024 * 1024,
            growth_factor: 2.0,
            promotion_age: 2,
            promotion_rate_limit: 0.5,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmConfig {
    pub gc: GcConfig,
}

impl VmConfig {
    pub fn new() -> Self {
        VmConfig::default()
    }

    pub fn with_gc(mut self, gc: GcConfig) -> Self {
        self.gc = gc;
        self
    }

    pub fn from_toml_str(text: &str) -> Result<Self, String> {
        toml::from_str(text).map_err(|e| format!("Invalid VM config: {}", e))
    }

    pub fn from_path(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config '{}': {}", path.display(), e))?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VmConfig::default();
        assert_eq!(config.gc.min_threshold, 1024 * 1024);
        assert_eq!(config.gc.promotion_age, 2);
        assert_eq!(config.gc.growth_factor, 2.0);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let config = VmConfig::from_toml_str("[gc]\npromotion_age = 3\n").unwrap();
        assert_eq!(config.gc.promotion_age, 3);
        assert_eq!(config.gc.min_threshold, 1024 * 1024);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(VmConfig::from_toml_str("[gc]\nnope = 1\n").is_err());
    }
}
