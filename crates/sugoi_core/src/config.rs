//! # Context Configuration
//!
//! Pool sizing for the three block size classes. Loaded once at startup,
//! typically from a TOML file:
//!
//! ```toml
//! [small]
//! block_size = 4096
//! blocks_per_chunk = 64
//!
//! [normal]
//! block_size = 16384
//! blocks_per_chunk = 32
//!
//! [large]
//! block_size = 262144
//! blocks_per_chunk = 4
//! max_blocks = 256
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::memory::PoolClass;

/// Smallest block size a pool accepts.
pub const MIN_BLOCK_SIZE: usize = 256;

/// Sizing of one block pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// Bytes per block. Power of two, at least [`MIN_BLOCK_SIZE`].
    pub block_size: usize,
    /// Blocks allocated from the system each time the pool grows.
    pub blocks_per_chunk: usize,
    /// Upper bound on blocks ever reserved; `None` for unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_blocks: Option<usize>,
}

impl PoolConfig {
    /// Unbounded pool config.
    #[must_use]
    pub const fn new(block_size: usize, blocks_per_chunk: usize) -> Self {
        Self {
            block_size,
            blocks_per_chunk,
            max_blocks: None,
        }
    }

    /// Same config with a block limit.
    #[must_use]
    pub const fn with_max_blocks(mut self, max_blocks: usize) -> Self {
        self.max_blocks = Some(max_blocks);
        self
    }

    fn validate(&self, class: PoolClass) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidPool { class, reason };

        if !self.block_size.is_power_of_two() || self.block_size < MIN_BLOCK_SIZE {
            return Err(invalid(format!(
                "block_size {} must be a power of two >= {MIN_BLOCK_SIZE}",
                self.block_size
            )));
        }
        if self.blocks_per_chunk == 0 {
            return Err(invalid("blocks_per_chunk must be at least 1".to_owned()));
        }
        if self.max_blocks == Some(0) {
            return Err(invalid("max_blocks must be at least 1".to_owned()));
        }
        Ok(())
    }
}

/// Configuration of a [`Context`](crate::Context): one pool per size class.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContextConfig {
    /// Small block pool.
    pub small: PoolConfig,
    /// Default block pool.
    pub normal: PoolConfig,
    /// Large block pool.
    pub large: PoolConfig,
}

impl ContextConfig {
    /// Default small block size (4 KiB).
    pub const SMALL_BLOCK_SIZE: usize = 4 * 1024;
    /// Default normal block size (16 KiB).
    pub const NORMAL_BLOCK_SIZE: usize = 16 * 1024;
    /// Default large block size (256 KiB).
    pub const LARGE_BLOCK_SIZE: usize = 256 * 1024;

    /// Pool config for a size class.
    #[must_use]
    pub const fn pool(&self, class: PoolClass) -> &PoolConfig {
        match class {
            PoolClass::Small => &self.small,
            PoolClass::Normal => &self.normal,
            PoolClass::Large => &self.large,
        }
    }

    /// Parses and validates a TOML document.
    ///
    /// Missing sections fall back to the defaults.
    ///
    /// # Errors
    ///
    /// Parse errors, unknown keys, or any [`validate`](Self::validate) failure.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    ///
    /// # Errors
    ///
    /// IO errors plus everything [`from_toml_str`](Self::from_toml_str) rejects.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Checks every pool config and that block sizes strictly increase from
    /// small to large.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidPool`] naming the first offending class.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for class in PoolClass::ALL {
            self.pool(class).validate(class)?;
        }
        if self.small.block_size >= self.normal.block_size {
            return Err(ConfigError::InvalidPool {
                class: PoolClass::Normal,
                reason: "block_size must be larger than the small pool's".to_owned(),
            });
        }
        if self.normal.block_size >= self.large.block_size {
            return Err(ConfigError::InvalidPool {
                class: PoolClass::Large,
                reason: "block_size must be larger than the normal pool's".to_owned(),
            });
        }
        Ok(())
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            small: PoolConfig::new(Self::SMALL_BLOCK_SIZE, 64),
            normal: PoolConfig::new(Self::NORMAL_BLOCK_SIZE, 32),
            large: PoolConfig::new(Self::LARGE_BLOCK_SIZE, 4),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        ContextConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ContextConfig::from_toml_str(
            r#"
            [large]
            block_size = 1048576
            blocks_per_chunk = 2
            max_blocks = 16
            "#,
        )
        .unwrap();
        assert_eq!(config.small, ContextConfig::default().small);
        assert_eq!(config.large.block_size, 1 << 20);
        assert_eq!(config.large.max_blocks, Some(16));
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        let err = ContextConfig::from_toml_str(
            r#"
            [small]
            block_size = 3000
            blocks_per_chunk = 8
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPool { class: PoolClass::Small, .. }));
    }

    #[test]
    fn test_rejects_unordered_classes() {
        let mut config = ContextConfig::default();
        config.normal.block_size = ContextConfig::SMALL_BLOCK_SIZE;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidPool { class: PoolClass::Normal, .. })
        ));
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let err = ContextConfig::from_toml_str("[tiny]\nblock_size = 512\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = ContextConfig {
            large: PoolConfig::new(1 << 20, 1).with_max_blocks(8),
            ..ContextConfig::default()
        };
        let text = toml::to_string(&config).unwrap();
        assert_eq!(ContextConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file() {
        let err = ContextConfig::load("/nonexistent/sugoi.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
