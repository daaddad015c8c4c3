//! # Process Context
//!
//! Owner of the three block pools and the type registry.
//!
//! ```text
//! ContextCell ──get()──> Context
//!                         ├── BlockPool small   (4 KiB)
//!                         ├── BlockPool normal  (16 KiB)
//!                         ├── BlockPool large   (256 KiB)
//!                         └── TypeRegistry
//! ```
//!
//! Everything built on a context borrows it (`Storage<'ctx>`,
//! `BlockArena<'p>`), so the borrow checker rejects any use after shutdown.

use std::sync::OnceLock;

use crate::config::ContextConfig;
use crate::error::ConfigError;
use crate::memory::{BlockPool, PoolClass};
use crate::types::TypeRegistry;

/// Pools and type registry shared by every storage of an engine instance.
///
/// # Thread Safety
///
/// `Context` is `Sync`: pools and registry lock internally.
#[derive(Debug)]
pub struct Context {
    config: ContextConfig,
    /// Indexed by [`PoolClass::index`].
    pools: [BlockPool; 3],
    registry: TypeRegistry,
}

impl Context {
    /// Creates a context from a validated configuration.
    ///
    /// Pools allocate lazily; nothing is reserved up front.
    ///
    /// # Errors
    ///
    /// Any [`ContextConfig::validate`] failure.
    pub fn new(config: ContextConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Creates a context with [`ContextConfig::default`].
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::build(ContextConfig::default())
    }

    fn build(config: ContextConfig) -> Self {
        let pools = PoolClass::ALL.map(|class| BlockPool::new(*config.pool(class)));
        tracing::info!(
            small = pools[0].block_size(),
            normal = pools[1].block_size(),
            large = pools[2].block_size(),
            "context created"
        );
        Self {
            config,
            pools,
            registry: TypeRegistry::new(),
        }
    }

    /// The configuration the context was built from.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// The pool of one size class.
    #[inline]
    #[must_use]
    pub fn pool(&self, class: PoolClass) -> &BlockPool {
        &self.pools[class.index()]
    }

    /// The smallest pool whose blocks hold `bytes`.
    ///
    /// Returns `None` if `bytes` exceeds the large block size.
    #[must_use]
    pub fn pool_for_size(&self, bytes: usize) -> Option<&BlockPool> {
        self.pools.iter().find(|pool| pool.block_size() >= bytes)
    }

    /// The type registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        let outstanding: usize = self.pools.iter().map(BlockPool::outstanding).sum();
        if outstanding > 0 {
            tracing::warn!(outstanding, "context dropped with blocks still in use");
        }
        tracing::info!(types = self.registry.len(), "context destroyed");
    }
}

/// Lazily constructed, explicitly destroyed owner of a [`Context`].
///
/// The first [`get`](Self::get) builds the context; concurrent first calls
/// build it exactly once. [`shutdown`](Self::shutdown) takes `&mut self`, so
/// it cannot run while any `&Context` handed out by `get` is alive.
///
/// # Example
///
/// ```rust,ignore
/// let mut cell = ContextCell::new(ContextConfig::default())?;
/// let registry = cell.get().registry();
/// // ...
/// cell.shutdown();
/// ```
#[derive(Debug)]
pub struct ContextCell {
    config: ContextConfig,
    cell: OnceLock<Context>,
}

impl ContextCell {
    /// Creates an empty cell. The configuration is validated now so that
    /// [`get`](Self::get) cannot fail later.
    ///
    /// # Errors
    ///
    /// Any [`ContextConfig::validate`] failure.
    pub fn new(config: ContextConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            cell: OnceLock::new(),
        })
    }

    /// Returns the context, building it on first use.
    ///
    /// After a [`shutdown`](Self::shutdown) the next call builds a fresh
    /// context.
    pub fn get(&self) -> &Context {
        self.cell.get_or_init(|| Context::build(self.config.clone()))
    }

    /// Checks whether the context is currently built.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Destroys the context.
    ///
    /// Returns `false` if it was never built or already destroyed.
    pub fn shutdown(&mut self) -> bool {
        match self.cell.take() {
            Some(context) => {
                drop(context);
                true
            }
            None => false,
        }
    }
}

impl Default for ContextCell {
    fn default() -> Self {
        Self {
            config: ContextConfig::default(),
            cell: OnceLock::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::types::{Guid, TypeDescription};

    #[test]
    fn test_pools_follow_config() {
        let context = Context::with_defaults();
        assert_eq!(context.pool(PoolClass::Small).block_size(), 4 * 1024);
        assert_eq!(context.pool(PoolClass::Normal).block_size(), 16 * 1024);
        assert_eq!(context.pool(PoolClass::Large).block_size(), 256 * 1024);
        assert_eq!(context.pool(PoolClass::Small).reserved_blocks(), 0);
    }

    #[test]
    fn test_pool_for_size() {
        let context = Context::with_defaults();
        let size_of = |bytes| context.pool_for_size(bytes).map(BlockPool::block_size);
        assert_eq!(size_of(1), Some(4 * 1024));
        assert_eq!(size_of(4 * 1024), Some(4 * 1024));
        assert_eq!(size_of(4 * 1024 + 1), Some(16 * 1024));
        assert_eq!(size_of(256 * 1024), Some(256 * 1024));
        assert_eq!(size_of(256 * 1024 + 1), None);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = ContextConfig {
            small: PoolConfig::new(100, 1),
            ..ContextConfig::default()
        };
        assert!(Context::new(config.clone()).is_err());
        assert!(ContextCell::new(config).is_err());
    }

    #[test]
    fn test_cell_lazy_init_and_shutdown() {
        let mut cell = ContextCell::default();
        assert!(!cell.is_initialized());
        assert!(!cell.shutdown());

        let _ = cell.get();
        assert!(cell.is_initialized());
        assert!(cell.shutdown());
        assert!(!cell.is_initialized());
        assert!(!cell.shutdown());
    }

    #[test]
    fn test_cell_builds_once_under_contention() {
        let cell = ContextCell::default();
        let addrs: Vec<usize> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| cell.get() as *const Context as usize))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(addrs.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_shutdown_drops_registry() {
        let mut cell = ContextCell::default();
        let guid = Guid::from_u128(0xC0FF_EE00_0000_4000_8000_0000_0000_0001);
        let _ = cell
            .get()
            .registry()
            .register_type(TypeDescription::new(guid, "Temp", 4, 4))
            .unwrap();
        assert!(cell.shutdown());
        assert_eq!(cell.get().registry().get_type(guid), None);
    }
}
