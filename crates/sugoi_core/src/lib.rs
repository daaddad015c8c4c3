//! # SUGOI Core
//!
//! Entity/type/memory substrate of the SUGOI runtime:
//! - Arena allocators (lock-free fixed, two-phase struct, pool-backed blocks)
//! - Fixed block-size pools in three size classes
//! - A process-wide type registry keyed by GUID and by name
//! - Archetype/chunk entity storage on top of both
//!
//! ## Example
//!
//! ```rust,ignore
//! use sugoi_core::{Context, Storage};
//!
//! let context = Context::with_defaults();
//! let position = context.registry().register_component::<Position>()?;
//!
//! let mut storage = Storage::new(&context);
//! let entities = storage.spawn_batch(&[position], 1024, |_, _| {})?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod context;
pub mod ecs;
pub mod error;
pub mod memory;
pub mod types;

pub use config::{ContextConfig, PoolConfig};
pub use context::{Context, ContextCell};
pub use ecs::{Archetype, ArchetypeId, Chunk, ChunkView, ChunkViewMut, Component, EntityId, Storage, TypeSet};
pub use error::{ConfigError, GuidParseError, MemoryError, RegistryError, StorageError, StorageResult};
pub use memory::{AlignedBuffer, BlockArena, BlockPool, FixedArena, PoolBlock, PoolClass, PooledBuffer, StructArena};
pub use types::{Guid, RustOps, TypeDescription, TypeIndex, TypeLoader, TypeOps, TypeRegistry};
