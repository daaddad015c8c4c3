//! # Entity Component System
//!
//! Archetype/chunk storage over the context's pools and registry.
//!
//! ## Design
//!
//! - An archetype is the sorted set of an entity's component types
//! - Each archetype keeps its rows in chunks, one pool block per chunk
//! - Columns inside a chunk are laid out once per archetype and size class
//! - Entity IDs are slot indices with generation counters

mod archetype;
mod component;
mod entity;
mod storage;
mod type_set;

pub use archetype::{Archetype, ArchetypeId, Chunk, ChunkView, ChunkViewMut};
pub use component::Component;
pub use entity::EntityId;
pub use storage::Storage;
pub use type_set::TypeSet;
