//! # Error Types
//!
//! All errors surfaced by the SUGOI core.
//!
//! Routine allocation misses are not errors: allocators return `None`.
//! These types cover construction failures, registration conflicts,
//! malformed GUID text and bad configuration.

use std::path::PathBuf;

use thiserror::Error;

use crate::ecs::EntityId;
use crate::memory::PoolClass;
use crate::types::{Guid, TypeIndex};

/// Errors raised while setting up memory (buffers, arenas).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// Size/alignment pair does not form a valid layout.
    #[error("invalid layout: size {size}, alignment {align}")]
    InvalidLayout {
        /// Requested size in bytes.
        size: usize,
        /// Requested alignment in bytes.
        align: usize,
    },

    /// The system allocator returned null.
    #[error("system allocator failed to provide {size} bytes")]
    OutOfMemory {
        /// Requested size in bytes.
        size: usize,
    },

    /// A struct arena was initialized twice.
    #[error("struct arena already initialized")]
    AlreadyInitialized,
}

/// Errors raised by the type registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The GUID is already registered with a different description.
    #[error("type {guid} already registered as `{existing}` with a different description")]
    GuidConflict {
        /// Conflicting GUID.
        guid: Guid,
        /// Name of the type registered first.
        existing: String,
    },

    /// Another GUID already uses this name.
    #[error("type name `{name}` already registered under {existing}")]
    NameConflict {
        /// Conflicting name.
        name: String,
        /// Index of the type owning the name.
        existing: TypeIndex,
    },

    /// The description itself is malformed.
    #[error("invalid type description `{name}`: {reason}")]
    InvalidDescription {
        /// Name carried by the description.
        name: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// A loader is already pending for this GUID.
    #[error("a type loader is already registered for {0}")]
    DuplicateLoader(Guid),

    /// The GUID is already materialized; a loader would never fire.
    #[error("type {0} is already registered")]
    AlreadyRegistered(Guid),

    /// A loader produced a description for another GUID.
    #[error("loader for {expected} produced a description for {found}")]
    LoaderMismatch {
        /// GUID the loader was registered under.
        expected: Guid,
        /// GUID of the produced description.
        found: Guid,
    },

    /// The descriptor table is full.
    #[error("type registry is full")]
    RegistryFull,
}

/// Errors raised when parsing GUID text.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuidParseError {
    /// Neither 36 (bare) nor 38 (braced) characters.
    #[error("invalid GUID length {0}, expected 36 or 38")]
    InvalidLength(usize),

    /// 38 characters but not wrapped in `{}`.
    #[error("braced GUID is missing an opening or closing brace")]
    MissingBrace,

    /// A group separator is not where it belongs.
    #[error("expected '-' at position {0}")]
    MisplacedSeparator(usize),

    /// A non-hex character inside a digit group.
    #[error("invalid hex digit {found:?} at position {position}")]
    InvalidHexDigit {
        /// Byte position in the input.
        position: usize,
        /// Offending character.
        found: char,
    },
}

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },

    /// The TOML could not be parsed into a config.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid {class} pool config: {reason}")]
    InvalidPool {
        /// Pool class at fault.
        class: PoolClass,
        /// What is wrong with it.
        reason: String,
    },
}

/// Errors raised by entity storage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The type index was not issued by the context's registry.
    #[error("unknown type index {0}")]
    UnknownType(TypeIndex),

    /// The component needs more alignment than a pool block provides.
    #[error("type `{name}` needs alignment {align}, blocks provide {max}")]
    AlignmentTooLarge {
        /// Component name.
        name: String,
        /// Required alignment.
        align: usize,
        /// Block alignment.
        max: usize,
    },

    /// Not even one entity fits into a block of the largest pool class.
    #[error("one entity row of {row_size} bytes does not fit into any pool block")]
    RowTooLarge {
        /// Bytes needed per entity.
        row_size: usize,
    },

    /// The pool backing a chunk is exhausted.
    #[error("{0} pool exhausted")]
    PoolExhausted(PoolClass),

    /// The archetype metadata arena could not allocate.
    #[error("archetype metadata arena exhausted")]
    MetadataExhausted,

    /// The entity is not alive.
    #[error("no such entity {0:?}")]
    NoSuchEntity(EntityId),

    /// Entity slots are exhausted.
    #[error("entity index space exhausted")]
    EntitiesExhausted,
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
