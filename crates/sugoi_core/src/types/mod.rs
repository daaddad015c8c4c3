//! # Type System
//!
//! GUID-keyed runtime type information for component storage.
//!
//! Every component type is registered once with a [`TypeRegistry`] and
//! referred to afterwards by its dense [`TypeIndex`]. Storage never sees Rust
//! types directly: it sizes, aligns, constructs and destroys values through
//! the [`TypeDescription`].

mod description;
mod guid;
mod registry;

pub use description::{RustOps, TypeDescription, TypeIndex, TypeOps};
pub use guid::Guid;
pub use registry::{TypeLoader, TypeRegistry};
