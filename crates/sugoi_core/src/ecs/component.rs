//! # Component System
//!
//! Components are plain Rust types with a stable GUID and name. Storage only
//! sees them through their registered [`TypeDescription`].

use crate::types::{Guid, TypeDescription};

/// A Rust type that can be stored as a component.
///
/// The default [`description`](Self::description) installs lifecycle hooks
/// from `Default`, `Clone` and `Drop`. Plain-data types may override it with
/// [`TypeDescription::pod`] to skip the hooks.
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Clone, Copy, Default, Pod, Zeroable)]
/// #[repr(C)]
/// struct Position {
///     x: f32,
///     y: f32,
///     z: f32,
/// }
///
/// impl Component for Position {
///     const GUID: Guid = Guid::from_u128(0x6E1B_58A4_09F3_4C5D_9D27_71A0_3C44_8E01);
///     const NAME: &'static str = "Position";
///
///     fn description() -> TypeDescription {
///         TypeDescription::pod::<Self>(Self::GUID, Self::NAME)
///     }
/// }
/// ```
pub trait Component: Default + Clone + Send + Sync + 'static {
    /// Stable identifier of the type.
    const GUID: Guid;

    /// Unique display name.
    const NAME: &'static str;

    /// Description registered for the type.
    #[must_use]
    fn description() -> TypeDescription {
        TypeDescription::of::<Self>(Self::GUID, Self::NAME)
    }
}
