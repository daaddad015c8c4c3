//! # Type Descriptions
//!
//! What the registry knows about a type: identity, layout, and how to
//! construct, destroy, copy and move values of it through raw pointers.

// SAFETY: Lifecycle hooks operate on raw, type-erased component memory.
#![allow(unsafe_code)]

use std::alloc::Layout;
use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;

use bytemuck::Pod;

use super::guid::Guid;
use crate::error::RegistryError;

/// High bit of a [`TypeIndex`]: the type is a zero-sized tag.
const TAG_BIT: u32 = 1 << 31;

/// Dense handle to a registered type.
///
/// ```text
/// bit 31      bits 30..0
/// [ tag ][ position in the descriptor table ]
/// ```
///
/// Issued by [`TypeRegistry`](super::TypeRegistry) in registration order and
/// never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TypeIndex(u32);

impl TypeIndex {
    /// Largest number of types a registry can hold.
    pub const MAX: usize = TAG_BIT as usize;

    #[inline]
    pub(crate) const fn new(position: u32, tag: bool) -> Self {
        if tag {
            Self(position | TAG_BIT)
        } else {
            Self(position)
        }
    }

    /// Position in the descriptor table.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        (self.0 & !TAG_BIT) as usize
    }

    /// Checks whether the type carries no data.
    #[inline]
    #[must_use]
    pub const fn is_tag(self) -> bool {
        self.0 & TAG_BIT != 0
    }

    /// Raw packed value.
    #[inline]
    #[must_use]
    pub const fn to_bits(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TypeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_tag() {
            write!(f, "#{} (tag)", self.index())
        } else {
            write!(f, "#{}", self.index())
        }
    }
}

impl fmt::Debug for TypeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeIndex({self})")
    }
}

/// Type-erased lifecycle hooks for values stored in raw memory.
///
/// Every pointer handed to these hooks is aligned for the type and valid for
/// `size` bytes of the owning [`TypeDescription`]. Registration rejects a
/// description whose size or alignment differs from [`layout`](Self::layout).
///
/// # Safety
///
/// The hooks must read and write only within [`layout`](Self::layout) and
/// need no stricter alignment than it states.
pub unsafe trait TypeOps: Send + Sync {
    /// Size and alignment of the values the hooks operate on.
    fn layout(&self) -> Layout;

    /// Writes a default value into uninitialized memory.
    ///
    /// # Safety
    ///
    /// `dst` must be valid for writes and must not hold a live value.
    unsafe fn construct(&self, dst: NonNull<u8>);

    /// Drops the value in place, leaving the memory uninitialized.
    ///
    /// # Safety
    ///
    /// `ptr` must hold a live value that is not used afterwards.
    unsafe fn destruct(&self, ptr: NonNull<u8>);

    /// Writes a clone of `src` into uninitialized `dst`.
    ///
    /// # Safety
    ///
    /// `src` must hold a live value, `dst` must not, and they must not overlap.
    unsafe fn copy(&self, dst: NonNull<u8>, src: NonNull<u8>);

    /// Moves the value from `src` to uninitialized `dst`.
    ///
    /// Afterwards `src` is uninitialized.
    ///
    /// # Safety
    ///
    /// Same as [`copy`](Self::copy).
    unsafe fn relocate(&self, dst: NonNull<u8>, src: NonNull<u8>);
}

/// [`TypeOps`] backed by a Rust type's `Default`, `Clone` and `Drop`.
pub struct RustOps<T>(PhantomData<fn() -> T>);

impl<T> RustOps<T> {
    /// Creates the hooks for `T`.
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for RustOps<T> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: every hook accesses exactly one T.
unsafe impl<T: Default + Clone + 'static> TypeOps for RustOps<T> {
    fn layout(&self) -> Layout {
        Layout::new::<T>()
    }

    unsafe fn construct(&self, dst: NonNull<u8>) {
        // SAFETY: caller guarantees `dst` is aligned and writable for T.
        unsafe { dst.cast::<T>().as_ptr().write(T::default()) };
    }

    unsafe fn destruct(&self, ptr: NonNull<u8>) {
        // SAFETY: caller guarantees a live T at `ptr`.
        unsafe { std::ptr::drop_in_place(ptr.cast::<T>().as_ptr()) };
    }

    unsafe fn copy(&self, dst: NonNull<u8>, src: NonNull<u8>) {
        // SAFETY: live T at `src`, writable T slot at `dst`.
        unsafe {
            let value = (*src.cast::<T>().as_ptr()).clone();
            dst.cast::<T>().as_ptr().write(value);
        }
    }

    unsafe fn relocate(&self, dst: NonNull<u8>, src: NonNull<u8>) {
        // SAFETY: non-overlapping T slots; `src` is treated as moved-from.
        unsafe { std::ptr::copy_nonoverlapping(src.cast::<T>().as_ptr(), dst.cast::<T>().as_ptr(), 1) };
    }
}

/// Everything the registry stores about one type.
///
/// Descriptions without [`TypeOps`] are plain data: constructed by
/// zero-filling, never dropped, copied and moved bitwise.
#[derive(Clone)]
pub struct TypeDescription {
    guid: Guid,
    name: String,
    module: Option<String>,
    size: usize,
    alignment: usize,
    ops: Option<Arc<dyn TypeOps>>,
    rust_type: Option<TypeId>,
}

impl TypeDescription {
    /// A plain-data description with explicit layout.
    #[must_use]
    pub fn new(guid: Guid, name: impl Into<String>, size: usize, alignment: usize) -> Self {
        Self {
            guid,
            name: name.into(),
            module: None,
            size,
            alignment,
            ops: None,
            rust_type: None,
        }
    }

    /// Describes a Rust type with full lifecycle hooks.
    #[must_use]
    pub fn of<T: Default + Clone + Send + Sync + 'static>(guid: Guid, name: impl Into<String>) -> Self {
        Self {
            ops: Some(Arc::new(RustOps::<T>::new())),
            rust_type: Some(TypeId::of::<T>()),
            ..Self::new(guid, name, std::mem::size_of::<T>(), std::mem::align_of::<T>())
        }
    }

    /// Describes a plain-data Rust type. No hooks: zero-fill and bitwise copy.
    #[must_use]
    pub fn pod<T: Pod>(guid: Guid, name: impl Into<String>) -> Self {
        Self {
            rust_type: Some(TypeId::of::<T>()),
            ..Self::new(guid, name, std::mem::size_of::<T>(), std::mem::align_of::<T>())
        }
    }

    /// Describes a zero-sized tag type.
    #[must_use]
    pub fn tag(guid: Guid, name: impl Into<String>) -> Self {
        Self::new(guid, name, 0, 1)
    }

    /// Sets the owning module name.
    #[must_use]
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// Attaches lifecycle hooks.
    ///
    /// Their [`TypeOps::layout`] must match the description's size and
    /// alignment, or registration fails.
    #[must_use]
    pub fn with_ops(mut self, ops: Arc<dyn TypeOps>) -> Self {
        self.ops = Some(ops);
        self
    }

    /// The type's GUID.
    #[inline]
    #[must_use]
    pub fn guid(&self) -> Guid {
        self.guid
    }

    /// The type's unique name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The module that registered the type, if any.
    #[inline]
    #[must_use]
    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    /// Size of one value in bytes.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Alignment of one value in bytes.
    #[inline]
    #[must_use]
    pub fn alignment(&self) -> usize {
        self.alignment
    }

    /// Lifecycle hooks; `None` for plain data.
    #[inline]
    #[must_use]
    pub fn ops(&self) -> Option<&Arc<dyn TypeOps>> {
        self.ops.as_ref()
    }

    /// The Rust type behind the description, when registered from Rust.
    #[inline]
    #[must_use]
    pub fn rust_type(&self) -> Option<TypeId> {
        self.rust_type
    }

    /// Checks for a zero-sized tag.
    #[inline]
    #[must_use]
    pub fn is_tag(&self) -> bool {
        self.size == 0
    }

    /// Checks for plain data without lifecycle hooks.
    #[inline]
    #[must_use]
    pub fn is_trivial(&self) -> bool {
        self.ops.is_none()
    }

    /// Compares everything except the lifecycle hooks.
    pub(crate) fn same_shape(&self, other: &Self) -> bool {
        self.guid == other.guid
            && self.name == other.name
            && self.module == other.module
            && self.size == other.size
            && self.alignment == other.alignment
            && self.rust_type == other.rust_type
    }

    pub(crate) fn set_ops(&mut self, ops: Option<Arc<dyn TypeOps>>) {
        self.ops = ops;
    }

    pub(crate) fn validate(&self) -> Result<(), RegistryError> {
        let reason = if self.name.is_empty() {
            "empty name"
        } else if self.guid.is_nil() {
            "nil GUID"
        } else if !self.alignment.is_power_of_two() {
            "alignment is not a power of two"
        } else if self.size % self.alignment != 0 {
            "size is not a multiple of alignment"
        } else if self.ops.as_ref().is_some_and(|ops| {
            let layout = ops.layout();
            layout.size() != self.size || layout.align() != self.alignment
        }) {
            "lifecycle hooks disagree with size or alignment"
        } else {
            return Ok(());
        };
        Err(RegistryError::InvalidDescription {
            name: self.name.clone(),
            reason,
        })
    }

    /// Constructs a default value at `dst`.
    ///
    /// # Safety
    ///
    /// `dst` must be aligned, writable for [`size`](Self::size) bytes and not
    /// hold a live value.
    pub(crate) unsafe fn construct_at(&self, dst: NonNull<u8>) {
        match &self.ops {
            // SAFETY: forwarded caller contract.
            Some(ops) => unsafe { ops.construct(dst) },
            // SAFETY: `size` writable bytes at `dst`.
            None => unsafe { std::ptr::write_bytes(dst.as_ptr(), 0, self.size) },
        }
    }

    /// Drops the value at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must hold a live value of this type.
    pub(crate) unsafe fn destruct_at(&self, ptr: NonNull<u8>) {
        if let Some(ops) = &self.ops {
            // SAFETY: forwarded caller contract.
            unsafe { ops.destruct(ptr) };
        }
    }

    /// Moves the value from `src` to `dst`.
    ///
    /// # Safety
    ///
    /// See [`TypeOps::relocate`].
    pub(crate) unsafe fn relocate_to(&self, dst: NonNull<u8>, src: NonNull<u8>) {
        match &self.ops {
            // SAFETY: forwarded caller contract.
            Some(ops) => unsafe { ops.relocate(dst, src) },
            // SAFETY: `size` bytes at both, non-overlapping.
            None => unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), self.size) },
        }
    }

    /// Clones the value at `src` into `dst`.
    ///
    /// # Safety
    ///
    /// See [`TypeOps::copy`].
    pub(crate) unsafe fn copy_to(&self, dst: NonNull<u8>, src: NonNull<u8>) {
        match &self.ops {
            // SAFETY: forwarded caller contract.
            Some(ops) => unsafe { ops.copy(dst, src) },
            // SAFETY: `size` bytes at both, non-overlapping.
            None => unsafe { std::ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), self.size) },
        }
    }
}

impl fmt::Debug for TypeDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescription")
            .field("guid", &self.guid)
            .field("name", &self.name)
            .field("module", &self.module)
            .field("size", &self.size)
            .field("alignment", &self.alignment)
            .field("trivial", &self.ops.is_none())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::MaybeUninit;

    const GUID: Guid = Guid::from_u128(0x1111_2222_3333_4444_5555_6666_7777_8888);

    #[test]
    fn test_type_index_packing() {
        let plain = TypeIndex::new(5, false);
        let tag = TypeIndex::new(5, true);
        assert_eq!(plain.index(), 5);
        assert_eq!(tag.index(), 5);
        assert!(!plain.is_tag());
        assert!(tag.is_tag());
        assert_ne!(plain, tag);
        assert_eq!(tag.to_string(), "#5 (tag)");
    }

    #[test]
    fn test_of_captures_layout() {
        let desc = TypeDescription::of::<String>(GUID, "Name").with_module("core");
        assert_eq!(desc.size(), std::mem::size_of::<String>());
        assert_eq!(desc.alignment(), std::mem::align_of::<String>());
        assert_eq!(desc.module(), Some("core"));
        assert_eq!(desc.rust_type(), Some(TypeId::of::<String>()));
        assert!(!desc.is_trivial());
        desc.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_malformed() {
        let cases = [
            TypeDescription::new(GUID, "", 4, 4),
            TypeDescription::new(Guid::NIL, "Nil", 4, 4),
            TypeDescription::new(GUID, "Odd", 4, 3),
            TypeDescription::new(GUID, "Ragged", 6, 4),
        ];
        for desc in cases {
            assert!(matches!(desc.validate(), Err(RegistryError::InvalidDescription { .. })), "{desc:?}");
        }
        TypeDescription::tag(GUID, "Tag").validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_mismatched_hooks() {
        // String hooks would write past an 8-byte cell.
        let oversized = TypeDescription::new(GUID, "Mismatch", 8, 8).with_ops(Arc::new(RustOps::<String>::new()));
        assert!(matches!(oversized.validate(), Err(RegistryError::InvalidDescription { .. })));

        let misaligned = TypeDescription::new(GUID, "Loose", 8, 4).with_ops(Arc::new(RustOps::<u64>::new()));
        assert!(matches!(misaligned.validate(), Err(RegistryError::InvalidDescription { .. })));

        let matching = TypeDescription::new(GUID, "Word", 8, 8).with_ops(Arc::new(RustOps::<u64>::new()));
        matching.validate().unwrap();
    }

    #[test]
    fn test_same_shape_ignores_ops() {
        let a = TypeDescription::pod::<u32>(GUID, "Counter");
        let b = a.clone().with_ops(Arc::new(RustOps::<u32>::new()));
        assert!(a.same_shape(&b));
        assert!(!a.same_shape(&a.clone().with_module("other")));
    }

    #[test]
    fn test_rust_ops_lifecycle() {
        let desc = TypeDescription::of::<String>(GUID, "Name");
        let mut a = MaybeUninit::<String>::uninit();
        let mut b = MaybeUninit::<String>::uninit();
        let pa = NonNull::from(&mut a).cast::<u8>();
        let pb = NonNull::from(&mut b).cast::<u8>();

        // SAFETY: both slots are aligned String storage; every live value is
        // dropped exactly once.
        unsafe {
            desc.construct_at(pa);
            assert_eq!(a.assume_init_ref(), "");
            a.assume_init_mut().push_str("sugoi");

            desc.copy_to(pb, pa);
            assert_eq!(b.assume_init_ref(), "sugoi");
            desc.destruct_at(pb);

            desc.relocate_to(pb, pa);
            assert_eq!(b.assume_init_ref(), "sugoi");
            desc.destruct_at(pb);
        }
    }

    #[test]
    fn test_trivial_construct_zero_fills() {
        let desc = TypeDescription::pod::<u64>(GUID, "Word");
        let mut slot = u64::MAX;
        // SAFETY: u64 slot, any bit pattern is valid.
        unsafe { desc.construct_at(NonNull::from(&mut slot).cast()) };
        assert_eq!(slot, 0);
    }
}
