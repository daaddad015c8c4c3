//! # Type Registry
//!
//! Maps GUIDs and names to [`TypeDescription`]s and issues dense
//! [`TypeIndex`] handles.
//!
//! ```text
//! register_type(desc) ──> descs[i] = desc ──> TypeIndex(i)
//!                         by_guid[guid] = i
//!                         by_name[name] = i
//!
//! register_type_loader(guid, f) ──> pending[guid] = f
//! get_type(guid) miss ──> f() ──> register_type(desc)
//! ```
//!
//! ## Locking
//!
//! Tables sit behind a `RwLock`: lookups are concurrent. Pending loaders sit
//! behind a `ReentrantMutex` held while a loader runs, so a loader may
//! resolve other lazily registered types on the same thread while other
//! threads wait for it. The tables lock is never held while a loader runs.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::description::{TypeDescription, TypeIndex};
use super::guid::Guid;
use crate::ecs::Component;
use crate::error::RegistryError;

/// Lazily invoked producer of a type description.
pub type TypeLoader = Box<dyn FnOnce() -> TypeDescription + Send>;

#[derive(Default)]
struct Tables {
    /// Descriptions in registration order.
    descs: Vec<Arc<TypeDescription>>,
    by_guid: HashMap<Guid, TypeIndex>,
    by_name: HashMap<String, TypeIndex>,
    /// GUIDs handed out by `make_guid`.
    generated: HashSet<Guid>,
}

/// Registry of every type known to a context.
///
/// # Thread Safety
///
/// All operations take `&self` and may be called from any thread.
pub struct TypeRegistry {
    tables: RwLock<Tables>,
    loaders: ReentrantMutex<RefCell<HashMap<Guid, TypeLoader>>>,
    rng: Mutex<StdRng>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            loaders: ReentrantMutex::new(RefCell::new(HashMap::new())),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Number of materialized types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.read().descs.len()
    }

    /// Checks whether no type is materialized.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registers a type description.
    ///
    /// Registering an identical description again returns the existing index
    /// and replaces its lifecycle hooks with the new ones. Archetypes created
    /// before the replacement keep the hooks they resolved at creation; only
    /// archetypes created afterwards see the new ones. A pending loader for
    /// the same GUID is discarded.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::InvalidDescription`] for malformed descriptions,
    ///   including hooks whose layout differs from the description's
    /// - [`RegistryError::GuidConflict`] if the GUID is taken by a different
    ///   description; the first registration stays intact
    /// - [`RegistryError::NameConflict`] if another GUID owns the name
    /// - [`RegistryError::RegistryFull`] past [`TypeIndex::MAX`] types
    pub fn register_type(&self, desc: TypeDescription) -> Result<TypeIndex, RegistryError> {
        desc.validate().map_err(|error| {
            tracing::error!(%error, "type registration rejected");
            error
        })?;
        let guid = desc.guid();

        let index = {
            let mut tables = self.tables.write();

            if let Some(&index) = tables.by_guid.get(&guid) {
                let existing = &tables.descs[index.index()];
                if !existing.same_shape(&desc) {
                    let error = RegistryError::GuidConflict {
                        guid,
                        existing: existing.name().to_owned(),
                    };
                    tracing::error!(%error, name = desc.name(), "type registration conflict");
                    return Err(error);
                }
                let mut refreshed = TypeDescription::clone(existing);
                refreshed.set_ops(desc.ops().cloned());
                tables.descs[index.index()] = Arc::new(refreshed);
                return Ok(index);
            }

            if let Some(&existing) = tables.by_name.get(desc.name()) {
                let error = RegistryError::NameConflict {
                    name: desc.name().to_owned(),
                    existing,
                };
                tracing::error!(%error, %guid, "type registration conflict");
                return Err(error);
            }

            let position = u32::try_from(tables.descs.len())
                .ok()
                .filter(|&p| (p as usize) < TypeIndex::MAX)
                .ok_or(RegistryError::RegistryFull)?;
            let index = TypeIndex::new(position, desc.is_tag());

            tracing::debug!(
                name = desc.name(),
                %guid,
                %index,
                size = desc.size(),
                align = desc.alignment(),
                "registered type"
            );
            tables.by_guid.insert(guid, index);
            tables.by_name.insert(desc.name().to_owned(), index);
            tables.descs.push(Arc::new(desc));
            index
        };

        let pending = self.loaders.lock();
        pending.borrow_mut().remove(&guid);
        Ok(index)
    }

    /// Registers a [`Component`] type under its declared GUID and name.
    ///
    /// # Errors
    ///
    /// Same as [`register_type`](Self::register_type).
    pub fn register_component<C: Component>(&self) -> Result<TypeIndex, RegistryError> {
        self.register_type(C::description())
    }

    /// Looks a type up by GUID, running its pending loader on a miss.
    #[must_use]
    pub fn get_type(&self, guid: Guid) -> Option<TypeIndex> {
        self.lookup(guid).or_else(|| self.materialize(guid))
    }

    /// Looks a materialized type up by name.
    ///
    /// Pending loaders are not consulted: their names are unknown until they
    /// run. See [`load_pending_types`](Self::load_pending_types).
    #[must_use]
    pub fn get_type_by_name(&self, name: &str) -> Option<TypeIndex> {
        self.tables.read().by_name.get(name).copied()
    }

    /// Index of a [`Component`] type, if registered or loadable.
    #[must_use]
    pub fn component_index<C: Component>(&self) -> Option<TypeIndex> {
        self.get_type(C::GUID)
    }

    /// Description behind an index issued by this registry.
    #[must_use]
    pub fn get_type_desc(&self, index: TypeIndex) -> Option<Arc<TypeDescription>> {
        self.tables
            .read()
            .descs
            .get(index.index())
            .filter(|desc| desc.is_tag() == index.is_tag())
            .cloned()
    }

    /// Visits every materialized type in registration order.
    ///
    /// The callback returns `false` to stop. It runs over a snapshot, so it
    /// may call back into the registry; types registered meanwhile are not
    /// visited.
    pub fn foreach_types<F>(&self, mut f: F)
    where
        F: FnMut(TypeIndex, &TypeDescription) -> bool,
    {
        let snapshot = self.tables.read().descs.clone();
        for (position, desc) in snapshot.iter().enumerate() {
            // Positions are bounded by `TypeIndex::MAX` at registration.
            #[allow(clippy::cast_possible_truncation)]
            let index = TypeIndex::new(position as u32, desc.is_tag());
            if !f(index, desc) {
                break;
            }
        }
    }

    /// Visits the types registered by one module.
    pub fn foreach_types_in_module<F>(&self, module: &str, mut f: F)
    where
        F: FnMut(TypeIndex, &TypeDescription) -> bool,
    {
        self.foreach_types(|index, desc| {
            if desc.module() == Some(module) {
                f(index, desc)
            } else {
                true
            }
        });
    }

    /// Generates a random v4 GUID unused by this registry.
    ///
    /// The result never matches a GUID that is registered, pending a loader,
    /// or was generated before.
    pub fn make_guid(&self) -> Guid {
        let pending = self.loaders.lock();
        let mut tables = self.tables.write();
        let mut rng = self.rng.lock();
        loop {
            let guid = Guid::new_v4(&mut *rng);
            if tables.by_guid.contains_key(&guid)
                || tables.generated.contains(&guid)
                || pending.borrow().contains_key(&guid)
            {
                continue;
            }
            tables.generated.insert(guid);
            return guid;
        }
    }

    /// Registers a loader that produces the description for `guid` on first
    /// demand.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::AlreadyRegistered`] if the type is materialized
    /// - [`RegistryError::DuplicateLoader`] if a loader is already pending
    pub fn register_type_loader<F>(&self, guid: Guid, loader: F) -> Result<(), RegistryError>
    where
        F: FnOnce() -> TypeDescription + Send + 'static,
    {
        let pending = self.loaders.lock();
        if self.lookup(guid).is_some() {
            return Err(RegistryError::AlreadyRegistered(guid));
        }
        let mut map = pending.borrow_mut();
        if map.contains_key(&guid) {
            return Err(RegistryError::DuplicateLoader(guid));
        }
        map.insert(guid, Box::new(loader));
        Ok(())
    }

    /// Removes a loader before it runs.
    ///
    /// Returns `false` if no loader is pending, including when the type was
    /// already materialized.
    pub fn unregister_type_loader(&self, guid: Guid) -> bool {
        let pending = self.loaders.lock();
        let removed = pending.borrow_mut().remove(&guid).is_some();
        removed
    }

    /// Number of loaders that have not run yet.
    #[must_use]
    pub fn pending_loaders(&self) -> usize {
        let pending = self.loaders.lock();
        let count = pending.borrow().len();
        count
    }

    /// Runs every pending loader.
    ///
    /// Returns how many types were materialized.
    pub fn load_pending_types(&self) -> usize {
        let guids: Vec<Guid> = {
            let pending = self.loaders.lock();
            let keys = pending.borrow().keys().copied().collect();
            keys
        };
        guids
            .into_iter()
            .filter(|&guid| self.materialize(guid).is_some())
            .count()
    }

    fn lookup(&self, guid: Guid) -> Option<TypeIndex> {
        self.tables.read().by_guid.get(&guid).copied()
    }

    fn materialize(&self, guid: Guid) -> Option<TypeIndex> {
        let pending = self.loaders.lock();
        // Another thread may have run the loader while we waited.
        if let Some(index) = self.lookup(guid) {
            return Some(index);
        }
        let loader = pending.borrow_mut().remove(&guid)?;

        let desc = loader();
        if desc.guid() != guid {
            let error = RegistryError::LoaderMismatch {
                expected: guid,
                found: desc.guid(),
            };
            tracing::error!(%error, name = desc.name(), "type loader failed");
            return None;
        }
        match self.register_type(desc) {
            Ok(index) => Some(index),
            Err(error) => {
                tracing::error!(%error, %guid, "type loader produced an unusable description");
                None
            }
        }
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.len())
            .field("pending_loaders", &self.pending_loaders())
            .finish()
    }
}
