//! Process-wide singleton components.
//!
//! A singleton type has exactly one instance, created when the type is
//! registered and resolved by queries outside of any archetype. Queries that
//! list a singleton component receive a cursor onto this single slot.

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::any::TypeId;
use std::collections::HashMap;
use std::ptr::NonNull;

use crate::engine::type_registry::{Destructor, TypeDeclaration};
use crate::engine::types::TypeID;

/// One aligned, default-constructed instance of a singleton type.
pub struct SingletonComponent {
    data: NonNull<u8>,
    layout: Layout,
    destruct: Destructor,
    type_id: TypeID,
    rust_type: TypeId,
}

// SAFETY: singleton types are declared through `TypeDeclaration`, which requires `Send + Sync`.
unsafe impl Send for SingletonComponent {}
// SAFETY: see above.
unsafe impl Sync for SingletonComponent {}

impl SingletonComponent {
    /// Allocates and default-constructs the instance described by `declaration`.
    pub fn new(declaration: &TypeDeclaration) -> Self {
        let layout = Layout::from_size_align(declaration.size(), declaration.align())
            .unwrap_or_else(|_| Layout::new::<u8>());
        let data = if layout.size() == 0 {
            NonNull::new(layout.align() as *mut u8).unwrap_or(NonNull::dangling())
        } else {
            // SAFETY: non-zero size.
            let ptr = unsafe { alloc(layout) };
            NonNull::new(ptr).unwrap_or_else(|| handle_alloc_error(layout))
        };
        // SAFETY: freshly allocated storage matching the declaration's layout.
        unsafe { (declaration.ops().construct_default)(data.as_ptr()) };
        Self {
            data,
            layout,
            destruct: declaration.ops().destruct,
            type_id: declaration.type_id(),
            rust_type: declaration.rust_type(),
        }
    }

    /// Type of the stored instance.
    #[inline]
    pub fn type_id(&self) -> TypeID {
        self.type_id
    }

    /// Raw address of the instance.
    #[inline]
    pub fn data(&self) -> *mut u8 {
        self.data.as_ptr()
    }

    /// Returns `true` if the instance is a `T`.
    #[inline]
    pub fn is<T: 'static>(&self) -> bool {
        self.rust_type == TypeId::of::<T>()
    }
}

impl Drop for SingletonComponent {
    fn drop(&mut self) {
        // SAFETY: the instance was constructed in `new` and is dropped once.
        unsafe { (self.destruct)(self.data.as_ptr()) };
        if self.layout.size() != 0 {
            // SAFETY: allocated in `new` with this layout.
            unsafe { dealloc(self.data.as_ptr(), self.layout) };
        }
    }
}

/// Every singleton instance, keyed by type.
#[derive(Default)]
pub struct SingletonStorage {
    instances: HashMap<TypeID, SingletonComponent>,
}

impl SingletonStorage {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the instance for `declaration` unless it already exists.
    pub fn get_or_create(&mut self, declaration: &TypeDeclaration) -> &SingletonComponent {
        self.instances
            .entry(declaration.type_id())
            .or_insert_with(|| SingletonComponent::new(declaration))
    }

    /// Returns the instance of a type.
    #[inline]
    pub fn get(&self, type_id: TypeID) -> Option<&SingletonComponent> {
        self.instances.get(&type_id)
    }

    /// Borrows the instance of `type_id` as `T`.
    pub fn value<T: 'static>(&self, type_id: TypeID) -> Option<&T> {
        let instance = self.get(type_id).filter(|s| s.is::<T>())?;
        // SAFETY: type checked; the instance outlives the borrow of `self`.
        Some(unsafe { &*instance.data().cast::<T>() })
    }

    /// Mutably borrows the instance of `type_id` as `T`.
    pub fn value_mut<T: 'static>(&mut self, type_id: TypeID) -> Option<&mut T> {
        let instance = self.instances.get_mut(&type_id).filter(|s| s.is::<T>())?;
        // SAFETY: type checked; exclusive borrow of `self`.
        Some(unsafe { &mut *instance.data().cast::<T>() })
    }

    /// Number of singleton instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Returns `true` if no singleton exists.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
