//! # Type Registry
//!
//! Maps a [`TypeID`] (hash of a registered type name) to the layout and the
//! type-erased operation table the storage layer needs to construct, copy,
//! relocate, destroy and compare values it only knows as raw bytes.
//!
//! ## Purpose
//! Columns, templates and singletons hold values of arbitrary component types
//! without being generic over them. Everything they need to know about a type
//! lives in a [`TypeDeclaration`], built once per type during startup.
//!
//! ## Design
//! - Declarations are built explicitly with [`TypeDeclaration::of`] or
//!   [`TypeDeclaration::tracked`]; nothing is discovered through static
//!   initialisation.
//! - Operations are monomorphised `unsafe fn` pointers, so a declaration is
//!   `Copy` and can be cached by every column that stores the type.
//! - The registry remembers the Rust [`TypeId`] of each declaration so that
//!   type-erased values can be checked against a column before they are
//!   written into it.
//!
//! ## Invariants
//! - A [`TypeID`] maps to at most one Rust type, and a Rust type to at most
//!   one [`TypeID`].
//! - Registered types are `Send + Sync + 'static`; storage built on top of
//!   these declarations relies on it.

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::mem::{align_of, size_of};
use std::ptr;

use crate::engine::error::{EcsError, EcsResult};
use crate::engine::hash::fnv_hash_str;
use crate::engine::types::TypeID;

/// Writes a default value into uninitialised memory.
pub type DefaultConstructor = unsafe fn(dst: *mut u8);

/// Drops the value stored at `dst` in place.
pub type Destructor = unsafe fn(dst: *mut u8);

/// Clones the value at `src` into uninitialised memory at `dst`.
pub type CopyConstructor = unsafe fn(dst: *mut u8, src: *const u8);

/// Moves the value at `src` into uninitialised memory at `dst`; `src` is left logically uninitialised.
pub type MoveConstructor = unsafe fn(dst: *mut u8, src: *mut u8);

/// Compares `new` against `old`; if they differ, assigns `new` to `old` and returns `true`.
pub type CompareAndAssign = unsafe fn(new: *const u8, old: *mut u8) -> bool;

/// Type-erased operation table for one component type.
#[derive(Clone, Copy)]
pub struct TypeOps {
    /// Default construction.
    pub construct_default: DefaultConstructor,
    /// In-place drop.
    pub destruct: Destructor,
    /// Clone into uninitialised memory.
    pub copy_construct: CopyConstructor,
    /// Relocate into uninitialised memory.
    pub move_construct: MoveConstructor,
    /// Equality-based change detection; `None` means the type cannot be tracked.
    pub compare_and_assign: Option<CompareAndAssign>,
}

impl std::fmt::Debug for TypeOps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeOps")
            .field("compare_and_assign", &self.compare_and_assign.is_some())
            .finish_non_exhaustive()
    }
}

unsafe fn construct_default<T: Default>(dst: *mut u8) {
    // SAFETY: caller provides aligned, uninitialised storage for a `T`.
    unsafe { ptr::write(dst.cast::<T>(), T::default()) }
}

unsafe fn destruct<T>(dst: *mut u8) {
    // SAFETY: caller guarantees `dst` holds an initialised `T`.
    unsafe { ptr::drop_in_place(dst.cast::<T>()) }
}

unsafe fn copy_construct<T: Clone>(dst: *mut u8, src: *const u8) {
    // SAFETY: `src` holds an initialised `T`; `dst` is aligned and uninitialised.
    unsafe { ptr::write(dst.cast::<T>(), (*src.cast::<T>()).clone()) }
}

unsafe fn move_construct<T>(dst: *mut u8, src: *mut u8) {
    // SAFETY: `src` holds an initialised `T` that the caller treats as moved-out afterwards.
    unsafe { ptr::write(dst.cast::<T>(), ptr::read(src.cast::<T>())) }
}

unsafe fn compare_and_assign<T: Clone + PartialEq>(new: *const u8, old: *mut u8) -> bool {
    // SAFETY: both pointers hold initialised `T` values in distinct columns.
    unsafe {
        let new = &*new.cast::<T>();
        let old = &mut *old.cast::<T>();
        if new == old {
            false
        } else {
            old.clone_from(new);
            true
        }
    }
}

/// Layout and operations of one registered type.
///
/// ## Fields
/// * `type_name` — Name the type was registered under; its hash is `type_id`.
/// * `size` / `align` — Layout of one element.
/// * `singleton` — The type has exactly one process-wide instance and is
///   resolved outside archetypes.

#[derive(Clone, Debug)]
pub struct TypeDeclaration {
    type_name: String,
    type_id: TypeID,
    size: usize,
    align: usize,
    singleton: bool,
    ops: TypeOps,
    rust_type: TypeId,
    rust_name: &'static str,
}

impl TypeDeclaration {
    /// Declares `T` under `name` without change-tracking support.
    pub fn of<T>(name: &str) -> Self
    where
        T: Default + Clone + Send + Sync + 'static,
    {
        Self {
            type_name: name.to_owned(),
            type_id: fnv_hash_str(name),
            size: size_of::<T>(),
            align: align_of::<T>(),
            singleton: false,
            ops: TypeOps {
                construct_default: construct_default::<T>,
                destruct: destruct::<T>,
                copy_construct: copy_construct::<T>,
                move_construct: move_construct::<T>,
                compare_and_assign: None,
            },
            rust_type: TypeId::of::<T>(),
            rust_name: type_name::<T>(),
        }
    }

    /// Declares `T` under `name` with equality-based change tracking.
    pub fn tracked<T>(name: &str) -> Self
    where
        T: Default + Clone + PartialEq + Send + Sync + 'static,
    {
        let mut declaration = Self::of::<T>(name);
        declaration.ops.compare_and_assign = Some(compare_and_assign::<T>);
        declaration
    }

    /// Marks the declaration as a singleton type.
    pub fn singleton(mut self) -> Self {
        self.singleton = true;
        self
    }

    /// Registered name.
    #[inline] pub fn type_name(&self) -> &str { &self.type_name }
    /// Hash of the registered name.
    #[inline] pub fn type_id(&self) -> TypeID { self.type_id }
    /// Size of one element in bytes.
    #[inline] pub fn size(&self) -> usize { self.size }
    /// Alignment of one element in bytes.
    #[inline] pub fn align(&self) -> usize { self.align }
    /// Whether the type is a singleton.
    #[inline] pub fn is_singleton(&self) -> bool { self.singleton }
    /// Operation table.
    #[inline] pub fn ops(&self) -> &TypeOps { &self.ops }
    /// Rust type backing the declaration.
    #[inline] pub fn rust_type(&self) -> TypeId { self.rust_type }
    /// Rust type name, for diagnostics.
    #[inline] pub fn rust_name(&self) -> &'static str { self.rust_name }
    /// Whether the type supports change tracking.
    #[inline] pub fn is_trackable(&self) -> bool { self.ops.compare_and_assign.is_some() }
}

/// Table of every type the engine can store.
#[derive(Default, Debug)]
pub struct TypeRegistry {
    by_id: HashMap<TypeID, TypeDeclaration>,
    by_rust_type: HashMap<TypeId, TypeID>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a declaration and returns its [`TypeID`].
    ///
    /// ## Behavior
    /// - Registering the same name for the same Rust type again is a no-op.
    /// - Registering a name whose hash is already bound to a different Rust
    ///   type fails with [`EcsError::ConflictingTypeRegistration`].
    /// - Registering a Rust type that is already bound under another name fails
    ///   with [`EcsError::RustTypeAlreadyBound`]; the first binding is kept.

    pub fn register(&mut self, declaration: TypeDeclaration) -> EcsResult<TypeID> {
        let type_id = declaration.type_id;
        if let Some(existing) = self.by_id.get(&type_id) {
            if existing.rust_type != declaration.rust_type {
                return Err(EcsError::ConflictingTypeRegistration {
                    name: declaration.type_name,
                    type_id,
                });
            }
            return Ok(type_id);
        }
        if let Some(&bound) = self.by_rust_type.get(&declaration.rust_type) {
            return Err(EcsError::RustTypeAlreadyBound {
                rust_type: declaration.rust_name,
                existing: self.name_of(bound).to_owned(),
                requested: declaration.type_name,
            });
        }
        self.by_rust_type.insert(declaration.rust_type, type_id);
        self.by_id.insert(type_id, declaration);
        Ok(type_id)
    }

    /// Returns the declaration for a type id.
    #[inline]
    pub fn get(&self, type_id: TypeID) -> Option<&TypeDeclaration> {
        self.by_id.get(&type_id)
    }

    /// Returns the declaration for a type id or [`EcsError::UnknownType`].
    pub fn require(&self, type_id: TypeID) -> EcsResult<&TypeDeclaration> {
        self.get(type_id).ok_or(EcsError::UnknownType(type_id))
    }

    /// Returns the [`TypeID`] registered for a Rust type.
    #[inline]
    pub fn type_id_of_rust(&self, rust_type: TypeId) -> Option<TypeID> {
        self.by_rust_type.get(&rust_type).copied()
    }

    /// Returns the [`TypeID`] registered for `T`.
    #[inline]
    pub fn type_id_of<T: 'static>(&self) -> Option<TypeID> {
        self.type_id_of_rust(TypeId::of::<T>())
    }

    /// Returns the registered name of a type, or a placeholder for unknown ids.
    pub fn name_of(&self, type_id: TypeID) -> &str {
        self.get(type_id).map_or("<unknown>", |d| d.type_name())
    }

    /// Iterates every declaration.
    pub fn iter(&self) -> impl Iterator<Item = &TypeDeclaration> {
        self.by_id.values()
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Returns `true` if no type is registered.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
