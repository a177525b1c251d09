//! Owned, type-erased component values and initializer lists.
//!
//! Templates, creation overrides and deferred events all carry values whose
//! concrete type is only known at the call site. This module stores them
//! behind a small static vtable so that storage can later copy or move them
//! into column slots without being generic over the type.
//!
//! ## Storage model
//!
//! [`ComponentValue`] keeps values of up to [`INLINE_CAPACITY`] bytes (and at
//! most 16-byte alignment) inline; larger or over-aligned values live in an
//! aligned heap allocation:
//!
//! ```text
//! ValueStorage::Inline([MaybeUninit<u8>; 32])   // small values, no allocation
//! ValueStorage::Boxed(NonNull<u8>)              // everything else
//! ```
//!
//! [`ComponentVec`] is the batch counterpart: an owned `Vec<T>` whose elements
//! are moved out front-to-back during structure-of-arrays creation.
//!
//! ## Safety
//!
//! - Every constructor requires `T: Send + Sync + 'static`, which is what the
//!   manual `Send`/`Sync` impls rely on.
//! - `move_into` and `clone_into` write into raw slots; callers guarantee the
//!   destination is aligned, uninitialised and of the value's type.

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::mem::{align_of, size_of, ManuallyDrop, MaybeUninit};
use std::ptr::{self, NonNull};

use crate::engine::types::ComponentID;

/// Largest value size kept inline.
pub const INLINE_CAPACITY: usize = 32;

const INLINE_ALIGN: usize = 16;

#[repr(C, align(16))]
struct InlineBuffer([MaybeUninit<u8>; INLINE_CAPACITY]);

impl InlineBuffer {
    #[inline]
    fn uninit() -> Self {
        Self([MaybeUninit::uninit(); INLINE_CAPACITY])
    }
}

enum ValueStorage {
    Inline(InlineBuffer),
    Boxed(NonNull<u8>),
}

struct ValueVTable {
    layout: fn() -> Layout,
    rust_type: fn() -> TypeId,
    type_name: fn() -> &'static str,
    drop: unsafe fn(*mut u8),
    clone: unsafe fn(*mut u8, *const u8),
}

unsafe fn drop_value<T>(ptr: *mut u8) {
    // SAFETY: the value at `ptr` is an initialised `T` owned by the caller.
    unsafe { ptr::drop_in_place(ptr.cast::<T>()) }
}

unsafe fn clone_value<T: Clone>(dst: *mut u8, src: *const u8) {
    // SAFETY: `src` is an initialised `T`; `dst` is aligned, uninitialised storage for `T`.
    unsafe { ptr::write(dst.cast::<T>(), (*src.cast::<T>()).clone()) }
}

#[inline]
const fn fits_inline<T>() -> bool {
    size_of::<T>() <= INLINE_CAPACITY && align_of::<T>() <= INLINE_ALIGN
}

/// Allocates uninitialised storage for `layout`; zero-sized layouts get a dangling aligned pointer.
fn allocate(layout: Layout) -> NonNull<u8> {
    if layout.size() == 0 {
        // Address equal to the alignment is non-null and suitably aligned.
        return NonNull::new(layout.align() as *mut u8).unwrap_or(NonNull::dangling());
    }
    // SAFETY: the layout has non-zero size.
    let ptr = unsafe { alloc(layout) };
    NonNull::new(ptr).unwrap_or_else(|| handle_alloc_error(layout))
}

fn deallocate(ptr: NonNull<u8>, layout: Layout) {
    if layout.size() != 0 {
        // SAFETY: `ptr` was returned by `allocate` with the same layout.
        unsafe { dealloc(ptr.as_ptr(), layout) }
    }
}

/// An owned value of any registered component type.
///
/// ## Purpose
/// Carries template defaults, creation overrides and deferred event payloads
/// until the engine copies or moves them into storage.
///
/// ## Example
/// ```ignore
/// let value = ComponentValue::new(42i32);
/// assert_eq!(value.downcast_ref::<i32>(), Some(&42));
/// ```

pub struct ComponentValue {
    storage: ValueStorage,
    vtable: &'static ValueVTable,
}

// SAFETY: `ComponentValue::new` only accepts `Send + Sync` payloads.
unsafe impl Send for ComponentValue {}
// SAFETY: see above.
unsafe impl Sync for ComponentValue {}

impl ComponentValue {
    /// Wraps `value`.
    pub fn new<T: Clone + Send + Sync + 'static>(value: T) -> Self {
        let vtable: &'static ValueVTable = &ValueVTable {
            layout: Layout::new::<T>,
            rust_type: TypeId::of::<T>,
            type_name: type_name::<T>,
            drop: drop_value::<T>,
            clone: clone_value::<T>,
        };
        let storage = if fits_inline::<T>() {
            let mut buffer = InlineBuffer::uninit();
            // SAFETY: the buffer is large and aligned enough for `T`.
            unsafe { ptr::write(buffer.0.as_mut_ptr().cast::<T>(), value) };
            ValueStorage::Inline(buffer)
        } else {
            let ptr = allocate(Layout::new::<T>());
            // SAFETY: freshly allocated with `T`'s layout.
            unsafe { ptr::write(ptr.as_ptr().cast::<T>(), value) };
            ValueStorage::Boxed(ptr)
        };
        Self { storage, vtable }
    }

    /// Rust type of the stored value.
    #[inline]
    pub fn rust_type(&self) -> TypeId {
        (self.vtable.rust_type)()
    }

    /// Rust type name of the stored value.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        (self.vtable.type_name)()
    }

    /// Layout of the stored value.
    #[inline]
    pub fn layout(&self) -> Layout {
        (self.vtable.layout)()
    }

    /// Returns `true` if the value is stored without a heap allocation.
    #[inline]
    pub fn is_inline(&self) -> bool {
        matches!(self.storage, ValueStorage::Inline(_))
    }

    /// Returns `true` if the stored value is a `T`.
    #[inline]
    pub fn is<T: 'static>(&self) -> bool {
        self.rust_type() == TypeId::of::<T>()
    }

    /// Address of the stored value.
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        match &self.storage {
            ValueStorage::Inline(buffer) => buffer.0.as_ptr().cast(),
            ValueStorage::Boxed(ptr) => ptr.as_ptr(),
        }
    }

    /// Mutable address of the stored value.
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        match &mut self.storage {
            ValueStorage::Inline(buffer) => buffer.0.as_mut_ptr().cast(),
            ValueStorage::Boxed(ptr) => ptr.as_ptr(),
        }
    }

    /// Borrows the value as `T`.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        // SAFETY: type checked; the value is initialised while `self` lives.
        self.is::<T>().then(|| unsafe { &*self.as_ptr().cast::<T>() })
    }

    /// Mutably borrows the value as `T`.
    pub fn downcast_mut<T: 'static>(&mut self) -> Option<&mut T> {
        if !self.is::<T>() {
            return None;
        }
        // SAFETY: type checked; exclusive borrow of `self`.
        Some(unsafe { &mut *self.as_mut_ptr().cast::<T>() })
    }

    /// Takes the value out as `T`, or returns `self` on a type mismatch.
    pub fn into_inner<T: 'static>(self) -> Result<T, Self> {
        if !self.is::<T>() {
            return Err(self);
        }
        let mut out = MaybeUninit::<T>::uninit();
        // SAFETY: type checked; `out` is uninitialised storage for `T`.
        unsafe {
            self.move_into(out.as_mut_ptr().cast());
            Ok(out.assume_init())
        }
    }

    /// Moves the value into `dst`, consuming `self` without dropping the payload.
    ///
    /// # Safety
    /// `dst` must be aligned, uninitialised storage for the value's type.

    pub unsafe fn move_into(self, dst: *mut u8) {
        let this = ManuallyDrop::new(self);
        let layout = this.layout();
        // SAFETY: caller guarantees `dst`; source and destination never overlap.
        unsafe { ptr::copy_nonoverlapping(this.as_ptr(), dst, layout.size()) };
        if let ValueStorage::Boxed(ptr) = this.storage {
            deallocate(ptr, layout);
        }
    }

    /// Clones the value into `dst`.
    ///
    /// # Safety
    /// `dst` must be aligned, uninitialised storage for the value's type.

    pub unsafe fn clone_into(&self, dst: *mut u8) {
        // SAFETY: forwarded to the caller.
        unsafe { (self.vtable.clone)(dst, self.as_ptr()) }
    }
}

impl Clone for ComponentValue {
    fn clone(&self) -> Self {
        let storage = match &self.storage {
            ValueStorage::Inline(_) => {
                let mut buffer = InlineBuffer::uninit();
                // SAFETY: inline values fit the buffer by construction.
                unsafe { self.clone_into(buffer.0.as_mut_ptr().cast()) };
                ValueStorage::Inline(buffer)
            }
            ValueStorage::Boxed(_) => {
                let ptr = allocate(self.layout());
                // SAFETY: freshly allocated with the value's layout.
                unsafe { self.clone_into(ptr.as_ptr()) };
                ValueStorage::Boxed(ptr)
            }
        };
        Self { storage, vtable: self.vtable }
    }
}

impl Drop for ComponentValue {
    fn drop(&mut self) {
        let ptr = self.as_mut_ptr();
        // SAFETY: the payload is initialised until now.
        unsafe { (self.vtable.drop)(ptr) };
        if let ValueStorage::Boxed(ptr) = self.storage {
            deallocate(ptr, self.layout());
        }
    }
}

impl fmt::Debug for ComponentValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentValue")
            .field("type", &self.type_name())
            .field("inline", &self.is_inline())
            .finish()
    }
}

trait ErasedVec: Send + Sync {
    fn len(&self) -> usize;
    fn rust_type(&self) -> TypeId;
    fn type_name(&self) -> &'static str;
    fn element_size(&self) -> usize;
    fn as_mut_ptr(&mut self) -> *mut u8;

    /// Drops elements `moved..` and empties the vector; elements `..moved` were moved out.
    unsafe fn release_after_move(&mut self, moved: usize);
}

impl<T: Send + Sync + 'static> ErasedVec for Vec<T> {
    fn len(&self) -> usize { Vec::len(self) }
    fn rust_type(&self) -> TypeId { TypeId::of::<T>() }
    fn type_name(&self) -> &'static str { type_name::<T>() }
    fn element_size(&self) -> usize { size_of::<T>() }
    fn as_mut_ptr(&mut self) -> *mut u8 { Vec::as_mut_ptr(self).cast() }

    unsafe fn release_after_move(&mut self, moved: usize) {
        let len = Vec::len(self);
        debug_assert!(moved <= len);
        // SAFETY: the first `moved` elements were relocated; the rest are still owned.
        unsafe {
            self.set_len(0);
            let tail = ptr::slice_from_raw_parts_mut(Vec::as_mut_ptr(self).add(moved), len - moved);
            ptr::drop_in_place(tail);
        }
    }
}

/// An owned `Vec<T>` of any registered component type.
pub struct ComponentVec {
    inner: Box<dyn ErasedVec>,
}

impl ComponentVec {
    /// Wraps `values`.
    pub fn new<T: Send + Sync + 'static>(values: Vec<T>) -> Self {
        Self { inner: Box::new(values) }
    }

    /// Number of elements.
    #[inline] pub fn len(&self) -> usize { self.inner.len() }
    /// Returns `true` if there are no elements.
    #[inline] pub fn is_empty(&self) -> bool { self.inner.len() == 0 }
    /// Rust element type.
    #[inline] pub fn rust_type(&self) -> TypeId { self.inner.rust_type() }
    /// Rust element type name.
    #[inline] pub fn type_name(&self) -> &'static str { self.inner.type_name() }

    /// Moves the first `count` elements into the slots returned by `slot`, dropping the rest.
    ///
    /// # Safety
    /// Each pointer returned by `slot(i)` must be aligned, uninitialised
    /// storage for the element type, and `count <= self.len()`.

    pub unsafe fn move_prefix_into(mut self, count: usize, mut slot: impl FnMut(usize) -> *mut u8) {
        let size = self.inner.element_size();
        let base = self.inner.as_mut_ptr();
        for i in 0..count {
            // SAFETY: `i < count <= len`; destinations are distinct column slots.
            unsafe { ptr::copy_nonoverlapping(base.add(i * size), slot(i), size) };
        }
        // SAFETY: exactly `count` elements were relocated above.
        unsafe { self.inner.release_after_move(count) };
    }
}

impl fmt::Debug for ComponentVec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentVec")
            .field("type", &self.type_name())
            .field("len", &self.len())
            .finish()
    }
}

/// How an initializer names its component.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ComponentKey {
    /// Already-resolved component id.
    Id(ComponentID),
    /// Component name; resolved against the value's registered type.
    Name(String),
}

impl From<ComponentID> for ComponentKey {
    fn from(id: ComponentID) -> Self {
        ComponentKey::Id(id)
    }
}

impl From<&str> for ComponentKey {
    fn from(name: &str) -> Self {
        ComponentKey::Name(name.to_owned())
    }
}

impl From<String> for ComponentKey {
    fn from(name: String) -> Self {
        ComponentKey::Name(name)
    }
}

/// One `(component, value)` initializer.
#[derive(Clone, Debug)]
pub struct ComponentInit {
    /// Target component.
    pub key: ComponentKey,
    /// Value to write.
    pub value: ComponentValue,
}

impl ComponentInit {
    /// Creates an initializer for `key`.
    pub fn new<T: Clone + Send + Sync + 'static>(key: impl Into<ComponentKey>, value: T) -> Self {
        Self { key: key.into(), value: ComponentValue::new(value) }
    }
}

/// One `(component, values)` batch initializer.
#[derive(Debug)]
pub struct ComponentSoaInit {
    /// Target component.
    pub key: ComponentKey,
    /// One value per created entity.
    pub values: ComponentVec,
}

impl ComponentSoaInit {
    /// Creates a batch initializer for `key`.
    pub fn new<T: Send + Sync + 'static>(key: impl Into<ComponentKey>, values: Vec<T>) -> Self {
        Self { key: key.into(), values: ComponentVec::new(values) }
    }
}

/// Ordered list of single-entity initializers.
#[derive(Clone, Debug, Default)]
pub struct InitializerList {
    inits: Vec<ComponentInit>,
}

impl InitializerList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an initializer, builder style.
    pub fn with<T: Clone + Send + Sync + 'static>(mut self, key: impl Into<ComponentKey>, value: T) -> Self {
        self.inits.push(ComponentInit::new(key, value));
        self
    }

    /// Appends an initializer.
    pub fn push(&mut self, init: ComponentInit) {
        self.inits.push(init);
    }

    /// Number of initializers.
    pub fn len(&self) -> usize {
        self.inits.len()
    }

    /// Returns `true` if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.inits.is_empty()
    }
}

impl From<Vec<ComponentInit>> for InitializerList {
    fn from(inits: Vec<ComponentInit>) -> Self {
        Self { inits }
    }
}

impl IntoIterator for InitializerList {
    type Item = ComponentInit;
    type IntoIter = std::vec::IntoIter<ComponentInit>;

    fn into_iter(self) -> Self::IntoIter {
        self.inits.into_iter()
    }
}

/// Ordered list of batch initializers.
#[derive(Debug, Default)]
pub struct InitializerSoaList {
    inits: Vec<ComponentSoaInit>,
}

impl InitializerSoaList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a batch initializer, builder style.
    pub fn with<T: Send + Sync + 'static>(mut self, key: impl Into<ComponentKey>, values: Vec<T>) -> Self {
        self.inits.push(ComponentSoaInit::new(key, values));
        self
    }

    /// Appends a batch initializer.
    pub fn push(&mut self, init: ComponentSoaInit) {
        self.inits.push(init);
    }

    /// Number of entities the batch creates: the shortest supplied vector.
    pub fn batch_len(&self) -> usize {
        self.inits.iter().map(|init| init.values.len()).min().unwrap_or(0)
    }

    /// Number of batch initializers.
    pub fn len(&self) -> usize {
        self.inits.len()
    }

    /// Returns `true` if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.inits.is_empty()
    }
}

impl From<Vec<ComponentSoaInit>> for InitializerSoaList {
    fn from(inits: Vec<ComponentSoaInit>) -> Self {
        Self { inits }
    }
}

impl IntoIterator for InitializerSoaList {
    type Item = ComponentSoaInit;
    type IntoIter = std::vec::IntoIter<ComponentSoaInit>;

    fn into_iter(self) -> Self::IntoIter {
        self.inits.into_iter()
    }
}

/// Resolved single-entity initializers keyed by component.
pub type ComponentMap = HashMap<ComponentID, ComponentValue>;

/// Resolved batch initializers keyed by component.
pub type ComponentVecMap = HashMap<ComponentID, ComponentVec>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn small_values_are_inline_and_large_are_boxed() {
        assert!(ComponentValue::new(1u64).is_inline());
        assert!(!ComponentValue::new([0u64; 16]).is_inline());
        assert!(ComponentValue::new(()).is_inline());
    }

    #[test]
    fn clone_and_downcast_preserve_value() {
        let value = ComponentValue::new(String::from("brick"));
        let copy = value.clone();
        assert_eq!(copy.downcast_ref::<String>().map(String::as_str), Some("brick"));
        assert!(copy.downcast_ref::<i32>().is_none());
        assert_eq!(value.into_inner::<String>().unwrap(), "brick");
    }

    #[test]
    fn boxed_values_drop_exactly_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let value = ComponentValue::new((DropCounter(counter.clone()), [0u64; 8]));
            let _copy = value.clone();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn move_prefix_drops_the_remainder() {
        let counter = Arc::new(AtomicUsize::new(0));
        let values = ComponentVec::new(vec![
            DropCounter(counter.clone()),
            DropCounter(counter.clone()),
            DropCounter(counter.clone()),
        ]);
        let mut moved: Vec<MaybeUninit<DropCounter>> = (0..2).map(|_| MaybeUninit::uninit()).collect();
        let base = moved.as_mut_ptr();
        unsafe { values.move_prefix_into(2, |i| base.add(i).cast()) };
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        for slot in moved.iter_mut() {
            unsafe { slot.assume_init_drop() };
        }
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn soa_batch_length_is_the_shortest_vector() {
        let list = InitializerSoaList::new()
            .with("position", vec![1.0f32, 2.0, 3.0])
            .with("name", vec![String::new(), String::new()]);
        assert_eq!(list.batch_len(), 2);
        assert_eq!(InitializerSoaList::new().batch_len(), 0);
    }
}
