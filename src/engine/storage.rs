//! Chunked, type-erased column storage.
//!
//! This module implements the two storage primitives an archetype is built
//! from: [`Column`], which holds one component's values for every row of an
//! archetype, and [`TrackedColumn`], which holds the last observed value of a
//! change-tracked component together with its dirty bits.
//!
//! # Storage model
//!
//! A column is a list of fixed-size chunks:
//!
//! ```text
//! chunks: Vec<NonNull<u8>>        // each chunk = chunk_rows * element_size bytes
//! chunk   = row >> chunk_power
//! offset  = row &  chunk_mask
//! ```
//!
//! Every chunk is allocated at `lcm(chunk_rows, element_align)` so that the
//! chunk start is both size- and alignment-aligned; iteration code can treat
//! one chunk as a flat `&[T]` of `chunk_rows` elements without per-element
//! alignment checks.
//!
//! # Ownership
//!
//! A column owns its chunk *memory* but not the lifetime of the values in it:
//! constructing, relocating and destroying row data is the archetype's job,
//! using the [`TypeOps`] table cached in the column. Dropping a column only
//! releases the chunks.
//!
//! # Safety and invariants
//!
//! - `get_data(row)` is not checked against the archetype's logical row
//!   count; capacity management is the archetype's job.
//! - Columns only store types declared through
//!   [`TypeDeclaration`], which requires `Send + Sync`; this is what the
//!   manual `Send`/`Sync` impls rely on.

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::any::TypeId;
use std::ptr::NonNull;

use crate::engine::error::{EcsError, EcsResult};
use crate::engine::type_registry::{TypeDeclaration, TypeOps};
use crate::engine::types::{ArchetypeChunkSize, ComponentID, RowID, TypeID};

#[inline]
fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

#[inline]
fn lcm(a: usize, b: usize) -> usize {
    a / gcd(a, b) * b
}

/// Type-erased, chunked array of one component for every row of one archetype.
pub struct Column {
    chunks: Vec<NonNull<u8>>,
    chunk_layout: Layout,
    chunk_size: ArchetypeChunkSize,
    element_size: usize,
    component_id: ComponentID,
    type_id: TypeID,
    rust_type: TypeId,
    ops: TypeOps,
    debug_name: String,
    type_name: String,
}

// SAFETY: columns only hold values of `Send + Sync` types (see module docs).
unsafe impl Send for Column {}
// SAFETY: see above.
unsafe impl Sync for Column {}

impl Column {
    /// Creates an empty column for `component_id` of the declared type.
    ///
    /// ## Behavior
    /// - No chunk is allocated until [`Column::add_chunk`] is called.
    /// - The chunk alignment is `lcm(chunk_rows, element_align)`.
    ///
    /// ## Errors
    /// [`EcsError::InvalidLayout`] if the chunk layout overflows.

    pub fn new(
        chunk_size: ArchetypeChunkSize,
        declaration: &TypeDeclaration,
        component_id: ComponentID,
        debug_name: &str,
    ) -> EcsResult<Self> {
        let rows = chunk_size.rows() as usize;
        let alignment = lcm(rows, declaration.align().max(1));
        let bytes = rows
            .checked_mul(declaration.size())
            .ok_or_else(|| EcsError::InvalidLayout(debug_name.to_owned()))?;
        let chunk_layout = Layout::from_size_align(bytes, alignment)
            .map_err(|_| EcsError::InvalidLayout(debug_name.to_owned()))?;

        Ok(Self {
            chunks: Vec::new(),
            chunk_layout,
            chunk_size,
            element_size: declaration.size(),
            component_id,
            type_id: declaration.type_id(),
            rust_type: declaration.rust_type(),
            ops: *declaration.ops(),
            debug_name: debug_name.to_owned(),
            type_name: declaration.type_name().to_owned(),
        })
    }

    /// Grows capacity by one chunk.
    pub fn add_chunk(&mut self) {
        let chunk = if self.chunk_layout.size() == 0 {
            // Zero-sized components: every slot aliases the same aligned address.
            NonNull::new(self.chunk_layout.align() as *mut u8).unwrap_or(NonNull::dangling())
        } else {
            // SAFETY: the layout has non-zero size.
            let ptr = unsafe { alloc(self.chunk_layout) };
            NonNull::new(ptr).unwrap_or_else(|| handle_alloc_error(self.chunk_layout))
        };
        self.chunks.push(chunk);
    }

    /// Returns the slot address for `row`.
    ///
    /// ## Notes
    /// The row is not checked against the logical row count; it must lie
    /// within the allocated chunks.

    #[inline]
    pub fn get_data(&self, row: RowID) -> *mut u8 {
        let chunk = (row >> self.chunk_size.power()) as usize;
        let offset = (row & self.chunk_size.mask()) as usize;
        // SAFETY: offset < chunk_rows, so the address stays inside the chunk.
        unsafe { self.chunks[chunk].as_ptr().add(offset * self.element_size) }
    }

    /// Returns the base address of chunk `chunk`.
    #[inline]
    pub fn chunk_ptr(&self, chunk: usize) -> *mut u8 {
        self.chunks[chunk].as_ptr()
    }

    /// Number of allocated chunks.
    #[inline] pub fn chunk_count(&self) -> usize { self.chunks.len() }
    /// Allocated row capacity.
    #[inline] pub fn capacity(&self) -> usize { self.chunks.len() * self.chunk_size.rows() as usize }
    /// Chunk size preset.
    #[inline] pub fn chunk_size(&self) -> ArchetypeChunkSize { self.chunk_size }
    /// Alignment of every chunk allocation.
    #[inline] pub fn chunk_alignment(&self) -> usize { self.chunk_layout.align() }
    /// Size of one element in bytes.
    #[inline] pub fn element_size(&self) -> usize { self.element_size }
    /// Component stored in the column.
    #[inline] pub fn component_id(&self) -> ComponentID { self.component_id }
    /// Type stored in the column.
    #[inline] pub fn type_id(&self) -> TypeID { self.type_id }
    /// Rust type stored in the column.
    #[inline] pub fn rust_type(&self) -> TypeId { self.rust_type }
    /// Cached operation table of the stored type.
    #[inline] pub fn ops(&self) -> &TypeOps { &self.ops }
    /// Human-readable component name.
    #[inline] pub fn debug_name(&self) -> &str { &self.debug_name }
    /// Registered name of the stored type.
    #[inline] pub fn type_name(&self) -> &str { &self.type_name }

    /// Returns `true` if the column stores `T`.
    #[inline]
    pub fn is<T: 'static>(&self) -> bool {
        self.rust_type == TypeId::of::<T>()
    }
}

impl Drop for Column {
    fn drop(&mut self) {
        if self.chunk_layout.size() == 0 {
            return;
        }
        for chunk in self.chunks.drain(..) {
            // SAFETY: every chunk was allocated in `add_chunk` with `chunk_layout`.
            unsafe { dealloc(chunk.as_ptr(), self.chunk_layout) };
        }
    }
}

impl std::fmt::Debug for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Column")
            .field("component", &self.debug_name)
            .field("component_id", &self.component_id)
            .field("chunks", &self.chunks.len())
            .field("element_size", &self.element_size)
            .finish()
    }
}

/// Aggregate dirty state of a tracked column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirtyState {
    /// No row was written since the last tracking pass.
    Clean,
    /// Only rows whose dirty bit is set may have changed.
    SomeDirty,
    /// Every row may have changed.
    AllDirty,
}

/// Shadow copy of a change-tracked component.
///
/// ## Invariants
/// - The shadow column has exactly as many chunks as its source column.
/// - `dirty.len()` equals the allocated row capacity.
/// - `state == Clean` implies every dirty bit is clear.

pub struct TrackedColumn {
    shadow: Column,
    source_column: usize,
    dirty: Vec<bool>,
    state: DirtyState,
}

impl TrackedColumn {
    /// Wraps `shadow`, which mirrors column `source_column` of the same archetype.
    pub fn new(shadow: Column, source_column: usize) -> Self {
        Self { shadow, source_column, dirty: Vec::new(), state: DirtyState::Clean }
    }

    /// Grows the shadow column and dirty bits by one chunk.
    pub fn add_chunk(&mut self) {
        self.shadow.add_chunk();
        self.dirty.resize(self.shadow.capacity(), false);
    }

    /// Marks one row as possibly changed.
    #[inline]
    pub fn mark_dirty(&mut self, row: RowID) {
        if self.state == DirtyState::AllDirty {
            return;
        }
        if let Some(bit) = self.dirty.get_mut(row as usize) {
            *bit = true;
            self.state = DirtyState::SomeDirty;
        }
    }

    /// Marks every row as possibly changed.
    #[inline]
    pub fn mark_all_dirty(&mut self) {
        self.state = DirtyState::AllDirty;
    }

    /// Clears every dirty bit.
    pub fn reset_dirty(&mut self) {
        if self.state != DirtyState::Clean {
            self.dirty.iter_mut().for_each(|bit| *bit = false);
        }
        self.state = DirtyState::Clean;
    }

    /// Returns `true` if `row` must be compared in the next tracking pass.
    #[inline]
    pub fn is_row_dirty(&self, row: RowID) -> bool {
        match self.state {
            DirtyState::Clean => false,
            DirtyState::AllDirty => true,
            DirtyState::SomeDirty => self.dirty.get(row as usize).copied().unwrap_or(false),
        }
    }

    /// Moves the dirty bit of `from` onto `to` (swap-and-pop) and clears `from`.
    pub fn move_dirty_bit(&mut self, to: RowID, from: RowID) {
        let bit = self.dirty.get(from as usize).copied().unwrap_or(false);
        if let Some(slot) = self.dirty.get_mut(to as usize) {
            *slot = bit;
        }
        if let Some(slot) = self.dirty.get_mut(from as usize) {
            *slot = false;
        }
    }

    /// Current aggregate state.
    #[inline] pub fn state(&self) -> DirtyState { self.state }
    /// Returns `true` if no row needs comparing.
    #[inline] pub fn is_clean(&self) -> bool { self.state == DirtyState::Clean }
    /// Shadow column holding the last observed values.
    #[inline] pub fn shadow(&self) -> &Column { &self.shadow }
    /// Index of the live column this shadow mirrors.
    #[inline] pub fn source_column(&self) -> usize { self.source_column }
    /// Component tracked by this column.
    #[inline] pub fn component_id(&self) -> ComponentID { self.shadow.component_id() }
}

impl std::fmt::Debug for TrackedColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackedColumn")
            .field("component", &self.shadow.debug_name())
            .field("source_column", &self.source_column)
            .field("state", &self.state)
            .finish()
    }
}
