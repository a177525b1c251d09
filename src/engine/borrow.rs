//! # Borrow Tracking Module
//!
//! Per-slot read/write borrow tracking for one [`ChunkView`].
//!
//! ## Purpose
//!
//! A view hands out typed cursors onto raw column memory from a shared
//! reference. The tracker enforces Rust's aliasing rules at runtime, per
//! signature slot:
//!
//! - A slot may be read any number of times.
//! - A slot may be written once, and then not read.
//!
//! Two slots never alias the same storage; query registration rejects
//! signatures that would.
//!
//! ## State Encoding
//!
//! | State | Meaning |
//! |------:|--------|
//! | `0` | Unborrowed |
//! | `1` | Mutably borrowed |
//! | `>= 2` | Shared (`state - 1` cursors) |
//!
//! Borrows last as long as the view: a view covers a single chunk and a
//! callback invocation, so there is nothing to release early.
//!
//! [`ChunkView`]: crate::engine::query::ChunkView

use std::cell::Cell;

const UNBORROWED: usize = 0;
const WRITE: usize = 1;

/// Why a cursor could not be handed out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BorrowConflict {
    /// The slot is already mutably borrowed.
    AlreadyWritten,
    /// The slot is already borrowed and cannot be borrowed mutably.
    AlreadyRead,
}

/// Borrow state of every slot of one view.
pub struct SlotBorrows {
    states: Box<[Cell<usize>]>,
}

impl SlotBorrows {
    /// Creates a tracker with `slots` unborrowed slots.
    pub fn new(slots: usize) -> Self {
        Self { states: (0..slots).map(|_| Cell::new(UNBORROWED)).collect() }
    }

    /// Records a shared borrow of `slot`.
    ///
    /// ## State Transitions
    ///
    /// - `0 → 2` : first reader
    /// - `N → N+1` : additional reader
    /// - `1` : rejected

    pub fn acquire_read(&self, slot: usize) -> Result<(), BorrowConflict> {
        let state = &self.states[slot];
        match state.get() {
            WRITE => Err(BorrowConflict::AlreadyWritten),
            UNBORROWED => {
                state.set(2);
                Ok(())
            }
            readers => {
                state.set(readers + 1);
                Ok(())
            }
        }
    }

    /// Records the exclusive borrow of `slot`.
    ///
    /// Only `0 → 1` succeeds.

    pub fn acquire_write(&self, slot: usize) -> Result<(), BorrowConflict> {
        let state = &self.states[slot];
        match state.get() {
            UNBORROWED => {
                state.set(WRITE);
                Ok(())
            }
            WRITE => Err(BorrowConflict::AlreadyWritten),
            _ => Err(BorrowConflict::AlreadyRead),
        }
    }

    /// Number of tracked slots.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Returns `true` if the tracker has no slots.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_share_writers_exclude() {
        let borrows = SlotBorrows::new(2);
        assert_eq!(borrows.acquire_read(0), Ok(()));
        assert_eq!(borrows.acquire_read(0), Ok(()));
        assert_eq!(borrows.acquire_write(0), Err(BorrowConflict::AlreadyRead));

        assert_eq!(borrows.acquire_write(1), Ok(()));
        assert_eq!(borrows.acquire_write(1), Err(BorrowConflict::AlreadyWritten));
        assert_eq!(borrows.acquire_read(1), Err(BorrowConflict::AlreadyWritten));
    }
}
