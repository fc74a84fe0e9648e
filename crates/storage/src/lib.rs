//! Paged storage substrate: a fixed-size page buffer pool over a single
//! backing file, plus the two physical page formats the engine builds on.
//!
//! - [`PageManager`] owns the file, the page buffers, the on-disk free list,
//!   and the eviction policy. Pages are referenced through [`PageGuard`]
//!   handles with pin semantics: while any handle to a page exists, its
//!   buffer cannot be evicted.
//! - [`PlainPage`] treats a page as opaque bytes (meta pages).
//! - [`SortedPage`] is the slotted, ordered, variable-length layout the
//!   B+-tree is built on.
//!
//! Page 0 of every file is the manager's own meta page; page 1 is the
//! pre-allocated super page handed to the storage engine for its table
//! registry.

mod pager;
mod sorted;


pub use pager::{PageGuard, PageManager};
pub use sorted::{SlotKeyOrd, SortedPage};

use common::PageId;

/// Fixed page size in bytes.
pub const PAGE_SIZE: usize = 4096;

/// The page ID of the pre-allocated super page.
pub const SUPER_PAGE: PageId = PageId(1);

/// A handle that reads and writes a page as raw bytes.
pub struct PlainPage {
    guard: PageGuard,
}

impl std::fmt::Debug for PlainPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlainPage").field("id", &self.guard.id()).finish()
    }
}

impl PlainPage {
    pub(crate) fn new(guard: PageGuard) -> Self {
        Self { guard }
    }

    pub fn id(&self) -> PageId {
        self.guard.id()
    }

    pub fn read(&self, start: usize, len: usize) -> Vec<u8> {
        self.guard.with(|data| data[start..start + len].to_vec())
    }

    pub fn write(&self, start: usize, bytes: &[u8]) {
        self.guard
            .with_mut(|data| data[start..start + bytes.len()].copy_from_slice(bytes));
    }

    pub fn read_u8(&self, start: usize) -> u8 {
        self.guard.with(|data| data[start])
    }

    pub fn write_u8(&self, start: usize, v: u8) {
        self.guard.with_mut(|data| data[start] = v);
    }

    pub fn read_u32(&self, start: usize) -> u32 {
        self.guard.with(|data| {
            u32::from_le_bytes(data[start..start + 4].try_into().unwrap())
        })
    }

    pub fn write_u32(&self, start: usize, v: u32) {
        self.write(start, &v.to_le_bytes());
    }

    pub fn read_u64(&self, start: usize) -> u64 {
        self.guard.with(|data| {
            u64::from_le_bytes(data[start..start + 8].try_into().unwrap())
        })
    }

    pub fn write_u64(&self, start: usize, v: u64) {
        self.write(start, &v.to_le_bytes());
    }
}
