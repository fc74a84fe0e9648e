use std::cmp::Ordering;

use common::PageId;

use crate::pager::PageGuard;
use crate::PAGE_SIZE;

/// Compares an encoded slot against a search key. The slot format is opaque
/// to the page; parsing happens inside the comparator, so inner and leaf
/// pages share this one layout.
pub trait SlotKeyOrd: Clone {
    fn cmp_slot_key(&self, slot: &[u8], key: &[u8]) -> Ordering;
}

impl<F: Fn(&[u8], &[u8]) -> Ordering + Clone> SlotKeyOrd for F {
    fn cmp_slot_key(&self, slot: &[u8], key: &[u8]) -> Ordering {
        self(slot, key)
    }
}

/// Slotted page of variable-length ordered slots.
///
/// Layout (all little-endian u16):
///
/// ```text
/// +--------+-----------------------------------------------------+
/// | N (2B) | end_0 (2B)   end_1 (2B)  ...  end_N (2B)            |
/// +--------+---------+-------------------------+-----------------+
/// |   ...  free space  ...  | slot_{N-1} | ... | slot_0 | special|
/// +-------------------------+------------+-----+--------+--------+
/// ```
///
/// `end_0` is the boundary of the fixed "special" trailer; slot `i` occupies
/// `[end_{i+1}, end_i)`, so slot bodies grow downward from the trailer and
/// stay contiguous. Deletion and replacement compact by shifting that
/// contiguous body region.
pub struct SortedPage<C: SlotKeyOrd> {
    guard: PageGuard,
    ord: C,
}

const HEADER: usize = 2;

fn slot_count(data: &[u8]) -> usize {
    u16::from_le_bytes([data[0], data[1]]) as usize
}

fn set_slot_count(data: &mut [u8], n: usize) {
    data[0..2].copy_from_slice(&(n as u16).to_le_bytes());
}

/// `end(i)` for `i in 0..=slot_count`; `end(0)` is the special boundary.
fn end(data: &[u8], i: usize) -> usize {
    let off = HEADER + 2 * i;
    u16::from_le_bytes([data[off], data[off + 1]]) as usize
}

fn set_end(data: &mut [u8], i: usize, v: usize) {
    let off = HEADER + 2 * i;
    data[off..off + 2].copy_from_slice(&(v as u16).to_le_bytes());
}

fn free_space(data: &[u8]) -> usize {
    let n = slot_count(data);
    end(data, n).saturating_sub(HEADER + 2 + 2 * n)
}

impl<C: SlotKeyOrd> SortedPage<C> {
    pub(crate) fn new(guard: PageGuard, ord: C) -> Self {
        Self { guard, ord }
    }

    pub fn id(&self) -> PageId {
        self.guard.id()
    }

    /// Zero the header and reserve the special trailer. Must be called once
    /// before a freshly allocated page is used.
    pub fn init(&self, special_size: usize) {
        self.guard.with_mut(|data| {
            set_slot_count(data, 0);
            set_end(data, 0, PAGE_SIZE - special_size);
        });
    }

    pub fn slot_num(&self) -> usize {
        self.guard.with(slot_count)
    }

    pub fn is_empty(&self) -> bool {
        self.slot_num() == 0
    }

    pub fn slot(&self, i: usize) -> Vec<u8> {
        self.guard.with(|data| {
            debug_assert!(i < slot_count(data));
            data[end(data, i + 1)..end(data, i)].to_vec()
        })
    }

    pub fn slot_size(&self, i: usize) -> usize {
        self.guard.with(|data| end(data, i) - end(data, i + 1))
    }

    pub fn read_special(&self, start: usize, len: usize) -> Vec<u8> {
        self.guard.with(|data| {
            let base = end(data, 0);
            data[base + start..base + start + len].to_vec()
        })
    }

    pub fn write_special(&self, start: usize, bytes: &[u8]) {
        self.guard.with_mut(|data| {
            let base = end(data, 0);
            data[base + start..base + start + bytes.len()].copy_from_slice(bytes);
        });
    }

    pub fn free_space(&self) -> usize {
        self.guard.with(free_space)
    }

    /// First slot whose key is not less than `key`.
    pub fn lower_bound(&self, key: &[u8]) -> usize {
        self.guard.with(|data| {
            let (mut l, mut r) = (0, slot_count(data));
            while l != r {
                let mid = (l + r) / 2;
                let slot = &data[end(data, mid + 1)..end(data, mid)];
                if self.ord.cmp_slot_key(slot, key) == Ordering::Less {
                    l = mid + 1;
                } else {
                    r = mid;
                }
            }
            l
        })
    }

    /// First slot whose key is greater than `key`.
    pub fn upper_bound(&self, key: &[u8]) -> usize {
        self.guard.with(|data| {
            let (mut l, mut r) = (0, slot_count(data));
            while l != r {
                let mid = (l + r) / 2;
                let slot = &data[end(data, mid + 1)..end(data, mid)];
                if self.ord.cmp_slot_key(slot, key) == Ordering::Greater {
                    r = mid;
                } else {
                    l = mid + 1;
                }
            }
            l
        })
    }

    /// Slot holding exactly `key`, if present.
    pub fn find(&self, key: &[u8]) -> Option<usize> {
        let i = self.lower_bound(key);
        if i < self.slot_num() {
            let slot = self.slot(i);
            if self.ord.cmp_slot_key(&slot, key) == Ordering::Equal {
                return Some(i);
            }
        }
        None
    }

    /// Position a new slot with `key` would take, or `None` if the key is
    /// already present.
    pub fn insert_position(&self, key: &[u8]) -> Option<usize> {
        let i = self.lower_bound(key);
        if i < self.slot_num() {
            let slot = self.slot(i);
            if self.ord.cmp_slot_key(&slot, key) == Ordering::Equal {
                return None;
            }
        }
        Some(i)
    }

    pub fn is_insertable(&self, slot_len: usize) -> bool {
        self.free_space() >= slot_len + 2
    }

    pub fn is_replacable(&self, i: usize, slot_len: usize) -> bool {
        self.free_space() + self.slot_size(i) >= slot_len
    }

    /// Append a slot after the current last one without order or space
    /// checks. The caller guarantees both.
    pub fn append_unchecked(&self, slot: &[u8]) {
        self.guard.with_mut(|data| {
            let n = slot_count(data);
            let start = end(data, n) - slot.len();
            data[start..start + slot.len()].copy_from_slice(slot);
            set_end(data, n + 1, start);
            set_slot_count(data, n + 1);
        });
    }

    /// Insert a slot at position `i`, shifting slots `[i, n)` down. Fails
    /// (returns false) when the page has no room.
    pub fn insert_before(&self, i: usize, slot: &[u8]) -> bool {
        if !self.is_insertable(slot.len()) {
            return false;
        }
        self.guard.with_mut(|data| {
            let n = slot_count(data);
            let len = slot.len();
            let body_lo = end(data, n);
            let body_hi = end(data, i);
            data.copy_within(body_lo..body_hi, body_lo - len);
            for idx in ((i + 1)..=(n + 1)).rev() {
                let prev = end(data, idx - 1);
                set_end(data, idx, prev - len);
            }
            let start = body_hi - len;
            data[start..body_hi].copy_from_slice(slot);
            set_slot_count(data, n + 1);
        });
        true
    }

    /// Overwrite slot `i` in place; the new slot must have the same length.
    pub fn replace(&self, i: usize, slot: &[u8]) {
        self.guard.with_mut(|data| {
            let hi = end(data, i);
            let lo = end(data, i + 1);
            debug_assert_eq!(hi - lo, slot.len());
            data[lo..hi].copy_from_slice(slot);
        });
    }

    /// Replace slot `i` with a slot of any length, compacting the body
    /// region. The caller checks `is_replacable` first.
    pub fn replace_slot(&self, i: usize, slot: &[u8]) {
        self.guard.with_mut(|data| {
            let n = slot_count(data);
            let body_lo = end(data, n);
            let old_hi = end(data, i);
            let old_lo = end(data, i + 1);
            let shift = (old_hi - old_lo) as isize - slot.len() as isize;
            let dest = (body_lo as isize + shift) as usize;
            data.copy_within(body_lo..old_lo, dest);
            for idx in (i + 1)..=n {
                let cur = end(data, idx) as isize;
                set_end(data, idx, (cur + shift) as usize);
            }
            let new_lo = end(data, i + 1);
            data[new_lo..new_lo + slot.len()].copy_from_slice(slot);
        });
    }

    /// Remove slot `i`, compacting the body region.
    pub fn delete_slot(&self, i: usize) {
        self.guard.with_mut(|data| {
            let n = slot_count(data);
            let body_lo = end(data, n);
            let old_lo = end(data, i + 1);
            let size = end(data, i) - old_lo;
            data.copy_within(body_lo..old_lo, body_lo + size);
            for idx in (i + 1)..n {
                let next = end(data, idx + 1);
                set_end(data, idx, next + size);
            }
            set_slot_count(data, n - 1);
        });
    }

    /// Insert with a split when the page is full. If the left part after the
    /// split (slots `[0, i)` plus the new slot) still fits here, slots
    /// `[i, n)` move to `right` and the new slot lands at position `i` of
    /// this page; otherwise the new slot leads `right` followed by
    /// `[i, n)`. No rebalancing beyond that.
    pub fn split_insert(&self, right: &SortedPage<C>, i: usize, slot: &[u8]) {
        if self.insert_before(i, slot) {
            return;
        }
        let n = self.slot_num();
        let left_fits = self.guard.with(|data| {
            end(data, i) >= HEADER + 2 + 2 * i + 2 + slot.len()
        });
        if left_fits {
            for k in i..n {
                right.append_unchecked(&self.slot(k));
            }
            self.guard.with_mut(|data| {
                set_slot_count(data, i);
            });
            self.append_unchecked(slot);
        } else {
            right.append_unchecked(slot);
            for k in i..n {
                right.append_unchecked(&self.slot(k));
            }
            self.guard.with_mut(|data| set_slot_count(data, i));
        }
    }

    /// Replace with a split when the new slot no longer fits. The
    /// replacement slot always moves to `right` (followed by `[i+1, n)`),
    /// which keeps `right` non-empty.
    pub fn split_replace(&self, right: &SortedPage<C>, i: usize, slot: &[u8]) {
        if self.is_replacable(i, slot.len()) {
            self.replace_slot(i, slot);
            return;
        }
        let n = self.slot_num();
        right.append_unchecked(slot);
        for k in (i + 1)..n {
            right.append_unchecked(&self.slot(k));
        }
        self.guard.with_mut(|data| set_slot_count(data, i));
    }
}
