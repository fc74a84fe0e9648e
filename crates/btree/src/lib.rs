//! Clustered B+-tree over the sorted-page storage layer.
//!
//! The tree maps arbitrary byte keys to byte values under a pluggable
//! [`KeyComparator`]. Leaves sit at level 0 and are chained into a doubly
//! linked list for range scans; inner slots carry `(child, strict upper
//! bound)` pairs with the rightmost child in the page's special trailer.
//!
//! Structural notes carried over from the engine's storage design:
//! - splits never rebalance, and deletes never merge non-empty pages;
//!   an underfull page survives until it empties;
//! - the globally leftmost and rightmost leaves are not stitched into the
//!   leaf chain, and iterators stop at the rightmost leaf captured when the
//!   iterator was created.

mod slots;

#[cfg(test)]
mod tests;

pub use slots::{
    inner_slot_parse, inner_slot_serialize, leaf_slot_parse, leaf_slot_serialize,
    BytewiseComparator, InnerSlot, KeyComparator, LeafSlot,
};

use std::sync::Arc;

use common::{DbResult, PageId};
use log::trace;
use slots::{leaf_slot_key, InnerOrd, LeafOrd};
use storage::{PageManager, PlainPage, SortedPage};

// Meta page field offsets.
const LEVEL_NUM_OFF: usize = 0;
const ROOT_OFF: usize = 4;
const TUPLE_NUM_OFF: usize = 8;

// Leaf special trailer: prev and next leaf pointers.
const LEAF_PREV_OFF: usize = 0;
const LEAF_NEXT_OFF: usize = 4;
const LEAF_SPECIAL: usize = 8;
// Inner special trailer: the rightmost child.
const INNER_SPECIAL: usize = 4;

type InnerPage<C> = SortedPage<InnerOrd<C>>;
type LeafPage<C> = SortedPage<LeafOrd<C>>;

/// Disk-backed ordered map. Cheap to construct; the meta page ID plus the
/// shared page manager fully identify a tree.
pub struct BPlusTree<C: KeyComparator = BytewiseComparator> {
    pgm: Arc<PageManager>,
    meta_pgid: PageId,
    comp: C,
}

impl<C: KeyComparator> BPlusTree<C> {
    /// Allocate the meta page of a fresh, empty tree.
    pub fn create(pgm: Arc<PageManager>, comp: C) -> DbResult<Self> {
        let meta_pgid = pgm.allocate()?;
        let tree = Self {
            pgm,
            meta_pgid,
            comp,
        };
        let meta = tree.meta_page()?;
        meta.write_u8(LEVEL_NUM_OFF, 0);
        meta.write_u32(ROOT_OFF, 0);
        meta.write_u64(TUPLE_NUM_OFF, 0);
        Ok(tree)
    }

    /// Open an existing tree rooted at `meta_pgid`.
    pub fn open(pgm: Arc<PageManager>, meta_pgid: PageId, comp: C) -> Self {
        Self {
            pgm,
            meta_pgid,
            comp,
        }
    }

    pub fn meta_page_id(&self) -> PageId {
        self.meta_pgid
    }

    pub fn tuple_num(&self) -> DbResult<u64> {
        Ok(self.meta_page()?.read_u64(TUPLE_NUM_OFF))
    }

    pub fn is_empty(&self) -> DbResult<bool> {
        Ok(self.tuple_num()? == 0)
    }

    /// Insert a new pair; false if the key is already present.
    pub fn insert(&self, key: &[u8], value: &[u8]) -> DbResult<bool> {
        self.upsert(key, value, false)
    }

    /// Replace the value of an existing key; false if the key is absent.
    pub fn update(&self, key: &[u8], value: &[u8]) -> DbResult<bool> {
        self.upsert(key, value, true)
    }

    /// Look up a key.
    pub fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        if self.is_empty()? {
            return Ok(None);
        }
        let leaf = self.leaf_for(key)?;
        Ok(leaf
            .find(key)
            .map(|i| leaf_slot_parse(&leaf.slot(i)).value))
    }

    /// Remove a key; true if it was present.
    pub fn delete(&self, key: &[u8]) -> DbResult<bool> {
        Ok(self.remove(key)?.is_some())
    }

    /// Remove a key and return its former value.
    pub fn take(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        self.remove(key)
    }

    /// Largest key currently present.
    pub fn max_key(&self) -> DbResult<Option<Vec<u8>>> {
        if self.is_empty()? {
            return Ok(None);
        }
        let mut now = self.root()?;
        let level = self.level_num()?;
        if level > 0 {
            now = self.largest_leaf(&self.inner_page(now)?, level)?;
        }
        let leaf = self.leaf_page(now)?;
        Ok(Some(self.leaf_largest_key(&leaf)))
    }

    /// Iterator positioned at the smallest key.
    pub fn begin(&self) -> DbResult<TreeIter<C>> {
        if self.is_empty()? {
            return Ok(TreeIter::exhausted(self.pgm.clone(), self.comp.clone()));
        }
        let level = self.level_num()?;
        let root = self.root()?;
        let (first, last) = if level == 0 {
            (root, root)
        } else {
            let root_page = self.inner_page(root)?;
            (
                self.smallest_leaf(&root_page, level)?,
                self.largest_leaf(&root_page, level)?,
            )
        };
        let page = self.leaf_page(first)?;
        Ok(TreeIter::at(self.pgm.clone(), self.comp.clone(), page, 0, last))
    }

    /// Iterator positioned at the least key `>= key`.
    pub fn lower_bound(&self, key: &[u8]) -> DbResult<TreeIter<C>> {
        self.bound(key, false)
    }

    /// Iterator positioned at the least key `> key`.
    pub fn upper_bound(&self, key: &[u8]) -> DbResult<TreeIter<C>> {
        self.bound(key, true)
    }

    /// Release every page of the tree, meta page included, in post-order.
    pub fn destroy(self) -> DbResult<()> {
        if !self.is_empty()? {
            let root = self.root()?;
            let level = self.level_num()?;
            self.destroy_subtree(root, level)?;
        }
        self.pgm.free(self.meta_pgid)
    }

    // ---- descent helpers ----

    fn meta_page(&self) -> DbResult<PlainPage> {
        self.pgm.plain_page(self.meta_pgid)
    }

    fn inner_page(&self, pgid: PageId) -> DbResult<InnerPage<C>> {
        self.pgm.sorted_page(pgid, InnerOrd(self.comp.clone()))
    }

    fn leaf_page(&self, pgid: PageId) -> DbResult<LeafPage<C>> {
        self.pgm.sorted_page(pgid, LeafOrd(self.comp.clone()))
    }

    fn alloc_inner(&self) -> DbResult<InnerPage<C>> {
        let page = self.pgm.alloc_sorted_page(InnerOrd(self.comp.clone()))?;
        page.init(INNER_SPECIAL);
        Ok(page)
    }

    fn alloc_leaf(&self) -> DbResult<LeafPage<C>> {
        let page = self.pgm.alloc_sorted_page(LeafOrd(self.comp.clone()))?;
        page.init(LEAF_SPECIAL);
        Ok(page)
    }

    fn level_num(&self) -> DbResult<u8> {
        Ok(self.meta_page()?.read_u8(LEVEL_NUM_OFF))
    }

    fn set_level_num(&self, level: u8) -> DbResult<()> {
        self.meta_page()?.write_u8(LEVEL_NUM_OFF, level);
        Ok(())
    }

    fn root(&self) -> DbResult<PageId> {
        Ok(PageId(self.meta_page()?.read_u32(ROOT_OFF)))
    }

    fn set_root(&self, root: PageId) -> DbResult<()> {
        self.meta_page()?.write_u32(ROOT_OFF, root.0);
        Ok(())
    }

    fn add_tuple_num(&self, delta: i64) -> DbResult<()> {
        let meta = self.meta_page()?;
        let current = meta.read_u64(TUPLE_NUM_OFF);
        meta.write_u64(TUPLE_NUM_OFF, current.wrapping_add(delta as u64));
        Ok(())
    }

    fn inner_special(&self, inner: &InnerPage<C>) -> PageId {
        PageId(u32::from_le_bytes(
            inner.read_special(0, 4).try_into().unwrap(),
        ))
    }

    fn set_inner_special(&self, inner: &InnerPage<C>, child: PageId) {
        inner.write_special(0, &child.0.to_le_bytes());
    }

    fn leaf_prev(&self, leaf: &LeafPage<C>) -> PageId {
        PageId(u32::from_le_bytes(
            leaf.read_special(LEAF_PREV_OFF, 4).try_into().unwrap(),
        ))
    }

    fn set_leaf_prev(&self, leaf: &LeafPage<C>, pgid: PageId) {
        leaf.write_special(LEAF_PREV_OFF, &pgid.0.to_le_bytes());
    }

    fn leaf_next(&self, leaf: &LeafPage<C>) -> PageId {
        PageId(u32::from_le_bytes(
            leaf.read_special(LEAF_NEXT_OFF, 4).try_into().unwrap(),
        ))
    }

    fn set_leaf_next(&self, leaf: &LeafPage<C>, pgid: PageId) {
        leaf.write_special(LEAF_NEXT_OFF, &pgid.0.to_le_bytes());
    }

    fn leaf_smallest_key(&self, leaf: &LeafPage<C>) -> Vec<u8> {
        debug_assert!(!leaf.is_empty());
        leaf_slot_key(&leaf.slot(0)).to_vec()
    }

    fn leaf_largest_key(&self, leaf: &LeafPage<C>) -> Vec<u8> {
        debug_assert!(!leaf.is_empty());
        leaf_slot_key(&leaf.slot(leaf.slot_num() - 1)).to_vec()
    }

    fn inner_first_page(&self, inner: &InnerPage<C>) -> PageId {
        if inner.is_empty() {
            self.inner_special(inner)
        } else {
            inner_slot_parse(&inner.slot(0)).child
        }
    }

    fn smallest_leaf(&self, inner: &InnerPage<C>, level: u8) -> DbResult<PageId> {
        debug_assert!(level > 0);
        let mut cur = self.inner_first_page(inner);
        for _ in 1..level {
            cur = self.inner_first_page(&self.inner_page(cur)?);
        }
        Ok(cur)
    }

    fn largest_leaf(&self, inner: &InnerPage<C>, level: u8) -> DbResult<PageId> {
        debug_assert!(level > 0);
        let mut cur = self.inner_special(inner);
        for _ in 1..level {
            cur = self.inner_special(&self.inner_page(cur)?);
        }
        Ok(cur)
    }

    /// Smallest key in the subtree below `inner` (which sits at `level`).
    fn inner_smallest_key(&self, inner: &InnerPage<C>, level: u8) -> DbResult<Vec<u8>> {
        let leaf = self.leaf_page(self.smallest_leaf(inner, level)?)?;
        Ok(self.leaf_smallest_key(&leaf))
    }

    fn smallest_leaf_of_tree(&self, level: u8) -> DbResult<PageId> {
        let root = self.root()?;
        if level == 0 {
            Ok(root)
        } else {
            self.smallest_leaf(&self.inner_page(root)?, level)
        }
    }

    fn largest_leaf_of_tree(&self, level: u8) -> DbResult<PageId> {
        let root = self.root()?;
        if level == 0 {
            Ok(root)
        } else {
            self.largest_leaf(&self.inner_page(root)?, level)
        }
    }

    /// Leaf reached by the standard descent for `key`.
    fn leaf_for(&self, key: &[u8]) -> DbResult<LeafPage<C>> {
        let mut now = self.root()?;
        for _ in 0..self.level_num()? {
            let inner = self.inner_page(now)?;
            let id = inner.upper_bound(key);
            now = if id < inner.slot_num() {
                inner_slot_parse(&inner.slot(id)).child
            } else {
                self.inner_special(&inner)
            };
        }
        self.leaf_page(now)
    }

    fn free_sorted<O: storage::SlotKeyOrd>(&self, page: SortedPage<O>) -> DbResult<()> {
        let id = page.id();
        drop(page);
        self.pgm.free(id)
    }

    // ---- mutation ----

    /// Shared walk for insert (`replace == false`) and update
    /// (`replace == true`). Records the descent path, mutates the leaf,
    /// and propagates splits towards the root.
    fn upsert(&self, key: &[u8], value: &[u8], replace: bool) -> DbResult<bool> {
        let slot_bytes = leaf_slot_serialize(key, value);
        if self.is_empty()? {
            if replace {
                return Ok(false);
            }
            let leaf = self.alloc_leaf()?;
            self.set_root(leaf.id())?;
            self.set_level_num(0)?;
            leaf.append_unchecked(&slot_bytes);
            self.add_tuple_num(1)?;
            return Ok(true);
        }

        let level = self.level_num()? as usize;
        let mut path = vec![PageId::INVALID; level + 1];
        let mut idx = vec![0usize; level + 1];
        path[level] = self.root()?;
        for i in (1..=level).rev() {
            let inner = self.inner_page(path[i])?;
            idx[i] = inner.upper_bound(key);
            path[i - 1] = if idx[i] < inner.slot_num() {
                inner_slot_parse(&inner.slot(idx[i])).child
            } else {
                self.inner_special(&inner)
            };
        }

        let leaf = self.leaf_page(path[0])?;
        if !replace {
            match leaf.insert_position(key) {
                None => return Ok(false),
                Some(i) => idx[0] = i,
            }
            self.add_tuple_num(1)?;
            if leaf.insert_before(idx[0], &slot_bytes) {
                return Ok(true);
            }
        } else {
            match leaf.find(key) {
                None => return Ok(false),
                Some(i) => idx[0] = i,
            }
            if leaf.is_replacable(idx[0], slot_bytes.len()) {
                leaf.replace_slot(idx[0], &slot_bytes);
                return Ok(true);
            }
        }

        trace!("leaf {} splits on upsert", path[0].0);
        let right = self.alloc_leaf()?;
        if !replace {
            leaf.split_insert(&right, idx[0], &slot_bytes);
        } else {
            leaf.split_replace(&right, idx[0], &slot_bytes);
        }
        let mut sep = self.leaf_smallest_key(&right);
        let mut carry = right.id();

        // Stitch the new leaf into the chain, but never extend it past the
        // current rightmost leaf of the tree.
        if level != 0 && leaf.id() != self.largest_leaf_of_tree(level as u8)? {
            let nxt = self.leaf_next(&leaf);
            let nxt_page = self.leaf_page(nxt)?;
            self.set_leaf_next(&right, nxt);
            self.set_leaf_prev(&nxt_page, right.id());
        }
        self.set_leaf_next(&leaf, right.id());
        self.set_leaf_prev(&right, leaf.id());
        drop(right);
        drop(leaf);

        let mut split_past_root = true;
        for i in 1..=level {
            let now = self.inner_page(path[i])?;
            let right = self.alloc_inner()?;
            if idx[i] == now.slot_num() {
                self.set_inner_special(&now, carry);
            } else {
                let mut s = inner_slot_parse(&now.slot(idx[i]));
                s.child = carry;
                now.replace(idx[i], &inner_slot_serialize(&s));
            }
            let new_slot = inner_slot_serialize(&InnerSlot {
                child: path[i - 1],
                strict_upper_bound: sep.clone(),
            });
            now.split_insert(&right, idx[i], &new_slot);
            if right.is_empty() {
                // The inner page absorbed the new slot without splitting.
                split_past_root = false;
                self.free_sorted(right)?;
                break;
            }
            // The leftmost slot of the new right page describes the
            // carry-up child; removing it exposes the next separator.
            self.set_inner_special(&right, self.inner_special(&now));
            let first = inner_slot_parse(&right.slot(0));
            self.set_inner_special(&now, first.child);
            right.delete_slot(0);
            sep = self.inner_smallest_key(&right, i as u8)?;
            carry = right.id();
        }

        if split_past_root {
            self.set_level_num((level + 1) as u8)?;
            let new_root = self.alloc_inner()?;
            new_root.append_unchecked(&inner_slot_serialize(&InnerSlot {
                child: path[level],
                strict_upper_bound: sep,
            }));
            self.set_inner_special(&new_root, carry);
            self.set_root(new_root.id())?;
        }
        Ok(true)
    }

    /// Shared walk for delete and take. Three propagation states travel
    /// upward: 0 — the subtree's leftmost key changed; 1 — the subtree
    /// became empty; 2 — an ancestor split while a separator was being
    /// replaced.
    fn remove(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        if self.is_empty()? {
            return Ok(None);
        }
        let level = self.level_num()? as usize;
        let mut path = vec![PageId::INVALID; level + 1];
        let mut idx = vec![0usize; level + 1];
        let mut now_id = self.root()?;
        for i in (1..=level).rev() {
            path[i] = now_id;
            let inner = self.inner_page(now_id)?;
            let id = inner.upper_bound(key);
            idx[i] = id;
            now_id = if id < inner.slot_num() {
                inner_slot_parse(&inner.slot(id)).child
            } else {
                self.inner_special(&inner)
            };
        }
        path[0] = now_id;

        let leaf = self.leaf_page(path[0])?;
        let id0 = match leaf.find(key) {
            Some(i) => i,
            None => return Ok(None),
        };
        let removed = leaf_slot_parse(&leaf.slot(id0)).value;
        leaf.delete_slot(id0);
        self.add_tuple_num(-1)?;
        if id0 > 0 {
            return Ok(Some(removed));
        }

        let mut sep = Vec::new();
        let mut carry = PageId::INVALID;
        let mut flag = 0u8;
        if leaf.is_empty() {
            flag = 1;
            let lvl = level as u8;
            if level != 0
                && leaf.id() != self.smallest_leaf_of_tree(lvl)?
                && leaf.id() != self.largest_leaf_of_tree(lvl)?
            {
                let prev = self.leaf_prev(&leaf);
                let next = self.leaf_next(&leaf);
                let prev_page = self.leaf_page(prev)?;
                let next_page = self.leaf_page(next)?;
                self.set_leaf_next(&prev_page, next);
                self.set_leaf_prev(&next_page, prev);
            }
            trace!("leaf {} emptied on delete", path[0].0);
            self.free_sorted(leaf)?;
        } else {
            sep = self.leaf_smallest_key(&leaf);
            drop(leaf);
        }

        for i in 1..=level {
            let now = self.inner_page(path[i])?;
            let id = idx[i];
            if flag == 0 {
                // The leftmost key below changed; rewrite the separator of
                // the slot to our left, which may itself split.
                if id > 0 {
                    let right = self.alloc_inner()?;
                    let mut s = inner_slot_parse(&now.slot(id - 1));
                    s.strict_upper_bound = sep.clone();
                    now.split_replace(&right, id - 1, &inner_slot_serialize(&s));
                    if right.is_empty() {
                        self.free_sorted(right)?;
                        break;
                    }
                    flag = 2;
                    self.set_inner_special(&right, self.inner_special(&now));
                    let first = inner_slot_parse(&right.slot(0));
                    self.set_inner_special(&now, first.child);
                    right.delete_slot(0);
                    sep = self.inner_smallest_key(&right, i as u8)?;
                    carry = right.id();
                }
            } else if flag == 1 {
                // The child at `id` vanished.
                if id < now.slot_num() {
                    flag = 0;
                    if id == 0 {
                        now.delete_slot(id);
                    } else {
                        // Fold: the left sibling's subtree absorbs the
                        // removed child's key range.
                        let mut merged = inner_slot_parse(&now.slot(id - 1));
                        merged.strict_upper_bound =
                            inner_slot_parse(&now.slot(id)).strict_upper_bound;
                        let bytes = inner_slot_serialize(&merged);
                        now.delete_slot(id);
                        now.delete_slot(id - 1);
                        now.insert_before(id - 1, &bytes);
                        break;
                    }
                    sep = self.inner_smallest_key(&now, i as u8)?;
                } else if now.is_empty() {
                    self.free_sorted(now)?;
                } else {
                    flag = 0;
                    let n = now.slot_num();
                    let last = inner_slot_parse(&now.slot(n - 1));
                    now.delete_slot(n - 1);
                    self.set_inner_special(&now, last.child);
                    sep = self.inner_smallest_key(&now, i as u8)?;
                }
            } else {
                // flag == 2: propagate exactly like an insert-time split.
                let right = self.alloc_inner()?;
                if id == now.slot_num() {
                    self.set_inner_special(&now, carry);
                } else {
                    let mut s = inner_slot_parse(&now.slot(id));
                    s.child = carry;
                    now.replace(id, &inner_slot_serialize(&s));
                }
                let new_slot = inner_slot_serialize(&InnerSlot {
                    child: path[i - 1],
                    strict_upper_bound: sep.clone(),
                });
                now.split_insert(&right, id, &new_slot);
                if right.is_empty() {
                    flag = 0;
                    self.free_sorted(right)?;
                    break;
                }
                self.set_inner_special(&right, self.inner_special(&now));
                let first = inner_slot_parse(&right.slot(0));
                self.set_inner_special(&now, first.child);
                right.delete_slot(0);
                sep = self.inner_smallest_key(&right, i as u8)?;
                carry = right.id();
            }
        }

        if flag == 2 {
            self.set_level_num((level + 1) as u8)?;
            let new_root = self.alloc_inner()?;
            new_root.append_unchecked(&inner_slot_serialize(&InnerSlot {
                child: path[level],
                strict_upper_bound: sep,
            }));
            self.set_inner_special(&new_root, carry);
            self.set_root(new_root.id())?;
        }
        Ok(Some(removed))
    }

    fn bound(&self, key: &[u8], strict: bool) -> DbResult<TreeIter<C>> {
        if self.is_empty()? {
            return Ok(TreeIter::exhausted(self.pgm.clone(), self.comp.clone()));
        }
        let level = self.level_num()?;
        let last = self.largest_leaf_of_tree(level)?;
        let leaf = self.leaf_for(key)?;
        let id = if strict {
            leaf.upper_bound(key)
        } else {
            leaf.lower_bound(key)
        };
        if id == leaf.slot_num() {
            if level == 0 || leaf.id() == last {
                return Ok(TreeIter::exhausted(self.pgm.clone(), self.comp.clone()));
            }
            let next = self.leaf_next(&leaf);
            let next_page = self.leaf_page(next)?;
            return Ok(TreeIter::at(
                self.pgm.clone(),
                self.comp.clone(),
                next_page,
                0,
                last,
            ));
        }
        Ok(TreeIter::at(self.pgm.clone(), self.comp.clone(), leaf, id, last))
    }

    fn destroy_subtree(&self, pgid: PageId, level: u8) -> DbResult<()> {
        if level == 0 {
            return self.pgm.free(pgid);
        }
        let children: Vec<PageId> = {
            let inner = self.inner_page(pgid)?;
            let mut v: Vec<PageId> = (0..inner.slot_num())
                .map(|i| inner_slot_parse(&inner.slot(i)).child)
                .collect();
            v.push(self.inner_special(&inner));
            v
        };
        for child in children {
            self.destroy_subtree(child, level - 1)?;
        }
        self.pgm.free(pgid)
    }
}

/// Forward iterator over key-value pairs. Holds a pin on the current leaf;
/// terminates at the rightmost leaf captured at construction time.
pub struct TreeIter<C: KeyComparator> {
    pgm: Arc<PageManager>,
    comp: C,
    state: Option<IterState<C>>,
}

struct IterState<C: KeyComparator> {
    page: LeafPage<C>,
    slot: usize,
    last: PageId,
}

impl<C: KeyComparator> TreeIter<C> {
    fn exhausted(pgm: Arc<PageManager>, comp: C) -> Self {
        Self {
            pgm,
            comp,
            state: None,
        }
    }

    fn at(pgm: Arc<PageManager>, comp: C, page: LeafPage<C>, slot: usize, last: PageId) -> Self {
        Self {
            pgm,
            comp,
            state: Some(IterState { page, slot, last }),
        }
    }

    /// Current pair, advancing the iterator. `None` once past the end.
    pub fn next(&mut self) -> DbResult<Option<(Vec<u8>, Vec<u8>)>> {
        let state = match self.state.as_mut() {
            Some(s) => s,
            None => return Ok(None),
        };
        let slot = leaf_slot_parse(&state.page.slot(state.slot));
        if state.slot + 1 < state.page.slot_num() {
            state.slot += 1;
        } else if state.page.id() == state.last {
            self.state = None;
        } else {
            let next = PageId(u32::from_le_bytes(
                state.page.read_special(LEAF_NEXT_OFF, 4).try_into().unwrap(),
            ));
            let page = self
                .pgm
                .sorted_page(next, LeafOrd(self.comp.clone()))?;
            state.page = page;
            state.slot = 0;
        }
        Ok(Some((slot.key, slot.value)))
    }
}
