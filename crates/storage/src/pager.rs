use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use common::{DbError, DbResult, PageId};
use log::{debug, trace};

use crate::sorted::{SlotKeyOrd, SortedPage};
use crate::{PlainPage, PAGE_SIZE};

/// Number of free page IDs a single free-list page can hold; the first word
/// of the page is the link to the next free-list page.
const PGIDS_PER_PAGE: usize = PAGE_SIZE / 4 - 1;

// Meta page (page 0) field offsets.
const FREE_LIST_HEAD_OFF: usize = 0;
const FREE_PAGES_IN_HEAD_OFF: usize = 4;
const PAGE_NUM_OFF: usize = 8;

struct Frame {
    data: Box<[u8]>,
    dirty: bool,
}

struct FrameSlot {
    frame: Arc<RwLock<Frame>>,
    pins: usize,
}

struct PoolState {
    file: File,
    frames: HashMap<u32, FrameSlot>,
    /// FIFO over currently unpinned pages. Not recency-ordered: a page is
    /// enqueued when its pin count drops to zero and dequeued when evicted
    /// or re-pinned.
    evictable: VecDeque<u32>,
    free_list_head: u32,
    free_in_head: u32,
    page_num: u32,
    /// In-memory image of the head free-list page: link plus entries.
    head_next: u32,
    head_entries: Vec<u32>,
}

struct PoolShared {
    path: PathBuf,
    max_buf_pages: usize,
    state: Mutex<PoolState>,
}

/// Buffer pool over a single page file. All public operations serialize on
/// one internal latch; page bytes themselves are accessed through the
/// per-frame lock held briefly by [`PageGuard`] accessors.
pub struct PageManager {
    shared: Arc<PoolShared>,
}

impl PageManager {
    /// Create a fresh database file, truncating any existing one. Reserves
    /// page 0 (meta) and page 1 (super page).
    pub fn create(path: impl AsRef<Path>, max_buf_pages: usize) -> DbResult<Self> {
        assert!(max_buf_pages >= 2, "buffer pool must hold at least 2 pages");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        let state = PoolState {
            file,
            frames: HashMap::new(),
            evictable: VecDeque::new(),
            free_list_head: 0,
            free_in_head: 0,
            page_num: 2,
            head_next: 0,
            head_entries: Vec::new(),
        };
        let manager = Self {
            shared: Arc::new(PoolShared {
                path: path.as_ref().to_path_buf(),
                max_buf_pages,
                state: Mutex::new(state),
            }),
        };
        {
            let mut state = manager.shared.state.lock().unwrap();
            // Materialize the two reserved pages so reopening sees them.
            write_page_at(&mut state.file, 0, &[0u8; PAGE_SIZE])?;
            write_page_at(&mut state.file, 1, &[0u8; PAGE_SIZE])?;
            write_meta(&mut state)?;
        }
        Ok(manager)
    }

    /// Open an existing database file and load the free-list state from its
    /// meta page.
    pub fn open(path: impl AsRef<Path>, max_buf_pages: usize) -> DbResult<Self> {
        assert!(max_buf_pages >= 2, "buffer pool must hold at least 2 pages");
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path.as_ref())?;
        let meta = read_page_at(&mut file, 0)?;
        let free_list_head = read_u32(&meta, FREE_LIST_HEAD_OFF);
        let free_in_head = read_u32(&meta, FREE_PAGES_IN_HEAD_OFF);
        let page_num = read_u32(&meta, PAGE_NUM_OFF);
        if page_num < 2 {
            return Err(DbError::Storage(format!(
                "corrupt meta page in {}",
                path.as_ref().display()
            )));
        }
        let (head_next, head_entries) = if free_list_head != 0 {
            let head = read_page_at(&mut file, free_list_head)?;
            let next = read_u32(&head, 0);
            let entries = (0..free_in_head as usize)
                .map(|i| read_u32(&head, 4 + 4 * i))
                .collect();
            (next, entries)
        } else {
            (0, Vec::new())
        };
        let state = PoolState {
            file,
            frames: HashMap::new(),
            evictable: VecDeque::new(),
            free_list_head,
            free_in_head,
            page_num,
            head_next,
            head_entries,
        };
        Ok(Self {
            shared: Arc::new(PoolShared {
                path: path.as_ref().to_path_buf(),
                max_buf_pages,
                state: Mutex::new(state),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// ID of the pre-allocated super page.
    pub fn super_page_id(&self) -> PageId {
        PageId(1)
    }

    /// Allocate a page ID. No buffer is assigned until the page is first
    /// referenced through `plain_page`/`sorted_page`.
    pub fn allocate(&self) -> DbResult<PageId> {
        let mut state = self.shared.state.lock().unwrap();
        if state.free_in_head > 0 {
            let pgid = state.head_entries.pop().ok_or_else(|| {
                DbError::Storage("free-list head count disagrees with entries".into())
            })?;
            state.free_in_head -= 1;
            trace!("allocate: reuse pgid {pgid} from free list");
            return Ok(PageId(pgid));
        }
        if state.free_list_head != 0 {
            // The exhausted head page is itself the allocation; its link
            // becomes the new head. Chained pages are always full.
            let pgid = state.free_list_head;
            let next = state.head_next;
            if next != 0 {
                let page = read_page_at(&mut state.file, next)?;
                state.head_next = read_u32(&page, 0);
                state.head_entries = (0..PGIDS_PER_PAGE)
                    .map(|i| read_u32(&page, 4 + 4 * i))
                    .collect();
                state.free_in_head = PGIDS_PER_PAGE as u32;
            } else {
                state.head_next = 0;
                state.head_entries.clear();
                state.free_in_head = 0;
            }
            state.free_list_head = next;
            trace!("allocate: consume free-list head {pgid}");
            return Ok(PageId(pgid));
        }
        let pgid = state.page_num;
        state.page_num += 1;
        trace!("allocate: extend file with pgid {pgid}");
        Ok(PageId(pgid))
    }

    /// Return a page ID to the free list. Fails if any handle still
    /// references the page.
    pub fn free(&self, pgid: PageId) -> DbResult<()> {
        let pgid = pgid.0;
        if pgid < 2 {
            return Err(DbError::Storage(format!("cannot free reserved page {pgid}")));
        }
        let mut state = self.shared.state.lock().unwrap();
        if let Some(slot) = state.frames.get(&pgid) {
            if slot.pins > 0 {
                return Err(DbError::Storage(format!(
                    "cannot free page {pgid}: {} live handle(s)",
                    slot.pins
                )));
            }
            state.frames.remove(&pgid);
            state.evictable.retain(|&p| p != pgid);
        }
        if state.free_list_head == 0 {
            state.free_list_head = pgid;
            state.head_next = 0;
            state.head_entries.clear();
            state.free_in_head = 0;
        } else if (state.free_in_head as usize) < PGIDS_PER_PAGE {
            state.head_entries.push(pgid);
            state.free_in_head += 1;
        } else {
            // Head is full: persist it and let the freed page start a new,
            // empty head linking to the old one.
            flush_head(&mut state)?;
            state.head_next = state.free_list_head;
            state.free_list_head = pgid;
            state.head_entries.clear();
            state.free_in_head = 0;
        }
        trace!("free: pgid {pgid} returned to free list");
        Ok(())
    }

    /// Reference a page as raw bytes.
    pub fn plain_page(&self, pgid: PageId) -> DbResult<PlainPage> {
        Ok(PlainPage::new(self.get_page(pgid)?))
    }

    /// Reference a page as a sorted slotted page with the given comparator.
    pub fn sorted_page<C: SlotKeyOrd>(&self, pgid: PageId, ord: C) -> DbResult<SortedPage<C>> {
        Ok(SortedPage::new(self.get_page(pgid)?, ord))
    }

    /// Allocate a page ID and reference it as a sorted page. The caller must
    /// call [`SortedPage::init`] before first use.
    pub fn alloc_sorted_page<C: SlotKeyOrd>(&self, ord: C) -> DbResult<SortedPage<C>> {
        let pgid = self.allocate()?;
        self.sorted_page(pgid, ord)
    }

    /// Write back every dirty buffer, the free-list head, and the meta page.
    pub fn flush(&self) -> DbResult<()> {
        let mut state = self.shared.state.lock().unwrap();
        let dirty: Vec<(u32, Arc<RwLock<Frame>>)> = state
            .frames
            .iter()
            .filter(|(_, slot)| slot.frame.read().unwrap().dirty)
            .map(|(pgid, slot)| (*pgid, Arc::clone(&slot.frame)))
            .collect();
        for (pgid, frame) in dirty {
            let mut frame = frame.write().unwrap();
            write_page_at(&mut state.file, pgid, &frame.data)?;
            frame.dirty = false;
        }
        flush_head(&mut state)?;
        write_meta(&mut state)?;
        state.file.flush()?;
        Ok(())
    }

    /// Total pages in the file, including reserved and free-listed ones.
    pub fn page_num(&self) -> u32 {
        self.shared.state.lock().unwrap().page_num
    }

    fn get_page(&self, pgid: PageId) -> DbResult<PageGuard> {
        let pgid = pgid.0;
        let mut guard = self.shared.state.lock().unwrap();
        let state = &mut *guard;
        if let Some(slot) = state.frames.get_mut(&pgid) {
            if slot.pins == 0 {
                state.evictable.retain(|&p| p != pgid);
            }
            slot.pins += 1;
            let frame = Arc::clone(&slot.frame);
            return Ok(PageGuard::new(Arc::clone(&self.shared), pgid, frame));
        }
        if state.frames.len() >= self.shared.max_buf_pages {
            evict_one(state)?;
        }
        let data = read_page_at(&mut state.file, pgid)?;
        let frame = Arc::new(RwLock::new(Frame {
            data: data.into_boxed_slice(),
            dirty: false,
        }));
        state.frames.insert(
            pgid,
            FrameSlot {
                frame: Arc::clone(&frame),
                pins: 1,
            },
        );
        Ok(PageGuard::new(Arc::clone(&self.shared), pgid, frame))
    }
}

impl Drop for PageManager {
    fn drop(&mut self) {
        // Last owner flushes on a best-effort basis.
        if Arc::strong_count(&self.shared) == 1 {
            let _ = self.flush();
        }
    }
}

/// Pinned reference to a page buffer. While a guard exists the underlying
/// buffer cannot be evicted; dropping the last guard makes it evictable.
pub struct PageGuard {
    shared: Arc<PoolShared>,
    pgid: u32,
    frame: Arc<RwLock<Frame>>,
}

impl PageGuard {
    fn new(shared: Arc<PoolShared>, pgid: u32, frame: Arc<RwLock<Frame>>) -> Self {
        Self { shared, pgid, frame }
    }

    pub fn id(&self) -> PageId {
        PageId(self.pgid)
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let frame = self.frame.read().unwrap();
        f(&frame.data)
    }

    pub(crate) fn with_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut frame = self.frame.write().unwrap();
        frame.dirty = true;
        f(&mut frame.data)
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock().unwrap();
        if let Some(slot) = state.frames.get_mut(&self.pgid) {
            slot.pins -= 1;
            if slot.pins == 0 {
                let pgid = self.pgid;
                state.evictable.push_back(pgid);
            }
        }
    }
}

fn evict_one(state: &mut PoolState) -> DbResult<()> {
    let victim = state.evictable.pop_front().ok_or_else(|| {
        DbError::BufferExhausted("all page buffers are pinned".into())
    })?;
    let slot = state
        .frames
        .remove(&victim)
        .ok_or_else(|| DbError::Storage(format!("evictable page {victim} not buffered")))?;
    let frame = slot.frame.read().unwrap();
    if frame.dirty {
        debug!("evict: flush dirty page {victim}");
        write_page_at(&mut state.file, victim, &frame.data)?;
    } else {
        trace!("evict: drop clean page {victim}");
    }
    Ok(())
}

fn flush_head(state: &mut PoolState) -> DbResult<()> {
    if state.free_list_head == 0 {
        return Ok(());
    }
    let mut buf = vec![0u8; PAGE_SIZE];
    buf[0..4].copy_from_slice(&state.head_next.to_le_bytes());
    for (i, pgid) in state.head_entries.iter().enumerate() {
        buf[4 + 4 * i..8 + 4 * i].copy_from_slice(&pgid.to_le_bytes());
    }
    let head = state.free_list_head;
    write_page_at(&mut state.file, head, &buf)
}

fn write_meta(state: &mut PoolState) -> DbResult<()> {
    let mut buf = vec![0u8; PAGE_SIZE];
    buf[FREE_LIST_HEAD_OFF..FREE_LIST_HEAD_OFF + 4]
        .copy_from_slice(&state.free_list_head.to_le_bytes());
    buf[FREE_PAGES_IN_HEAD_OFF..FREE_PAGES_IN_HEAD_OFF + 4]
        .copy_from_slice(&state.free_in_head.to_le_bytes());
    buf[PAGE_NUM_OFF..PAGE_NUM_OFF + 4].copy_from_slice(&state.page_num.to_le_bytes());
    write_page_at(&mut state.file, 0, &buf)
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}

fn read_page_at(file: &mut File, pgid: u32) -> DbResult<Vec<u8>> {
    let mut buf = vec![0u8; PAGE_SIZE];
    let offset = pgid as u64 * PAGE_SIZE as u64;
    let len = file.metadata()?.len();
    if offset >= len {
        // Lazily-extended page that has never been written.
        return Ok(buf);
    }
    let avail = ((len - offset) as usize).min(PAGE_SIZE);
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut buf[..avail])?;
    Ok(buf)
}

fn write_page_at(file: &mut File, pgid: u32, data: &[u8]) -> DbResult<()> {
    file.seek(SeekFrom::Start(pgid as u64 * PAGE_SIZE as u64))?;
    file.write_all(data)?;
    Ok(())
}
