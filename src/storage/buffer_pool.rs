use crate::storage::errors::{StorageError, StorageResult};
use crate::storage::page::{Page, PageId, INVALID_PAGE_ID};
use crate::storage::page_table::{FileKey, FrameId, PageTable};
use crate::storage::pagefile::PageFile;
use log::{debug, warn};
use std::cell::RefCell;
use std::fmt::Write;
use std::rc::Rc;

/// Shared handle to an open page file. The cache keys on the handle
/// allocation, not the path: two handles to one path are two cache keys.
pub type FileHandle = Rc<RefCell<PageFile>>;

fn file_key(file: &FileHandle) -> FileKey {
    Rc::as_ptr(file) as FileKey
}

/// Per-frame metadata.
struct FrameDesc {
    valid: bool,
    /// Owning file; held while the frame is valid. Eviction and teardown
    /// write back through this handle.
    file: Option<FileHandle>,
    page_no: PageId,
    pin_count: u32,
    dirty: bool,
    /// Reference bit for CLOCK eviction
    ref_bit: bool,
}

impl FrameDesc {
    fn new() -> Self {
        FrameDesc {
            valid: false,
            file: None,
            page_no: INVALID_PAGE_ID,
            pin_count: 0,
            dirty: false,
            ref_bit: false,
        }
    }

    /// Marks the frame as holding a freshly loaded page, pinned once.
    fn set(&mut self, file: FileHandle, page_no: PageId) {
        self.valid = true;
        self.file = Some(file);
        self.page_no = page_no;
        self.pin_count = 1;
        self.dirty = false;
        self.ref_bit = true;
    }

    fn clear(&mut self) {
        self.valid = false;
        self.file = None;
        self.page_no = INVALID_PAGE_ID;
        self.pin_count = 0;
        self.dirty = false;
        self.ref_bit = false;
    }

    fn owned_by(&self, key: FileKey) -> bool {
        self.file.as_ref().map_or(false, |f| file_key(f) == key)
    }
}

/// CLOCK-based buffer pool over multiple page files.
///
/// At most one resident copy of any (file, page) pair exists at a time.
/// Pinned pages are never evicted; dirty pages reach disk before their
/// frames are reused.
pub struct BufferPool {
    frames: Vec<FrameDesc>,
    pages: Vec<Page>,
    page_table: PageTable,
    clock_hand: usize,
}

impl BufferPool {
    /// Create a pool of `n` frames. Memory for all frames is allocated up
    /// front and never grows.
    pub fn new(n: usize) -> Self {
        assert!(n > 0, "buffer pool needs at least one frame");
        BufferPool {
            frames: (0..n).map(|_| FrameDesc::new()).collect(),
            pages: vec![Page::new(INVALID_PAGE_ID); n],
            page_table: PageTable::new(n),
            // first advance lands on frame 0
            clock_hand: n - 1,
        }
    }

    fn advance_clock(&mut self) {
        self.clock_hand = (self.clock_hand + 1) % self.frames.len();
    }

    /// Find a frame to hold a new page, evicting an unpinned one if
    /// necessary. The returned frame is cleared; the caller fills and
    /// registers it.
    fn allocate_frame(&mut self) -> StorageResult<FrameId> {
        let start = self.clock_hand;
        let mut passes = 0;
        // Two full sweeps: a ref bit cleared on the first pass makes its
        // frame a candidate on the second.
        while passes < 2 {
            self.advance_clock();
            if self.clock_hand == start {
                passes += 1;
            }
            let id = self.clock_hand;
            if !self.frames[id].valid {
                return Ok(id);
            }
            if self.frames[id].ref_bit {
                // give second chance
                self.frames[id].ref_bit = false;
                continue;
            }
            if self.frames[id].pin_count > 0 {
                // skip pinned
                continue;
            }
            self.evict(id)?;
            return Ok(id);
        }
        Err(StorageError::BufferExceeded)
    }

    /// Write back frame `id` if dirty, then drop it from the table.
    fn evict(&mut self, id: FrameId) -> StorageResult<()> {
        let file = self.frames[id].file.clone().expect("evicting empty frame");
        if self.frames[id].dirty {
            debug!(
                "evicting dirty page {} of {} from frame {}",
                self.frames[id].page_no,
                file.borrow().filename(),
                id
            );
            file.borrow_mut().write_page(&self.pages[id])?;
        }
        self.page_table.remove(file_key(&file), self.frames[id].page_no);
        self.frames[id].clear();
        Ok(())
    }

    /// Pin `page_no` of `file`, reading it from disk on a miss, and return
    /// the in-buffer page. The caller may read and mutate the page until the
    /// matching `unpin_page`; the borrow must end by then.
    pub fn read_page(&mut self, file: &FileHandle, page_no: PageId) -> StorageResult<&mut Page> {
        let key = file_key(file);
        let id = match self.page_table.lookup(key, page_no) {
            Some(id) => {
                self.frames[id].pin_count += 1;
                id
            }
            None => {
                let id = self.allocate_frame()?;
                // A failed read leaves the frame invalid and unregistered.
                let page = file.borrow_mut().read_page(page_no)?;
                self.pages[id] = page;
                self.page_table.insert(key, page_no, id);
                self.frames[id].set(file.clone(), page_no);
                id
            }
        };
        self.frames[id].ref_bit = true;
        Ok(&mut self.pages[id])
    }

    /// Allocate a fresh page in `file`, pin it, and return its number and
    /// the in-buffer page.
    pub fn alloc_page(&mut self, file: &FileHandle) -> StorageResult<(PageId, &mut Page)> {
        let page = file.borrow_mut().allocate_page()?;
        let page_no = page.page_number();
        let id = self.allocate_frame()?;
        self.pages[id] = page;
        self.page_table.insert(file_key(file), page_no, id);
        self.frames[id].set(file.clone(), page_no);
        Ok((page_no, &mut self.pages[id]))
    }

    /// Release one pin. `dirty` marks the page modified; the bit is never
    /// cleared here. Unpinning a page that is not resident is a no-op.
    pub fn unpin_page(&mut self, file: &FileHandle, page_no: PageId, dirty: bool) -> StorageResult<()> {
        let id = match self.page_table.lookup(file_key(file), page_no) {
            Some(id) => id,
            None => return Ok(()),
        };
        if self.frames[id].pin_count == 0 {
            return Err(StorageError::PageNotPinned {
                filename: file.borrow().filename().to_string(),
                page_no,
                frame_id: id,
            });
        }
        self.frames[id].pin_count -= 1;
        if dirty {
            self.frames[id].dirty = true;
        }
        Ok(())
    }

    /// Write back every dirty page of `file` and drop all of its frames.
    /// All frames of the file are checked before any is touched, so a
    /// failure leaves no partial work.
    pub fn flush_file(&mut self, file: &FileHandle) -> StorageResult<()> {
        let key = file_key(file);
        for (id, desc) in self.frames.iter().enumerate() {
            if !desc.owned_by(key) {
                continue;
            }
            if !desc.valid {
                return Err(StorageError::BadBuffer {
                    frame_id: id,
                    dirty: desc.dirty,
                    valid: desc.valid,
                    ref_bit: desc.ref_bit,
                });
            }
            if desc.pin_count > 0 {
                return Err(StorageError::PagePinned {
                    filename: file.borrow().filename().to_string(),
                    page_no: desc.page_no,
                    frame_id: id,
                });
            }
        }
        debug!("flushing {}", file.borrow().filename());
        for id in 0..self.frames.len() {
            if !self.frames[id].owned_by(key) {
                continue;
            }
            if self.frames[id].dirty {
                file.borrow_mut().write_page(&self.pages[id])?;
                self.frames[id].dirty = false;
            }
            self.page_table.remove(key, self.frames[id].page_no);
            self.frames[id].clear();
        }
        Ok(())
    }

    /// Drop `page_no` from the buffer if resident, without write-back, and
    /// delete it from the file.
    pub fn dispose_page(&mut self, file: &FileHandle, page_no: PageId) -> StorageResult<()> {
        let key = file_key(file);
        if let Some(id) = self.page_table.lookup(key, page_no) {
            self.frames[id].clear();
            self.page_table.remove(key, page_no);
        }
        file.borrow_mut().delete_page(page_no)
    }

    /// One line per valid frame, for debugging.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let mut valid = 0;
        for (id, desc) in self.frames.iter().enumerate() {
            if !desc.valid {
                continue;
            }
            valid += 1;
            let filename = desc
                .file
                .as_ref()
                .map(|f| f.borrow().filename().to_string())
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "frame {}: {} page {} pin={} dirty={} ref={}",
                id, filename, desc.page_no, desc.pin_count, desc.dirty, desc.ref_bit
            );
        }
        let _ = writeln!(out, "{} of {} frames valid", valid, self.frames.len());
        out
    }
}

impl Drop for BufferPool {
    /// Writes back every dirty page. Pages still pinned here are a caller
    /// bug; they are written back all the same.
    fn drop(&mut self) {
        for id in 0..self.frames.len() {
            let desc = &self.frames[id];
            if !desc.valid || !desc.dirty {
                continue;
            }
            let Some(file) = desc.file.clone() else {
                continue;
            };
            let result = file.borrow_mut().write_page(&self.pages[id]);
            if let Err(e) = result {
                warn!(
                    "write-back of page {} of {} failed during teardown: {}",
                    desc.page_no,
                    file.borrow().filename(),
                    e
                );
            }
        }
    }
}
