use crate::storage::errors::{StorageError, StorageResult};
use crate::storage::page::{Page, PageId, INVALID_PAGE_ID, PAGE_SIZE};
use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Manages fixed-size page I/O on a single data file.
///
/// Page numbers are 1-based; slot `p` lives at byte offset
/// `(p - 1) * PAGE_SIZE`. A slot's first 8 bytes hold its page number, 0
/// when the slot has been deleted. Deleted slots are reused by
/// `allocate_page` before the file is extended.
pub struct PageFile {
    file: File,
    name: String,
    /// Membership of the free list; checked on every page access.
    free_slots: HashSet<PageId>,
    /// Reuse order for allocation, most recently freed first.
    free_order: Vec<PageId>,
}

impl PageFile {
    /// Opens an existing file or creates a new one. Rebuilds the free-slot
    /// list from the slot headers.
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let name = path.as_ref().display().to_string();
        let mut pf = PageFile {
            file,
            name,
            free_slots: HashSet::new(),
            free_order: Vec::new(),
        };
        pf.scan_free_slots()?;
        Ok(pf)
    }

    fn scan_free_slots(&mut self) -> StorageResult<()> {
        for page_no in 1..=self.num_pages()? {
            self.file.seek(SeekFrom::Start(slot_offset(page_no)))?;
            if self.file.read_u64::<LittleEndian>()? == INVALID_PAGE_ID {
                self.free_slots.insert(page_no);
                self.free_order.push(page_no);
            }
        }
        Ok(())
    }

    /// Identifier used in error messages.
    pub fn filename(&self) -> &str {
        &self.name
    }

    /// Total number of page slots in the file, live or free.
    pub fn num_pages(&self) -> StorageResult<u64> {
        Ok(self.file.metadata()?.len() / PAGE_SIZE as u64)
    }

    /// Allocates a new empty page, reusing a deleted slot if one exists,
    /// and returns it.
    pub fn allocate_page(&mut self) -> StorageResult<Page> {
        let page_no = match self.free_order.pop() {
            Some(p) => {
                self.free_slots.remove(&p);
                p
            }
            None => self.num_pages()? + 1,
        };
        let page = Page::new(page_no);
        self.write_slot(page_no, page.as_bytes())?;
        Ok(page)
    }

    /// Reads the page at `page_no`. Fails with `InvalidPage` if `page_no`
    /// does not name a live page.
    pub fn read_page(&mut self, page_no: PageId) -> StorageResult<Page> {
        self.check_live(page_no)?;
        let mut buf = [0u8; PAGE_SIZE];
        self.file.seek(SeekFrom::Start(slot_offset(page_no)))?;
        self.file.read_exact(&mut buf)?;
        Ok(Page::from_bytes(buf))
    }

    /// Writes the page back to its slot; the page carries its own number.
    /// Data is synced to disk before returning.
    pub fn write_page(&mut self, page: &Page) -> StorageResult<()> {
        let page_no = page.page_number();
        self.check_live(page_no)?;
        self.write_slot(page_no, page.as_bytes())
    }

    /// Removes the page from the file. Its slot becomes reusable.
    pub fn delete_page(&mut self, page_no: PageId) -> StorageResult<()> {
        self.check_live(page_no)?;
        self.write_slot(page_no, &[0u8; PAGE_SIZE])?;
        self.free_slots.insert(page_no);
        self.free_order.push(page_no);
        Ok(())
    }

    /// Forces all in-memory data and metadata to disk.
    pub fn sync_all(&self) -> StorageResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    fn write_slot(&mut self, page_no: PageId, buf: &[u8; PAGE_SIZE]) -> StorageResult<()> {
        self.file.seek(SeekFrom::Start(slot_offset(page_no)))?;
        self.file.write_all(buf)?;
        self.file.sync_data()?;
        Ok(())
    }

    fn check_live(&mut self, page_no: PageId) -> StorageResult<()> {
        if page_no == INVALID_PAGE_ID
            || page_no > self.num_pages()?
            || self.free_slots.contains(&page_no)
        {
            return Err(StorageError::InvalidPage {
                filename: self.name.clone(),
                page_no,
            });
        }
        Ok(())
    }
}

fn slot_offset(page_no: PageId) -> u64 {
    (page_no - 1) * PAGE_SIZE as u64
}
