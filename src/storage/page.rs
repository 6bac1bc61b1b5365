use anyhow::{anyhow, Result};
use byteorder::{ByteOrder, LittleEndian};

/// Size of every page, on disk and in the buffer pool.
pub const PAGE_SIZE: usize = 4096;

pub type PageId = u64;

/// Page numbers are 1-based; 0 marks a free slot on disk.
pub const INVALID_PAGE_ID: PageId = 0;

/// Record id: owning page number plus slot number within the page.
pub type RID = (PageId, u16);

// Header layout: page number (8), record count (2), heap top (2).
const HEADER_SIZE: usize = 12;
const PAGE_NO_OFF: usize = 0;
const COUNT_OFF: usize = 8;
const HEAP_TOP_OFF: usize = 10;
// Directory entry per record: payload offset (2), payload length (2).
const DIR_ENTRY_SIZE: usize = 4;

/// One fixed-size page. Record payloads are appended upward from the
/// header; the record directory grows downward from the end of the page,
/// one entry per slot. The heap top in the header is the first unused
/// payload byte. The page stores its own number, so a disk slot is
/// self-describing.
#[derive(Clone)]
pub struct Page {
    data: [u8; PAGE_SIZE],
}

impl Page {
    pub fn new(page_no: PageId) -> Self {
        let mut page = Page {
            data: [0; PAGE_SIZE],
        };
        LittleEndian::write_u64(&mut page.data[PAGE_NO_OFF..PAGE_NO_OFF + 8], page_no);
        page.set_heap_top(HEADER_SIZE as u16);
        page
    }

    pub fn from_bytes(data: [u8; PAGE_SIZE]) -> Self {
        Page { data }
    }

    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    pub fn page_number(&self) -> PageId {
        LittleEndian::read_u64(&self.data[PAGE_NO_OFF..PAGE_NO_OFF + 8])
    }

    fn count(&self) -> u16 {
        LittleEndian::read_u16(&self.data[COUNT_OFF..COUNT_OFF + 2])
    }

    fn set_count(&mut self, count: u16) {
        LittleEndian::write_u16(&mut self.data[COUNT_OFF..COUNT_OFF + 2], count);
    }

    fn heap_top(&self) -> u16 {
        LittleEndian::read_u16(&self.data[HEAP_TOP_OFF..HEAP_TOP_OFF + 2])
    }

    fn set_heap_top(&mut self, top: u16) {
        LittleEndian::write_u16(&mut self.data[HEAP_TOP_OFF..HEAP_TOP_OFF + 2], top);
    }

    /// Byte offset of the directory entry for `slot_no`, counted back from
    /// the end of the page.
    fn dir_entry(&self, slot_no: u16) -> usize {
        PAGE_SIZE - (slot_no as usize + 1) * DIR_ENTRY_SIZE
    }

    /// Bytes left between the payload heap and the directory.
    pub fn free_space(&self) -> usize {
        let dir_bottom = PAGE_SIZE - self.count() as usize * DIR_ENTRY_SIZE;
        dir_bottom - self.heap_top() as usize
    }

    pub fn insert_record(&mut self, record: &[u8]) -> Result<RID> {
        if record.len() + DIR_ENTRY_SIZE > self.free_space() {
            return Err(anyhow!("page {} is full", self.page_number()));
        }
        let top = self.heap_top() as usize;
        self.data[top..top + record.len()].copy_from_slice(record);

        let slot_no = self.count();
        let entry = self.dir_entry(slot_no);
        LittleEndian::write_u16(&mut self.data[entry..entry + 2], top as u16);
        LittleEndian::write_u16(&mut self.data[entry + 2..entry + 4], record.len() as u16);

        self.set_heap_top((top + record.len()) as u16);
        self.set_count(slot_no + 1);
        Ok((self.page_number(), slot_no))
    }

    pub fn get_record(&self, slot_no: u16) -> Option<&[u8]> {
        if slot_no >= self.count() {
            return None;
        }
        let entry = self.dir_entry(slot_no);
        let off = LittleEndian::read_u16(&self.data[entry..entry + 2]) as usize;
        let len = LittleEndian::read_u16(&self.data[entry + 2..entry + 4]) as usize;
        if len == 0 {
            // retired slot
            return None;
        }
        Some(&self.data[off..off + len])
    }

    pub fn delete_record(&mut self, slot_no: u16) -> Result<()> {
        if slot_no >= self.count() {
            return Err(anyhow!(
                "no slot {} on page {}",
                slot_no,
                self.page_number()
            ));
        }
        // the payload stays behind; a zero length retires the slot
        let entry = self.dir_entry(slot_no);
        LittleEndian::write_u16(&mut self.data[entry + 2..entry + 4], 0);
        Ok(())
    }

    pub fn records(&self) -> impl Iterator<Item = (u16, &[u8])> + '_ {
        (0..self.count())
            .filter_map(move |slot_no| self.get_record(slot_no).map(|record| (slot_no, record)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get_round_trip() {
        let mut page = Page::new(7);
        let (pid, slot) = page.insert_record(b"first").unwrap();
        assert_eq!(pid, 7);
        let rid = page.insert_record(b"second").unwrap();
        assert_eq!(page.get_record(slot), Some(&b"first"[..]));
        assert_eq!(page.get_record(rid.1), Some(&b"second"[..]));
        assert_eq!(page.get_record(99), None);
    }

    #[test]
    fn deleted_record_is_hidden() {
        let mut page = Page::new(1);
        page.insert_record(b"keep").unwrap();
        let (_, slot) = page.insert_record(b"drop").unwrap();
        page.delete_record(slot).unwrap();
        assert_eq!(page.get_record(slot), None);
        let slots: Vec<u16> = page.records().map(|(s, _)| s).collect();
        assert_eq!(slots, vec![0]);
    }

    #[test]
    fn insert_fails_when_full() {
        let mut page = Page::new(1);
        let big = vec![0xEEu8; page.free_space() - DIR_ENTRY_SIZE];
        page.insert_record(&big).unwrap();
        assert!(page.insert_record(b"x").is_err());
        assert_eq!(page.free_space(), 0);
    }
}
