use crate::storage::page::PageId;
use crate::storage::page_table::FrameId;
use std::io;
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

/// Errors surfaced by the page file and buffer pool layers.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Every buffer frame is pinned; no frame can be reclaimed.
    #[error("buffer exceeded: all frames are pinned")]
    BufferExceeded,

    #[error("page {page_no} of {filename} is not pinned (frame {frame_id})")]
    PageNotPinned {
        filename: String,
        page_no: PageId,
        frame_id: FrameId,
    },

    #[error("page {page_no} of {filename} is still pinned (frame {frame_id})")]
    PagePinned {
        filename: String,
        page_no: PageId,
        frame_id: FrameId,
    },

    /// An invalid frame was found among a file's frames during flush.
    #[error("bad buffer frame {frame_id} (valid={valid} dirty={dirty} ref_bit={ref_bit})")]
    BadBuffer {
        frame_id: FrameId,
        dirty: bool,
        valid: bool,
        ref_bit: bool,
    },

    /// The page number does not name a live page of the file.
    #[error("invalid page {page_no} in {filename}")]
    InvalidPage { filename: String, page_no: PageId },

    #[error(transparent)]
    Io(#[from] io::Error),
}
