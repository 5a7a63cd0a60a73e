//! File-backed disk manager implementation.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use super::DiskManager;
use crate::storage::error::DiskError;
use crate::storage::page::{PAGE_SIZE, PageData, PageId};

/// Magic number identifying the disk image format ("BDRK").
const MAGIC: u32 = 0x4244_524B;

/// Current superblock format version.
const VERSION: u32 = 1;

/// Byte size of the fixed superblock header (magic, version, entry count,
/// reserved).
const SUPERBLOCK_HEADER_SIZE: usize = 16;

/// Byte size of one file entry: head page id (4), name length (1), name
/// bytes (up to [`FILE_NAME_MAX`]).
const FILE_ENTRY_SIZE: usize = 64;

/// Maximum length of a registered file name in bytes.
pub const FILE_NAME_MAX: usize = FILE_ENTRY_SIZE - 5;

/// Maximum number of named files the superblock can hold.
pub const FILE_TABLE_CAPACITY: usize = (PAGE_SIZE - SUPERBLOCK_HEADER_SIZE) / FILE_ENTRY_SIZE;

/// File-backed disk manager.
///
/// Stores pages as contiguous [`PAGE_SIZE`] blocks in a single file:
///
/// ```text
/// +------------------+------------------+------------------+
/// | Superblock (pg 0)| Page 1           | Page 2           | ...
/// +------------------+------------------+------------------+
/// ```
///
/// Page 0 is the superblock and holds the named-file entry table; it is
/// rewritten and fsynced on every entry mutation so that named heap files
/// survive a close and reopen. Page 0 is not addressable through the page
/// I/O methods.
///
/// Deallocated pages go into an in-memory free set and are reused by
/// single-page allocations. The free set is not persisted; pages freed in
/// a previous session become unreachable slack in the file.
pub struct FileDisk {
    path: PathBuf,
    inner: Mutex<FileDiskInner>,
}

struct FileDiskInner {
    file: File,
    page_count: i32,
    entries: Vec<(String, PageId)>,
    free_pages: BTreeSet<i32>,
}

impl FileDisk {
    /// Opens or creates a disk image at the given path.
    ///
    /// A new file gets a fresh superblock; an existing file has its
    /// superblock validated and its file entry table loaded.
    ///
    /// # Errors
    ///
    /// Returns `DiskError::Corrupted` if the file size is not a multiple
    /// of `PAGE_SIZE` or the superblock fails validation.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, DiskError> {
        let path = path.into();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await?;

        let file_size = file.metadata().await?.len();
        if file_size % PAGE_SIZE as u64 != 0 {
            return Err(DiskError::Corrupted(format!(
                "file size {} is not a multiple of page size {}",
                file_size, PAGE_SIZE
            )));
        }

        let (page_count, entries) = if file_size == 0 {
            let mut superblock = PageData::new();
            encode_superblock(&[], superblock.as_mut_slice());
            file.write_all(superblock.as_slice()).await?;
            file.sync_all().await?;
            (1, Vec::new())
        } else {
            let mut superblock = vec![0u8; PAGE_SIZE];
            file.seek(std::io::SeekFrom::Start(0)).await?;
            file.read_exact(&mut superblock).await?;
            let entries = decode_superblock(&superblock)?;
            ((file_size / PAGE_SIZE as u64) as i32, entries)
        };

        Ok(Self {
            path,
            inner: Mutex::new(FileDiskInner {
                file,
                page_count,
                entries,
                free_pages: BTreeSet::new(),
            }),
        })
    }

    /// Returns the path of the disk image.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileDiskInner {
    /// True if `page_id` denotes an allocated, addressable page.
    ///
    /// Page 0 (the superblock) is never addressable.
    fn is_allocated(&self, page_id: PageId) -> bool {
        let raw = page_id.page_num();
        raw > 0 && raw < self.page_count && !self.free_pages.contains(&raw)
    }

    /// Rewrites the superblock page and syncs it.
    async fn persist_entries(&mut self) -> Result<(), DiskError> {
        let mut superblock = PageData::new();
        encode_superblock(&self.entries, superblock.as_mut_slice());
        self.file.seek(std::io::SeekFrom::Start(0)).await?;
        self.file.write_all(superblock.as_slice()).await?;
        self.file.sync_all().await?;
        Ok(())
    }
}

impl DiskManager for FileDisk {
    async fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<(), DiskError> {
        if buf.len() != PAGE_SIZE {
            return Err(DiskError::InvalidBufferSize {
                expected: PAGE_SIZE,
                actual: buf.len(),
            });
        }

        let mut inner = self.inner.lock().await;
        if !inner.is_allocated(page_id) {
            return Err(DiskError::PageNotFound(page_id));
        }

        inner
            .file
            .seek(std::io::SeekFrom::Start(page_id.byte_offset()))
            .await?;
        inner.file.read_exact(buf).await?;
        Ok(())
    }

    async fn write_page(&self, page_id: PageId, buf: &[u8]) -> Result<(), DiskError> {
        if buf.len() != PAGE_SIZE {
            return Err(DiskError::InvalidBufferSize {
                expected: PAGE_SIZE,
                actual: buf.len(),
            });
        }

        let mut inner = self.inner.lock().await;
        if !inner.is_allocated(page_id) {
            return Err(DiskError::PageNotFound(page_id));
        }

        inner
            .file
            .seek(std::io::SeekFrom::Start(page_id.byte_offset()))
            .await?;
        inner.file.write_all(buf).await?;
        Ok(())
    }

    async fn allocate_page(&self, run_size: usize) -> Result<PageId, DiskError> {
        assert!(run_size > 0, "run_size must be > 0");

        let mut inner = self.inner.lock().await;

        // Reuse a freed page for single-page allocations. Runs always
        // extend the file so the pages stay contiguous.
        if run_size == 1 {
            let reusable = inner.free_pages.iter().next().copied();
            if let Some(raw) = reusable {
                inner.free_pages.remove(&raw);
                let page_id = PageId::new(raw);
                inner
                    .file
                    .seek(std::io::SeekFrom::Start(page_id.byte_offset()))
                    .await?;
                inner.file.write_all(&[0u8; PAGE_SIZE]).await?;
                return Ok(page_id);
            }
        }

        let first = PageId::new(inner.page_count);
        inner
            .file
            .seek(std::io::SeekFrom::Start(first.byte_offset()))
            .await?;
        for _ in 0..run_size {
            inner.file.write_all(&[0u8; PAGE_SIZE]).await?;
        }
        inner.page_count += run_size as i32;
        Ok(first)
    }

    async fn deallocate_page(&self, page_id: PageId) -> Result<(), DiskError> {
        let mut inner = self.inner.lock().await;
        if !inner.is_allocated(page_id) {
            return Err(DiskError::PageNotFound(page_id));
        }
        inner.free_pages.insert(page_id.page_num());
        Ok(())
    }

    async fn page_count(&self) -> usize {
        self.inner.lock().await.page_count as usize
    }

    async fn sync_all(&self) -> Result<(), DiskError> {
        let inner = self.inner.lock().await;
        inner.file.sync_all().await?;
        Ok(())
    }

    async fn add_file_entry(&self, name: &str, head: PageId) -> Result<(), DiskError> {
        if name.len() > FILE_NAME_MAX {
            return Err(DiskError::Corrupted(format!(
                "file name longer than {} bytes: {:?}",
                FILE_NAME_MAX, name
            )));
        }

        let mut inner = self.inner.lock().await;
        if inner.entries.iter().any(|(n, _)| n == name) {
            return Err(DiskError::DuplicateFileEntry(name.to_owned()));
        }
        if inner.entries.len() >= FILE_TABLE_CAPACITY {
            return Err(DiskError::FileTableFull);
        }

        inner.entries.push((name.to_owned(), head));
        inner.persist_entries().await
    }

    async fn get_file_entry(&self, name: &str) -> Result<Option<PageId>, DiskError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|&(_, head)| head))
    }

    async fn delete_file_entry(&self, name: &str) -> Result<(), DiskError> {
        let mut inner = self.inner.lock().await;
        let Some(index) = inner.entries.iter().position(|(n, _)| n == name) else {
            return Err(DiskError::FileEntryNotFound(name.to_owned()));
        };
        inner.entries.remove(index);
        inner.persist_entries().await
    }
}

/// Writes the superblock image for the given entry table.
fn encode_superblock(entries: &[(String, PageId)], buf: &mut [u8]) {
    debug_assert!(entries.len() <= FILE_TABLE_CAPACITY);

    buf.fill(0);
    buf[0..4].copy_from_slice(&MAGIC.to_be_bytes());
    buf[4..8].copy_from_slice(&VERSION.to_be_bytes());
    buf[8..10].copy_from_slice(&(entries.len() as u16).to_be_bytes());

    for (i, (name, head)) in entries.iter().enumerate() {
        let base = SUPERBLOCK_HEADER_SIZE + i * FILE_ENTRY_SIZE;
        buf[base..base + 4].copy_from_slice(&head.page_num().to_be_bytes());
        buf[base + 4] = name.len() as u8;
        buf[base + 5..base + 5 + name.len()].copy_from_slice(name.as_bytes());
    }
}

/// Parses the superblock, validating magic and version.
fn decode_superblock(buf: &[u8]) -> Result<Vec<(String, PageId)>, DiskError> {
    let magic = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if magic != MAGIC {
        return Err(DiskError::Corrupted(format!(
            "bad superblock magic {:#010x}",
            magic
        )));
    }
    let version = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
    if version != VERSION {
        return Err(DiskError::Corrupted(format!(
            "unsupported format version {}",
            version
        )));
    }

    let count = u16::from_be_bytes([buf[8], buf[9]]) as usize;
    if count > FILE_TABLE_CAPACITY {
        return Err(DiskError::Corrupted(format!(
            "file entry count {} exceeds capacity {}",
            count, FILE_TABLE_CAPACITY
        )));
    }

    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let base = SUPERBLOCK_HEADER_SIZE + i * FILE_ENTRY_SIZE;
        let head = i32::from_be_bytes([buf[base], buf[base + 1], buf[base + 2], buf[base + 3]]);
        let name_len = buf[base + 4] as usize;
        if name_len > FILE_NAME_MAX {
            return Err(DiskError::Corrupted(format!(
                "file entry {} has invalid name length {}",
                i, name_len
            )));
        }
        let name = std::str::from_utf8(&buf[base + 5..base + 5 + name_len])
            .map_err(|_| DiskError::Corrupted(format!("file entry {} is not UTF-8", i)))?
            .to_owned();
        entries.push((name, PageId::new(head)));
    }
    Ok(entries)
}
