//! Append-only page summary store
//!
//! Each generation directory holds one `summaries.bin`: length-prefixed
//! bincode records appended in arrival order. `append` returns the byte
//! offset the record landed at; those offsets are what postings point to
//! after offset resolution.

use crate::index::{DocKey, IndexError, IndexResult};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Per-record length cap; a declared length beyond this means corruption
const MAX_SUMMARY_LEN: u32 = 16 * 1024 * 1024;

/// Stored summary of one downloaded page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSummary {
    pub doc_key: DocKey,
    pub url: String,
    pub title: String,
    pub description: String,
    pub word_count: u32,
    /// Crawl timestamp the page was downloaded under
    pub crawl_time: u64,
}

/// Append-only summary file for one generation
pub struct SummaryStore {
    file: File,
    /// Current end-of-file, the offset the next append returns
    end: u64,
}

impl SummaryStore {
    /// Opens (or creates) the summary store in a generation directory
    pub fn open(dir: &Path) -> IndexResult<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(dir.join("summaries.bin"))?;
        let end = file.seek(SeekFrom::End(0))?;
        Ok(Self { file, end })
    }

    /// Appends one summary, returning the byte offset of its record
    pub fn append(&mut self, summary: &PageSummary) -> IndexResult<u64> {
        let bytes =
            bincode::serialize(summary).map_err(|e| IndexError::Serialization(e.to_string()))?;
        let offset = self.end;

        self.file.write_all(&(bytes.len() as u32).to_be_bytes())?;
        self.file.write_all(&bytes)?;
        self.end += 4 + bytes.len() as u64;
        Ok(offset)
    }

    /// Flushes appended records to disk
    pub fn sync(&mut self) -> IndexResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Reads the summary record at a previously returned offset
    pub fn read_at(&mut self, offset: u64) -> IndexResult<PageSummary> {
        if offset + 4 > self.end {
            return Err(IndexError::CorruptSummary(offset));
        }

        self.file.seek(SeekFrom::Start(offset))?;
        let mut len_bytes = [0u8; 4];
        self.file.read_exact(&mut len_bytes)?;
        let len = u32::from_be_bytes(len_bytes);

        // Declared length must fit in the remaining file
        if len > MAX_SUMMARY_LEN || offset + 4 + len as u64 > self.end {
            return Err(IndexError::CorruptSummary(offset));
        }

        let mut buf = vec![0u8; len as usize];
        self.file.read_exact(&mut buf)?;
        bincode::deserialize(&buf).map_err(|_| IndexError::CorruptSummary(offset))
    }

    /// Total bytes in the store
    pub fn len_bytes(&self) -> u64 {
        self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::DocKind;
    use tempfile::TempDir;

    fn summary(n: u64) -> PageSummary {
        PageSummary {
            doc_key: DocKey {
                url_hash: n,
                content_hash: n * 7,
                kind: DocKind::Document,
            },
            url: format!("https://example.com/{}", n),
            title: format!("Page {}", n),
            description: "A test page".to_string(),
            word_count: 100,
            crawl_time: 1724572800,
        }
    }

    #[test]
    fn test_append_returns_increasing_offsets() {
        let dir = TempDir::new().unwrap();
        let mut store = SummaryStore::open(dir.path()).unwrap();

        let first = store.append(&summary(1)).unwrap();
        let second = store.append(&summary(2)).unwrap();
        assert_eq!(first, 0);
        assert!(second > first);
    }

    #[test]
    fn test_read_back_by_offset() {
        let dir = TempDir::new().unwrap();
        let mut store = SummaryStore::open(dir.path()).unwrap();

        let offsets: Vec<u64> = (0..5).map(|n| store.append(&summary(n)).unwrap()).collect();
        store.sync().unwrap();

        // Read out of order
        assert_eq!(store.read_at(offsets[3]).unwrap(), summary(3));
        assert_eq!(store.read_at(offsets[0]).unwrap(), summary(0));
    }

    #[test]
    fn test_reopen_appends_after_existing() {
        let dir = TempDir::new().unwrap();
        let first_offset;
        {
            let mut store = SummaryStore::open(dir.path()).unwrap();
            first_offset = store.append(&summary(1)).unwrap();
            store.sync().unwrap();
        }

        let mut store = SummaryStore::open(dir.path()).unwrap();
        let second_offset = store.append(&summary(2)).unwrap();
        assert!(second_offset > first_offset);
        assert_eq!(store.read_at(first_offset).unwrap(), summary(1));
    }

    #[test]
    fn test_bogus_offset_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let mut store = SummaryStore::open(dir.path()).unwrap();
        store.append(&summary(1)).unwrap();

        // Offset past EOF
        assert!(matches!(
            store.read_at(10_000),
            Err(IndexError::CorruptSummary(_))
        ));
        // Offset into the middle of a record
        assert!(store.read_at(2).is_err());
    }
}
