//! Fetch batch files
//!
//! Produced batches are parked as files under `schedules/` and claimed
//! by atomic rename, so when several fetchers race for the same batch
//! exactly one wins; the losers move on to the next file.
//!
//! The file body uses the same format as schedule files and the
//! `a=schedule` response: a base64 meta line, then one base64url record
//! per slot, with a bare `-` line for dummy slots.

use crate::frontier::{decode_url_record, encode_url_record, FrontierError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Placeholder line for an unfilled slot
const DUMMY_LINE: &str = "-";

/// Meta line at the head of a batch file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMeta {
    pub crawl_time: u64,
    pub num_slots: usize,
}

/// One slot of a fetch batch
#[derive(Debug, Clone, PartialEq)]
pub enum UrlSlot {
    /// A URL to fetch, with its weight and the host's crawl-delay
    Url {
        url: String,
        weight: f32,
        crawl_delay: u32,
    },
    /// Empty slot; keeps crawl-delayed hosts' slots spaced apart
    Dummy,
}

/// An ordered batch of fetch slots produced by the scheduler
#[derive(Debug, Clone)]
pub struct FetchBatch {
    pub crawl_time: u64,
    pub slots: Vec<UrlSlot>,
}

impl FetchBatch {
    /// Number of real URLs in the batch
    pub fn url_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, UrlSlot::Url { .. }))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.url_count() == 0
    }

    /// Serializes the batch to its wire / file body
    pub fn to_wire(&self) -> Result<String, FrontierError> {
        let meta = BatchMeta {
            crawl_time: self.crawl_time,
            num_slots: self.slots.len(),
        };
        let meta_json = serde_json::to_vec(&meta)
            .map_err(|e| FrontierError::MalformedRecord(e.to_string()))?;

        let mut out = String::new();
        out.push_str(&URL_SAFE_NO_PAD.encode(meta_json));
        out.push('\n');
        for slot in &self.slots {
            match slot {
                UrlSlot::Url {
                    url,
                    weight,
                    crawl_delay,
                } => out.push_str(&encode_url_record(url, *weight, *crawl_delay)),
                UrlSlot::Dummy => out.push_str(DUMMY_LINE),
            }
            out.push('\n');
        }
        Ok(out)
    }

    /// Parses a wire / file body back into a batch
    ///
    /// A slot-count mismatch or undecodable record invalidates the whole
    /// batch; it is never partially consumed.
    pub fn from_wire(content: &str) -> Result<Self, FrontierError> {
        let mut lines = content.lines();
        let meta_line = lines
            .next()
            .ok_or_else(|| FrontierError::MalformedRecord("empty batch".to_string()))?;
        let meta_json = URL_SAFE_NO_PAD
            .decode(meta_line.trim())
            .map_err(|e| FrontierError::MalformedRecord(e.to_string()))?;
        let meta: BatchMeta = serde_json::from_slice(&meta_json)
            .map_err(|e| FrontierError::MalformedRecord(e.to_string()))?;

        let mut slots = Vec::with_capacity(meta.num_slots);
        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == DUMMY_LINE {
                slots.push(UrlSlot::Dummy);
            } else {
                let (url, weight, crawl_delay) = decode_url_record(line)?;
                slots.push(UrlSlot::Url {
                    url,
                    weight,
                    crawl_delay,
                });
            }
        }

        if slots.len() != meta.num_slots {
            return Err(FrontierError::MalformedRecord(format!(
                "meta declares {} slots, found {}",
                meta.num_slots,
                slots.len()
            )));
        }

        Ok(FetchBatch {
            crawl_time: meta.crawl_time,
            slots,
        })
    }
}

/// Parks a batch as a file for a later fetcher to claim
pub fn write_batch(dir: &Path, batch: &FetchBatch) -> Result<PathBuf, FrontierError> {
    fs::create_dir_all(dir)?;
    let stamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let path = dir.join(format!("batch_{}_{}.txt", batch.crawl_time, stamp));

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, batch.to_wire()?)?;
    fs::rename(&tmp, &path)?;
    tracing::debug!(path = %path.display(), urls = batch.url_count(), "Parked fetch batch");
    Ok(path)
}

/// Claims the oldest parked batch, if any
///
/// The claim is an atomic rename to a claimant-unique name, so a batch is
/// consumed exactly once even when fetcher requests race. The claimed
/// file is deleted after reading; a claimed file that fails to parse is
/// deleted and skipped.
pub fn claim_batch(dir: &Path, claimant: &str) -> Result<Option<FetchBatch>, FrontierError> {
    if !dir.exists() {
        return Ok(None);
    }

    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("batch_") && n.ends_with(".txt"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    for path in paths {
        let claimed = path.with_extension(format!("claimed_{}", claimant));
        // Rename fails if another claimant already won this file
        if fs::rename(&path, &claimed).is_err() {
            continue;
        }

        let content = fs::read_to_string(&claimed)?;
        fs::remove_file(&claimed)?;
        match FetchBatch::from_wire(&content) {
            Ok(batch) => return Ok(Some(batch)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Discarding corrupt batch file");
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn batch() -> FetchBatch {
        FetchBatch {
            crawl_time: 1724572800,
            slots: vec![
                UrlSlot::Url {
                    url: "https://a.example/".to_string(),
                    weight: 8.0,
                    crawl_delay: 0,
                },
                UrlSlot::Dummy,
                UrlSlot::Url {
                    url: "https://b.example/page".to_string(),
                    weight: 3.0,
                    crawl_delay: 30,
                },
            ],
        }
    }

    #[test]
    fn test_wire_roundtrip_preserves_slots() {
        let wire = batch().to_wire().unwrap();
        let parsed = FetchBatch::from_wire(&wire).unwrap();
        assert_eq!(parsed.crawl_time, 1724572800);
        assert_eq!(parsed.slots, batch().slots);
        assert_eq!(parsed.url_count(), 2);
    }

    #[test]
    fn test_slot_count_mismatch_rejected() {
        let mut wire = batch().to_wire().unwrap();
        // Drop the last slot line
        wire = wire.trim_end().rsplit_once('\n').unwrap().0.to_string();
        assert!(FetchBatch::from_wire(&wire).is_err());
    }

    #[test]
    fn test_park_and_claim_consumes_once() {
        let dir = TempDir::new().unwrap();
        write_batch(dir.path(), &batch()).unwrap();

        let claimed = claim_batch(dir.path(), "f1").unwrap();
        assert_eq!(claimed.unwrap().url_count(), 2);

        // Already consumed
        assert!(claim_batch(dir.path(), "f2").unwrap().is_none());
    }

    #[test]
    fn test_claim_oldest_first() {
        let dir = TempDir::new().unwrap();
        let mut first = batch();
        first.crawl_time = 1;
        let mut second = batch();
        second.crawl_time = 2;
        write_batch(dir.path(), &first).unwrap();
        write_batch(dir.path(), &second).unwrap();

        assert_eq!(claim_batch(dir.path(), "f1").unwrap().unwrap().crawl_time, 1);
        assert_eq!(claim_batch(dir.path(), "f1").unwrap().unwrap().crawl_time, 2);
    }
}
