//! Schedule-file persistence for the frontier
//!
//! The frontier is periodically dumped to "schedule" files under
//! `schedules/` so a crash loses at most the in-RAM tail, and reloaded on
//! resume. The same dump path is used deliberately to *reschedule*: when
//! the queue jams full with unschedulable URLs, the whole frontier is
//! dumped (without marking anything seen) and the RAM queue cleared.
//!
//! File format matches the `a=schedule` wire contract: a base64 meta line
//! followed by newline-delimited base64url records of
//! `weight: 4 bytes BE f32, delay: 4 bytes BE u32, url: rest`.

use crate::frontier::{FrontierEntry, FrontierError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Meta line at the head of every schedule file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleMeta {
    /// Crawl timestamp these URLs belong to
    pub crawl_time: u64,
    /// Number of records that follow
    pub num_records: usize,
}

/// Encodes one URL record to its base64url line
pub fn encode_url_record(url: &str, weight: f32, delay: u32) -> String {
    let mut buf = Vec::with_capacity(8 + url.len());
    buf.extend_from_slice(&weight.to_be_bytes());
    buf.extend_from_slice(&delay.to_be_bytes());
    buf.extend_from_slice(url.as_bytes());
    URL_SAFE_NO_PAD.encode(buf)
}

/// Decodes one base64url line back into (url, weight, delay)
pub fn decode_url_record(line: &str) -> Result<(String, f32, u32), FrontierError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(line.trim())
        .map_err(|e| FrontierError::MalformedRecord(e.to_string()))?;
    if bytes.len() < 9 {
        return Err(FrontierError::MalformedRecord(format!(
            "record too short: {} bytes",
            bytes.len()
        )));
    }

    let weight = f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let delay = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    let url = String::from_utf8(bytes[8..].to_vec())
        .map_err(|e| FrontierError::MalformedRecord(e.to_string()))?;

    Ok((url, weight, delay))
}

/// Writes a schedule file containing the given entries
///
/// Returns the path written. The filename carries the crawl time and a
/// nanosecond timestamp so concurrent dumps never collide.
pub fn dump_schedule(
    dir: &Path,
    meta: &ScheduleMeta,
    entries: &[FrontierEntry],
) -> Result<PathBuf, FrontierError> {
    fs::create_dir_all(dir)?;

    let stamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let path = dir.join(format!("schedule_{}_{}.txt", meta.crawl_time, stamp));

    let meta_json = serde_json::to_vec(meta)
        .map_err(|e| FrontierError::MalformedRecord(e.to_string()))?;

    let mut out = String::new();
    out.push_str(&URL_SAFE_NO_PAD.encode(meta_json));
    out.push('\n');
    for entry in entries {
        out.push_str(&encode_url_record(
            &entry.url,
            entry.weight as f32,
            entry.crawl_delay,
        ));
        out.push('\n');
    }

    // Write-then-rename so readers never observe a half-written file
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(out.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, &path)?;

    tracing::debug!(path = %path.display(), records = entries.len(), "Dumped schedule file");
    Ok(path)
}

/// Parses a schedule file into its meta line and URL records
///
/// A meta/record-count mismatch or an undecodable record makes the whole
/// file invalid; the caller discards it rather than applying part of it.
pub fn parse_schedule(content: &str) -> Result<(ScheduleMeta, Vec<(String, f32, u32)>), FrontierError> {
    let mut lines = content.lines();
    let meta_line = lines
        .next()
        .ok_or_else(|| FrontierError::MalformedRecord("empty schedule file".to_string()))?;
    let meta_json = URL_SAFE_NO_PAD
        .decode(meta_line.trim())
        .map_err(|e| FrontierError::MalformedRecord(e.to_string()))?;
    let meta: ScheduleMeta = serde_json::from_slice(&meta_json)
        .map_err(|e| FrontierError::MalformedRecord(e.to_string()))?;

    let mut records = Vec::with_capacity(meta.num_records);
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        records.push(decode_url_record(line)?);
    }

    if records.len() != meta.num_records {
        return Err(FrontierError::MalformedRecord(format!(
            "meta declares {} records, found {}",
            meta.num_records,
            records.len()
        )));
    }

    Ok((meta, records))
}

/// Loads and consumes every schedule file in a directory
///
/// Files are read in name order, deleted as they are consumed, and files
/// that fail to parse are deleted too (fail-fast: never retried forever).
pub fn load_schedule_dir(dir: &Path) -> Result<Vec<(String, f32, u32)>, FrontierError> {
    let mut all = Vec::new();
    if !dir.exists() {
        return Ok(all);
    }

    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("schedule_") && n.ends_with(".txt"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    for path in paths {
        let content = fs::read_to_string(&path)?;
        match parse_schedule(&content) {
            Ok((_, mut records)) => all.append(&mut records),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Discarding corrupt schedule file");
            }
        }
        fs::remove_file(&path)?;
    }

    Ok(all)
}
