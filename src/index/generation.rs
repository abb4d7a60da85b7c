//! Durable index generations and dictionary tiers
//!
//! The durable index is partitioned into generations of at most
//! `docs-per-generation` documents, each a directory under `cache/`:
//!
//! ```text
//! cache/gen_0/
//!   summaries.bin     append-only page summaries
//!   tier_<seq>.bin    dictionary tiers, one per ingested shard
//!   meta.json         generation number + document count
//!   closed            marker: generation is merged and sealed
//! ```
//!
//! Tiers accumulate per ingested shard and are merged periodically to
//! bound lookup fan-out. Merging is idempotent (postings dedup by term and
//! doc key), so crash recovery is catch-up, not journaling: at startup,
//! orphaned generation directories are deleted and improperly closed
//! generations are fast-merged and sealed before processing resumes.

use crate::index::shard::Posting;
use crate::index::{IndexError, IndexResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Generation metadata persisted as meta.json
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GenerationMeta {
    number: u64,
    doc_count: u64,
}

/// One generation of the durable index
pub struct Generation {
    dir: PathBuf,
    meta: GenerationMeta,
    /// Monotonic tier sequence for filename uniqueness
    next_tier_seq: u64,
}

impl Generation {
    /// Creates a new empty generation directory
    pub fn create(cache_dir: &Path, number: u64) -> IndexResult<Self> {
        let dir = cache_dir.join(format!("gen_{}", number));
        fs::create_dir_all(&dir)?;
        let generation = Self {
            dir,
            meta: GenerationMeta {
                number,
                doc_count: 0,
            },
            next_tier_seq: 0,
        };
        generation.write_meta()?;
        // Summary store exists from birth so the orphan check holds
        fs::File::create(generation.dir.join("summaries.bin"))?;
        Ok(generation)
    }

    /// Opens an existing generation directory
    pub fn open(dir: PathBuf) -> IndexResult<Self> {
        let meta_path = dir.join("meta.json");
        let meta_json = fs::read_to_string(&meta_path)?;
        let meta: GenerationMeta = serde_json::from_str(&meta_json)
            .map_err(|e| IndexError::Serialization(e.to_string()))?;

        let next_tier_seq = Self::tier_paths_in(&dir)?
            .iter()
            .filter_map(|p| tier_seq(p))
            .max()
            .map(|s| s + 1)
            .unwrap_or(0);

        Ok(Self {
            dir,
            meta,
            next_tier_seq,
        })
    }

    pub fn number(&self) -> u64 {
        self.meta.number
    }

    pub fn doc_count(&self) -> u64 {
        self.meta.doc_count
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_closed(&self) -> bool {
        self.dir.join("closed").exists()
    }

    /// Paths of all live tier files, oldest first
    pub fn tier_paths(&self) -> IndexResult<Vec<PathBuf>> {
        Self::tier_paths_in(&self.dir)
    }

    fn tier_paths_in(dir: &Path) -> IndexResult<Vec<PathBuf>> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("tier_") && n.ends_with(".bin"))
                    .unwrap_or(false)
            })
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Writes a resolved shard's term map as a new tier
    pub fn add_tier(
        &mut self,
        terms: &BTreeMap<String, Vec<Posting>>,
        doc_count: u64,
    ) -> IndexResult<()> {
        if self.is_closed() {
            return Err(IndexError::GenerationClosed(self.meta.number));
        }

        let path = self.dir.join(format!("tier_{:08}.bin", self.next_tier_seq));
        write_tier(&path, terms)?;
        self.next_tier_seq += 1;

        self.meta.doc_count += doc_count;
        self.write_meta()?;
        Ok(())
    }

    /// Merges all tiers into one, invoking `checkpoint` at safe points
    ///
    /// The callback lets the indexer interleave draining newly arrived
    /// shards during a long merge. The merged tier is written and renamed
    /// into place before the input tiers are deleted; re-running after a
    /// crash at any point converges on the same single tier.
    pub fn merge_tiers(&mut self, checkpoint: &mut dyn FnMut()) -> IndexResult<()> {
        let inputs = self.tier_paths()?;
        if inputs.len() <= 1 {
            return Ok(());
        }

        tracing::info!(
            generation = self.meta.number,
            tiers = inputs.len(),
            "Merging dictionary tiers"
        );

        let mut merged: BTreeMap<String, Vec<Posting>> = BTreeMap::new();
        for path in &inputs {
            let terms = read_tier(path)?;
            for (term, postings) in terms {
                let entry = merged.entry(term).or_default();
                for posting in postings {
                    // Dedup by doc key so re-merging after a crash is a no-op
                    if !entry.iter().any(|p| p.doc_key == posting.doc_key) {
                        entry.push(posting);
                    }
                }
            }
            checkpoint();
        }

        let out = self.dir.join(format!("tier_{:08}.bin", self.next_tier_seq));
        self.next_tier_seq += 1;
        write_tier(&out, &merged)?;

        for path in inputs {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Merges all tiers and seals the generation
    pub fn close(&mut self, checkpoint: &mut dyn FnMut()) -> IndexResult<()> {
        self.merge_tiers(checkpoint)?;
        fs::File::create(self.dir.join("closed"))?;
        tracing::info!(generation = self.meta.number, docs = self.meta.doc_count, "Generation closed");
        Ok(())
    }

    /// Reads the postings for one term across all live tiers
    pub fn lookup(&self, term: &str) -> IndexResult<Vec<Posting>> {
        let mut out = Vec::new();
        for path in self.tier_paths()? {
            let terms = read_tier(&path)?;
            if let Some(postings) = terms.get(term) {
                out.extend(postings.iter().cloned());
            }
        }
        Ok(out)
    }

    fn write_meta(&self) -> IndexResult<()> {
        let json = serde_json::to_string(&self.meta)
            .map_err(|e| IndexError::Serialization(e.to_string()))?;
        fs::write(self.dir.join("meta.json"), json)?;
        Ok(())
    }
}

/// Writes a tier file atomically (write-then-rename)
fn write_tier(path: &Path, terms: &BTreeMap<String, Vec<Posting>>) -> IndexResult<()> {
    let bytes = bincode::serialize(terms).map_err(|e| IndexError::Serialization(e.to_string()))?;
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Reads a tier file
fn read_tier(path: &Path) -> IndexResult<BTreeMap<String, Vec<Posting>>> {
    let bytes = fs::read(path)?;
    bincode::deserialize(&bytes).map_err(|e| IndexError::CorruptTier {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

fn tier_seq(path: &Path) -> Option<u64> {
    path.file_stem()?
        .to_str()?
        .strip_prefix("tier_")?
        .parse()
        .ok()
}

/// Manages the set of generations under a cache directory
pub struct GenerationManager {
    cache_dir: PathBuf,
    docs_per_generation: u64,
    active: Generation,
}

impl GenerationManager {
    /// Opens the cache directory, running crash recovery first
    ///
    /// Orphaned generation directories (missing their summary store or
    /// metadata) are deleted outright. Every non-newest generation left
    /// unsealed by a crash is fast-merged and sealed. The newest
    /// generation (created if none exist) becomes the active one.
    pub fn open(cache_dir: &Path, docs_per_generation: u64) -> IndexResult<Self> {
        fs::create_dir_all(cache_dir)?;

        let mut numbers = Vec::new();
        for entry in fs::read_dir(cache_dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(number) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix("gen_"))
                .and_then(|n| n.parse::<u64>().ok())
            else {
                continue;
            };

            // Orphan check: both halves of the bundle must exist
            if !path.join("summaries.bin").exists() || !path.join("meta.json").exists() {
                tracing::warn!(path = %path.display(), "Deleting orphaned generation directory");
                fs::remove_dir_all(&path)?;
                continue;
            }
            numbers.push(number);
        }
        numbers.sort_unstable();

        // Catch-up: seal everything but the newest
        if let Some((&newest, older)) = numbers.split_last() {
            for &number in older {
                let mut generation =
                    Generation::open(cache_dir.join(format!("gen_{}", number)))?;
                if !generation.is_closed() {
                    tracing::warn!(generation = number, "Sealing generation left open by crash");
                    generation.close(&mut || {})?;
                }
            }
            let active = Generation::open(cache_dir.join(format!("gen_{}", newest)))?;
            // A sealed newest generation means the crash happened after a
            // final merge; start the successor
            let active = if active.is_closed() {
                Generation::create(cache_dir, newest + 1)?
            } else {
                active
            };
            Ok(Self {
                cache_dir: cache_dir.to_path_buf(),
                docs_per_generation,
                active,
            })
        } else {
            let active = Generation::create(cache_dir, 0)?;
            Ok(Self {
                cache_dir: cache_dir.to_path_buf(),
                docs_per_generation,
                active,
            })
        }
    }

    pub fn active(&self) -> &Generation {
        &self.active
    }

    pub fn active_mut(&mut self) -> &mut Generation {
        &mut self.active
    }

    /// Rolls to a fresh generation if the active one has filled up
    pub fn roll_if_full(&mut self, checkpoint: &mut dyn FnMut()) -> IndexResult<()> {
        if self.active.doc_count() >= self.docs_per_generation {
            self.active.close(checkpoint)?;
            let next = self.active.number() + 1;
            self.active = Generation::create(&self.cache_dir, next)?;
            tracing::info!(generation = next, "Opened new index generation");
        }
        Ok(())
    }

    /// Merges tiers in every unsealed generation
    pub fn merge_all_tiers(&mut self, checkpoint: &mut dyn FnMut()) -> IndexResult<()> {
        self.active.merge_tiers(checkpoint)
    }

    /// Final shutdown merge: synchronous, no cooperative yielding
    pub fn fast_merge_all(&mut self) -> IndexResult<()> {
        self.active.merge_tiers(&mut || {})
    }
}
