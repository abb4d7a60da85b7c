//! Server-side merge of uploaded index shards
//!
//! One [`IndexMerger`] owns the generation tree under the cache
//! directory. Each uploaded bundle goes through the same pipeline:
//! seen-filter the summaries, append the survivors to the active
//! generation's summary store, rewrite the shard's placeholder offsets
//! with the real ones, and fold the shard in as a new dictionary tier.
//! Already-merged documents fall out at both ends (the seen filter here,
//! doc-key dedup during tier merges), so replaying an upload after a
//! crash converges instead of duplicating.

use crate::index::{DocKey, GenerationManager, IndexError, SummaryStore};
use crate::storage::{url_hash, SqliteStore};
use crate::transfer::{decode_payload, TransferError, UploadBundle};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Merges fetcher uploads into the durable generation-partitioned index
pub struct IndexMerger {
    generations: GenerationManager,
    summaries: SummaryStore,
}

impl IndexMerger {
    /// Opens the index under `cache_dir`, running startup recovery
    ///
    /// Orphaned generation directories are deleted and improperly closed
    /// generations are caught up by [`GenerationManager::open`].
    pub fn open(cache_dir: &Path, docs_per_generation: u64) -> crate::Result<Self> {
        let generations = GenerationManager::open(cache_dir, docs_per_generation)?;
        let summaries = SummaryStore::open(generations.active().dir())?;
        Ok(IndexMerger {
            generations,
            summaries,
        })
    }

    /// Folds one uploaded bundle into the active generation
    ///
    /// Returns the number of documents actually merged after the seen
    /// filter. The bundle's `to_crawl` list is the scheduler's business
    /// and is ignored here.
    pub fn process_upload(
        &mut self,
        bundle: UploadBundle,
        store: &mut SqliteStore,
    ) -> crate::Result<usize> {
        let summary_hashes: Vec<u64> =
            bundle.summaries.iter().map(|s| url_hash(&s.url)).collect();
        let unseen: HashSet<u64> = store.filter_unseen(&summary_hashes)?.into_iter().collect();

        let mut offsets: HashMap<DocKey, u64> = HashMap::new();
        let mut batch_dedup: HashSet<u64> = HashSet::new();
        let mut merged = 0usize;
        for (summary, hash) in bundle.summaries.iter().zip(&summary_hashes) {
            if !unseen.contains(hash) || !batch_dedup.insert(*hash) {
                continue;
            }
            let offset = self.summaries.append(summary)?;
            offsets.insert(summary.doc_key, offset);
            merged += 1;
        }
        self.summaries.sync()?;

        let mut shard = bundle.shard;
        shard.change_document_offsets(&offsets);
        let url_offsets: HashMap<u64, u64> = offsets
            .iter()
            .map(|(key, offset)| (key.url_hash, *offset))
            .collect();
        shard.change_link_offsets(&url_offsets);
        if shard.needs_offsets() {
            // Leftover placeholders belong to seen-filtered summaries;
            // their postings landed with the original upload
            shard.drop_unresolved();
        }
        if !shard.is_empty() {
            let terms: BTreeMap<_, _> = shard.into_terms().into_iter().collect();
            self.generations
                .active_mut()
                .add_tier(&terms, merged as u64)?;
        }

        store.mark_seen(&bundle.seen_urls)?;
        store.mark_seen(&summary_hashes)?;

        let before = self.generations.active().number();
        self.generations.roll_if_full(&mut || {})?;
        if self.generations.active().number() != before {
            self.summaries = SummaryStore::open(self.generations.active().dir())?;
        }

        debug!(
            machine_id = %bundle.machine_id,
            crawl_time = bundle.crawl_time,
            merged,
            dropped = bundle.summaries.len() - merged,
            summary_bytes = self.summaries.len_bytes(),
            "Merged upload bundle"
        );
        Ok(merged)
    }

    /// Parses and merges a durable bundle file, deleting it afterwards
    ///
    /// A corrupt payload deletes the file too: a bundle that cannot be
    /// decoded whole is never partially applied.
    pub fn process_index_archive(
        &mut self,
        path: &Path,
        store: &mut SqliteStore,
    ) -> crate::Result<usize> {
        let encoded = fs::read_to_string(path)?;
        let bundle: UploadBundle = match decode_payload(&encoded) {
            Ok(bundle) => bundle,
            Err(TransferError::Corrupt(reason) | TransferError::Rejected(reason)) => {
                warn!(path = %path.display(), %reason, "Discarding corrupt index archive");
                fs::remove_file(path)?;
                return Err(IndexError::CorruptArchive(reason).into());
            }
            Err(e) => return Err(e.into()),
        };

        let merged = self.process_upload(bundle, store)?;
        fs::remove_file(path)?;
        Ok(merged)
    }

    /// Merges the active generation's tiers, yielding at checkpoints
    pub fn merge_all_tiers(&mut self, checkpoint: &mut dyn FnMut()) -> crate::Result<()> {
        self.generations.merge_all_tiers(checkpoint)?;
        Ok(())
    }

    /// Synchronous merge with no checkpoints, used at crawl shutdown
    pub fn fast_merge_all(&mut self) -> crate::Result<()> {
        info!("Forced fast merge of all dictionary tiers");
        self.generations.fast_merge_all()?;
        Ok(())
    }

    /// Postings for one term in the active generation
    pub fn lookup(&self, term: &str) -> crate::Result<Vec<crate::index::Posting>> {
        Ok(self.generations.active().lookup(term)?)
    }

    /// Reads a stored summary back by offset
    pub fn summary_at(&mut self, offset: u64) -> crate::Result<crate::index::PageSummary> {
        Ok(self.summaries.read_at(offset)?)
    }

    pub fn active_generation(&self) -> &crate::index::Generation {
        self.generations.active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{build_shard, DocKind, PageSummary, NEEDS_OFFSET_FLAG};
    use tempfile::TempDir;

    fn page(url: &str, terms: &[(&str, f32)]) -> (PageSummary, Vec<(String, f32)>) {
        let summary = PageSummary {
            doc_key: DocKey {
                url_hash: url_hash(url),
                content_hash: url_hash(url).wrapping_mul(31),
                kind: DocKind::Document,
            },
            url: url.to_string(),
            title: format!("title of {}", url),
            description: String::new(),
            word_count: 100,
            crawl_time: 7,
        };
        let scores = terms.iter().map(|(t, s)| (t.to_string(), *s)).collect();
        (summary, scores)
    }

    fn bundle(pages: &[(PageSummary, Vec<(String, f32)>)]) -> UploadBundle {
        UploadBundle {
            crawl_time: 7,
            machine_id: "f1".to_string(),
            to_crawl: vec![],
            seen_urls: pages.iter().map(|(s, _)| url_hash(&s.url)).collect(),
            robots: vec![],
            revalidations: vec![],
            summaries: pages.iter().map(|(s, _)| s.clone()).collect(),
            shard: build_shard(pages, &[]),
        }
    }

    #[test]
    fn test_upload_resolves_offsets_and_lands_in_tier() {
        let dir = TempDir::new().unwrap();
        let mut merger = IndexMerger::open(dir.path(), 1000).unwrap();
        let mut store = SqliteStore::open_in_memory().unwrap();

        let pages = vec![
            page("https://example.com/a", &[("rust", 1.0)]),
            page("https://example.com/b", &[("rust", 0.5), ("crawl", 0.9)]),
        ];
        let merged = merger.process_upload(bundle(&pages), &mut store).unwrap();
        assert_eq!(merged, 2);

        let postings = merger.lookup("rust").unwrap();
        assert_eq!(postings.len(), 2);
        for posting in &postings {
            assert_ne!(posting.offset, NEEDS_OFFSET_FLAG);
        }

        // Offsets point back at the right summaries
        let a_key = pages[0].0.doc_key;
        let a_offset = postings.iter().find(|p| p.doc_key == a_key).unwrap().offset;
        let read = merger.summary_at(a_offset).unwrap();
        assert_eq!(read.url, "https://example.com/a");
    }

    #[test]
    fn test_link_postings_point_at_referrer_summary() {
        let dir = TempDir::new().unwrap();
        let mut merger = IndexMerger::open(dir.path(), 1000).unwrap();
        let mut store = SqliteStore::open_in_memory().unwrap();

        let pages = vec![page("https://example.com/a", &[("rust", 1.0)])];
        let referrer = pages[0].0.doc_key;
        let links = vec![(
            DocKey {
                url_hash: referrer.url_hash,
                content_hash: url_hash("https://target.example/"),
                kind: DocKind::ExternalLink,
            },
            "https://target.example/".to_string(),
            0.75f32,
        )];
        let mut bundle = bundle(&pages);
        bundle.shard = build_shard(&pages, &links);

        merger.process_upload(bundle, &mut store).unwrap();

        let postings = merger.lookup("https://target.example/").unwrap();
        assert_eq!(postings.len(), 1);
        let read = merger.summary_at(postings[0].offset).unwrap();
        assert_eq!(read.url, "https://example.com/a");
    }

    #[test]
    fn test_replayed_upload_merges_nothing() {
        let dir = TempDir::new().unwrap();
        let mut merger = IndexMerger::open(dir.path(), 1000).unwrap();
        let mut store = SqliteStore::open_in_memory().unwrap();

        let pages = vec![page("https://example.com/a", &[("rust", 1.0)])];
        assert_eq!(merger.process_upload(bundle(&pages), &mut store).unwrap(), 1);
        // Same bundle again, as after a fetcher retry or crash replay
        assert_eq!(merger.process_upload(bundle(&pages), &mut store).unwrap(), 0);
    }

    #[test]
    fn test_generation_rolls_and_summary_store_follows() {
        let dir = TempDir::new().unwrap();
        let mut merger = IndexMerger::open(dir.path(), 2).unwrap();
        let mut store = SqliteStore::open_in_memory().unwrap();

        let first = vec![
            page("https://example.com/a", &[("a", 1.0)]),
            page("https://example.com/b", &[("b", 1.0)]),
        ];
        merger.process_upload(bundle(&first), &mut store).unwrap();
        assert_eq!(merger.active_generation().number(), 1);

        // Writes keep working against the fresh generation
        let second = vec![page("https://example.com/c", &[("c", 1.0)])];
        assert_eq!(merger.process_upload(bundle(&second), &mut store).unwrap(), 1);
    }

    #[test]
    fn test_corrupt_archive_deleted() {
        let dir = TempDir::new().unwrap();
        let mut merger = IndexMerger::open(dir.path(), 1000).unwrap();
        let mut store = SqliteStore::open_in_memory().unwrap();

        let path = dir.path().join("bundle_1.txt");
        fs::write(&path, "definitely not a payload").unwrap();
        assert!(merger.process_index_archive(&path, &mut store).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_good_archive_merged_and_deleted() {
        let dir = TempDir::new().unwrap();
        let mut merger = IndexMerger::open(dir.path(), 1000).unwrap();
        let mut store = SqliteStore::open_in_memory().unwrap();

        let pages = vec![page("https://example.com/a", &[("rust", 1.0)])];
        let encoded = crate::transfer::encode_payload(&bundle(&pages)).unwrap();
        let path = dir.path().join("bundle_1.txt");
        fs::write(&path, encoded).unwrap();

        assert_eq!(merger.process_index_archive(&path, &mut store).unwrap(), 1);
        assert!(!path.exists());
    }
}
