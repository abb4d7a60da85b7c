//! Mini inverted index shards
//!
//! A fetcher builds one shard per fetch batch: term -> postings, with each
//! posting carrying a placeholder offset until the server has appended the
//! page summaries and learned where they landed. Discovered links ride in
//! the same keyspace under their target URL as the term. The shard crosses
//! the wire inside an upload bundle and becomes a dictionary tier
//! server-side.

use crate::index::{DocKey, DocKind, PageSummary};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Sentinel offset: the posting's summary has not been placed yet
///
/// A shard is not usable for queries until every posting with this flag
/// has been rewritten via [`MiniIndexShard::change_document_offsets`].
pub const NEEDS_OFFSET_FLAG: u64 = u64::MAX;

/// One posting: a document (or link) occurrence of a term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub doc_key: DocKey,
    /// Byte offset of the document's summary in the generation's summary
    /// store, or [`NEEDS_OFFSET_FLAG`] before resolution
    pub offset: u64,
    /// Term relevance score within the document
    pub score: f32,
}

/// In-memory term -> postings map built per fetch batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MiniIndexShard {
    terms: HashMap<String, Vec<Posting>>,
    /// Number of distinct documents added
    doc_count: u64,
}

impl MiniIndexShard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn doc_count(&self) -> u64 {
        self.doc_count
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Adds a document's term scores under its key
    ///
    /// All postings start with the placeholder offset; the summary has not
    /// been stored anywhere yet when the fetcher builds the shard.
    pub fn add_document(&mut self, doc_key: DocKey, term_scores: &[(String, f32)]) {
        for (term, score) in term_scores {
            self.terms
                .entry(term.clone())
                .or_default()
                .push(Posting {
                    doc_key,
                    offset: NEEDS_OFFSET_FLAG,
                    score: *score,
                });
        }
        self.doc_count += 1;
    }

    /// Adds an in-link occurrence under the target URL as its term
    ///
    /// The posting's offset resolves to the *referrer's* summary, so a
    /// lookup by target URL yields the pages linking to it.
    pub fn add_link(&mut self, doc_key: DocKey, target: &str, weight: f32) {
        self.terms
            .entry(target.to_string())
            .or_default()
            .push(Posting {
                doc_key,
                offset: NEEDS_OFFSET_FLAG,
                score: weight,
            });
    }

    /// Rewrites placeholder offsets from a doc-key -> offset map
    ///
    /// Postings whose key is absent from the map are left untouched, not
    /// zeroed; they may belong to a summary batch still in flight.
    pub fn change_document_offsets(&mut self, offsets: &HashMap<DocKey, u64>) {
        for postings in self.terms.values_mut() {
            for posting in postings.iter_mut() {
                if posting.offset == NEEDS_OFFSET_FLAG {
                    if let Some(offset) = offsets.get(&posting.doc_key) {
                        posting.offset = *offset;
                    }
                }
            }
        }
    }

    /// Rewrites link-posting placeholders from a referrer-hash -> offset map
    ///
    /// Link keys carry the referrer's URL hash, not its full document key,
    /// so they resolve through this separate map.
    pub fn change_link_offsets(&mut self, url_offsets: &HashMap<u64, u64>) {
        for postings in self.terms.values_mut() {
            for posting in postings.iter_mut() {
                if posting.doc_key.kind != DocKind::Document
                    && posting.offset == NEEDS_OFFSET_FLAG
                {
                    if let Some(offset) = url_offsets.get(&posting.doc_key.url_hash) {
                        posting.offset = *offset;
                    }
                }
            }
        }
    }

    /// Drops every posting still carrying the placeholder offset
    ///
    /// After both resolution passes, leftovers belong to summaries the
    /// seen filter rejected; their postings merged with the original
    /// upload and the replayed copies have nothing to point at.
    pub fn drop_unresolved(&mut self) {
        for postings in self.terms.values_mut() {
            postings.retain(|p| p.offset != NEEDS_OFFSET_FLAG);
        }
        self.terms.retain(|_, postings| !postings.is_empty());
    }

    /// Returns true while any posting still carries the placeholder
    pub fn needs_offsets(&self) -> bool {
        self.terms
            .values()
            .any(|ps| ps.iter().any(|p| p.offset == NEEDS_OFFSET_FLAG))
    }

    /// Postings for one term
    pub fn postings(&self, term: &str) -> Option<&[Posting]> {
        self.terms.get(term).map(|v| v.as_slice())
    }

    /// Consumes the shard into its term map
    pub fn into_terms(self) -> HashMap<String, Vec<Posting>> {
        self.terms
    }
}

/// Builds a shard from processed pages and their discovered links
///
/// Convenience used by the fetch coordinator: one call per upload.
pub fn build_shard(
    pages: &[(PageSummary, Vec<(String, f32)>)],
    links: &[(DocKey, String, f32)],
) -> MiniIndexShard {
    let mut shard = MiniIndexShard::new();
    for (summary, term_scores) in pages {
        shard.add_document(summary.doc_key, term_scores);
    }
    for (doc_key, target, weight) in links {
        shard.add_link(*doc_key, target, *weight);
    }
    shard
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u64) -> DocKey {
        DocKey {
            url_hash: n,
            content_hash: n * 31,
            kind: crate::index::DocKind::Document,
        }
    }

    #[test]
    fn test_add_document_uses_placeholder() {
        let mut shard = MiniIndexShard::new();
        shard.add_document(key(1), &[("rust".to_string(), 0.5)]);

        let postings = shard.postings("rust").unwrap();
        assert_eq!(postings[0].offset, NEEDS_OFFSET_FLAG);
        assert!(shard.needs_offsets());
        assert_eq!(shard.doc_count(), 1);
    }

    #[test]
    fn test_offset_round_trip() {
        let mut shard = MiniIndexShard::new();
        shard.add_document(key(1), &[("alpha".to_string(), 1.0)]);
        shard.add_document(key(2), &[("alpha".to_string(), 0.25)]);

        let mut offsets = HashMap::new();
        offsets.insert(key(1), 4096u64);
        shard.change_document_offsets(&offsets);

        let postings = shard.postings("alpha").unwrap();
        // Mapped key carries exactly the supplied offset
        assert_eq!(postings[0].offset, 4096);
        // Absent key left untouched, not zeroed
        assert_eq!(postings[1].offset, NEEDS_OFFSET_FLAG);
        assert!(shard.needs_offsets());
    }

    #[test]
    fn test_fully_resolved_shard() {
        let mut shard = MiniIndexShard::new();
        shard.add_document(key(1), &[("a".to_string(), 1.0), ("b".to_string(), 0.5)]);

        let mut offsets = HashMap::new();
        offsets.insert(key(1), 128u64);
        shard.change_document_offsets(&offsets);

        assert!(!shard.needs_offsets());
        assert_eq!(shard.postings("b").unwrap()[0].offset, 128);
    }

    #[test]
    fn test_link_postings_resolve_by_referrer_hash() {
        let mut shard = MiniIndexShard::new();
        let referrer = DocKey::for_document("https://a.example/", b"body");
        shard.add_document(referrer, &[("alpha".to_string(), 1.0)]);
        shard.add_link(
            DocKey::for_link("https://a.example/", "https://b.example/", false),
            "https://b.example/",
            0.5,
        );

        let mut url_offsets = HashMap::new();
        url_offsets.insert(referrer.url_hash, 512u64);
        shard.change_link_offsets(&url_offsets);

        // Looking up the target yields the referrer's summary offset
        let postings = shard.postings("https://b.example/").unwrap();
        assert_eq!(postings[0].offset, 512);
        assert_eq!(postings[0].doc_key.kind, DocKind::ExternalLink);
    }

    #[test]
    fn test_drop_unresolved_keeps_placed_postings() {
        let mut shard = MiniIndexShard::new();
        shard.add_document(key(1), &[("alpha".to_string(), 1.0)]);
        shard.add_document(key(2), &[("alpha".to_string(), 0.5)]);
        shard.add_link(
            DocKey::for_link("https://gone.example/", "https://b.example/", true),
            "https://b.example/",
            0.5,
        );

        let mut offsets = HashMap::new();
        offsets.insert(key(1), 64u64);
        shard.change_document_offsets(&offsets);
        shard.drop_unresolved();

        // The placed document survives; the other and the link are gone
        assert_eq!(shard.postings("alpha").unwrap().len(), 1);
        assert!(shard.postings("https://b.example/").is_none());
        assert!(!shard.needs_offsets());
    }

    #[test]
    fn test_resolved_offsets_not_rewritten() {
        let mut shard = MiniIndexShard::new();
        shard.add_document(key(1), &[("a".to_string(), 1.0)]);

        let mut offsets = HashMap::new();
        offsets.insert(key(1), 100u64);
        shard.change_document_offsets(&offsets);

        // A second pass with a different offset must not clobber
        offsets.insert(key(1), 999u64);
        shard.change_document_offsets(&offsets);
        assert_eq!(shard.postings("a").unwrap()[0].offset, 100);
    }
}
