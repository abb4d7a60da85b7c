//! Link scoring at discovery time
//!
//! The weight a newly discovered link enters the frontier with is a pure
//! function of the crawl order, the parent page's weight, and where on
//! the parent the link sits. Page-importance crawls split the parent's
//! weight between same-company-domain links and cross-domain links, with
//! the larger share going cross-domain so the crawl spreads out instead
//! of sinking into one site. Sitemap entries decay harmonically down the
//! file. Breadth-first crawls ignore weight and rely on FIFO order.

use crate::config::CrawlOrder;
use url::Url;

/// Share of a parent's weight handed to cross-domain links
const CROSS_DOMAIN_SHARE: f64 = 2.0 / 3.0;

/// Weight of every link under breadth-first order
const BREADTH_FIRST_WEIGHT: f64 = 1.0;

/// Company-level domain of a host: the last two labels
///
/// `docs.rs -> docs.rs`, `blog.shop.example.com -> example.com`. Naive
/// about public suffixes like `co.uk`, which over-groups some hosts; that
/// only shifts weight between the two pools, never drops a link.
pub fn company_domain(host: &str) -> String {
    let labels: Vec<&str> = host.rsplit('.').take(2).collect();
    labels.into_iter().rev().collect::<Vec<_>>().join(".")
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

/// Scores a page's outgoing links
///
/// Returns `(url, weight)` pairs in the input order. Links whose URL
/// cannot be parsed are dropped.
pub fn score_links(
    order: CrawlOrder,
    parent_url: &str,
    parent_weight: f64,
    links: &[String],
) -> Vec<(String, f64)> {
    match order {
        CrawlOrder::BreadthFirst => links
            .iter()
            .filter(|l| host_of(l).is_some())
            .map(|l| (l.clone(), BREADTH_FIRST_WEIGHT))
            .collect(),
        CrawlOrder::PageImportance => {
            let parent_company = host_of(parent_url)
                .map(|h| company_domain(&h))
                .unwrap_or_default();

            let classified: Vec<(String, bool)> = links
                .iter()
                .filter_map(|l| {
                    let host = host_of(l)?;
                    let same = company_domain(&host) == parent_company;
                    Some((l.clone(), same))
                })
                .collect();

            let same_count = classified.iter().filter(|(_, same)| *same).count();
            let cross_count = classified.len() - same_count;

            let cross_pool = parent_weight * CROSS_DOMAIN_SHARE;
            let same_pool = parent_weight - cross_pool;
            let cross_each = if cross_count > 0 {
                cross_pool / cross_count as f64
            } else {
                0.0
            };
            let same_each = if same_count > 0 {
                same_pool / same_count as f64
            } else {
                0.0
            };

            classified
                .into_iter()
                .map(|(url, same)| (url, if same { same_each } else { cross_each }))
                .collect()
        }
    }
}

/// Harmonic weights for sitemap-derived links
///
/// Entry `i` (zero-based) gets `base / (i + 1)`: sitemaps list their
/// important pages first, and the decay keeps a long sitemap from
/// swamping the frontier at a uniform weight.
pub fn sitemap_link_weights(base_weight: f64, urls: &[String]) -> Vec<(String, f64)> {
    urls.iter()
        .enumerate()
        .map(|(i, url)| (url.clone(), base_weight / (i + 1) as f64))
        .collect()
}
