//! Fetcher-side coordination
//!
//! Each fetcher process runs one [`FetchCoordinator`] loop: poll the name
//! server for the active crawl, pull a batch from a rotated queue-server,
//! download the batch in bounded bursts, run the page processors, score
//! discovered links, and upload the results. The loop is single-threaded;
//! only the downloads themselves fan out, and they rejoin before
//! processing starts.

mod coordinator;
mod processor;
mod score;

pub use coordinator::FetchCoordinator;
pub use processor::{
    doc_tag_for, DownloadedPage, HtmlProcessor, PageProcessor, ProcessedPage, ProcessorRegistry,
    SitemapProcessor, TextProcessor,
};
pub use score::{company_domain, score_links, sitemap_link_weights};
