//! Integration tests for the queue-server / fetcher cycle
//!
//! These tests run the real axum queue-server on an ephemeral port, point
//! a fetch coordinator at it, and serve page content from wiremock, so
//! the whole wire contract is exercised end-to-end: crawlTime polling,
//! batch claiming, downloading, uploading and index merging.

use chrono::Utc;
use netweft::config::{load_config, Config};
use netweft::fetch::FetchCoordinator;
use netweft::schedule::ServerRole;
use netweft::server::{process_incoming, router, AppContext, SharedContext, SyncEntry};
use netweft::storage::url_hash;
use netweft::transfer::{decode_payload, session_token, CrawlParameters, DiscoveredUrl};
use std::io::Write;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECRET: &str = "integration-secret";

/// Creates a test configuration pointing both roles at the given server
fn test_config(server: &str, work: &TempDir) -> Config {
    let toml = format!(
        r#"
        [crawl]
        max-fetch-size = 20
        num-multi-fetch-pages = 5
        pages-per-upload = 1
        min-loop-time = 0
        docs-per-generation = 100

        [user-agent]
        crawler-name = "NetweftTest"
        crawler-version = "0.9"
        contact-url = "https://crawler.example/about"
        contact-email = "ops@crawler.example"

        [network]
        queue-servers = ["{server}"]
        name-server = "{server}"
        shared-secret = "{SECRET}"

        [paths]
        work-dir = "{work}"
        database-path = "{db}"
        "#,
        server = server,
        work = work.path().display(),
        db = work.path().join("netweft.db").display(),
    );
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{}", toml).unwrap();
    load_config(file.path()).unwrap()
}

/// Binds the queue-server on an ephemeral port and serves it in the
/// background; returns its base URL and the shared context
async fn start_queue_server(work: &TempDir) -> (String, SharedContext) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/", listener.local_addr().unwrap());

    let config = test_config(&url, work);
    let ctx = AppContext::initialize(config, "test-hash".to_string(), ServerRole::Both).unwrap();

    let app = router(ctx.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (url, ctx)
}

fn signed_query(extra: &[(&str, &str)]) -> Vec<(String, String)> {
    let time = Utc::now().timestamp() as u64;
    let mut query = vec![
        ("time".to_string(), time.to_string()),
        ("session".to_string(), session_token(time, SECRET)),
    ];
    for (k, v) in extra {
        query.push((k.to_string(), v.to_string()));
    }
    query
}

#[tokio::test]
async fn test_full_fetch_and_index_cycle() {
    // Content server: one allowed site with a robots file and a page
    let content = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nAllow: /"))
        .mount(&content)
        .await;
    let page_body = r#"<html><head><title>Harbor News</title></head>
        <body>harbor harbor shipping report
        <a href="/archive">archive</a></body></html>"#;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string(page_body),
        )
        .mount(&content)
        .await;

    let work = TempDir::new().unwrap();
    let (server_url, ctx) = start_queue_server(&work).await;

    // Start a crawl and seed the frontier with the content server's page
    let page_url = format!("{}/page", content.uri());
    {
        let mut scheduler = ctx.scheduler.lock().unwrap();
        let mut store = ctx.store.lock().unwrap();
        scheduler.start_crawl(1724572800, &mut store).unwrap();
        scheduler
            .process_to_crawl(
                vec![DiscoveredUrl {
                    url: page_url.clone(),
                    weight: 4.0,
                }],
                &mut store,
            )
            .unwrap();
        // The page plus its host's implicit robots.txt
        assert_eq!(scheduler.frontier_len(), 2);
    }

    let config = test_config(&server_url, &work);
    let mut fetcher = FetchCoordinator::new(&config, "itest-1".to_string()).unwrap();

    // Pass 1: the batch holds only the robots.txt URL; the page is held
    // back until its host's robots state is known
    fetcher.run_once().await.unwrap();
    // Pass 2: no admissible batch, so the fetcher uses the slot to
    // upload its robots result
    fetcher.run_once().await.unwrap();
    assert_eq!(process_incoming(&ctx).unwrap(), 1);

    // Pass 3: robots is known and permissive, the page gets fetched and
    // uploaded (pages-per-upload = 1)
    fetcher.run_once().await.unwrap();
    assert_eq!(process_incoming(&ctx).unwrap(), 1);

    // The page is marked seen and its content reached the index
    {
        let store = ctx.store.lock().unwrap();
        assert!(store.is_seen(url_hash(&page_url)).unwrap());
    }
    {
        let mut merger = ctx.merger.lock().unwrap();
        merger.fast_merge_all().unwrap();
        let postings = merger.lookup("harbor").unwrap();
        assert_eq!(postings.len(), 1);

        let summary = merger.summary_at(postings[0].offset).unwrap();
        assert_eq!(summary.title, "Harbor News");
        assert_eq!(summary.url, page_url);
    }

    // The discovered archive link was offered back and enqueued
    {
        let scheduler = ctx.scheduler.lock().unwrap();
        assert!(scheduler.frontier_len() >= 1);
    }
}

#[tokio::test]
async fn test_crawl_time_endpoint_and_session_rejection() {
    let work = TempDir::new().unwrap();
    let (server_url, ctx) = start_queue_server(&work).await;
    {
        let mut scheduler = ctx.scheduler.lock().unwrap();
        let mut store = ctx.store.lock().unwrap();
        scheduler.start_crawl(1724572800, &mut store).unwrap();
    }

    let http = reqwest::Client::new();

    // Valid session: crawl parameters come back in the wire encoding
    let body = http
        .get(&server_url)
        .query(&signed_query(&[("c", "fetch"), ("a", "crawlTime")]))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap()
        .text()
        .await
        .unwrap();
    let params: CrawlParameters = decode_payload(&body).unwrap();
    assert_eq!(params.crawl_time, 1724572800);
    assert_eq!(params.crawl_order, "page-importance");
    assert_eq!(params.queue_servers, vec![server_url.clone()]);

    // Stale timestamp: session refused outright
    let response = http
        .get(&server_url)
        .query(&[
            ("c", "fetch"),
            ("a", "crawlTime"),
            ("time", "1000"),
            ("session", &session_token(1000, SECRET)),
        ])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_stop_crawl_reaches_fetcher() {
    let content = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nAllow: /"))
        .mount(&content)
        .await;

    let work = TempDir::new().unwrap();
    let (server_url, ctx) = start_queue_server(&work).await;
    {
        let mut scheduler = ctx.scheduler.lock().unwrap();
        let mut store = ctx.store.lock().unwrap();
        scheduler.start_crawl(42, &mut store).unwrap();
        scheduler
            .process_to_crawl(
                vec![DiscoveredUrl {
                    url: format!("{}/page", content.uri()),
                    weight: 1.0,
                }],
                &mut store,
            )
            .unwrap();
    }

    let config = test_config(&server_url, &work);
    let mut fetcher = FetchCoordinator::new(&config, "itest-2".to_string()).unwrap();

    // Fetch the robots batch so the fetcher is holding pending state
    fetcher.run_once().await.unwrap();
    assert!(!fetcher.is_stopped());

    {
        let mut scheduler = ctx.scheduler.lock().unwrap();
        let mut store = ctx.store.lock().unwrap();
        scheduler.stop_crawl(&mut store).unwrap();
    }

    // crawlTime now reports 0; the fetcher flushes and the server
    // answers its upload with STOP
    fetcher.run_once().await.unwrap();
    assert!(fetcher.is_stopped());
}

#[tokio::test]
async fn test_resource_sync_and_ranged_get() {
    let work = TempDir::new().unwrap();
    let (server_url, ctx) = start_queue_server(&work).await;

    let cache = ctx.cache_dir();
    std::fs::create_dir_all(cache.join("gen_0")).unwrap();
    std::fs::write(cache.join("gen_0/summaries.bin"), b"0123456789").unwrap();

    let http = reqwest::Client::new();

    let entries: Vec<SyncEntry> = http
        .get(&server_url)
        .query(&signed_query(&[("c", "resource"), ("a", "syncList")]))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert!(names.contains(&"gen_0/summaries.bin"));

    let bytes = http
        .get(&server_url)
        .query(&signed_query(&[
            ("c", "resource"),
            ("a", "get"),
            ("f", "gen_0/summaries.bin"),
            ("o", "3"),
            ("l", "4"),
        ]))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"3456");

    // Escaping the cache tree is refused
    let response = http
        .get(&server_url)
        .query(&signed_query(&[
            ("c", "resource"),
            ("a", "get"),
            ("f", "../netweft.db"),
        ]))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::FORBIDDEN);
}
