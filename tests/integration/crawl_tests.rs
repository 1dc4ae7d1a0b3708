//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and test
//! the full crawl cycle end-to-end.

use site_atlas::config::Config;
use site_atlas::crawler::{crawl, Coordinator, CrawlReport};
use site_atlas::output::{ContentSink, MemorySink, NullReporter, SinkError, TerminationReason};
use site_atlas::sitemap::{NodeStatus, SkipReason};
use site_atlas::url::{normalize_url, ResourceKind};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Creates a fast test configuration crawling the mock server
fn test_config(server: &MockServer) -> Config {
    let mut config = Config::default();
    config.crawler.seed_url = format!("{}/", server.uri());
    config.crawler.max_workers = 4;
    config.crawler.grace_period_secs = 1;
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 10;
    config.throttle.min_request_interval_ms = 0;
    config.throttle.max_concurrent_per_domain = 4;
    config.user_agent.crawler_name = "TestBot".to_string();
    config
}

/// A 200 response with a text/html body
///
/// `set_body_raw` sets the content type together with the body; a header
/// inserted after `set_body_string` would not replace its text/plain.
fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(
        format!("<html><body>{}</body></html>", body),
        "text/html",
    )
}

async fn mount_page(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(html(body))
        .expect(1)
        .mount(server)
        .await;
}

async fn run(config: Config) -> (CrawlReport, Arc<MemorySink>) {
    let sink = Arc::new(MemorySink::new());
    let report = crawl(config, sink.clone(), Arc::new(NullReporter))
        .await
        .expect("crawl failed");
    (report, sink)
}

fn key(server: &MockServer, route: &str) -> String {
    format!("{}{}", server.uri(), route)
}

/// Records when each request arrived and answers through a closure
struct Recorder<F> {
    arrivals: Arc<Mutex<Vec<(String, Instant)>>>,
    respond: F,
}

impl<F> Respond for Recorder<F>
where
    F: Fn(&Request) -> ResponseTemplate + Send + Sync,
{
    fn respond(&self, request: &Request) -> ResponseTemplate {
        self.arrivals
            .lock()
            .unwrap()
            .push((request.url.path().to_string(), Instant::now()));
        (self.respond)(request)
    }
}

#[tokio::test]
async fn test_page_with_local_and_external_assets() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/",
        r#"<link rel="stylesheet" href="style.css">
           <img src="https://cdn.external.com/logo.png">"#,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/style.css"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("body { color: black; }", "text/css"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (report, sink) = run(test_config(&server)).await;

    assert_eq!(report.summary.termination, TerminationReason::Completed);
    assert_eq!(report.summary.succeeded, 2);
    assert_eq!(report.summary.skipped, 1);
    assert_eq!(report.summary.failed, 0);

    let root = report.export.entry(&key(&server, "/")).unwrap();
    assert_eq!(root.kind, ResourceKind::Page);
    assert_eq!(root.status, NodeStatus::Success);
    assert_eq!(root.local_path.as_deref(), Some("index.html"));

    let css = report.export.entry(&key(&server, "/style.css")).unwrap();
    assert_eq!(css.kind, ResourceKind::Css);
    assert_eq!(css.status, NodeStatus::Success);
    assert_eq!(css.parent_url.as_deref(), Some(root.url.as_str()));

    let logo = report
        .export
        .entry("https://cdn.external.com/logo.png")
        .unwrap();
    assert_eq!(
        logo.status,
        NodeStatus::Skipped {
            reason: SkipReason::ExternalOrigin
        }
    );
    assert_eq!(logo.local_path, None);

    let tree = report.export.root.as_ref().unwrap();
    assert_eq!(tree.children.len(), 2);

    assert_eq!(
        sink.get("assets/css/style.css").unwrap(),
        b"body { color: black; }".to_vec()
    );
    assert!(sink.get("website_map.json").is_some());
    assert!(sink.get("website_structure.txt").is_some());
}

#[tokio::test]
async fn test_self_link_recorded_once() {
    let server = MockServer::start().await;
    mount_page(&server, "/", r#"<a href="/">Home</a><a href="./">Again</a>"#).await;

    let (report, _) = run(test_config(&server)).await;

    assert_eq!(report.export.manifest.len(), 1);
    assert_eq!(report.summary.succeeded, 1);
}

#[tokio::test]
async fn test_depth_zero_fetches_assets_only() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/",
        r#"<a href="/about">About</a><img src="/logo.png">"#,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/about"))
        .respond_with(html("about"))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/logo.png"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(vec![0x89, b'P', b'N', b'G'], "image/png"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config.crawler.max_depth = 0;
    let (report, sink) = run(config).await;

    let about = report.export.entry(&key(&server, "/about")).unwrap();
    assert_eq!(
        about.status,
        NodeStatus::Skipped {
            reason: SkipReason::DepthExceeded
        }
    );

    let logo = report.export.entry(&key(&server, "/logo.png")).unwrap();
    assert_eq!(logo.status, NodeStatus::Success);
    assert_eq!(logo.kind, ResourceKind::Image);
    assert_eq!(logo.depth, 0);
    assert!(sink.get("assets/images/logo.png").is_some());
}

#[tokio::test]
async fn test_link_cycle_terminates() {
    let server = MockServer::start().await;
    mount_page(&server, "/", r#"<a href="/a">A</a>"#).await;
    mount_page(&server, "/a", r#"<a href="/b">B</a>"#).await;
    mount_page(&server, "/b", r#"<a href="/a">A</a><a href="/">Home</a>"#).await;

    let (report, _) = run(test_config(&server)).await;

    assert_eq!(report.summary.termination, TerminationReason::Completed);
    assert_eq!(report.export.manifest.len(), 3);
    assert_eq!(report.summary.succeeded, 3);

    let b = report.export.entry(&key(&server, "/b")).unwrap();
    assert_eq!(b.depth, 2);
    assert_eq!(b.parent_url, Some(key(&server, "/a")));
}

#[tokio::test]
async fn test_depth_bound_and_unique_manifest() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/",
        r#"<a href="/one">1</a><a href="/two?b=2&a=1">2</a><a href="/two?a=1&b=2">2 again</a>"#,
    )
    .await;
    mount_page(&server, "/one", r#"<a href="/one/deep">deep</a><a href="/two?a=1&b=2">2</a>"#)
        .await;
    mount_page(&server, "/two", r#"<a href="/two/deep">deep</a>"#).await;

    let mut config = test_config(&server);
    config.crawler.max_depth = 1;
    let (report, _) = run(config).await;

    let keys: HashSet<&str> = report
        .export
        .manifest
        .iter()
        .map(|e| e.url.as_str())
        .collect();
    assert_eq!(keys.len(), report.export.manifest.len());

    // Pages past the bound only appear as depth skips, at their would-be depth
    let depth_exceeded = NodeStatus::Skipped {
        reason: SkipReason::DepthExceeded,
    };
    for entry in report.export.pages() {
        if entry.status == depth_exceeded {
            assert_eq!(entry.depth, 2, "{}", entry.url);
        } else {
            assert!(entry.depth <= 1, "{} recorded at depth {}", entry.url, entry.depth);
        }
    }
    let deep: Vec<_> = report
        .export
        .pages()
        .filter(|e| e.url.ends_with("/deep"))
        .collect();
    assert_eq!(deep.len(), 2);
    assert!(deep.iter().all(|e| e.status == depth_exceeded));

    let normalized = normalize_url(&key(&server, "/two?b=2&a=1"), None).unwrap();
    assert!(report.export.entry(normalized.as_str()).is_some());
}

#[tokio::test]
async fn test_shorter_path_found_late_extends_reach() {
    let server = MockServer::start().await;
    mount_page(&server, "/", r#"<a href="/a">A</a><a href="/c">C</a>"#).await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(html(r#"<a href="/x">X</a>"#).set_delay(Duration::from_millis(600)))
        .expect(1)
        .mount(&server)
        .await;
    mount_page(&server, "/c", r#"<a href="/b">B</a>"#).await;
    mount_page(&server, "/b", r#"<a href="/x">X</a>"#).await;
    mount_page(&server, "/x", r#"<a href="/y">Y</a>"#).await;
    mount_page(&server, "/y", "leaf").await;

    let mut config = test_config(&server);
    config.crawler.max_depth = 3;
    let (report, _) = run(config).await;

    // x is first fetched at depth 3 through c and b, then reached at 2 via a
    let x = report.export.entry(&key(&server, "/x")).unwrap();
    assert_eq!(x.depth, 2);
    assert_eq!(x.parent_url, Some(key(&server, "/a")));

    let y = report.export.entry(&key(&server, "/y")).unwrap();
    assert_eq!(y.status, NodeStatus::Success);
    assert_eq!(y.depth, 3);
    assert_eq!(y.parent_url, Some(key(&server, "/x")));

    for entry in report.export.pages() {
        assert!(entry.depth <= 3, "{} at depth {}", entry.url, entry.depth);
        if let Some(parent) = entry.parent_url.as_deref() {
            let parent = report.export.entry(parent).unwrap();
            assert_eq!(entry.depth, parent.depth + 1, "{}", entry.url);
        }
    }
}

#[tokio::test]
async fn test_retry_ceiling() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(500))
        .expect(4)
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config.retry.max_retries = 3;
    let (report, _) = run(config).await;

    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.retries, 3);
    let root = report.export.entry(&key(&server, "/")).unwrap();
    assert_eq!(
        root.status,
        NodeStatus::Failed {
            reason: "HTTP 500".to_string()
        }
    );
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;
    mount_page(&server, "/", r#"<a href="/missing">gone</a>"#).await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let (report, _) = run(test_config(&server)).await;

    assert_eq!(report.summary.succeeded, 1);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.retries, 0);
    assert!(report
        .export
        .entry(&key(&server, "/missing"))
        .unwrap()
        .status
        .is_failed());
}

#[tokio::test]
async fn test_retry_after_is_honored() {
    let server = MockServer::start().await;
    let arrivals = Arc::new(Mutex::new(Vec::new()));
    let calls = AtomicUsize::new(0);

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(Recorder {
            arrivals: arrivals.clone(),
            respond: move |_: &Request| {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    ResponseTemplate::new(429).insert_header("retry-after", "1")
                } else {
                    html("ok")
                }
            },
        })
        .expect(2)
        .mount(&server)
        .await;

    let (report, _) = run(test_config(&server)).await;

    assert_eq!(report.summary.succeeded, 1);
    assert_eq!(report.summary.retries, 1);

    let arrivals = arrivals.lock().unwrap();
    assert_eq!(arrivals.len(), 2);
    let gap = arrivals[1].1.duration_since(arrivals[0].1);
    assert!(gap >= Duration::from_secs(1), "retried after {:?}", gap);
}

#[tokio::test]
async fn test_single_slot_origin_never_overlaps() {
    let server = MockServer::start().await;
    let arrivals = Arc::new(Mutex::new(Vec::new()));
    let delay = Duration::from_millis(100);

    Mock::given(method("GET"))
        .respond_with(Recorder {
            arrivals: arrivals.clone(),
            respond: move |request: &Request| {
                let body = if request.url.path() == "/" {
                    r#"<a href="/p1">1</a><a href="/p2">2</a><a href="/p3">3</a>"#
                } else {
                    "leaf"
                };
                html(body).set_delay(delay)
            },
        })
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config.throttle.max_concurrent_per_domain = 1;
    let (report, _) = run(config).await;
    assert_eq!(report.summary.succeeded, 4);

    let mut starts: Vec<Instant> = arrivals.lock().unwrap().iter().map(|(_, at)| *at).collect();
    starts.sort();
    assert_eq!(starts.len(), 4);
    for pair in starts.windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        assert!(gap >= delay, "requests overlapped: gap {:?}", gap);
    }
}

#[tokio::test]
async fn test_item_ceiling() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<a href="/1">1</a><a href="/2">2</a><a href="/3">3</a><a href="/4">4</a>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(html("leaf"))
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config.crawler.max_total_items = 2;
    let (report, _) = run(config).await;

    assert_eq!(report.summary.termination, TerminationReason::CeilingReached);
    assert_eq!(report.summary.succeeded, 2);
    assert_eq!(report.summary.skipped, 3);
    assert_eq!(
        report
            .summary
            .skipped_by_reason
            .get(&SkipReason::CeilingReached),
        Some(&3)
    );
}

#[tokio::test]
async fn test_redirects() {
    let server = MockServer::start().await;
    mount_page(&server, "/", r#"<a href="/old">old</a><a href="/loop1">loop</a>"#).await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("location", "/new"))
        .mount(&server)
        .await;
    mount_page(&server, "/new", "moved here").await;
    Mock::given(method("GET"))
        .and(path("/loop1"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/loop2"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/loop2"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/loop1"))
        .mount(&server)
        .await;

    let (report, _) = run(test_config(&server)).await;

    let old = report.export.entry(&key(&server, "/old")).unwrap();
    assert_eq!(old.status, NodeStatus::Success);

    let looped = report.export.entry(&key(&server, "/loop1")).unwrap();
    match &looped.status {
        NodeStatus::Failed { reason } => assert!(reason.contains("Redirect loop"), "{}", reason),
        other => panic!("expected a failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_redirect_off_origin_not_followed() {
    let server = MockServer::start().await;
    let elsewhere = MockServer::start().await;
    mount_page(&server, "/", r#"<a href="/moved">moved</a>"#).await;
    Mock::given(method("GET"))
        .and(path("/moved"))
        .respond_with(
            ResponseTemplate::new(301).insert_header("location", key(&elsewhere, "/landing").as_str()),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(html("elsewhere"))
        .expect(0)
        .mount(&elsewhere)
        .await;

    let (report, sink) = run(test_config(&server)).await;

    let moved = report.export.entry(&key(&server, "/moved")).unwrap();
    match &moved.status {
        NodeStatus::Failed { reason } => {
            assert!(reason.contains("leaves the crawled origin"), "{}", reason)
        }
        other => panic!("expected a failure, got {:?}", other),
    }
    assert!(sink.get("moved.html").is_none());
}

#[tokio::test]
async fn test_cancellation_mid_crawl() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/",
        r#"<a href="/slow">slow</a><a href="/later1">1</a><a href="/later2">2</a>"#,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(html("slow").set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;
    for route in ["/later1", "/later2"] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(html("later"))
            .expect(0)
            .mount(&server)
            .await;
    }

    let mut config = test_config(&server);
    config.crawler.max_workers = 1;
    config.crawler.grace_period_secs = 1;
    let sink = Arc::new(MemorySink::new());
    let coordinator =
        Coordinator::new(config, sink.clone(), Arc::new(NullReporter)).expect("valid config");

    let shutdown = coordinator.shutdown_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown.cancel();
    });

    let started = Instant::now();
    let report = coordinator.run().await.expect("crawl failed");
    let elapsed = started.elapsed();

    // The slow response is cut off once the grace period runs out
    assert!(elapsed >= Duration::from_secs(1), "stopped after {:?}", elapsed);
    assert!(elapsed < Duration::from_secs(5), "stopped after {:?}", elapsed);
    assert_eq!(report.summary.termination, TerminationReason::Cancelled);

    let root = report.export.entry(&key(&server, "/")).unwrap();
    assert_eq!(root.status, NodeStatus::Success);

    let slow = report.export.entry(&key(&server, "/slow")).unwrap();
    assert_eq!(
        slow.status,
        NodeStatus::Failed {
            reason: "Cancelled".to_string()
        }
    );

    for route in ["/later1", "/later2"] {
        let entry = report.export.entry(&key(&server, route)).unwrap();
        assert_eq!(
            entry.status,
            NodeStatus::Skipped {
                reason: SkipReason::Cancelled
            }
        );
    }

    assert!(sink.get("website_map.json").is_some());
    assert!(sink.get("website_structure.txt").is_some());
}

/// Sink that refuses stylesheets
struct NoCssSink(MemorySink);

impl ContentSink for NoCssSink {
    fn store(&self, local_path: &str, bytes: &[u8]) -> Result<(), SinkError> {
        if local_path.ends_with(".css") {
            return Err(SinkError::InvalidPath(local_path.to_string()));
        }
        self.0.store(local_path, bytes)
    }
}

#[tokio::test]
async fn test_sink_failure_marks_item_failed() {
    let server = MockServer::start().await;
    mount_page(&server, "/", r#"<link rel="stylesheet" href="/main.css">"#).await;
    Mock::given(method("GET"))
        .and(path("/main.css"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("p {}", "text/css"))
        .mount(&server)
        .await;

    let sink = Arc::new(NoCssSink(MemorySink::new()));
    let report = crawl(test_config(&server), sink.clone(), Arc::new(NullReporter))
        .await
        .unwrap();

    assert_eq!(report.summary.succeeded, 1);
    assert_eq!(report.summary.failed, 1);
    assert!(report
        .export
        .entry(&key(&server, "/main.css"))
        .unwrap()
        .status
        .is_failed());
    assert!(sink.0.get("index.html").is_some());
}

#[tokio::test]
async fn test_filesystem_sink() {
    use site_atlas::output::FsSink;

    let server = MockServer::start().await;
    mount_page(
        &server,
        "/",
        r#"<a href="/docs/">Docs</a><script src="/app.js"></script>"#,
    )
    .await;
    mount_page(&server, "/docs/", "docs").await;
    Mock::given(method("GET"))
        .and(path("/app.js"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("console.log(1);", "text/javascript"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(FsSink::new(dir.path()));
    let report = crawl(test_config(&server), sink, Arc::new(NullReporter))
        .await
        .unwrap();
    assert_eq!(report.summary.succeeded, 3);

    assert!(dir.path().join("index.html").is_file());
    assert!(dir.path().join("docs/index.html").is_file());
    assert!(dir.path().join("assets/js/app.js").is_file());

    let structure = std::fs::read_to_string(dir.path().join("website_structure.txt")).unwrap();
    assert!(structure.starts_with("Website Structure for: "));
    assert!(structure.contains("  JS:\n    assets/js/app.js"));

    let map = std::fs::read_to_string(dir.path().join("website_map.json")).unwrap();
    let value: serde_json::Value = serde_json::from_str(&map).unwrap();
    assert_eq!(value["manifest"].as_array().unwrap().len(), 3);
}
