use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::types::{is_fatal_error, NoopSink, ProgressSink, ScanConfig};
use crate::cache::OcrCache;
use crate::common::{ImageCandidate, ScanState, ScanStatus};
use crate::detector::contains_japanese;
use crate::image2text::OcrRelay;
use crate::image_utils::{image_url_to_data_url, ImageFetcher};
use crate::injector::inject_ocr_text;
use crate::locator::collect_image_candidates;
use crate::page::SharedDocument;
use crate::store::{LocalStore, ScanStateStore};

type SharedQueue = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<ImageCandidate>>>;

enum Outcome {
    CacheHit { found: bool },
    Recognized { found: bool },
    Skipped,
    Failed(String),
}

/// State shared by the workers of one scan.
struct ScanRun {
    doc: SharedDocument,
    cache: Mutex<OcrCache>,
    state: Mutex<ScanState>,
    aborted: AtomicBool,
    publisher: ScanStateStore,
}

/// Runs scans over a page. Cheap to clone, all dependencies are shared.
#[derive(Clone)]
pub struct Scanner {
    fetcher: Arc<dyn ImageFetcher>,
    relay: Arc<dyn OcrRelay>,
    sink: Arc<dyn ProgressSink>,
    store: Option<LocalStore>,
    config: ScanConfig,
}

impl Scanner {
    pub fn new(fetcher: Arc<dyn ImageFetcher>, relay: Arc<dyn OcrRelay>) -> Self {
        Self {
            fetcher,
            relay,
            sink: Arc::new(NoopSink),
            store: None,
            config: ScanConfig::default(),
        }
    }

    /// Persist OCR results in `store`. Without a store the cache only lives
    /// for one scan.
    pub fn with_store(mut self, store: LocalStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    fn load_cache(&self) -> OcrCache {
        match &self.store {
            Some(store) => OcrCache::load(store).unwrap_or_else(|e| {
                log::warn!("Failed to load OCR cache, continuing without it: {}", e);
                OcrCache::in_memory()
            }),
            None => OcrCache::in_memory(),
        }
    }

    /// Scan the whole page and return the final state. Always ends in
    /// `done` or `error`, and always notifies the sink of completion.
    pub async fn run(&self, doc: &SharedDocument, state: &ScanStateStore) -> ScanState {
        let candidates = collect_image_candidates(&doc.lock(), self.config.min_image_size);
        let total = candidates.len();

        state.publish(ScanState::scanning(total));
        log::info!("Scanning {} image(s) with {} worker(s)", total, self.config.concurrency);

        let run = Arc::new(ScanRun {
            doc: doc.clone(),
            cache: Mutex::new(self.load_cache()),
            state: Mutex::new(ScanState::scanning(total)),
            aborted: AtomicBool::new(false),
            publisher: state.clone(),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        for candidate in candidates {
            // receiver is alive until the workers below are done
            let _ = tx.send(candidate);
        }
        drop(tx);
        let queue: SharedQueue = Arc::new(tokio::sync::Mutex::new(rx));

        let workers = self.config.concurrency.max(1).min(total);
        let mut set = JoinSet::new();
        for worker_id in 0..workers {
            let scanner = self.clone();
            let run = run.clone();
            let queue = queue.clone();
            set.spawn(async move { scanner.worker(worker_id, run, queue).await });
        }
        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                log::error!("Scan worker failed: {}", e);
            }
        }

        let final_state = {
            let mut current = run.state.lock();
            current.status = if run.aborted.load(Ordering::SeqCst) {
                ScanStatus::Error
            } else {
                ScanStatus::Done
            };
            run.publisher.publish(current.clone());
            current.clone()
        };
        self.sink.complete().await;

        log::info!(
            "Scan {}: {}/{} processed, {} with text, {} cached, {} failed",
            final_state.status,
            final_state.completed,
            final_state.total,
            final_state.found,
            final_state.cache_hits,
            final_state.errors
        );
        final_state
    }

    async fn worker(&self, worker_id: usize, run: Arc<ScanRun>, queue: SharedQueue) {
        loop {
            if run.aborted.load(Ordering::SeqCst) {
                log::debug!("Worker {} stopping, scan aborted", worker_id);
                break;
            }
            let next = queue.lock().await.recv().await;
            let Some(candidate) = next else {
                break;
            };

            let outcome = self.process(&run, &candidate).await;
            let (completed, total) = record(&run, outcome);
            self.sink.progress(completed, total).await;
        }
    }

    async fn process(&self, run: &ScanRun, candidate: &ImageCandidate) -> Outcome {
        let cached = run.cache.lock().get(&candidate.url).map(str::to_owned);
        if let Some(text) = cached {
            log::debug!("Cache hit for {}", candidate.url);
            return Outcome::CacheHit {
                found: inject_if_japanese(run, candidate, &text),
            };
        }

        let Some(data_url) =
            image_url_to_data_url(self.fetcher.as_ref(), &candidate.url, &self.config.normalize).await
        else {
            return Outcome::Skipped;
        };

        match self.relay.recognize(&data_url).await {
            Ok(text) => {
                if let Err(e) = run.cache.lock().put(&candidate.url, &text) {
                    log::warn!("Failed to persist OCR result for {}: {}", candidate.url, e);
                }
                Outcome::Recognized {
                    found: inject_if_japanese(run, candidate, &text),
                }
            }
            Err(e) => {
                log::warn!("OCR failed for {}: {}", candidate.url, e);
                Outcome::Failed(e.to_string())
            }
        }
    }
}

fn inject_if_japanese(run: &ScanRun, candidate: &ImageCandidate, text: &str) -> bool {
    if !contains_japanese(text) {
        return false;
    }
    let mut doc = run.doc.lock();
    match inject_ocr_text(&mut doc, candidate.element, text, &candidate.url) {
        Ok(placement) => {
            log::debug!("Annotated {} ({} {:?})", candidate.url, candidate.kind, placement);
            true
        }
        Err(e) => {
            log::warn!("Could not annotate {}: {}", candidate.url, e);
            false
        }
    }
}

/// Apply one outcome to the counters and publish the new snapshot, both under
/// the state lock so published snapshots never go backwards.
fn record(run: &ScanRun, outcome: Outcome) -> (usize, usize) {
    let mut state = run.state.lock();
    match outcome {
        Outcome::CacheHit { found } => {
            state.cache_hits += 1;
            if found {
                state.found += 1;
            }
        }
        Outcome::Recognized { found } => {
            if found {
                state.found += 1;
            }
        }
        Outcome::Skipped => {}
        Outcome::Failed(message) => {
            state.errors += 1;
            if is_fatal_error(&message) {
                run.aborted.store(true, Ordering::SeqCst);
            }
            state.last_error = message;
        }
    }
    state.completed += 1;
    if run.aborted.load(Ordering::SeqCst) {
        state.status = ScanStatus::Error;
    }
    run.publisher.publish(state.clone());
    (state.completed, state.total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image2text::RelayError;
    use crate::image_utils::{encode_data_url, FetchError, FetchedImage, NormalizeConfig};
    use crate::injector::ANNOTATION_CLASS;
    use crate::page::{Document, ElementData, NodeKind};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;

    fn png(seed: u8) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([seed, seed, seed]));
        let mut buffer = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
            .unwrap();
        buffer
    }

    fn fetched(seed: u8) -> FetchedImage {
        FetchedImage {
            bytes: png(seed),
            content_type: Some("image/png".to_string()),
        }
    }

    /// Serves `https://x/<n>.png` as a distinct PNG per `n`.
    struct MockFetcher;

    #[async_trait]
    impl ImageFetcher for MockFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedImage, FetchError> {
            let seed = url
                .trim_start_matches("https://x/")
                .split('.')
                .next()
                .and_then(|n| n.parse::<u8>().ok())
                .ok_or_else(|| FetchError::UnsupportedUrl(url.to_string()))?;
            Ok(fetched(seed))
        }
    }

    /// Answers per image, keyed by the data URL the fetcher's image encodes to.
    struct MockRelay {
        answers: HashMap<String, Result<String, String>>,
        calls: AtomicUsize,
    }

    impl MockRelay {
        fn new(answers: &[(u8, Result<&str, &str>)]) -> Self {
            let answers = answers
                .iter()
                .map(|(seed, answer)| {
                    let key = encode_data_url(&fetched(*seed), &NormalizeConfig::default()).unwrap();
                    let value = answer.map(str::to_string).map_err(str::to_string);
                    (key, value)
                })
                .collect();
            Self {
                answers,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl OcrRelay for MockRelay {
        async fn recognize(&self, data_url: &str) -> Result<String, RelayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            match self.answers.get(data_url) {
                Some(Ok(text)) => Ok(text.clone()),
                Some(Err(e)) => Err(RelayError::Remote(e.clone())),
                None => Err(RelayError::Remote("unknown image".to_string())),
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        progress: Mutex<Vec<(usize, usize)>>,
        completed: AtomicUsize,
    }

    #[async_trait]
    impl ProgressSink for RecordingSink {
        async fn progress(&self, completed: usize, total: usize) {
            self.progress.lock().push((completed, total));
        }
        async fn complete(&self) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn page(image_ids: &[u8]) -> SharedDocument {
        let mut doc = Document::new(Some("https://x/index.html"), ElementData::new("html"));
        let body = doc.append_element(doc.root(), ElementData::new("body")).unwrap();
        let p = doc.append_element(body, ElementData::new("p")).unwrap();
        doc.append_text(p, "日本語のページ").unwrap();
        for id in image_ids {
            let img = ElementData::new("img")
                .with_attr("src", &format!("/{}.png", id))
                .with_rect(200.0, 100.0);
            doc.append_element(body, img).unwrap();
        }
        doc.into_shared()
    }

    fn annotations(doc: &SharedDocument) -> Vec<String> {
        let doc = doc.lock();
        doc.elements()
            .into_iter()
            .filter(|k| doc.element(*k).is_some_and(|el| el.has_class(ANNOTATION_CLASS)))
            .map(|k| {
                doc.children(k)
                    .iter()
                    .filter_map(|c| match &doc.node(*c)?.kind {
                        NodeKind::Text(t) => Some(t.clone()),
                        _ => None,
                    })
                    .collect::<String>()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_mixed_cache_and_remote_scan() {
        let store = LocalStore::open_in_memory().unwrap();
        store.put_ocr_entry("https://x/1.png", "東京").unwrap();
        store.put_ocr_entry("https://x/2.png", "大阪").unwrap();
        store.put_ocr_entry("https://x/3.png", "hello").unwrap();

        let relay = Arc::new(MockRelay::new(&[(4, Ok("京都")), (5, Ok("奈良 市"))]));
        let sink = Arc::new(RecordingSink::default());
        let scanner = Scanner::new(Arc::new(MockFetcher), relay.clone())
            .with_store(store.clone())
            .with_sink(sink.clone());

        let doc = page(&[1, 2, 3, 4, 5]);
        let state = ScanStateStore::new();
        let result = scanner.run(&doc, &state).await;

        assert_eq!(result.status, ScanStatus::Done);
        assert_eq!(result.total, 5);
        assert_eq!(result.completed, 5);
        assert_eq!(result.found, 4);
        assert_eq!(result.cache_hits, 3);
        assert_eq!(result.errors, 0);
        assert_eq!(relay.calls(), 2);
        assert_eq!(state.snapshot(), Some(result));

        let mut texts = annotations(&doc);
        texts.sort();
        assert_eq!(texts, vec!["京都", "大阪", "奈良市", "東京"]);

        assert_eq!(sink.progress.lock().len(), 5);
        assert_eq!(sink.completed.load(Ordering::SeqCst), 1);

        let cache = store.load_ocr_cache().unwrap();
        assert_eq!(cache.get("https://x/5.png").map(String::as_str), Some("奈良 市"));
    }

    #[tokio::test]
    async fn test_rescan_is_served_from_cache() {
        let store = LocalStore::open_in_memory().unwrap();
        let relay = Arc::new(MockRelay::new(&[(1, Ok("東京")), (2, Ok("")), (3, Ok("abc"))]));
        let scanner = Scanner::new(Arc::new(MockFetcher), relay.clone()).with_store(store);

        let first = scanner.run(&page(&[1, 2, 3]), &ScanStateStore::new()).await;
        assert_eq!(first.cache_hits, 0);
        assert_eq!(relay.calls(), 3);

        let second = scanner.run(&page(&[1, 2, 3]), &ScanStateStore::new()).await;
        assert_eq!(second.status, ScanStatus::Done);
        assert_eq!(second.cache_hits, second.total);
        assert_eq!(second.found, 1);
        assert_eq!(relay.calls(), 3);
    }

    #[tokio::test]
    async fn test_query_string_variants_share_cache_entry() {
        let store = LocalStore::open_in_memory().unwrap();
        store.put_ocr_entry("https://x/1.png", "東京").unwrap();
        let relay = Arc::new(MockRelay::new(&[]));
        let scanner = Scanner::new(Arc::new(MockFetcher), relay.clone()).with_store(store);

        let mut doc = Document::new(Some("https://x/"), ElementData::new("html"));
        let body = doc.append_element(doc.root(), ElementData::new("body")).unwrap();
        doc.append_element(body, ElementData::new("img").with_attr("src", "/1.png?v=3").with_rect(50.0, 50.0))
            .unwrap();
        let doc = doc.into_shared();

        let result = scanner.run(&doc, &ScanStateStore::new()).await;
        assert_eq!(result.cache_hits, 1);
        assert_eq!(result.found, 1);
        assert_eq!(relay.calls(), 0);
    }

    #[tokio::test]
    async fn test_fatal_error_stops_dispatch() {
        let answers: Vec<(u8, Result<&str, &str>)> = (1..=6)
            .map(|i| (i, Err("Anthropic API error 401: unauthorized")))
            .collect();
        let relay = Arc::new(MockRelay::new(&answers));
        let scanner = Scanner::new(Arc::new(MockFetcher), relay.clone()).with_config(ScanConfig {
            concurrency: 1,
            ..ScanConfig::default()
        });

        let state = ScanStateStore::new();
        let result = scanner.run(&page(&[1, 2, 3, 4, 5, 6]), &state).await;

        assert_eq!(result.status, ScanStatus::Error);
        assert_eq!(result.total, 6);
        assert_eq!(result.completed, 1);
        assert_eq!(result.errors, 1);
        assert_eq!(result.last_error, "Anthropic API error 401: unauthorized");
        assert_eq!(relay.calls(), 1);
        assert_eq!(state.snapshot().unwrap().status, ScanStatus::Error);
    }

    #[tokio::test]
    async fn test_fatal_error_with_parallel_workers_still_terminates() {
        let answers: Vec<(u8, Result<&str, &str>)> = (1..=9)
            .map(|i| (i, Err("Your credit balance is too low")))
            .collect();
        let relay = Arc::new(MockRelay::new(&answers));
        let scanner = Scanner::new(Arc::new(MockFetcher), relay.clone());

        let result = scanner.run(&page(&[1, 2, 3, 4, 5, 6, 7, 8, 9]), &ScanStateStore::new()).await;
        assert_eq!(result.status, ScanStatus::Error);
        assert!(result.completed <= result.total);
        assert!(result.completed < 9);
        assert_eq!(result.errors, result.completed);
    }

    #[tokio::test]
    async fn test_non_fatal_errors_and_broken_images() {
        let relay = Arc::new(MockRelay::new(&[(1, Err("Anthropic API error 529: overloaded")), (2, Ok("名古屋"))]));
        let scanner = Scanner::new(Arc::new(MockFetcher), relay.clone());

        let mut doc = Document::new(Some("https://x/"), ElementData::new("html"));
        let body = doc.append_element(doc.root(), ElementData::new("body")).unwrap();
        for src in ["/1.png", "/2.png", "/broken.png"] {
            doc.append_element(body, ElementData::new("img").with_attr("src", src).with_rect(50.0, 50.0))
                .unwrap();
        }
        let doc = doc.into_shared();

        let result = scanner.run(&doc, &ScanStateStore::new()).await;
        assert_eq!(result.status, ScanStatus::Done);
        assert_eq!(result.completed, 3);
        assert_eq!(result.errors, 1);
        assert_eq!(result.found, 1);
        assert_eq!(relay.calls(), 2);
        assert_eq!(annotations(&doc), vec!["名古屋"]);
    }

    #[tokio::test]
    async fn test_non_japanese_text_is_never_injected() {
        let relay = Arc::new(MockRelay::new(&[(1, Ok("SALE 50% OFF")), (2, Ok("   "))]));
        let scanner = Scanner::new(Arc::new(MockFetcher), relay);

        let doc = page(&[1, 2]);
        let result = scanner.run(&doc, &ScanStateStore::new()).await;
        assert_eq!(result.status, ScanStatus::Done);
        assert_eq!(result.found, 0);
        assert!(annotations(&doc).is_empty());
    }

    #[tokio::test]
    async fn test_empty_page_completes() {
        let sink = Arc::new(RecordingSink::default());
        let scanner = Scanner::new(Arc::new(MockFetcher), Arc::new(MockRelay::new(&[]))).with_sink(sink.clone());

        let result = scanner.run(&page(&[]), &ScanStateStore::new()).await;
        assert_eq!(result.status, ScanStatus::Done);
        assert_eq!(result.total, 0);
        assert_eq!(sink.completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_published_snapshots_are_monotonic() {
        let answers: Vec<(u8, Result<&str, &str>)> = (1..=8).map(|i| (i, Ok("文字"))).collect();
        let scanner = Scanner::new(Arc::new(MockFetcher), Arc::new(MockRelay::new(&answers)));

        let state = ScanStateStore::new();
        let mut rx = state.subscribe();
        let watcher = tokio::spawn(async move {
            let mut last = 0;
            while rx.changed().await.is_ok() {
                let Some(snapshot) = rx.borrow_and_update().clone() else {
                    continue;
                };
                assert!(snapshot.completed >= last);
                last = snapshot.completed;
                if !snapshot.is_scanning() {
                    break;
                }
            }
            last
        });

        let result = scanner.run(&page(&[1, 2, 3, 4, 5, 6, 7, 8]), &state).await;
        assert_eq!(result.found, 8);
        assert_eq!(watcher.await.unwrap(), 8);
    }

    /// Holds every request until `target` of them are in flight at once.
    struct CountingRelay {
        target: usize,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    impl CountingRelay {
        fn new(target: usize) -> Self {
            Self {
                target,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl OcrRelay for CountingRelay {
        async fn recognize(&self, _data_url: &str) -> Result<String, RelayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            while self.peak.load(Ordering::SeqCst) < self.target {
                tokio::time::sleep(std::time::Duration::from_millis(2)).await;
            }
            tokio::task::yield_now().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok("東京".to_string())
        }
    }

    #[tokio::test]
    async fn test_in_flight_requests_never_exceed_concurrency() {
        let ids: Vec<u8> = (1..=9).collect();
        for config in [
            ScanConfig::default(),
            ScanConfig {
                concurrency: 1,
                ..ScanConfig::default()
            },
        ] {
            let limit = config.concurrency;
            let relay = Arc::new(CountingRelay::new(limit));
            let scanner = Scanner::new(Arc::new(MockFetcher), relay.clone()).with_config(config);

            let result = tokio::time::timeout(
                std::time::Duration::from_secs(10),
                scanner.run(&page(&ids), &ScanStateStore::new()),
            )
            .await
            .unwrap();

            assert_eq!(result.completed, 9);
            assert_eq!(result.found, 9);
            assert_eq!(relay.calls.load(Ordering::SeqCst), 9);
            assert_eq!(relay.peak.load(Ordering::SeqCst), limit);
        }
        assert_eq!(ScanConfig::default().concurrency, 3);
    }
}
