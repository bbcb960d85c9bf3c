use crate::extract::{ExtractError, LinkExtractor};
use crate::networking::{
    Completion, CookieJar, HttpClient, NetworkError, Request, TlsContext, TransferId, Uri,
};
use crate::reactor::StopHandle;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Upper bound on concurrent transfers.
    pub parallelism: usize,
    /// Links discovered at this depth are the last ones followed.
    pub max_depth: u32,
    /// Hard cap on a single page body, pre- and post-decompression.
    pub max_page_size: usize,
    pub request_timeout_ms: u64,
    /// Netscape-format cookie file loaded at start and saved at the end of
    /// a run. Absence of the file is fine.
    pub cookie_file: Option<PathBuf>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            max_depth: 2,
            max_page_size: crate::networking::DEFAULT_MAX_BODY_BYTES,
            request_timeout_ms: crate::networking::DEFAULT_TIMEOUT_MS,
            cookie_file: None,
        }
    }
}

#[derive(Debug)]
pub enum CrawlError {
    InvalidConfig(String),
    Network(NetworkError),
    Extractor(ExtractError),
}

impl std::error::Error for CrawlError {}

impl fmt::Display for CrawlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrawlError::InvalidConfig(e) => write!(f, "invalid configuration: {}", e),
            CrawlError::Network(e) => write!(f, "network initialization failed: {}", e),
            CrawlError::Extractor(e) => write!(f, "{}", e),
        }
    }
}

impl From<NetworkError> for CrawlError {
    fn from(e: NetworkError) -> Self {
        CrawlError::Network(e)
    }
}

impl From<ExtractError> for CrawlError {
    fn from(e: ExtractError) -> Self {
        CrawlError::Extractor(e)
    }
}

/// A successfully fetched page, handed to the page callback.
pub struct CrawledPage<'a> {
    /// URL of the final hop after redirects.
    pub url: &'a Uri,
    pub status: u16,
    pub content_type: &'a str,
    pub body: &'a [u8],
    pub depth: u32,
}

/// A URL that reached a terminal failure, handed to the error callback.
pub struct CrawlFailure<'a> {
    pub url: &'a str,
    /// HTTP status when the server answered; 0 for transport failures.
    pub status: u16,
    pub error: Option<&'a NetworkError>,
    pub depth: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CrawlStats {
    pub crawled: usize,
    pub failed: usize,
    pub peak_in_flight: usize,
}

type PageHandler = Box<dyn FnMut(&CrawledPage)>;
type ErrorHandler = Box<dyn FnMut(&CrawlFailure)>;

struct FrontierEntry {
    url: Uri,
    depth: u32,
}

/// The crawl coordinator: frontier FIFO, visited set, dispatcher and
/// completion handling. URLs are marked visited when dispatched, not when
/// enqueued, so a URL discovered twice before its fetch still runs once.
pub struct Crawler {
    client: Arc<HttpClient>,
    completions: mpsc::UnboundedReceiver<Completion>,
    extractor: LinkExtractor,
    config: CrawlConfig,
    frontier: VecDeque<FrontierEntry>,
    visited: HashSet<String>,
    pending: HashMap<TransferId, FrontierEntry>,
    page_handler: Option<PageHandler>,
    error_handler: Option<ErrorHandler>,
    stop: StopHandle,
    stats: CrawlStats,
}

impl Crawler {
    pub fn new(config: CrawlConfig, stop: StopHandle) -> Result<Self, CrawlError> {
        if config.parallelism == 0 {
            return Err(CrawlError::InvalidConfig(
                "parallelism must be at least 1".to_string(),
            ));
        }

        let tls = TlsContext::new()?;
        let extractor = LinkExtractor::new()?;

        let mut jar = CookieJar::new();
        if let Some(path) = &config.cookie_file {
            match jar.load_from(path) {
                Ok(count) if count > 0 => {
                    log::info!(target: "crawler", "Loaded {} cookies from {}", count, path.display());
                }
                Ok(_) => {}
                Err(e) => {
                    log::warn!(target: "crawler", "Could not read cookie file {}: {}", path.display(), e);
                }
            }
        }

        let (client, completions) = HttpClient::new(tls, jar);

        Ok(Self {
            client,
            completions,
            extractor,
            config,
            frontier: VecDeque::new(),
            visited: HashSet::new(),
            pending: HashMap::new(),
            page_handler: None,
            error_handler: None,
            stop,
            stats: CrawlStats::default(),
        })
    }

    pub fn on_page(&mut self, handler: impl FnMut(&CrawledPage) + 'static) {
        self.page_handler = Some(Box::new(handler));
    }

    pub fn on_error(&mut self, handler: impl FnMut(&CrawlFailure) + 'static) {
        self.error_handler = Some(Box::new(handler));
    }

    /// Enqueue a seed URL at depth 0. Returns false for empty or
    /// unparsable input and for URLs already visited.
    pub fn add_url(&mut self, url: &str) -> bool {
        if url.trim().is_empty() {
            log::warn!(target: "crawler", "Attempted to add empty URL.");
            return false;
        }
        match Uri::parse(url) {
            Ok(parsed) => self.enqueue(parsed, 0),
            Err(e) => {
                log::warn!(target: "crawler", "Rejecting seed '{}': {}", url, e);
                false
            }
        }
    }

    fn enqueue(&mut self, url: Uri, depth: u32) -> bool {
        if url.scheme() != "http" && url.scheme() != "https" {
            log::debug!(target: "crawler", "Skipping unsupported scheme: {}", url);
            return false;
        }
        if self.visited.contains(&url.canonical()) {
            return false;
        }
        log::debug!(target: "crawler", "{} (queue size: {})", url, self.frontier.len() + 1);
        self.frontier.push_back(FrontierEntry { url, depth });
        true
    }

    /// Drive the crawl until the frontier drains and the last transfer
    /// completes, or until the stop handle fires.
    pub async fn run(&mut self) -> CrawlStats {
        self.dispatch();

        while !(self.pending.is_empty() && self.frontier.is_empty()) {
            let stop = self.stop.clone();
            tokio::select! {
                biased;
                _ = stop.stopped() => {
                    log::info!(target: "crawler", "Stop requested with {} transfers in flight", self.pending.len());
                    break;
                }
                completion = self.completions.recv() => {
                    let Some(completion) = completion else { break };
                    self.on_completion(completion);
                    self.dispatch();
                }
            }
        }

        // Stragglers only exist on the stop path; cancelled transfers get
        // neither callback.
        self.client.cancel_all();
        self.pending.clear();

        if let Some(path) = &self.config.cookie_file {
            if let Err(e) = self.client.lock_cookies().await.save_to(path) {
                log::warn!(target: "crawler", "Could not save cookie file {}: {}", path.display(), e);
            }
        }

        log::info!(
            target: "crawler",
            "Crawl finished: {} pages, {} failures",
            self.stats.crawled, self.stats.failed
        );
        self.stats
    }

    /// Fill free transfer slots from the frontier head. Visited and
    /// over-depth entries are discarded here, at dispatch time.
    fn dispatch(&mut self) {
        while self.pending.len() < self.config.parallelism && !self.stop.is_stopped() {
            let Some(entry) = self.frontier.pop_front() else {
                break;
            };

            let key = entry.url.canonical();
            if self.visited.contains(&key) {
                continue;
            }
            if entry.depth > self.config.max_depth {
                log::debug!(target: "crawler", "Skipping {} (depth {} beyond cap)", key, entry.depth);
                continue;
            }
            self.visited.insert(key);

            let request = Request::get(&entry.url.canonical())
                .timeout_ms(self.config.request_timeout_ms)
                .max_body_bytes(self.config.max_page_size)
                .build();
            let request = match request {
                Ok(request) => request,
                Err(e) => {
                    log::warn!(target: "crawler", "Could not build request for {}: {}", entry.url, e);
                    continue;
                }
            };

            log::debug!(target: "crawler", "Dispatching {} (depth {})", entry.url, entry.depth);
            let id = self.client.submit(request);
            self.pending.insert(id, entry);
            self.stats.peak_in_flight = self.stats.peak_in_flight.max(self.pending.len());
        }
    }

    fn on_completion(&mut self, completion: Completion) {
        let Some(entry) = self.pending.remove(&completion.id) else {
            log::debug!(target: "crawler", "Completion for unknown transfer {}", completion.id);
            return;
        };

        match completion.result {
            Ok(response) if response.status.is_success() => {
                log::info!(
                    target: "crawler",
                    "Crawled {} (HTTP {}, {} bytes)",
                    response.effective_url, response.status.code, response.body.len()
                );
                self.stats.crawled += 1;

                // Redirect targets count as visited too, or a link to the
                // final location would fetch the same content again.
                self.visited.insert(response.effective_url.canonical());

                if let Some(handler) = self.page_handler.as_mut() {
                    handler(&CrawledPage {
                        url: &response.effective_url,
                        status: response.status.code,
                        content_type: response.content_type(),
                        body: &response.body,
                        depth: entry.depth,
                    });
                }

                if entry.depth < self.config.max_depth {
                    self.collect_links(&response, entry.depth);
                }
            }
            Ok(response) => {
                log::warn!(
                    target: "crawler",
                    "{} returned HTTP {}",
                    response.effective_url, response.status.code
                );
                self.stats.failed += 1;
                if let Some(handler) = self.error_handler.as_mut() {
                    handler(&CrawlFailure {
                        url: &response.effective_url.canonical(),
                        status: response.status.code,
                        error: None,
                        depth: entry.depth,
                    });
                }
            }
            Err(error) => {
                log::warn!(target: "crawler", "Failed to crawl {}: {}", entry.url, error);
                self.stats.failed += 1;
                if let Some(handler) = self.error_handler.as_mut() {
                    handler(&CrawlFailure {
                        url: &entry.url.canonical(),
                        status: 0,
                        error: Some(&error),
                        depth: entry.depth,
                    });
                }
            }
        }
    }

    fn collect_links(&mut self, response: &crate::networking::Response, depth: u32) {
        let candidates = self.extractor.extract(
            &response.body,
            response.content_type(),
            &response.effective_url,
        );
        let mut added = 0usize;
        for candidate in candidates {
            match response.effective_url.resolve_reference(&candidate) {
                Ok(resolved) => {
                    if self.enqueue(resolved, depth + 1) {
                        added += 1;
                    }
                }
                Err(e) => {
                    log::debug!(target: "crawler", "Could not resolve '{}': {}", candidate, e);
                }
            }
        }
        if added > 0 {
            log::debug!(
                target: "crawler",
                "{} new URLs from {}",
                added, response.effective_url
            );
        }
    }
}
