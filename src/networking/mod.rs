mod cookie;
mod error;
mod http;
mod pool;
mod tcp;
mod tls;
mod uri;
mod user_agent;

pub use cookie::{Cookie, CookieJar};
pub use error::NetworkError;
pub use http::{
    DEFAULT_MAX_BODY_BYTES, DEFAULT_TIMEOUT_MS, Headers, Method, MultipartPart, Request,
    RequestBuilder, Response, Status, Version,
};
pub use tls::TlsContext;
pub use uri::{Uri, registrable_domain};

use chrono::Utc;
use pool::ConnectionPool;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};
use tokio::sync::{Mutex, mpsc, oneshot};

const MAX_REDIRECTS: usize = 10;

/// Identifies one in-flight transfer from submit to completion.
pub type TransferId = u64;

/// Terminal event of a submitted transfer. Exactly one per transfer unless
/// it was cancelled, in which case none.
#[derive(Debug)]
pub struct Completion {
    pub id: TransferId,
    pub result: Result<Response, NetworkError>,
}

struct TransferState {
    cancelled: Arc<AtomicBool>,
    abort: tokio::task::AbortHandle,
}

/// Asynchronous HTTP/HTTPS client driving many concurrent transfers.
///
/// `submit` starts a transfer and returns immediately; the terminal event
/// arrives on the completion channel handed out by `new`. `fetch` is the
/// direct awaitable form. Both share the cookie jar, the TLS context and
/// the keep-alive pool.
pub struct HttpClient {
    pool: ConnectionPool,
    tls: TlsContext,
    cookies: Mutex<CookieJar>,
    transfers: StdMutex<HashMap<TransferId, TransferState>>,
    next_id: AtomicU64,
    completions_tx: mpsc::UnboundedSender<Completion>,
}

impl HttpClient {
    pub fn new(
        tls: TlsContext,
        cookies: CookieJar,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Completion>) {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let client = Arc::new(Self {
            pool: ConnectionPool::new(),
            tls,
            cookies: Mutex::new(cookies),
            transfers: StdMutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            completions_tx,
        });
        (client, completions_rx)
    }

    /// Start a transfer. The result is delivered as a [`Completion`] unless
    /// the transfer is cancelled first.
    pub fn submit(self: &Arc<Self>, request: Request) -> TransferId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let client = Arc::clone(self);
        let (registered_tx, registered_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            // The transfer table entry must exist before the transfer can
            // finish, or the completion would be misattributed.
            let _ = registered_rx.await;

            let deadline = request.timeout;
            let result = match tokio::time::timeout(deadline, client.fetch(request)).await {
                Ok(result) => result,
                Err(_) => Err(NetworkError::Timeout(format!(
                    "deadline of {} ms exceeded",
                    deadline.as_millis()
                ))),
            };

            let registered = client.lock_transfers().remove(&id);
            if registered.is_some() && !flag.load(Ordering::SeqCst) {
                let _ = client.completions_tx.send(Completion { id, result });
            }
        });

        self.lock_transfers().insert(
            id,
            TransferState {
                cancelled,
                abort: handle.abort_handle(),
            },
        );
        let _ = registered_tx.send(());
        id
    }

    /// Cancel an in-flight transfer: no completion will be delivered for it
    /// after this returns. Unknown or already-finished ids are a no-op.
    pub fn cancel(&self, id: TransferId) {
        if let Some(state) = self.lock_transfers().remove(&id) {
            state.cancelled.store(true, Ordering::SeqCst);
            state.abort.abort();
            log::debug!(target: "network", "Cancelled transfer {}", id);
        }
    }

    /// Cancel everything still in flight (client teardown).
    pub fn cancel_all(&self) {
        let drained: Vec<TransferState> = {
            let mut transfers = self.lock_transfers();
            transfers.drain().map(|(_, state)| state).collect()
        };
        for state in drained {
            state.cancelled.store(true, Ordering::SeqCst);
            state.abort.abort();
        }
    }

    /// Number of transfers currently in flight.
    pub fn in_flight(&self) -> usize {
        self.lock_transfers().len()
    }

    pub async fn lock_cookies(&self) -> tokio::sync::MutexGuard<'_, CookieJar> {
        self.cookies.lock().await
    }

    fn lock_transfers(&self) -> StdMutexGuard<'_, HashMap<TransferId, TransferState>> {
        self.transfers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Perform a request, following redirects. Cookies are read before each
    /// hop and stored from each hop's response headers; the returned
    /// response carries the URL of the final hop.
    pub async fn fetch(&self, request: Request) -> Result<Response, NetworkError> {
        let mut url = request.url.clone();
        let mut method = request.method;
        let mut body = request.body.clone();

        for _ in 0..MAX_REDIRECTS {
            let raw = self.perform_hop(&url, method, &body, &request).await?;

            if raw.status.is_redirect() {
                if let Some(location) = raw.headers.get("location") {
                    let next = url.resolve_reference(location)?;
                    // 303 always re-issues as GET; 301/302 do for POST.
                    if raw.status.code == 303
                        || (matches!(raw.status.code, 301 | 302) && method == Method::Post)
                    {
                        method = Method::Get;
                        body.clear();
                    }
                    log::debug!(
                        target: "network",
                        "Redirect {} from {} to {}",
                        raw.status.code, url, next
                    );
                    url = next;
                    continue;
                }
            }

            return Ok(Response {
                effective_url: url,
                version: raw.version,
                status: raw.status,
                headers: raw.headers,
                body: raw.body,
            });
        }

        Err(NetworkError::TooManyRedirects)
    }

    async fn perform_hop(
        &self,
        url: &Uri,
        method: Method,
        body: &[u8],
        request: &Request,
    ) -> Result<tcp::RawResponse, NetworkError> {
        let mut connection = self.pool.get(url, &self.tls).await?;

        let wire = self.build_wire_request(url, method, body, request).await;
        let raw = connection
            .send_request(&wire, request.max_body_bytes)
            .await?;

        let set_cookies = raw.headers.get_all("set-cookie");
        if !set_cookies.is_empty() {
            let now = Utc::now().timestamp();
            let mut jar = self.cookies.lock().await;
            for header in set_cookies {
                jar.store(header, url.host(), url.path(), url.is_https(), now);
            }
        }

        if connection.is_keep_alive() {
            self.pool.put(url, connection).await;
        }

        Ok(raw)
    }

    async fn build_wire_request(
        &self,
        url: &Uri,
        method: Method,
        body: &[u8],
        request: &Request,
    ) -> Vec<u8> {
        let host_header = if url.port().is_some_and(|p| p != url.default_port()) {
            format!("{}:{}", url.host(), url.port_or_default())
        } else {
            url.host().to_string()
        };

        let mut headers: Vec<(String, String)> = vec![
            ("Host".to_string(), host_header),
            ("Connection".to_string(), "keep-alive".to_string()),
            ("User-Agent".to_string(), user_agent::user_agent()),
            (
                "Accept".to_string(),
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string(),
            ),
            (
                "Accept-Encoding".to_string(),
                "gzip, deflate, identity".to_string(),
            ),
            ("Accept-Language".to_string(), "en-US,en;q=0.9".to_string()),
        ];

        {
            let now = Utc::now().timestamp();
            let mut jar = self.cookies.lock().await;
            if let Some(cookie_header) =
                jar.cookie_header(url.host(), url.path(), url.is_https(), now)
            {
                headers.push(("Cookie".to_string(), cookie_header));
            }
        }

        for (name, value) in &request.extra_headers {
            headers.push((name.clone(), value.clone()));
        }

        if !body.is_empty() || matches!(method, Method::Post | Method::Put) {
            headers.push(("Content-Length".to_string(), body.len().to_string()));
        }

        http::write_request_bytes(
            method,
            &url.request_target(),
            Version::Http11,
            &headers,
            body,
        )
    }
}
