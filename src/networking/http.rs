use crate::networking::error::NetworkError;
use crate::networking::uri::Uri;
use std::collections::HashMap;
use std::time::Duration;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Http10,
    Http11,
}

impl Version {
    pub fn as_str(&self) -> &'static str {
        match self {
            Version::Http10 => "HTTP/1.0",
            Version::Http11 => "HTTP/1.1",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Status {
    pub code: u16,
    pub text: String,
}

impl Status {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code)
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self.code, 301 | 302 | 303 | 307 | 308)
    }
}

/// Case-insensitive header map. Values for a repeated name keep arrival
/// order; `Set-Cookie` is the reason single values are not enough.
#[derive(Debug, Clone, Default)]
pub struct Headers(HashMap<String, Vec<String>>);

impl Headers {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn append(&mut self, name: &str, value: String) {
        self.0.entry(name.to_ascii_lowercase()).or_default().push(value);
    }

    /// First value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(&name.to_ascii_lowercase())
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    pub fn get_all(&self, name: &str) -> &[String] {
        self.0
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One request as submitted to the HTTP client. Redirect hops are handled
/// inside the client; callers only ever see the final response.
#[derive(Debug, Clone)]
pub struct Request {
    pub(crate) url: Uri,
    pub(crate) method: Method,
    pub(crate) body: Vec<u8>,
    pub(crate) extra_headers: Vec<(String, String)>,
    pub(crate) timeout: Duration,
    pub(crate) max_body_bytes: usize,
}

impl Request {
    pub fn get(url: &str) -> RequestBuilder {
        RequestBuilder::new(url).method(Method::Get)
    }

    pub fn post(url: &str, body: Vec<u8>) -> RequestBuilder {
        RequestBuilder::new(url).method(Method::Post).body(body)
    }

    /// POST with a `multipart/form-data` body built from `parts`.
    pub fn post_multipart(url: &str, parts: &[MultipartPart]) -> RequestBuilder {
        RequestBuilder::new(url).method(Method::Post).multipart(parts)
    }

    pub fn url(&self) -> &Uri {
        &self.url
    }
}

/// One field of a `multipart/form-data` body: a plain form value, or a file
/// when `filename` is set.
pub struct MultipartPart {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl MultipartPart {
    pub fn field(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            filename: None,
            content_type: None,
            data: value.as_bytes().to_vec(),
        }
    }

    pub fn file(name: &str, filename: &str, content_type: &str, data: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            filename: Some(filename.to_string()),
            content_type: Some(content_type.to_string()),
            data,
        }
    }
}

fn next_boundary() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    format!("----trawler{:08x}{:08x}", std::process::id(), seq)
}

fn encode_multipart(parts: &[MultipartPart], boundary: &str) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend(format!("--{boundary}\r\n").as_bytes());
        match &part.filename {
            Some(filename) => body.extend(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    part.name, filename
                )
                .as_bytes(),
            ),
            None => body.extend(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n", part.name).as_bytes(),
            ),
        }
        if let Some(content_type) = &part.content_type {
            body.extend(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        body.extend(b"\r\n");
        body.extend(&part.data);
        body.extend(b"\r\n");
    }
    body.extend(format!("--{boundary}--\r\n").as_bytes());
    body
}

pub struct RequestBuilder {
    url: String,
    method: Option<Method>,
    body: Vec<u8>,
    extra_headers: Vec<(String, String)>,
    timeout: Duration,
    max_body_bytes: usize,
}

impl RequestBuilder {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            method: None,
            body: Vec::new(),
            extra_headers: Vec::new(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    /// Replace the body with a `multipart/form-data` encoding of `parts`
    /// and set the matching Content-Type header.
    pub fn multipart(mut self, parts: &[MultipartPart]) -> Self {
        let boundary = next_boundary();
        self.body = encode_multipart(parts, &boundary);
        self.extra_headers.push((
            "Content-Type".to_string(),
            format!("multipart/form-data; boundary={boundary}"),
        ));
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout = Duration::from_millis(ms);
        self
    }

    pub fn max_body_bytes(mut self, bytes: usize) -> Self {
        self.max_body_bytes = bytes;
        self
    }

    pub fn build(self) -> Result<Request, NetworkError> {
        let method = self.method.ok_or(NetworkError::MissingMethod)?;
        if self.url.is_empty() {
            return Err(NetworkError::MissingUri);
        }
        let url = Uri::parse(&self.url)?;
        Ok(Request {
            url,
            method,
            body: self.body,
            extra_headers: self.extra_headers,
            timeout: self.timeout,
            max_body_bytes: self.max_body_bytes,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Response {
    /// URL of the final hop after redirects.
    pub effective_url: Uri,
    pub version: Version,
    pub status: Status,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Response {
    pub fn content_type(&self) -> &str {
        self.headers.get("content-type").unwrap_or("")
    }
}

/// Serialize one request-line + header block + body. Header order is the
/// caller's; clients rely on it for reproducible wire output.
pub(crate) fn write_request_bytes(
    method: Method,
    target: &str,
    version: Version,
    headers: &[(String, String)],
    body: &[u8],
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend(format!("{} {} {}\r\n", method.as_str(), target, version.as_str()).as_bytes());
    for (name, value) in headers {
        out.extend(format!("{}: {}\r\n", name, value).as_bytes());
    }
    out.extend(b"\r\n");
    out.extend(body);
    out
}
