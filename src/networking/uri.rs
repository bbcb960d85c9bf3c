use crate::networking::error::NetworkError;
use std::fmt;

/// Parsed absolute URL. The fragment is dropped at parse time: two URLs that
/// differ only in fragment address the same resource, and the canonical form
/// is what the crawler keys its visited set on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
    scheme: String,
    host: String,
    port: Option<u16>,
    path: String,
    query: Option<String>,
}

impl Uri {
    /// Parse an absolute URL. A missing scheme defaults to `http`.
    pub fn parse(input: &str) -> Result<Self, NetworkError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(NetworkError::InvalidUri(input.to_string()));
        }

        // Fragments never reach the wire.
        let input = match input.split_once('#') {
            Some((before, _)) => before,
            None => input,
        };

        let (scheme, remainder) = match split_scheme(input) {
            Some((scheme, rest)) => (scheme, rest),
            None => ("http".to_string(), input),
        };
        if scheme.is_empty() || remainder.is_empty() {
            return Err(NetworkError::InvalidUri(input.to_string()));
        }

        let (authority, path_and_query) = match remainder.find(['/', '?']) {
            Some(idx) if remainder.as_bytes()[idx] == b'/' => remainder.split_at(idx),
            Some(idx) => (&remainder[..idx], &remainder[idx..]),
            None => (remainder, ""),
        };

        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) if !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()) => {
                let port = p
                    .parse::<u16>()
                    .map_err(|_| NetworkError::InvalidUri(input.to_string()))?;
                (h, Some(port))
            }
            _ => (authority, None),
        };
        if host.is_empty() {
            return Err(NetworkError::InvalidUri(input.to_string()));
        }

        let (path, query) = match path_and_query.split_once('?') {
            Some((p, q)) => (p, Some(q.to_string())),
            None => (path_and_query, None),
        };
        let path = if path.is_empty() {
            "/".to_string()
        } else {
            path.to_string()
        };

        Ok(Self {
            scheme,
            host: host.to_ascii_lowercase(),
            port,
            path,
            query,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn is_https(&self) -> bool {
        self.scheme == "https"
    }

    pub fn default_port(&self) -> u16 {
        if self.is_https() { 443 } else { 80 }
    }

    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or_else(|| self.default_port())
    }

    /// Path plus query, as written on the request line.
    pub fn request_target(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }

    /// Canonical string form: default ports suppressed, no fragment.
    /// This is the frontier / visited-set key.
    pub fn canonical(&self) -> String {
        let mut out = format!("{}://{}", self.scheme, self.host);
        if let Some(port) = self.port {
            if port != self.default_port() {
                out.push(':');
                out.push_str(&port.to_string());
            }
        }
        out.push_str(&self.path);
        if let Some(q) = &self.query {
            out.push('?');
            out.push_str(q);
        }
        out
    }

    /// `scheme://host[:port]` with default ports suppressed.
    pub fn origin(&self) -> String {
        let mut out = format!("{}://{}", self.scheme, self.host);
        if let Some(port) = self.port {
            if port != self.default_port() {
                out.push(':');
                out.push_str(&port.to_string());
            }
        }
        out
    }

    /// Resolve a reference found in a document fetched from `self`.
    /// Permissive on purpose: spaces and a handful of characters that never
    /// belong in a raw URL are percent-encoded rather than rejected.
    pub fn resolve_reference(&self, reference: &str) -> Result<Uri, NetworkError> {
        let reference = reference.trim();
        let reference = match reference.split_once('#') {
            Some((before, _)) => before,
            None => reference,
        };
        if reference.is_empty() {
            // Fragment-only reference: same resource.
            return Ok(self.clone());
        }

        let encoded = percent_encode_unsafe(reference);

        // A reference with its own scheme (http://, mailto:, javascript:)
        // stands alone; the caller decides whether its scheme is fetchable.
        if split_scheme(&encoded).is_some() {
            return Uri::parse(&encoded);
        }
        if let Some(rest) = encoded.strip_prefix("//") {
            return Uri::parse(&format!("{}://{}", self.scheme, rest));
        }
        if encoded.starts_with('/') {
            return Uri::parse(&format!("{}{}", self.origin(), encoded));
        }
        if let Some(query) = encoded.strip_prefix('?') {
            let mut out = self.clone();
            out.query = Some(query.to_string());
            return Ok(out);
        }

        // Relative to the directory portion of the base path.
        let dir = match self.path.rfind('/') {
            Some(idx) => &self.path[..=idx],
            None => "/",
        };
        let joined = remove_dot_segments(&format!("{}{}", dir, encoded));
        Uri::parse(&format!("{}{}", self.origin(), joined))
    }

    /// Registrable domain of this URL's host. See [`registrable_domain`].
    pub fn registrable_domain(&self) -> &str {
        registrable_domain(&self.host)
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

/// Split an explicit scheme off the front of `input`, if there is one.
/// `host:port` shapes are not schemes: a purely numeric remainder keeps
/// the whole string as authority.
fn split_scheme(input: &str) -> Option<(String, &str)> {
    if let Some((scheme, rest)) = input.split_once("://") {
        if is_scheme_name(scheme) {
            return Some((scheme.to_ascii_lowercase(), rest));
        }
        return None;
    }
    let (scheme, rest) = input.split_once(':')?;
    if !is_scheme_name(scheme) {
        return None;
    }
    if rest.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return None;
    }
    Some((scheme.to_ascii_lowercase(), rest))
}

fn is_scheme_name(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    first.is_ascii_alphabetic()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Approximate the "public suffix + one label" boundary: IP literals come
/// back verbatim, anything else yields the last two dot-separated labels.
/// Wrong for multi-label suffixes like `co.uk`; a real answer needs the
/// Public Suffix List, which this crate deliberately does not carry.
pub fn registrable_domain(host: &str) -> &str {
    if host.contains(':') || is_ipv4_literal(host) {
        return host;
    }
    match host.rmatch_indices('.').nth(1) {
        Some((idx, _)) => &host[idx + 1..],
        None => host,
    }
}

fn is_ipv4_literal(host: &str) -> bool {
    let mut labels = 0;
    for label in host.split('.') {
        if label.is_empty() || label.len() > 3 || !label.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        labels += 1;
    }
    labels == 4
}

/// Percent-encode characters that cannot appear raw in a request target.
fn percent_encode_unsafe(input: &str) -> String {
    const UNSAFE: &[char] = &[' ', '"', '<', '>', '\\', '^', '`', '{', '|', '}'];
    if !input.contains(UNSAFE) {
        return input.to_string();
    }
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if UNSAFE.contains(&ch) {
            let mut buf = [0u8; 4];
            for byte in ch.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{:02X}", byte));
            }
        } else {
            out.push(ch);
        }
    }
    out
}

/// Collapse `.` and `..` path segments. Never escapes above the root.
fn remove_dot_segments(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    let trailing_slash = path.ends_with('/') || path.ends_with("/.") || path.ends_with("/..");
    let mut out = String::from("/");
    out.push_str(
        &segments
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("/"),
    );
    if trailing_slash && out.len() > 1 {
        out.push('/');
    }
    out
}
