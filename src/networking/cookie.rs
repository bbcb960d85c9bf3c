use chrono::{NaiveDateTime, Utc};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// One stored cookie. `domain` never carries a leading dot; `expires` is
/// UTC epoch seconds with 0 meaning a session cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub expires: i64,
    pub secure: bool,
    pub http_only: bool,
}

/// Per-origin cookie store: domain (lowercased, so ordering is
/// case-insensitive) to path (case-sensitive) to cookies in insertion
/// order. Insertion order within a bucket is what makes the emitted
/// `Cookie` header deterministic.
#[derive(Debug, Default)]
pub struct CookieJar {
    domains: BTreeMap<String, BTreeMap<String, Vec<Cookie>>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one `Set-Cookie` header value received from `request_host` and
    /// store it if it passes domain and Secure validation. Returns whether
    /// the cookie was stored.
    pub fn store(
        &mut self,
        set_cookie: &str,
        request_host: &str,
        request_path: &str,
        is_https: bool,
        now: i64,
    ) -> bool {
        let Some(cookie) = parse_set_cookie(set_cookie, request_host, request_path, now) else {
            log::warn!(target: "cookies", "Failed to parse Set-Cookie header: {}", set_cookie);
            return false;
        };

        if !domain_match(request_host, &cookie.domain) {
            log::warn!(
                target: "cookies",
                "Set-Cookie domain '{}' does not match request host '{}'. Dropping.",
                cookie.domain, request_host
            );
            return false;
        }

        if cookie.secure && !is_https {
            log::warn!(
                target: "cookies",
                "Received Secure cookie '{}' over HTTP. Dropping.", cookie.name
            );
            return false;
        }

        log::debug!(
            target: "cookies",
            "Storing cookie: {}={}; Domain={}; Path={}; Expires={}; Secure={}; HttpOnly={}",
            cookie.name, cookie.value, cookie.domain, cookie.path,
            cookie.expires, cookie.secure, cookie.http_only
        );

        self.insert(cookie);
        true
    }

    /// Upsert: within a (domain, path) bucket a name match (ASCII
    /// case-insensitive) evicts the old cookie and the new one joins at
    /// the tail.
    fn insert(&mut self, cookie: Cookie) {
        let bucket = self
            .domains
            .entry(cookie.domain.to_ascii_lowercase())
            .or_default()
            .entry(cookie.path.clone())
            .or_default();

        if let Some(idx) = bucket
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(&cookie.name))
        {
            log::debug!(
                target: "cookies",
                "Replacing existing cookie '{}' for Domain={}, Path={}.",
                bucket[idx].name, cookie.domain, cookie.path
            );
            bucket.remove(idx);
        }
        bucket.push(cookie);
    }

    /// Assemble the `Cookie` header for a request to `host` + `path`.
    /// Expired cookies encountered on the way are removed from the jar;
    /// Secure cookies are skipped (but kept) when the request is not HTTPS.
    pub fn cookie_header(
        &mut self,
        host: &str,
        path: &str,
        is_https: bool,
        now: i64,
    ) -> Option<String> {
        let mut out = String::new();

        for (domain, paths) in self.domains.iter_mut() {
            if !domain_match(host, domain) {
                continue;
            }
            for (cookie_path, bucket) in paths.iter_mut() {
                if !path_match(path, cookie_path) {
                    continue;
                }
                bucket.retain(|cookie| {
                    let expired = cookie.expires > 0 && cookie.expires < now;
                    if expired {
                        log::debug!(target: "cookies", "Expired cookie found: {}. Removing.", cookie.name);
                    }
                    !expired
                });
                for cookie in bucket.iter() {
                    if cookie.secure && !is_https {
                        continue;
                    }
                    if !out.is_empty() {
                        out.push_str("; ");
                    }
                    out.push_str(&cookie.name);
                    out.push('=');
                    out.push_str(&cookie.value);
                }
            }
        }

        if out.is_empty() { None } else { Some(out) }
    }

    /// Total number of stored cookies (expired ones included until purged).
    pub fn total(&self) -> usize {
        self.domains
            .values()
            .flat_map(|paths| paths.values())
            .map(Vec::len)
            .sum()
    }

    /// Load cookies from a Netscape-format cookies.txt file. A missing file
    /// is not an error; malformed lines are skipped with a warning.
    pub fn load_from(&mut self, path: &Path) -> io::Result<usize> {
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut loaded = 0;
        for line in contents.lines() {
            let (line, http_only) = match line.strip_prefix("#HttpOnly_") {
                Some(rest) => (rest, true),
                None => (line, false),
            };
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_netscape_line(line, http_only) {
                Some(cookie) => {
                    self.insert(cookie);
                    loaded += 1;
                }
                None => {
                    log::warn!(target: "cookies", "Skipping malformed cookie line: {}", line);
                }
            }
        }
        Ok(loaded)
    }

    /// Write the jar in Netscape cookies.txt format, dropping cookies that
    /// have already expired.
    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        let now = Utc::now().timestamp();
        let mut file = fs::File::create(path)?;
        writeln!(file, "# Netscape HTTP Cookie File")?;
        for paths in self.domains.values() {
            for bucket in paths.values() {
                for cookie in bucket {
                    if cookie.expires > 0 && cookie.expires < now {
                        continue;
                    }
                    let prefix = if cookie.http_only { "#HttpOnly_" } else { "" };
                    writeln!(
                        file,
                        "{}{}\tFALSE\t{}\t{}\t{}\t{}\t{}",
                        prefix,
                        cookie.domain,
                        cookie.path,
                        if cookie.secure { "TRUE" } else { "FALSE" },
                        cookie.expires,
                        cookie.name,
                        cookie.value
                    )?;
                }
            }
        }
        Ok(())
    }
}

fn parse_netscape_line(line: &str, http_only: bool) -> Option<Cookie> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 7 {
        return None;
    }
    let domain = fields[0].strip_prefix('.').unwrap_or(fields[0]);
    Some(Cookie {
        name: fields[5].to_string(),
        value: fields[6].to_string(),
        domain: domain.to_string(),
        path: fields[2].to_string(),
        expires: fields[4].parse().ok()?,
        secure: fields[3].eq_ignore_ascii_case("TRUE"),
        http_only,
    })
}

/// Parse one `Set-Cookie` value. The first segment must be `name=value`;
/// attribute segments are matched case-insensitively and unknown ones are
/// ignored. Returns None when the header is structurally invalid.
fn parse_set_cookie(
    input: &str,
    default_domain: &str,
    default_path: &str,
    now: i64,
) -> Option<Cookie> {
    let mut segments = input.split(';');

    let name_value = segments.next()?;
    let (name, value) = name_value.split_once('=')?;
    let name = name.trim();
    let value = value.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = Cookie {
        name: name.to_string(),
        value: value.to_string(),
        domain: default_domain.to_string(),
        path: default_path.to_string(),
        expires: 0,
        secure: false,
        http_only: false,
    };

    // Max-Age wins over Expires regardless of attribute order.
    let mut saw_max_age = false;

    for segment in segments {
        let segment = segment.trim();
        let (attr_name, attr_value) = match segment.split_once('=') {
            Some((n, v)) => (n.trim(), Some(v.trim())),
            None => (segment, None),
        };

        if attr_name.eq_ignore_ascii_case("Domain") {
            if let Some(v) = attr_value {
                // RFC 6265, section 4.1.2.3: a leading dot is ignored.
                cookie.domain = v.strip_prefix('.').unwrap_or(v).to_string();
            }
        } else if attr_name.eq_ignore_ascii_case("Path") {
            if let Some(v) = attr_value {
                cookie.path = v.to_string();
            }
        } else if attr_name.eq_ignore_ascii_case("Expires") {
            if !saw_max_age {
                if let Some(v) = attr_value {
                    // Unparsable dates leave a session cookie.
                    cookie.expires = parse_http_date(v).unwrap_or(0);
                }
            }
        } else if attr_name.eq_ignore_ascii_case("Max-Age") {
            if let Some(v) = attr_value {
                if let Ok(max_age) = v.parse::<i64>() {
                    saw_max_age = true;
                    if max_age >= 0 {
                        cookie.expires = now + max_age;
                    } else {
                        // Already expired; epoch + 1 keeps it distinct from
                        // the session sentinel.
                        cookie.expires = 1;
                    }
                }
            }
        } else if attr_name.eq_ignore_ascii_case("Secure") {
            cookie.secure = true;
        } else if attr_name.eq_ignore_ascii_case("HttpOnly") {
            cookie.http_only = true;
        }
    }

    Some(cookie)
}

/// HTTP-date in any of the three historic forms (RFC 1123, RFC 850,
/// asctime), all interpreted as UTC.
fn parse_http_date(input: &str) -> Option<i64> {
    let trimmed = input.trim();

    const FORMATS: &[&str] = &[
        // RFC 1123: Wed, 09 Jun 2021 10:18:14 GMT
        "%a, %d %b %Y %H:%M:%S GMT",
        // RFC 850: Wednesday, 09-Jun-21 10:18:14 GMT
        "%A, %d-%b-%y %H:%M:%S GMT",
    ];
    for format in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(clamp_epoch(dt.and_utc().timestamp()));
        }
    }

    // asctime: Sun Nov  6 08:49:37 1994 (day-of-month space padded)
    let collapsed = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    if let Ok(dt) = NaiveDateTime::parse_from_str(&collapsed, "%a %b %d %H:%M:%S %Y") {
        return Some(clamp_epoch(dt.and_utc().timestamp()));
    }

    None
}

fn clamp_epoch(ts: i64) -> i64 {
    // 0 is the session sentinel and negatives predate the epoch; both mean
    // "expired long ago" when they come from a date attribute.
    if ts <= 0 { 1 } else { ts }
}

/// `cookie_domain` carries no leading dot. The request host matches on
/// equality or as a subdomain (`a.b.example.com` vs `example.com`);
/// `example.com.attacker` must not match `example.com`.
fn domain_match(request_host: &str, cookie_domain: &str) -> bool {
    if request_host.eq_ignore_ascii_case(cookie_domain) {
        return true;
    }
    let (req_len, cookie_len) = (request_host.len(), cookie_domain.len());
    req_len > cookie_len
        && request_host.as_bytes()[req_len - cookie_len - 1] == b'.'
        && request_host
            .get(req_len - cookie_len..)
            .is_some_and(|tail| tail.eq_ignore_ascii_case(cookie_domain))
}

/// Cookie-path matching: exact, or prefix where either the cookie path ends
/// in `/` or the request path continues with `/`.
fn path_match(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    if !request_path.starts_with(cookie_path) {
        return false;
    }
    cookie_path.is_empty()
        || cookie_path.ends_with('/')
        || request_path.as_bytes().get(cookie_path.len()) == Some(&b'/')
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    #[test]
    fn domain_matching() {
        assert!(domain_match("example.com", "example.com"));
        assert!(domain_match("EXAMPLE.com", "example.COM"));
        assert!(domain_match("www.example.com", "example.com"));
        assert!(domain_match("a.b.example.com", "example.com"));
        assert!(!domain_match("example.com.attacker", "example.com"));
        assert!(!domain_match("badexample.com", "example.com"));
        assert!(!domain_match("example.com", "www.example.com"));
    }

    #[test]
    fn path_matching() {
        assert!(path_match("/foo", "/foo"));
        assert!(path_match("/foo/bar", "/foo"));
        assert!(path_match("/foo/bar", "/foo/"));
        assert!(!path_match("/foobar", "/foo"));
        assert!(path_match("/anything", "/"));
    }

    #[test]
    fn parse_basic_cookie() {
        let cookie =
            parse_set_cookie("sid=abc123; Path=/; HttpOnly", "example.com", "/", NOW).expect("parse");
        assert_eq!(cookie.name, "sid");
        assert_eq!(cookie.value, "abc123");
        assert_eq!(cookie.domain, "example.com");
        assert_eq!(cookie.path, "/");
        assert_eq!(cookie.expires, 0);
        assert!(cookie.http_only);
        assert!(!cookie.secure);
    }

    #[test]
    fn parse_rejects_missing_equals() {
        assert!(parse_set_cookie("garbage", "example.com", "/", NOW).is_none());
    }

    #[test]
    fn parse_strips_leading_domain_dot() {
        let cookie = parse_set_cookie("a=1; Domain=.example.com", "example.com", "/", NOW)
            .expect("parse");
        assert_eq!(cookie.domain, "example.com");
    }

    #[test]
    fn max_age_wins_over_expires_in_either_order() {
        let cookie = parse_set_cookie(
            "a=1; Max-Age=60; Expires=Wed, 09 Jun 2021 10:18:14 GMT",
            "example.com",
            "/",
            NOW,
        )
        .expect("parse");
        assert_eq!(cookie.expires, NOW + 60);

        let cookie = parse_set_cookie(
            "a=1; Expires=Wed, 09 Jun 2021 10:18:14 GMT; Max-Age=60",
            "example.com",
            "/",
            NOW,
        )
        .expect("parse");
        assert_eq!(cookie.expires, NOW + 60);
    }

    #[test]
    fn negative_max_age_is_already_expired() {
        let cookie =
            parse_set_cookie("a=1; Max-Age=-5", "example.com", "/", NOW).expect("parse");
        assert_eq!(cookie.expires, 1);
    }

    #[test]
    fn bad_expires_leaves_session_cookie() {
        let cookie = parse_set_cookie("a=1; Expires=not a date", "example.com", "/", NOW)
            .expect("parse");
        assert_eq!(cookie.expires, 0);
    }

    #[test]
    fn http_date_forms() {
        // All three forms denote 1994-11-06 08:49:37 UTC = 784111777.
        let expected = 784_111_777;
        assert_eq!(
            parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT"),
            Some(expected)
        );
        assert_eq!(
            parse_http_date("Sunday, 06-Nov-94 08:49:37 GMT"),
            Some(expected)
        );
        assert_eq!(parse_http_date("Sun Nov  6 08:49:37 1994"), Some(expected));
        assert_eq!(parse_http_date("tomorrow-ish"), None);
    }

    #[test]
    fn subdomain_receives_parent_domain_cookie() {
        // Accept at example.com with Domain=example.com, read from
        // www.example.com.
        let mut jar = CookieJar::new();
        assert!(jar.store("a=1; Domain=example.com; Path=/", "example.com", "/", true, NOW));
        let header = jar.cookie_header("www.example.com", "/x", true, NOW);
        assert_eq!(header.as_deref(), Some("a=1"));
    }

    #[test]
    fn secure_cookie_not_sent_over_http() {
        let mut jar = CookieJar::new();
        assert!(jar.store("a=1; Secure", "example.com", "/", true, NOW));
        assert_eq!(jar.cookie_header("example.com", "/", false, NOW), None);
        // Still present, and emitted over HTTPS.
        assert_eq!(jar.total(), 1);
        assert_eq!(
            jar.cookie_header("example.com", "/", true, NOW).as_deref(),
            Some("a=1")
        );
    }

    #[test]
    fn secure_cookie_from_http_is_dropped_at_store() {
        let mut jar = CookieJar::new();
        assert!(!jar.store("a=1; Secure", "example.com", "/", false, NOW));
        assert_eq!(jar.total(), 0);
    }

    #[test]
    fn max_age_zero_expires_immediately_and_is_purged() {
        let mut jar = CookieJar::new();
        assert!(jar.store("a=1; Max-Age=0", "example.com", "/", false, NOW));
        assert_eq!(jar.cookie_header("example.com", "/", false, NOW), None);
        assert_eq!(jar.total(), 0);
    }

    #[test]
    fn name_replacement_is_case_insensitive() {
        let mut jar = CookieJar::new();
        assert!(jar.store("a=1", "example.com", "/", false, NOW));
        assert!(jar.store("A=2", "example.com", "/", false, NOW));
        assert_eq!(jar.total(), 1);
        assert_eq!(
            jar.cookie_header("example.com", "/", false, NOW).as_deref(),
            Some("A=2")
        );
    }

    #[test]
    fn mismatched_domain_attribute_is_rejected() {
        let mut jar = CookieJar::new();
        assert!(!jar.store("a=1; Domain=other.com", "example.com", "/", false, NOW));
        assert!(!jar.store("a=1; Domain=example.com", "example.com.attacker", "/", false, NOW));
        assert_eq!(jar.total(), 0);
    }

    #[test]
    fn insertion_order_is_preserved_in_header() {
        let mut jar = CookieJar::new();
        jar.store("first=1", "example.com", "/", false, NOW);
        jar.store("second=2", "example.com", "/", false, NOW);
        jar.store("third=3", "example.com", "/", false, NOW);
        assert_eq!(
            jar.cookie_header("example.com", "/", false, NOW).as_deref(),
            Some("first=1; second=2; third=3")
        );
    }

    #[test]
    fn path_scoped_cookie_not_sent_elsewhere() {
        let mut jar = CookieJar::new();
        jar.store("a=1; Path=/foo", "example.com", "/foo", false, NOW);
        assert_eq!(jar.cookie_header("example.com", "/bar", false, NOW), None);
        assert_eq!(jar.cookie_header("example.com", "/foobar", false, NOW), None);
        assert_eq!(
            jar.cookie_header("example.com", "/foo/bar", false, NOW).as_deref(),
            Some("a=1")
        );
    }

    #[test]
    fn expired_cookie_is_removed_only_when_bucket_is_visited() {
        let mut jar = CookieJar::new();
        jar.store("a=1; Max-Age=10", "example.com", "/", false, NOW);
        assert_eq!(jar.total(), 1);
        // Past expiry.
        assert_eq!(jar.cookie_header("example.com", "/", false, NOW + 11), None);
        assert_eq!(jar.total(), 0);
    }

    #[test]
    fn netscape_round_trip() {
        let mut jar = CookieJar::new();
        // Expiry far enough out that save_to (which checks wall-clock time)
        // keeps the cookie.
        jar.store("a=1; Path=/; Max-Age=9999999999", "example.com", "/", false, NOW);
        jar.store("b=2; Path=/x; HttpOnly", "example.com", "/x", false, NOW);

        let dir = std::env::temp_dir().join("trawler-cookie-test");
        std::fs::create_dir_all(&dir).expect("tmp dir");
        let file = dir.join("cookies.txt");
        jar.save_to(&file).expect("save");

        let mut restored = CookieJar::new();
        // Session cookie "b" has expires 0 and survives the round trip.
        let loaded = restored.load_from(&file).expect("load");
        assert_eq!(loaded, 2);
        assert_eq!(
            restored
                .cookie_header("example.com", "/x/y", false, NOW)
                .as_deref(),
            Some("a=1; b=2")
        );
        std::fs::remove_file(&file).ok();
    }

    #[test]
    fn loading_a_missing_file_is_not_an_error() {
        let mut jar = CookieJar::new();
        let loaded = jar
            .load_from(Path::new("/nonexistent/trawler-cookies.txt"))
            .expect("missing file tolerated");
        assert_eq!(loaded, 0);
    }
}
