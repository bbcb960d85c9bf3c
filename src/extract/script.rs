//! Link scanning inside JavaScript bodies.
//!
//! No JS execution: routed paths and absolute URLs are recognized purely by
//! shape. Paths are combined with the fetch origin; absolute URLs only
//! survive when they stay on the same registrable domain, so the crawl
//! does not wander off-site chasing bundled third-party SDK strings.

use crate::networking::{Uri, registrable_domain};
use regex::Regex;

pub struct ScriptExtractor {
    attribute_path: Regex,
    element_path: Regex,
    router_path: Regex,
    full_url: Regex,
}

impl ScriptExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            // path: "/x", redirectTo: '/y', templateUrl: "/z.html"
            attribute_path: Regex::new(
                r#"(?:path|redirectTo|templateUrl)\s*:\s*["']([^"']*)["']"#,
            )?,
            // setAttribute-style pairs: ["href"], "/x"  /  ['src'], '/y'
            element_path: Regex::new(
                r#"\[\s*["'](?:href|src)["']\s*\]\s*,\s*["']([^"']*)["']"#,
            )?,
            // router.navigateByUrl("/x"), router.navigate(["/y", ...])
            router_path: Regex::new(
                r#"router\.(?:(?:navigateByUrl|parseUrl|isActive)\s*\(\s*|(?:navigate|createUrlTree)\s*\(\s*\[\s*)["']([^"']*)["']"#,
            )?,
            full_url: Regex::new(r#"https?://[^\s"'\\)]+"#)?,
        })
    }

    pub fn extract(&self, body: &str, base: &Uri) -> Vec<String> {
        let mut out = Vec::new();

        for regex in [&self.attribute_path, &self.element_path, &self.router_path] {
            for captures in regex.captures_iter(body) {
                if let Some(path) = captures.get(1) {
                    if let Some(url) = combine_with_base(base, path.as_str()) {
                        out.push(url);
                    }
                }
            }
        }

        let base_domain = base.registrable_domain();
        for m in self.full_url.find_iter(body) {
            let candidate = m.as_str();
            let Ok(parsed) = Uri::parse(candidate) else {
                continue;
            };
            if registrable_domain(parsed.host()).eq_ignore_ascii_case(base_domain) {
                out.push(candidate.to_string());
            }
        }

        out
    }
}

/// A captured path that mentions "http" is not a path; everything else is
/// rooted at the base origin.
fn combine_with_base(base: &Uri, path: &str) -> Option<String> {
    if path.is_empty() || path.contains("http") {
        return None;
    }
    if path.starts_with('/') {
        Some(format!("{}{}", base.origin(), path))
    } else {
        Some(format!("{}/{}", base.origin(), path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> ScriptExtractor {
        ScriptExtractor::new().expect("regexes compile")
    }

    fn base() -> Uri {
        Uri::parse("https://app.example.com/static/bundle.js").expect("base")
    }

    #[test]
    fn route_definitions_are_found() {
        let js = r#"
            const routes = [
                { path: "/home", component: Home },
                { path: '/about', redirectTo: "/info" },
                { templateUrl: "/tpl/widget.html" },
            ];
        "#;
        let links = extractor().extract(js, &base());
        assert!(links.contains(&"https://app.example.com/home".to_string()));
        assert!(links.contains(&"https://app.example.com/about".to_string()));
        assert!(links.contains(&"https://app.example.com/info".to_string()));
        assert!(links.contains(&"https://app.example.com/tpl/widget.html".to_string()));
    }

    #[test]
    fn attribute_pairs_are_found() {
        let js = r#"el.setAttribute(["href"], "/deep/page"); x(["src"], '/img/logo.png');"#;
        let links = extractor().extract(js, &base());
        assert!(links.contains(&"https://app.example.com/deep/page".to_string()));
        assert!(links.contains(&"https://app.example.com/img/logo.png".to_string()));
    }

    #[test]
    fn router_calls_are_found() {
        let js = r#"
            router.navigateByUrl("/inbox");
            router.navigate(["/settings", id]);
            if (router.isActive('/live')) {}
        "#;
        let links = extractor().extract(js, &base());
        assert!(links.contains(&"https://app.example.com/inbox".to_string()));
        assert!(links.contains(&"https://app.example.com/settings".to_string()));
        assert!(links.contains(&"https://app.example.com/live".to_string()));
    }

    #[test]
    fn path_mentioning_http_is_not_a_path() {
        let js = r#"const r = { path: "http://evil.example/x" };"#;
        let links = extractor().extract(js, &base());
        assert!(links.is_empty());
    }

    #[test]
    fn same_site_absolute_urls_survive() {
        let js = r#"
            fetch("https://api.example.com/v1/items");
            load("https://cdn.other.net/lib.js");
        "#;
        let links = extractor().extract(js, &base());
        assert_eq!(links, vec!["https://api.example.com/v1/items".to_string()]);
    }

    #[test]
    fn url_capture_stops_at_delimiters() {
        let js = r#"go("https://app.example.com/a") + 'https://app.example.com/b' end"#;
        let links = extractor().extract(js, &base());
        assert_eq!(
            links,
            vec![
                "https://app.example.com/a".to_string(),
                "https://app.example.com/b".to_string(),
            ]
        );
    }
}
