mod html;
mod script;

use crate::networking::Uri;
use script::ScriptExtractor;
use std::fmt;

/// Extraction strategy selected from the response Content-Type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Html,
    Script,
    /// Recognized but not implemented; always yields nothing.
    Flash,
    Other,
}

impl ContentKind {
    pub fn classify(content_type: &str) -> Self {
        let ct = content_type.trim();
        if prefix_matches(ct, "text/html") {
            ContentKind::Html
        } else if prefix_matches(ct, "application/javascript")
            || prefix_matches(ct, "application/x-javascript")
            || prefix_matches(ct, "text/javascript")
        {
            ContentKind::Script
        } else if prefix_matches(ct, "application/x-shockwave-flash") {
            ContentKind::Flash
        } else {
            ContentKind::Other
        }
    }
}

fn prefix_matches(content_type: &str, prefix: &str) -> bool {
    content_type
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

#[derive(Debug)]
pub struct ExtractError(regex::Error);

impl std::error::Error for ExtractError {}

impl fmt::Display for ExtractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to initialize link extractor: {}", self.0)
    }
}

/// Yields candidate outbound URLs for a fetched body. Candidates may repeat
/// and may be relative; resolution and dedup happen in the crawler.
pub struct LinkExtractor {
    script: ScriptExtractor,
}

impl LinkExtractor {
    pub fn new() -> Result<Self, ExtractError> {
        Ok(Self {
            script: ScriptExtractor::new().map_err(ExtractError)?,
        })
    }

    pub fn extract(&self, body: &[u8], content_type: &str, base: &Uri) -> Vec<String> {
        match ContentKind::classify(content_type) {
            ContentKind::Html => {
                let text = String::from_utf8_lossy(body);
                html::extract_hrefs(&text)
            }
            ContentKind::Script => {
                let text = String::from_utf8_lossy(body);
                self.script.extract(&text, base)
            }
            ContentKind::Flash => {
                log::debug!(target: "extract", "Flash extraction not implemented for {}", base);
                Vec::new()
            }
            ContentKind::Other => Vec::new(),
        }
    }
}
