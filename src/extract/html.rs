//! Anchor extraction from HTML bodies.
//!
//! A full DOM is not needed to collect outbound links; a forward-only
//! tokenizer that understands tags, comments and raw-text elements is
//! enough and keeps memory flat on large pages.

/// Every `<a>` element's `href` attribute value, in document order,
/// entity-decoded but otherwise verbatim.
pub fn extract_hrefs(html: &str) -> Vec<String> {
    let mut tokenizer = Tokenizer::new(html);
    let mut out = Vec::new();

    while let Some(tag) = tokenizer.next_start_tag() {
        if tag.name.eq_ignore_ascii_case("a") {
            if let Some(href) = tag.attribute("href") {
                if !href.is_empty() {
                    out.push(href);
                }
            }
        }
    }

    out
}

struct StartTag {
    name: String,
    attributes: Vec<(String, String)>,
}

impl StartTag {
    fn attribute(&self, name: &str) -> Option<String> {
        self.attributes
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }
}

struct Tokenizer {
    input: Vec<char>,
    position: usize,
}

impl Tokenizer {
    fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
        }
    }

    fn eof(&self) -> bool {
        self.position >= self.input.len()
    }

    fn current(&self) -> char {
        self.input[self.position]
    }

    fn consume_char(&mut self) -> char {
        let ch = self.input[self.position];
        self.position += 1;
        ch
    }

    fn starts_with(&self, needle: &str) -> bool {
        let mut idx = self.position;
        for ch in needle.chars() {
            if idx >= self.input.len() || self.input[idx] != ch {
                return false;
            }
            idx += 1;
        }
        true
    }

    /// Advance to the next start tag, skipping text, comments, doctype,
    /// end tags and the raw text of script/style elements.
    fn next_start_tag(&mut self) -> Option<StartTag> {
        loop {
            // Find the next '<'.
            while !self.eof() && self.current() != '<' {
                self.position += 1;
            }
            if self.eof() {
                return None;
            }
            self.position += 1; // consume '<'

            if self.eof() {
                return None;
            }

            match self.current() {
                '!' => self.skip_markup_declaration(),
                '/' => self.skip_until('>'),
                '?' => self.skip_until('>'),
                c if c.is_ascii_alphabetic() => {
                    let tag = self.consume_start_tag();
                    let lower = tag.name.to_ascii_lowercase();
                    if lower == "script" || lower == "style" {
                        self.skip_raw_text(&lower);
                    }
                    return Some(tag);
                }
                // A stray '<' in text; keep scanning.
                _ => {}
            }
        }
    }

    /// `<!-- comment -->` or `<!DOCTYPE ...>`.
    fn skip_markup_declaration(&mut self) {
        if self.starts_with("!--") {
            self.position += 3;
            while !self.eof() && !self.starts_with("-->") {
                self.position += 1;
            }
            self.position = (self.position + 3).min(self.input.len());
        } else {
            self.skip_until('>');
        }
    }

    fn skip_until(&mut self, end: char) {
        while !self.eof() && self.current() != end {
            self.position += 1;
        }
        if !self.eof() {
            self.position += 1;
        }
    }

    /// Skip everything up to the matching `</tag`, so markup inside script
    /// or style bodies is never mistaken for document structure.
    fn skip_raw_text(&mut self, tag: &str) {
        let closing = format!("</{}", tag);
        while !self.eof() {
            if self.current() == '<' {
                let rest: String = self.input[self.position..]
                    .iter()
                    .take(closing.len())
                    .collect();
                if rest.eq_ignore_ascii_case(&closing) {
                    return;
                }
            }
            self.position += 1;
        }
    }

    fn consume_start_tag(&mut self) -> StartTag {
        let mut name = String::new();
        while !self.eof()
            && !self.current().is_whitespace()
            && self.current() != '>'
            && self.current() != '/'
        {
            name.push(self.consume_char());
        }

        let mut attributes = Vec::new();
        loop {
            self.consume_whitespace();
            if self.eof() || self.current() == '>' {
                if !self.eof() {
                    self.position += 1;
                }
                break;
            }
            if self.current() == '/' {
                self.position += 1;
                continue;
            }
            if let Some(attr) = self.consume_attribute() {
                attributes.push(attr);
            }
        }

        StartTag { name, attributes }
    }

    fn consume_whitespace(&mut self) {
        while !self.eof() && self.current().is_whitespace() {
            self.position += 1;
        }
    }

    fn consume_attribute(&mut self) -> Option<(String, String)> {
        let mut name = String::new();
        while !self.eof()
            && !self.current().is_whitespace()
            && self.current() != '='
            && self.current() != '>'
            && self.current() != '/'
        {
            name.push(self.consume_char());
        }
        if name.is_empty() {
            // Defensive: avoid spinning on unexpected punctuation.
            if !self.eof() && self.current() != '>' {
                self.position += 1;
            }
            return None;
        }

        self.consume_whitespace();
        if self.eof() || self.current() != '=' {
            return Some((name, String::new()));
        }
        self.position += 1; // consume '='
        self.consume_whitespace();

        let value = self.consume_attribute_value();
        Some((name, decode_entities(&value)))
    }

    fn consume_attribute_value(&mut self) -> String {
        let mut value = String::new();
        if self.eof() {
            return value;
        }

        let quote = self.current();
        if quote == '"' || quote == '\'' {
            self.position += 1;
            while !self.eof() && self.current() != quote {
                value.push(self.consume_char());
            }
            if !self.eof() {
                self.position += 1; // closing quote
            }
        } else {
            while !self.eof()
                && !self.current().is_whitespace()
                && self.current() != '>'
            {
                value.push(self.consume_char());
            }
        }
        value
    }
}

/// Decode the character references that show up inside URL attribute
/// values. Unknown references pass through untouched.
fn decode_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }

    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] != '&' {
            out.push(chars[i]);
            i += 1;
            continue;
        }

        let Some(end) = chars[i..].iter().position(|c| *c == ';') else {
            out.push(chars[i]);
            i += 1;
            continue;
        };
        let entity: String = chars[i + 1..i + end].iter().collect();
        match decode_entity(&entity) {
            Some(decoded) => {
                out.push_str(&decoded);
                i += end + 1;
            }
            None => {
                out.push(chars[i]);
                i += 1;
            }
        }
    }

    out
}

fn decode_entity(entity: &str) -> Option<String> {
    if let Some(numeric) = entity.strip_prefix('#') {
        let code = if let Some(hex) = numeric.strip_prefix('x').or(numeric.strip_prefix('X')) {
            u32::from_str_radix(hex, 16).ok()?
        } else {
            numeric.parse::<u32>().ok()?
        };
        return char::from_u32(code).map(String::from);
    }

    match entity {
        "amp" => Some("&".to_string()),
        "lt" => Some("<".to_string()),
        "gt" => Some(">".to_string()),
        "quot" => Some("\"".to_string()),
        "apos" => Some("'".to_string()),
        "sol" => Some("/".to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_anchor_hrefs_in_document_order() {
        let html = r#"<html><body>
            <a href="/next">next</a>
            <p>text</p>
            <a href="https://other.example/page">away</a>
        </body></html>"#;
        assert_eq!(
            extract_hrefs(html),
            vec!["/next", "https://other.example/page"]
        );
    }

    #[test]
    fn handles_quote_styles_and_case() {
        let html = r#"<A HREF='/single'>x</A><a href=/bare>y</a>"#;
        assert_eq!(extract_hrefs(html), vec!["/single", "/bare"]);
    }

    #[test]
    fn anchors_without_href_are_skipped() {
        let html = r#"<a name="top">x</a><a href="">y</a><a href="/real">z</a>"#;
        assert_eq!(extract_hrefs(html), vec!["/real"]);
    }

    #[test]
    fn script_and_style_bodies_are_opaque() {
        let html = r#"
            <script>var s = '<a href="/fake">';</script>
            <style>a[href="/styled"] { color: red }</style>
            <a href="/real">ok</a>"#;
        assert_eq!(extract_hrefs(html), vec!["/real"]);
    }

    #[test]
    fn comments_are_skipped() {
        let html = r#"<!-- <a href="/hidden">no</a> --><a href="/shown">yes</a>"#;
        assert_eq!(extract_hrefs(html), vec!["/shown"]);
    }

    #[test]
    fn entities_in_href_are_decoded() {
        let html = r#"<a href="/s?a=1&amp;b=2">q</a>"#;
        assert_eq!(extract_hrefs(html), vec!["/s?a=1&b=2"]);
    }

    #[test]
    fn tolerates_malformed_markup() {
        let html = "<a href=\"/ok\"><<<>< <a";
        assert_eq!(extract_hrefs(html), vec!["/ok"]);
    }
}
