use crate::networking::error::NetworkError;
use crate::networking::http::{Headers, Status, Version};
use crate::networking::tls::TlsContext;
use crate::networking::uri::Uri;
use flate2::read::{DeflateDecoder, GzDecoder};
use std::io::{Cursor, Read};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub enum Connection {
    Plain(TcpStream),
    Tls(tokio_rustls::client::TlsStream<TcpStream>),
}

/// One hop's parsed response, before the client attaches the effective URL.
#[derive(Debug)]
pub struct RawResponse {
    pub version: Version,
    pub status: Status,
    pub headers: Headers,
    pub body: Vec<u8>,
}

pub struct TcpConnection {
    connection: Connection,
    keep_alive: bool,
}

impl TcpConnection {
    pub async fn connect(uri: &Uri, tls: &TlsContext) -> Result<Self, NetworkError> {
        let addr = format!("{}:{}", uri.host(), uri.port_or_default());

        let tcp_stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;

        let connection = if uri.is_https() {
            // The session takes the stream on success; failure drops both.
            let tls_stream = tls.handshake(uri.host(), tcp_stream).await?;
            Connection::Tls(tls_stream)
        } else {
            Connection::Plain(tcp_stream)
        };

        Ok(Self {
            connection,
            keep_alive: true,
        })
    }

    /// Returns true if the connection can be reused for another request.
    pub fn is_keep_alive(&self) -> bool {
        self.keep_alive
    }

    pub async fn send_request(
        &mut self,
        request_bytes: &[u8],
        max_body_bytes: usize,
    ) -> Result<RawResponse, NetworkError> {
        match &mut self.connection {
            Connection::Plain(stream) => {
                stream
                    .write_all(request_bytes)
                    .await
                    .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
            }
            Connection::Tls(stream) => {
                stream
                    .write_all(request_bytes)
                    .await
                    .map_err(|e| NetworkError::SendFailed(e.to_string()))?;
            }
        }

        // Read headers first, then exactly as much body as the framing
        // says, so keep-alive connections stay in sync.
        let response_data = self.read_response(max_body_bytes).await?;

        if response_data.is_empty() {
            return Err(NetworkError::ReceiveFailed(
                "Empty response received".to_string(),
            ));
        }

        parse_response(response_data, max_body_bytes)
    }

    async fn read_response(&mut self, max_body_bytes: usize) -> Result<Vec<u8>, NetworkError> {
        let mut data = Vec::new();
        let mut buffer = [0u8; 8192];

        let header_end = loop {
            let n = self.read_some(&mut buffer).await?;
            if n == 0 {
                // Connection closed before headers complete
                break find_header_end(&data).unwrap_or(data.len());
            }
            data.extend_from_slice(&buffer[..n]);
            if let Some(end) = find_header_end(&data) {
                break end;
            }
        };

        let framing = parse_framing(&data[..header_end]);
        self.keep_alive = !framing.connection_close;

        let body_start = header_end;

        if framing.is_chunked {
            // Chunk-size lines inflate the raw byte count a little; allow
            // slack before declaring the page oversized.
            let raw_limit = max_body_bytes.saturating_add(64 * 1024);
            while !has_chunked_terminator(&data[body_start..]) {
                if data.len() - body_start > raw_limit {
                    return Err(NetworkError::TooLargeResponse);
                }
                let n = self.read_some(&mut buffer).await?;
                if n == 0 {
                    log::debug!(target: "network", "EOF while reading chunked body");
                    break;
                }
                data.extend_from_slice(&buffer[..n]);
            }
        } else if let Some(len) = framing.content_length {
            if len > max_body_bytes {
                return Err(NetworkError::TooLargeResponse);
            }
            let target = body_start + len;
            while data.len() < target {
                let n = self.read_some(&mut buffer).await?;
                if n == 0 {
                    break;
                }
                data.extend_from_slice(&buffer[..n]);
            }
        } else if framing.connection_close {
            // No Content-Length and not chunked: read until EOF.
            loop {
                if data.len() - body_start > max_body_bytes {
                    return Err(NetworkError::TooLargeResponse);
                }
                let n = self.read_some(&mut buffer).await?;
                if n == 0 {
                    break;
                }
                data.extend_from_slice(&buffer[..n]);
            }
            self.keep_alive = false;
        } else {
            // HTTP/1.1 keep-alive without Content-Length or chunked is
            // malformed; assume an empty body and stop reusing the socket.
            log::warn!(target: "network", "Keep-alive response missing Content-Length/chunked, assuming empty body");
            self.keep_alive = false;
        }

        Ok(data)
    }

    /// Read from the underlying stream with timeout, returning bytes read or 0 on EOF.
    async fn read_some(&mut self, buffer: &mut [u8]) -> Result<usize, NetworkError> {
        const READ_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

        let read_future = async {
            match &mut self.connection {
                Connection::Plain(stream) => stream
                    .read(buffer)
                    .await
                    .map_err(|e| NetworkError::ReceiveFailed(e.to_string())),
                Connection::Tls(stream) => match stream.read(buffer).await {
                    Ok(n) => Ok(n),
                    Err(e) => {
                        // TLS close_notify is expected EOF
                        if e.to_string().contains("close_notify") {
                            Ok(0)
                        } else {
                            Err(NetworkError::ReceiveFailed(e.to_string()))
                        }
                    }
                },
            }
        };

        tokio::time::timeout(READ_TIMEOUT, read_future)
            .await
            .map_err(|_| NetworkError::Timeout("Read timed out".to_string()))?
    }
}

#[derive(Default)]
struct Framing {
    content_length: Option<usize>,
    is_chunked: bool,
    connection_close: bool,
}

fn parse_framing(header_bytes: &[u8]) -> Framing {
    let header_str = String::from_utf8_lossy(header_bytes);
    let mut framing = Framing::default();

    for line in header_str.split("\r\n").skip(1) {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name_lower = name.trim().to_lowercase();
            let value_trim = value.trim();
            match name_lower.as_str() {
                "content-length" => {
                    framing.content_length = value_trim.parse().ok();
                }
                "transfer-encoding" => {
                    framing.is_chunked = value_trim
                        .split(',')
                        .any(|v| v.trim().eq_ignore_ascii_case("chunked"));
                }
                "connection" => {
                    framing.connection_close = value_trim.eq_ignore_ascii_case("close");
                }
                _ => {}
            }
        }
    }

    framing
}

pub(crate) fn parse_response(
    data: Vec<u8>,
    max_body_bytes: usize,
) -> Result<RawResponse, NetworkError> {
    let header_end = find_header_end(&data).ok_or_else(|| {
        NetworkError::ParseError("Missing header terminator (\\r\\n\\r\\n)".to_string())
    })?;

    let header_bytes = &data[..header_end];
    let header_str = String::from_utf8_lossy(header_bytes);
    let mut lines = header_str.split("\r\n");

    let status_line = lines
        .next()
        .ok_or_else(|| NetworkError::ParseError("Empty response".to_string()))?;

    let mut status_parts = status_line.split_whitespace();
    let version_str = status_parts
        .next()
        .ok_or_else(|| NetworkError::ParseError("Missing HTTP version".to_string()))?;
    let version = match version_str {
        "HTTP/1.1" => Version::Http11,
        "HTTP/1.0" => Version::Http10,
        _ => return Err(NetworkError::ParseError("Invalid HTTP version".to_string())),
    };

    let code = status_parts
        .next()
        .ok_or_else(|| NetworkError::ParseError("Missing status code".to_string()))?
        .parse::<u16>()
        .map_err(|_| NetworkError::ParseError("Invalid status code".to_string()))?;

    let status_text = status_parts.collect::<Vec<_>>().join(" ");

    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':').ok_or_else(|| {
            NetworkError::HeaderParseError(format!("Invalid header line: {line}"))
        })?;
        headers.append(name.trim(), value.trim().to_string());
    }

    let mut body = data[header_end..].to_vec();

    // Chunk-size lines must not leak into the body handed to extractors.
    if is_transfer_encoding_chunked(&headers) {
        body = decode_chunked_body(&body, max_body_bytes)?;
    } else if let Some(content_length) = headers.get("content-length") {
        if let Ok(len) = content_length.trim().parse::<usize>() {
            if body.len() >= len {
                body.truncate(len);
            }
        }
    }

    body = decompress_body(&headers, body, max_body_bytes)?;

    Ok(RawResponse {
        version,
        status: Status {
            code,
            text: status_text,
        },
        headers,
        body,
    })
}

fn decompress_body(
    headers: &Headers,
    body: Vec<u8>,
    max_body_bytes: usize,
) -> Result<Vec<u8>, NetworkError> {
    let Some(encoding) = headers.get("content-encoding") else {
        return Ok(body);
    };

    if body.is_empty() {
        return Ok(body);
    }

    let encoding = encoding.trim().to_lowercase();
    match encoding.as_str() {
        "gzip" | "x-gzip" => {
            if body.len() < 2 || body[0] != 0x1f || body[1] != 0x8b {
                log::warn!(target: "network", "Content-Encoding says gzip but body doesn't have gzip magic bytes, returning as-is");
                return Ok(body);
            }

            let decoder = GzDecoder::new(Cursor::new(body.clone()));
            read_decompressed(decoder, body, max_body_bytes, "gzip")
        }
        "deflate" => {
            let decoder = DeflateDecoder::new(Cursor::new(body.clone()));
            read_decompressed(decoder, body, max_body_bytes, "deflate")
        }
        "identity" | "" => Ok(body),
        other => {
            log::warn!(target: "network", "Unknown Content-Encoding: {}, returning raw body", other);
            Ok(body)
        }
    }
}

fn read_decompressed<R: Read>(
    decoder: R,
    original: Vec<u8>,
    max_body_bytes: usize,
    label: &str,
) -> Result<Vec<u8>, NetworkError> {
    let mut decompressed = Vec::new();
    let mut limited = decoder.take(max_body_bytes as u64 + 1);
    match limited.read_to_end(&mut decompressed) {
        Ok(_) => {
            if decompressed.len() > max_body_bytes {
                return Err(NetworkError::TooLargeResponse);
            }
            log::debug!(target: "network", "Decompressed {} body: {} -> {} bytes", label, original.len(), decompressed.len());
            Ok(decompressed)
        }
        Err(e) => {
            // Some servers set Content-Encoding on bodies that are already
            // plain; fall back to the raw bytes.
            log::warn!(target: "network", "{} decompression failed: {}, returning body as-is", label, e);
            Ok(original)
        }
    }
}

fn find_header_end(data: &[u8]) -> Option<usize> {
    for (i, window) in data.windows(4).enumerate() {
        if window == b"\r\n\r\n" {
            return Some(i + 4);
        }
    }
    None
}

/// Check if a chunked body contains the terminating chunk (`0\r\n` followed
/// by optional trailers and a blank line).
fn has_chunked_terminator(body: &[u8]) -> bool {
    if body.is_empty() {
        return false;
    }

    if body.ends_with(b"0\r\n\r\n") || body.ends_with(b"\r\n0\r\n\r\n") {
        return true;
    }

    for i in 0..body.len().saturating_sub(4) {
        if body.get(i..i + 5) == Some(b"\r\n0\r\n") {
            let trailer_start = i + 5;
            let mut j = trailer_start;
            while j + 1 < body.len() {
                if body[j] == b'\r' && body[j + 1] == b'\n' {
                    if j == trailer_start {
                        return true;
                    }
                    let next = j + 2;
                    if next + 1 < body.len() && body[next] == b'\r' && body[next + 1] == b'\n' {
                        return true;
                    }
                }
                j += 1;
            }
            if j >= body.len().saturating_sub(2) {
                return true;
            }
        }
    }

    false
}

fn is_transfer_encoding_chunked(headers: &Headers) -> bool {
    let Some(te) = headers.get("transfer-encoding") else {
        return false;
    };
    te.split(',')
        .map(|v| v.trim())
        .any(|v| v.eq_ignore_ascii_case("chunked"))
}

fn decode_chunked_body(input: &[u8], max_decoded_size: usize) -> Result<Vec<u8>, NetworkError> {
    if input.is_empty() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    let mut i = 0usize;

    loop {
        // Some servers pad with extra CRLF between chunks.
        while i < input.len() && (input[i] == b'\r' || input[i] == b'\n' || input[i] == b' ') {
            i += 1;
        }

        if i >= input.len() {
            break;
        }

        let line_end = match find_crlf(input, i) {
            Some(end) => end,
            None => {
                if !out.is_empty() {
                    log::warn!(target: "network", "Chunked encoding truncated, returning partial data");
                    return Ok(out);
                }
                return Err(NetworkError::ParseError(
                    "Invalid chunked encoding: missing CRLF after size".to_string(),
                ));
            }
        };

        let size_line = &input[i..line_end];
        i = line_end + 2;

        // Allow chunk extensions: "<hex>;ext=..."
        let size_field = size_line.split(|b| *b == b';').next().unwrap_or(size_line);
        let size_str = String::from_utf8_lossy(size_field);
        let trimmed = size_str.trim();

        if trimmed.is_empty() {
            continue;
        }

        let size = match usize::from_str_radix(trimmed, 16) {
            Ok(s) => s,
            Err(_) => {
                log::debug!(target: "network", "Invalid chunk size '{}', stopping", trimmed);
                break;
            }
        };

        if size == 0 {
            // Trailers: 0\r\n(<header>\r\n)*\r\n
            loop {
                match find_crlf(input, i) {
                    Some(trailer_end) if trailer_end == i => break,
                    Some(trailer_end) => i = trailer_end + 2,
                    None => break,
                }
            }
            break;
        }

        if out.len().saturating_add(size) > max_decoded_size {
            return Err(NetworkError::TooLargeResponse);
        }

        let chunk_end = match i.checked_add(size) {
            Some(end) => end,
            None => {
                log::warn!(target: "network", "Chunk size overflow, returning partial data");
                break;
            }
        };

        if chunk_end > input.len() {
            log::warn!(target: "network", "Chunked data truncated (expected {} bytes, have {})", size, input.len() - i);
            if i < input.len() {
                out.extend_from_slice(&input[i..]);
            }
            break;
        }

        out.extend_from_slice(&input[i..chunk_end]);
        i = chunk_end;

        // Each chunk is followed by CRLF; some servers use bare LF.
        if input.get(i..i + 2) == Some(b"\r\n") {
            i += 2;
        } else if i < input.len() && input[i] == b'\n' {
            i += 1;
        }
    }

    Ok(out)
}

fn find_crlf(buf: &[u8], start: usize) -> Option<usize> {
    let mut idx = start;
    while idx + 1 < buf.len() {
        if buf[idx] == b'\r' && buf[idx + 1] == b'\n' {
            return Some(idx);
        }
        idx += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 1024 * 1024;

    #[test]
    fn header_end_detection() {
        assert_eq!(find_header_end(b"HTTP/1.1 200 OK\r\n\r\nbody"), Some(19));
        assert_eq!(find_header_end(b"HTTP/1.1 200 OK\r\n"), None);
    }

    #[test]
    fn parse_simple_response() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 5\r\n\r\nhello".to_vec();
        let resp = parse_response(raw, MAX).expect("parse");
        assert_eq!(resp.status.code, 200);
        assert_eq!(resp.version, Version::Http11);
        assert_eq!(resp.headers.get("content-type"), Some("text/html"));
        assert_eq!(resp.body, b"hello");
    }

    #[test]
    fn parse_keeps_repeated_set_cookie() {
        let raw = b"HTTP/1.1 200 OK\r\nSet-Cookie: a=1\r\nSet-Cookie: b=2\r\nContent-Length: 0\r\n\r\n".to_vec();
        let resp = parse_response(raw, MAX).expect("parse");
        assert_eq!(resp.headers.get_all("set-cookie"), &["a=1", "b=2"]);
    }

    #[test]
    fn chunked_body_is_decoded() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n".to_vec();
        let resp = parse_response(raw, MAX).expect("parse");
        assert_eq!(resp.body, b"hello world");
    }

    #[test]
    fn chunked_with_extensions_and_trailers() {
        let body = b"4;name=v\r\nwiki\r\n0\r\nExpires: later\r\n\r\n";
        let out = decode_chunked_body(body, MAX).expect("decode");
        assert_eq!(out, b"wiki");
    }

    #[test]
    fn chunked_terminator_detection() {
        assert!(has_chunked_terminator(b"5\r\nhello\r\n0\r\n\r\n"));
        assert!(!has_chunked_terminator(b"5\r\nhello\r\n"));
        assert!(!has_chunked_terminator(b""));
    }

    #[test]
    fn oversized_chunked_body_is_an_error() {
        let body = b"ff\r\n";
        let mut raw = body.to_vec();
        raw.extend(vec![b'x'; 0xff]);
        raw.extend(b"\r\n0\r\n\r\n");
        let err = decode_chunked_body(&raw, 16).expect_err("cap");
        assert!(matches!(err, NetworkError::TooLargeResponse));
    }

    #[test]
    fn gzip_body_is_decompressed() {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"compressed payload").expect("write");
        let gz = encoder.finish().expect("finish");

        let mut raw = format!(
            "HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
            gz.len()
        )
        .into_bytes();
        raw.extend(gz);

        let resp = parse_response(raw, MAX).expect("parse");
        assert_eq!(resp.body, b"compressed payload");
    }

    #[test]
    fn bogus_gzip_falls_back_to_raw() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: 5\r\n\r\nplain".to_vec();
        let resp = parse_response(raw, MAX).expect("parse");
        assert_eq!(resp.body, b"plain");
    }

    #[test]
    fn missing_header_terminator_is_a_parse_error() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n".to_vec();
        assert!(matches!(
            parse_response(raw, MAX),
            Err(NetworkError::ParseError(_))
        ));
    }
}
