use std::fmt;

#[derive(Debug)]
pub enum NetworkError {
    InvalidUri(String),
    ConnectionFailed(String),
    SendFailed(String),
    ReceiveFailed(String),
    TlsError(String),
    MissingMethod,
    MissingUri,
    ParseError(String),
    HeaderParseError(String),
    TooLargeResponse,
    TooManyRedirects,
    Timeout(String),
}

impl NetworkError {
    /// Stable numeric code carried on error callbacks, mirroring the wire
    /// of one code per failure class.
    pub fn code(&self) -> u32 {
        match self {
            NetworkError::InvalidUri(_) => 1,
            NetworkError::ConnectionFailed(_) => 2,
            NetworkError::SendFailed(_) => 3,
            NetworkError::ReceiveFailed(_) => 4,
            NetworkError::TlsError(_) => 5,
            NetworkError::MissingMethod => 6,
            NetworkError::MissingUri => 7,
            NetworkError::ParseError(_) => 8,
            NetworkError::HeaderParseError(_) => 9,
            NetworkError::TooLargeResponse => 10,
            NetworkError::TooManyRedirects => 11,
            NetworkError::Timeout(_) => 12,
        }
    }
}

impl std::error::Error for NetworkError {}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::InvalidUri(u) => write!(f, "Invalid URI: {}", u),
            NetworkError::ConnectionFailed(e) => write!(f, "Connection failed: {}", e),
            NetworkError::SendFailed(e) => write!(f, "Failed to send request: {}", e),
            NetworkError::ReceiveFailed(e) => write!(f, "Failed to receive response: {}", e),
            NetworkError::TlsError(e) => write!(f, "TLS error: {}", e),
            NetworkError::MissingMethod => write!(f, "HTTP method not specified"),
            NetworkError::MissingUri => write!(f, "URI not specified"),
            NetworkError::ParseError(e) => write!(f, "Parse error: {}", e),
            NetworkError::HeaderParseError(e) => write!(f, "Header parse error: {}", e),
            NetworkError::TooLargeResponse => write!(f, "Response too large"),
            NetworkError::TooManyRedirects => write!(f, "Too many redirects"),
            NetworkError::Timeout(e) => write!(f, "Request timed out: {}", e),
        }
    }
}
