use crate::networking::error::NetworkError;
use rustls::pki_types::ServerName;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

/// Shared client TLS configuration. Built once and cloned by reference for
/// every HTTPS connection; each `handshake` call produces one session with
/// SNI set to the target host.
#[derive(Clone)]
pub struct TlsContext {
    connector: TlsConnector,
}

impl TlsContext {
    pub fn new() -> Result<Self, NetworkError> {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        // Name the provider explicitly; relying on crate features to pick
        // one panics at runtime when more than one is compiled in.
        // TLS 1.2 is the floor; peer verification stays at the default.
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS12, &rustls::version::TLS13])
            .map_err(|e| NetworkError::TlsError(e.to_string()))?
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
        })
    }

    /// Perform the client handshake over an established TCP stream. The
    /// stream is consumed: on success the returned session owns it, on
    /// failure both are dropped here and the caller must reconnect.
    pub async fn handshake(
        &self,
        hostname: &str,
        stream: TcpStream,
    ) -> Result<TlsStream<TcpStream>, NetworkError> {
        let server_name = ServerName::try_from(hostname.to_string())
            .map_err(|e| NetworkError::TlsError(format!("invalid SNI host '{hostname}': {e}")))?;

        self.connector
            .connect(server_name, stream)
            .await
            .map_err(|e| NetworkError::TlsError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_builds() {
        assert!(TlsContext::new().is_ok());
    }

    #[tokio::test]
    async fn invalid_sni_fails_before_handoff() {
        let context = TlsContext::new().expect("tls context");
        // A listener that never speaks TLS; the handshake must fail on the
        // SNI name before any bytes move.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        let stream = TcpStream::connect(addr).await.expect("connect");

        let err = context
            .handshake("not a hostname", stream)
            .await
            .expect_err("bad SNI must fail");
        assert!(matches!(err, NetworkError::TlsError(_)));
    }

    #[tokio::test]
    async fn handshake_against_non_tls_peer_fails() {
        let context = TlsContext::new().expect("tls context");
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");

        // Peer answers with plaintext garbage instead of a ServerHello.
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                use tokio::io::AsyncWriteExt;
                let _ = socket.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n").await;
            }
        });

        let stream = TcpStream::connect(addr).await.expect("connect");
        let err = context
            .handshake("localhost", stream)
            .await
            .expect_err("plaintext peer must fail the handshake");
        assert!(matches!(err, NetworkError::TlsError(_)));
    }
}
