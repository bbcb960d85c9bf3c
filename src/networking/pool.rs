use crate::networking::{error::NetworkError, tcp::TcpConnection, tls::TlsContext, uri::Uri};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_IDLE: Duration = Duration::from_secs(30);
const MAX_POOLED: usize = 16;

/// Keep-alive connection pool, keyed by scheme:host:port. Idle connections
/// expire after `MAX_IDLE`; the pool never hands out a stale one.
pub struct ConnectionPool {
    connections: Mutex<HashMap<String, PooledConnection>>,
}

struct PooledConnection {
    connection: TcpConnection,
    last_used: Instant,
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Get a connection for the given URI, either from the pool or by
    /// establishing a new one (TLS handshake included for https).
    pub async fn get(&self, uri: &Uri, tls: &TlsContext) -> Result<TcpConnection, NetworkError> {
        let key = pool_key(uri);

        let mut pool = self.connections.lock().await;
        if let Some(pooled) = pool.remove(&key) {
            if pooled.last_used.elapsed() < MAX_IDLE {
                log::debug!(target: "network", "Reusing pooled connection for {}", key);
                return Ok(pooled.connection);
            }
            log::debug!(target: "network", "Dropping expired connection for {}", key);
        }
        drop(pool);

        log::debug!(target: "network", "Creating new connection for {}", key);
        tokio::time::timeout(CONNECT_TIMEOUT, TcpConnection::connect(uri, tls))
            .await
            .map_err(|_| NetworkError::Timeout("Connection timed out".to_string()))?
    }

    /// Return a connection to the pool for reuse. Callers must only return
    /// connections whose response was fully drained.
    pub async fn put(&self, uri: &Uri, connection: TcpConnection) {
        if !connection.is_keep_alive() {
            return;
        }
        let key = pool_key(uri);
        let mut pool = self.connections.lock().await;

        if pool.len() >= MAX_POOLED {
            let now = Instant::now();
            pool.retain(|_, v| now.duration_since(v.last_used) < MAX_IDLE);
        }

        pool.insert(
            key,
            PooledConnection {
                connection,
                last_used: Instant::now(),
            },
        );
    }
}

fn pool_key(uri: &Uri) -> String {
    format!("{}:{}:{}", uri.scheme(), uri.host(), uri.port_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_key_includes_scheme_and_port() {
        let http = Uri::parse("http://example.com/a").expect("uri");
        let https = Uri::parse("https://example.com/a").expect("uri");
        assert_eq!(pool_key(&http), "http:example.com:80");
        assert_eq!(pool_key(&https), "https:example.com:443");

        let custom = Uri::parse("http://example.com:8080/").expect("uri");
        assert_eq!(pool_key(&custom), "http:example.com:8080");
    }
}
