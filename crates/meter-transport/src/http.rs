use crate::{Result, TransportError};
use std::time::Duration;
use tracing::trace;

/// Issues `GET http://<address>/meterData` and hands the body over chunk by
/// chunk, exactly as the network delivers it.
pub struct HttpSource {
    client: reqwest::Client,
    url: String,
}

impl HttpSource {
    pub fn meter_data(address: &str, timeout: Duration) -> Result<Self> {
        Self::new(format!("http://{address}/meterData"), timeout)
    }

    pub fn new(url: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch once, calling `on_chunk` for every body chunk. Returns the number
    /// of body bytes received.
    pub async fn fetch<F>(&self, mut on_chunk: F) -> Result<usize>
    where
        F: FnMut(&[u8]),
    {
        let mut resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(map_reqwest)?;
        if !resp.status().is_success() {
            return Err(TransportError::Status(resp.status().as_u16()));
        }
        let mut total = 0usize;
        while let Some(chunk) = resp.chunk().await.map_err(map_reqwest)? {
            trace!(url = %self.url, len = chunk.len(), "body chunk");
            total += chunk.len();
            on_chunk(&chunk);
        }
        Ok(total)
    }
}

fn map_reqwest(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Http(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_once(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut req = [0u8; 1024];
            let _ = sock.read(&mut req).await;
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            sock.write_all(head.as_bytes()).await.unwrap();
            // Two writes so the client is likely to see more than one chunk
            let (a, b) = body.split_at(body.len() / 2);
            sock.write_all(a.as_bytes()).await.unwrap();
            sock.flush().await.unwrap();
            sock.write_all(b.as_bytes()).await.unwrap();
            let _ = sock.shutdown().await;
        });
        addr
    }

    #[tokio::test]
    async fn test_fetch_collects_whole_body() {
        let body = r#"{"info":{"mac":"aa:bb"},"d":{}}"#;
        let addr = serve_once(body).await;
        let src = HttpSource::meter_data(&addr, Duration::from_secs(5)).unwrap();
        assert!(src.url().ends_with("/meterData"));

        let mut got = Vec::new();
        let n = src.fetch(|c| got.extend_from_slice(c)).await.unwrap();
        assert_eq!(n, body.len());
        assert_eq!(got, body.as_bytes());
    }

    #[tokio::test]
    async fn test_refused_connection_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        let src = HttpSource::meter_data(&addr, Duration::from_secs(2)).unwrap();
        assert!(src.fetch(|_| {}).await.is_err());
    }
}
