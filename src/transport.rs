//! Retrying HTTP transport
//!
//! Every outbound provider/registry call goes through [`HttpClient`], which
//! wraps a pooled `reqwest::Client` with exponential-backoff retry. 5xx
//! responses, 429 responses and transient network errors (timeout, connect)
//! are retried; any other 4xx is a definitive answer and returned as-is.

use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

/// Configuration for retry behavior on transient upstream errors.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: u32,
    /// Initial delay before the first retry.
    pub base_delay: Duration,
    /// Maximum delay between retries (backoff is capped here).
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    /// Backoff delay before retry number `attempt` (0-based).
    fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        backoff.min(self.max_delay)
    }
}

/// HTTP client with retry-on-transient-failure semantics.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    retry: RetryConfig,
}

impl HttpClient {
    pub fn new(retry: RetryConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("stalewatch/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_default();
        Self { client, retry }
    }

    /// Wraps an existing `reqwest::Client`, e.g. one built with
    /// relaxed TLS verification for a self-hosted GitLab.
    pub fn with_client(client: reqwest::Client, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    /// Starts building a GET request against the inner client.
    pub fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.client.get(url)
    }

    /// Sends the request, retrying on 5xx/429 and transient network errors.
    ///
    /// Each retry re-issues a fresh clone of the request; requests with
    /// streaming bodies cannot be cloned and are sent exactly once. After the
    /// retry budget is exhausted the last response (or error) is returned and
    /// the caller decides how to surface it.
    pub async fn execute(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut attempt: u32 = 0;

        loop {
            let this_try = match request.try_clone() {
                Some(cloned) => cloned,
                // Unclonable request: single shot, no retry possible.
                None => return request.send().await,
            };

            let result = this_try.send().await;
            let retryable = match &result {
                Ok(response) => {
                    let status = response.status();
                    status.is_server_error()
                        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                }
                Err(e) => e.is_timeout() || e.is_connect(),
            };

            if !retryable || attempt >= self.retry.max_retries {
                return result;
            }

            let delay = self.retry.delay_for(attempt);
            debug!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "retrying request after transient failure"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    /// Serves one canned HTTP status per connection, in order, then repeats
    /// the last one. Returns the base URL and a hit counter.
    async fn serve_status_sequence(
        statuses: Vec<u16>,
    ) -> (String, std::sync::Arc<std::sync::atomic::AtomicUsize>) {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let status = *statuses.get(n).or(statuses.last()).unwrap();
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {status} X\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });

        (url, hits)
    }

    #[tokio::test]
    async fn execute_retries_server_errors_until_success() {
        let (url, hits) = serve_status_sequence(vec![500, 500, 200]).await;

        let client = HttpClient::new(fast_retry());
        let response = client.execute(client.get(&url)).await.unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn execute_does_not_retry_not_found() {
        let mut server = Server::new_async().await;

        let mock = server
            .mock("GET", "/missing")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let client = HttpClient::new(fast_retry());
        let response = client
            .execute(client.get(&format!("{}/missing", server.url())))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn execute_retries_429_responses() {
        let (url, hits) = serve_status_sequence(vec![429, 200]).await;

        let client = HttpClient::new(fast_retry());
        let response = client.execute(client.get(&url)).await.unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn execute_gives_up_after_retry_budget() {
        let mut server = Server::new_async().await;

        // Initial attempt plus three retries.
        let mock = server
            .mock("GET", "/down")
            .with_status(503)
            .expect(4)
            .create_async()
            .await;

        let client = HttpClient::new(fast_retry());
        let response = client
            .execute(client.get(&format!("{}/down", server.url())))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status(), 503);
    }

    #[tokio::test]
    async fn dropping_execute_stops_retrying() {
        let (url, hits) = serve_status_sequence(vec![503]).await;

        // Generous budget; the deadline must cut it short mid-backoff.
        let client = HttpClient::new(RetryConfig {
            max_retries: 10,
            base_delay: Duration::from_millis(40),
            max_delay: Duration::from_millis(40),
        });
        let result =
            tokio::time::timeout(Duration::from_millis(100), client.execute(client.get(&url)))
                .await;

        assert!(result.is_err(), "always-503 endpoint must hit the deadline");
        let attempts = hits.load(std::sync::atomic::Ordering::SeqCst);
        assert!(attempts >= 1);
        assert!(
            attempts < 11,
            "dropped future kept retrying: {attempts} attempts"
        );
    }

    #[test]
    fn delay_for_is_exponential_and_capped() {
        let retry = RetryConfig {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        };

        assert_eq!(retry.delay_for(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for(1), Duration::from_millis(200));
        assert_eq!(retry.delay_for(2), Duration::from_millis(400));
        assert_eq!(retry.delay_for(10), Duration::from_secs(2));
    }
}
