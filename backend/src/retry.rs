//! Exponential backoff for idempotent upstream reads.
//!
//! Only transport failures (connection refused, timeouts) are retried. HTTP error statuses and
//! decoding failures are the caller's to inspect and are never retried here.

use std::future::Future;
use std::time::Duration;

/// Retries after the first attempt.
const MAX_RETRIES: u32 = 3;

/// Doubles each attempt: 200ms, 400ms, 800ms.
const BASE_DELAY_MS: u64 = 200;

pub(crate) async fn retry_send<F, Fut>(f: F) -> Result<reqwest::Response, reqwest::Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    for attempt in 0..MAX_RETRIES {
        match f().await {
            Ok(resp) => return Ok(resp),
            Err(e) => {
                let delay = Duration::from_millis(BASE_DELAY_MS * 2u64.pow(attempt));
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries = MAX_RETRIES,
                    "upstream request failed, retrying in {delay:?}: {e}"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
    f().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn transport_failures_exhaust_every_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(50))
            .build()
            .unwrap();

        let result = retry_send(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            // Nothing listens on port 1.
            client.get("http://127.0.0.1:1/").send()
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_RETRIES + 1);
    }

    #[tokio::test]
    async fn error_statuses_are_returned_without_retrying() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let resp = retry_send(|| client.get(server.uri()).send()).await.unwrap();
        assert_eq!(resp.status().as_u16(), 500);
    }
}
