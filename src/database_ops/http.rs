use anyhow::{anyhow, Context, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::database_ops::throttle::RequestThrottle;
use crate::util::env::env_parse;

/// Retry policy for transient network failures (connect/reset/timeout, 429, 5xx).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            attempts: env_parse("HTTP_RETRY_ATTEMPTS", d.attempts).max(1),
            base_delay: Duration::from_millis(env_parse(
                "HTTP_RETRY_BASE_MS",
                d.base_delay.as_millis() as u64,
            )),
        }
    }

    pub fn none() -> Self {
        Self {
            attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (0-based): base, 2*base, 4*base...
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << retry.min(16))
    }
}

fn is_transient_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Shared HTTP plumbing for one external source: per-call timeout, throttle and retry.
#[derive(Clone)]
pub struct SourceHttp {
    source: &'static str,
    client: Client,
    throttle: RequestThrottle,
    retry: RetryPolicy,
}

impl SourceHttp {
    pub fn new(
        source: &'static str,
        timeout: Duration,
        throttle: RequestThrottle,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("livegame-sync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .with_context(|| format!("failed to construct {source} HTTP client"))?;
        Ok(Self {
            source,
            client,
            throttle,
            retry,
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Send a request built by `build`, retrying transient failures. The final
    /// response is returned as-is, including non-success statuses that were not
    /// worth retrying.
    pub async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let _permit = self.throttle.acquire().await;
        let mut retry = 0u32;
        loop {
            let last_attempt = retry + 1 >= self.retry.attempts;
            match build(&self.client).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if is_transient_status(status) && !last_attempt {
                        let wait = self.retry.delay_for(retry);
                        debug!(source = self.source, %status, ?wait, "transient status; retrying");
                        sleep(wait).await;
                        retry += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) if is_transient_error(&err) && !last_attempt => {
                    let wait = self.retry.delay_for(retry);
                    debug!(source = self.source, error = %err, ?wait, "transient error; retrying");
                    sleep(wait).await;
                    retry += 1;
                }
                Err(err) => {
                    return Err(anyhow!(err).context(format!("{} request failed", self.source)))
                }
            }
        }
    }

    /// GET returning parsed JSON, or None after logging on any failure.
    pub async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Option<Value> {
        let resp = match self
            .send(|c| {
                c.get(url)
                    .header("Accept", "application/json")
                    .query(query)
            })
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                warn!(source = self.source, url, error = %err, "request failed");
                return None;
            }
        };
        let status = resp.status();
        if !status.is_success() {
            warn!(source = self.source, url, %status, "non-success status");
            return None;
        }
        match resp.json::<Value>().await {
            Ok(v) => Some(v),
            Err(err) => {
                warn!(source = self.source, url, error = %err, "malformed JSON body");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::throttle::RateLimitSettings;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn http(attempts: u32) -> SourceHttp {
        SourceHttp::new(
            "test",
            Duration::from_secs(5),
            RequestThrottle::new(RateLimitSettings::unthrottled()),
            RetryPolicy {
                attempts,
                base_delay: Duration::from_millis(5),
            },
        )
        .unwrap()
    }

    #[test]
    fn backoff_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn retries_server_errors_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .with_priority(2)
            .mount(&server)
            .await;

        let body = http(3)
            .get_json(&format!("{}/flaky", server.uri()), &[])
            .await;
        assert_eq!(body, Some(serde_json::json!({"ok": true})));
    }

    #[tokio::test]
    async fn gives_up_after_attempts_and_returns_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let body = http(2).get_json(&format!("{}/down", server.uri()), &[]).await;
        assert!(body.is_none());
    }

    #[tokio::test]
    async fn malformed_json_is_soft_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/garbage"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        assert!(http(1)
            .get_json(&format!("{}/garbage", server.uri()), &[])
            .await
            .is_none());
    }
}
