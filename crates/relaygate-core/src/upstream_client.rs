use std::time::Duration;

use axum::http::StatusCode;

use crate::auth::SharedAuthManager;
use crate::error::GatewayError;

/// Shared HTTP client wrapping `wreq` with the bounded pool defaults from
/// §4.5 and status-code-aware retry. Every retry fetches a fresh access
/// credential so credential rotation mid-flight is tolerated.
pub struct RetryClient {
    http: wreq::Client,
    auth: SharedAuthManager,
    max_retries: u32,
    base_retry_delay_secs: f64,
}

pub enum RetryOutcome {
    Response(wreq::Response),
    /// Non-retryable 4xx; returned to the caller as-is.
    ClientError(wreq::Response),
}

impl RetryClient {
    pub fn new(auth: SharedAuthManager, max_retries: u32, base_retry_delay_secs: f64) -> Self {
        let http = wreq::Client::builder()
            .pool_max_idle_per_host(20)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build upstream http client");
        Self {
            http,
            auth,
            max_retries,
            base_retry_delay_secs,
        }
    }

    pub fn http(&self) -> &wreq::Client {
        &self.http
    }

    /// Executes `build_request` against a fresh access credential, retrying
    /// per the §4.5 taxonomy. `build_request` receives the access credential
    /// for the attempt and returns a ready-to-send request builder.
    pub async fn execute<F>(
        &self,
        mut build_request: F,
        is_stream: bool,
    ) -> Result<RetryOutcome, GatewayError>
    where
        F: FnMut(&str) -> wreq::RequestBuilder,
    {
        let mut attempt: u32 = 0;
        loop {
            let credential = self.auth.get_access_credential().await?;
            let request = build_request(&credential);

            let sent = tokio::time::timeout(Duration::from_secs(30), request.send()).await;

            let response = match sent {
                Err(_elapsed) => {
                    if attempt >= self.max_retries {
                        return Err(timeout_exhausted(is_stream));
                    }
                    self.backoff(attempt).await;
                    attempt += 1;
                    continue;
                }
                Ok(Err(_network_error)) => {
                    if attempt >= self.max_retries {
                        return Err(timeout_exhausted(is_stream));
                    }
                    self.backoff(attempt).await;
                    attempt += 1;
                    continue;
                }
                Ok(Ok(response)) => response,
            };

            let status = response.status();
            if status.is_success() {
                return Ok(RetryOutcome::Response(response));
            }
            if status.as_u16() == 403 {
                if attempt >= self.max_retries {
                    return Err(GatewayError::Upstream {
                        status: StatusCode::from_u16(status.as_u16())
                            .unwrap_or(StatusCode::BAD_GATEWAY),
                    });
                }
                let _ = self.auth.force_refresh().await?;
                attempt += 1;
                continue;
            }
            if status.as_u16() == 429 || status.is_server_error() {
                if attempt >= self.max_retries {
                    return Err(GatewayError::Upstream {
                        status: StatusCode::from_u16(status.as_u16())
                            .unwrap_or(StatusCode::BAD_GATEWAY),
                    });
                }
                self.backoff(attempt).await;
                attempt += 1;
                continue;
            }
            // other 4xx: return immediately, non-retryable.
            return Ok(RetryOutcome::ClientError(response));
        }
    }

    async fn backoff(&self, attempt: u32) {
        let delay = self.base_retry_delay_secs * 2f64.powi(attempt as i32);
        tokio::time::sleep(Duration::from_secs_f64(delay)).await;
    }
}

fn timeout_exhausted(is_stream: bool) -> GatewayError {
    let status = if is_stream {
        StatusCode::GATEWAY_TIMEOUT
    } else {
        StatusCode::BAD_GATEWAY
    };
    GatewayError::Upstream { status }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_exhausted_maps_by_mode() {
        assert_eq!(
            matches!(
                timeout_exhausted(false),
                GatewayError::Upstream { status } if status == StatusCode::BAD_GATEWAY
            ),
            true
        );
        assert_eq!(
            matches!(
                timeout_exhausted(true),
                GatewayError::Upstream { status } if status == StatusCode::GATEWAY_TIMEOUT
            ),
            true
        );
    }

    #[tokio::test]
    async fn retry_budget_issues_exactly_max_retries_plus_one_requests() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        use crate::auth::AuthManager;

        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/refreshToken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "accessToken": "at-1",
                "expiresIn": 3600,
            })))
            .mount(&server)
            .await;

        let request_count = Arc::new(AtomicUsize::new(0));
        let counter = request_count.clone();
        Mock::given(method("POST"))
            .and(path("/GenerateAssistantResponse"))
            .respond_with(move |_req: &wiremock::Request| {
                counter.fetch_add(1, Ordering::SeqCst);
                ResponseTemplate::new(429)
            })
            .mount(&server)
            .await;

        let auth: SharedAuthManager = Arc::new(AuthManager::new(
            "rt".to_string(),
            None,
            None,
            server.uri(),
            None,
            600,
            wreq::Client::new(),
        ));

        let max_retries = 2;
        let client = RetryClient::new(auth, max_retries, 0.0);
        let url = format!("{}/GenerateAssistantResponse", server.uri());

        let result = client
            .execute(|credential| client.http().post(&url).bearer_auth(credential), false)
            .await;

        assert!(matches!(result, Err(GatewayError::Upstream { .. })));
        assert_eq!(
            request_count.load(Ordering::SeqCst),
            (max_retries + 1) as usize
        );
    }
}
