//! A thin HTTP client wrapper for external-service collaborators.
//!
//! Sets sensible defaults (timeout, user-agent) and retries transient
//! failures with exponential backoff. Retry lives here, on the collaborator
//! side of the boundary; the core itself never retries.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use reqwest::{Method, RequestBuilder, Response};

use crate::error::Error;

pub(crate) struct Request {
    client: reqwest::Client,
    timeout: Duration,
    max_retries: usize,
}

impl Request {
    pub(crate) fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub(crate) fn get(&self, url: &str) -> RequestBuilder {
        self.client
            .request(Method::GET, url)
            .timeout(self.timeout)
            .header(
                "User-Agent",
                format!("idkit-core/{}", env!("CARGO_PKG_VERSION")),
            )
    }

    /// Sends the request, retrying timeouts, connect errors, 429 and 5xx.
    pub(crate) async fn handle(&self, builder: RequestBuilder) -> Result<Response, Error> {
        let template = builder.try_clone().ok_or_else(|| {
            Error::Unknown("request cannot be retried because it is not cloneable".into())
        })?;

        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(self.max_retries);

        (|| async {
            let builder = template
                .try_clone()
                .ok_or_else(|| TransientError::permanent("request not cloneable".into()))?;
            execute(builder).await
        })
        .retry(backoff)
        .when(TransientError::is_retryable)
        .await
        .map_err(|err| Error::Unknown(err.message))
    }
}

#[derive(Debug)]
struct TransientError {
    message: String,
    retryable: bool,
}

impl TransientError {
    fn retryable(message: String) -> Self {
        Self {
            message,
            retryable: true,
        }
    }

    const fn permanent(message: String) -> Self {
        Self {
            message,
            retryable: false,
        }
    }

    const fn is_retryable(&self) -> bool {
        self.retryable
    }
}

async fn execute(builder: RequestBuilder) -> Result<Response, TransientError> {
    match builder.send().await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            if status == 429 || (500..600).contains(&status) {
                return Err(TransientError::retryable(format!(
                    "bad status code {status}"
                )));
            }
            Ok(resp)
        }
        Err(err) if err.is_timeout() || err.is_connect() => Err(TransientError::retryable(
            format!("timeout/connect error: {err}"),
        )),
        Err(err) => Err(TransientError::permanent(format!("request failed: {err}"))),
    }
}
