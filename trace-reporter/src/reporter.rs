//! Delivery of encoded reports to the collector.
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::ACCEPT;
use reqwest::header::CONTENT_ENCODING;
use reqwest::header::CONTENT_TYPE;
use reqwest::header::USER_AGENT;
use reqwest::Client;
use url::Url;

use crate::error::Error;

const BACKOFF_STEP: Duration = Duration::from_millis(50);

/// What the collector made of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The collector accepted the report.
    Sent,
    /// The collector refused the report, sending it again will not help.
    Rejected { status: u16, body: String },
    /// Network trouble, a timeout or a server error; worth another try.
    TransportFailure(String),
}

/// Posts encoded reports to the collector ingress.
#[derive(Debug, Clone)]
pub struct Reporter {
    client: Client,
    endpoint: Url,
    apollo_key: String,
    max_attempts: u32,
}

#[buildstructor::buildstructor]
impl Reporter {
    /// Create a reporter for `endpoint`.
    ///
    /// Every attempt is bounded by `timeout`; a report is tried at most
    /// `max_attempts` times.
    #[builder]
    pub fn new(
        endpoint: Url,
        apollo_key: String,
        timeout: Duration,
        max_attempts: u32,
    ) -> Result<Self, Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            apollo_key,
            max_attempts: max_attempts.max(1),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Make a single delivery attempt.
    pub async fn send(&self, body: Bytes) -> SendOutcome {
        let response = self
            .client
            .post(self.endpoint.clone())
            .body(body)
            .header("X-Api-Key", &self.apollo_key)
            .header(CONTENT_ENCODING, "gzip")
            .header(CONTENT_TYPE, "application/protobuf")
            .header(ACCEPT, "application/json")
            .header(
                USER_AGENT,
                format!(
                    "{} / {} usage reporting",
                    std::env!("CARGO_PKG_NAME"),
                    std::env!("CARGO_PKG_VERSION")
                ),
            )
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => return SendOutcome::TransportFailure(e.to_string()),
        };
        let status = response.status();
        let data = response.text().await.unwrap_or_default();
        // Handle various kinds of status:
        //  - if ok, return ok
        //  - if client error, terminate immediately
        //  - anything else, server errors and redirects reqwest did not follow,
        //    may be transient so treat as retry-able
        if status.is_success() {
            tracing::debug!("ingress response text: {:?}", data);
            SendOutcome::Sent
        } else if status.is_client_error() {
            SendOutcome::Rejected {
                status: status.as_u16(),
                body: data,
            }
        } else {
            SendOutcome::TransportFailure(format!("{status}: {data}"))
        }
    }

    /// Deliver `body`, retrying transport failures with a linear backoff.
    pub async fn submit(&self, body: Bytes) -> Result<(), Error> {
        let mut backoff = Duration::ZERO;
        let mut reason = String::new();
        for attempt in 1..=self.max_attempts {
            // Bytes clones share the buffer.
            match self.send(body.clone()).await {
                SendOutcome::Sent => return Ok(()),
                SendOutcome::Rejected { status, body } => {
                    tracing::error!(status, "client error reported at ingress: {}", body);
                    return Err(Error::Rejected { status, body });
                }
                SendOutcome::TransportFailure(e) => {
                    tracing::warn!("attempt: {}, could not transfer: {}", attempt, e);
                    reason = e;
                }
            }
            if attempt < self.max_attempts {
                backoff += BACKOFF_STEP;
                tokio::time::sleep(backoff).await;
            }
        }
        Err(Error::TransportFailure {
            attempts: self.max_attempts,
            reason,
        })
    }
}
