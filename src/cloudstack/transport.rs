//! HTTP transport for signed CloudStack requests.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use super::CloudStackError;

/// Default bound on a single API round-trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Future returned by [`Transport::get`].
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<String, CloudStackError>> + Send + 'a>>;

/// Executes one signed GET request and yields the raw response body.
///
/// Implementations never retry and never interpret the body; error detection
/// happens on the parsed XML, independent of the HTTP status.
pub trait Transport: Send + Sync {
    /// Issues a GET for `url` and returns the full body as text.
    fn get<'a>(&'a self, url: &'a str) -> TransportFuture<'a>;
}

/// [`Transport`] backed by a pooled `reqwest` client with a request timeout.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Builds a transport whose requests fail after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`CloudStackError::Transport`] when the TLS backend cannot be
    /// initialised.
    pub fn new(timeout: Duration) -> Result<Self, CloudStackError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get<'a>(&'a self, url: &'a str) -> TransportFuture<'a> {
        Box::pin(async move {
            // The response owns the pooled connection; reading the body to the
            // end or dropping it on an error path returns it to the pool.
            let response = self.client.get(url).send().await?;
            let body = response.text().await?;
            Ok(body)
        })
    }
}
