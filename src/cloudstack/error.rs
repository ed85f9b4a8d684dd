//! Error types for the CloudStack client.

use thiserror::Error;

/// Errors raised while talking to a CloudStack-compatible API.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CloudStackError {
    /// Raised when the HTTP request cannot be completed (connection refused,
    /// timeout, DNS failure, malformed URL).
    #[error("transport error: {message}")]
    Transport {
        /// Message reported by the HTTP client.
        message: String,
    },
    /// Raised when a non-blank response body is not well-formed XML.
    #[error("error reading xml response: {message}; response body: {body}")]
    Parse {
        /// Parser error message.
        message: String,
        /// Offending response body.
        body: String,
    },
    /// Raised when a well-formed response lacks an element the command must
    /// return.
    #[error("response has no <{element}> element; response body: {body}")]
    MissingElement {
        /// Element name that was expected.
        element: String,
        /// Response body that was inspected.
        body: String,
    },
    /// Raised when the response carries an `errortext` element.
    #[error("{operation} failed: {message}")]
    Api {
        /// Human readable operation, including the instance id when known.
        operation: String,
        /// Error text returned by the remote API.
        message: String,
    },
    /// Raised when the remote API contradicts itself about an instance.
    #[error("instance {instance_id} is listed but cannot be described: {message}")]
    Inconsistent {
        /// Provider instance identifier.
        instance_id: String,
        /// Error text returned by the describe call.
        message: String,
    },
    /// Raised when the credential probe fails.
    #[error("invalid authentication credentials for endpoint {endpoint}")]
    InvalidCredentials {
        /// Endpoint the credentials were tested against.
        endpoint: String,
    },
    /// Raised when the request signature cannot be computed.
    #[error("failed to generate hmac: {message}")]
    Signature {
        /// Message returned by the MAC implementation.
        message: String,
    },
}

impl CloudStackError {
    /// Builds an [`CloudStackError::Api`] for the given operation.
    pub(crate) fn api(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for CloudStackError {
    fn from(value: reqwest::Error) -> Self {
        Self::Transport {
            message: value.to_string(),
        }
    }
}
