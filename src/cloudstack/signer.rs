//! Canonicalisation and HMAC-SHA1 signing of CloudStack API requests.
//!
//! CloudStack authenticates a request by recomputing a signature over the
//! sorted, lower-cased query string. The transmitted query keeps the original
//! casing of every value, so the two strings are built separately.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use sha1::Sha1;

use super::{CloudStackError, Credentials};

type HmacSha1 = Hmac<Sha1>;

/// Characters left untouched by form encoding; spaces become `%20`.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'.')
    .remove(b'-')
    .remove(b'*')
    .remove(b'_');

/// Percent-encodes a trimmed value for use in a CloudStack query string.
#[must_use]
pub fn encode_value(value: &str) -> String {
    utf8_percent_encode(value.trim(), QUERY_VALUE).to_string()
}

/// A single CloudStack command together with its encoded parameters.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ApiRequest {
    command: String,
    params: BTreeMap<String, String>,
}

impl ApiRequest {
    /// Starts a request for `command` with no parameters.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            params: BTreeMap::new(),
        }
    }

    /// Adds a raw parameter value, encoding it. Blank values are dropped.
    #[must_use]
    pub fn param(self, name: impl Into<String>, value: &str) -> Self {
        let encoded = encode_value(value);
        self.encoded_param(name, encoded)
    }

    /// Adds a raw parameter value when present.
    #[must_use]
    pub fn optional_param(self, name: impl Into<String>, value: Option<&str>) -> Self {
        match value {
            Some(raw) => self.param(name, raw),
            None => self,
        }
    }

    /// Adds an already-encoded value. Values that are blank after trimming
    /// are never sent.
    #[must_use]
    pub fn encoded_param(mut self, name: impl Into<String>, encoded: impl Into<String>) -> Self {
        let value = encoded.into();
        if !value.trim().is_empty() {
            self.params.insert(name.into(), value);
        }
        self
    }

    /// Command name sent as the `command` parameter.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Returns the encoded value stored for `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Builds the lower-cased, name-sorted string the signature covers.
    #[must_use]
    pub fn canonical_string(&self, api_key: &str) -> String {
        let mut fields = BTreeMap::new();
        fields.insert(String::from("apikey"), api_key.to_lowercase());
        fields.insert(String::from("command"), self.command.to_lowercase());
        for (name, value) in &self.params {
            fields.insert(name.to_lowercase(), value.to_lowercase());
        }

        fields
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("&")
            .to_lowercase()
    }

    /// Computes the Base64 HMAC-SHA1 signature of the canonical string.
    ///
    /// # Errors
    ///
    /// Returns [`CloudStackError::Signature`] when the MAC cannot be keyed.
    pub fn signature(&self, credentials: &Credentials) -> Result<String, CloudStackError> {
        let canonical = self.canonical_string(&credentials.api_key);
        let mut mac = HmacSha1::new_from_slice(credentials.secret_key.as_bytes()).map_err(
            |err| CloudStackError::Signature {
                message: err.to_string(),
            },
        )?;
        mac.update(canonical.as_bytes());
        let digest = mac.finalize().into_bytes();
        Ok(STANDARD.encode(digest).trim().to_owned())
    }

    /// Assembles the final signed request URL.
    ///
    /// # Errors
    ///
    /// Returns [`CloudStackError::Signature`] when signing fails.
    pub fn signed_url(&self, credentials: &Credentials) -> Result<String, CloudStackError> {
        let signature = self.signature(credentials)?;
        let mut url = format!(
            "{}?apiKey={}&command={}",
            credentials.api_url(),
            credentials.api_key,
            self.command
        );
        for (name, value) in &self.params {
            url.push('&');
            url.push_str(&encode_value(name));
            url.push('=');
            url.push_str(value);
        }
        url.push_str("&signature=");
        url.push_str(&encode_value(&signature));
        Ok(url)
    }
}
