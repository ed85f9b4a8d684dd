//! Configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::cloudstack::Credentials;
use crate::connector::{
    ConnectorSettings, DEFAULT_CONTROLLER_HOST, DEFAULT_CONTROLLER_PORT,
    DEFAULT_DISPLAY_NAME_PREFIX,
};

/// Default request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// CloudStack connection settings derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "CLOUDSTACK",
    discovery(
        app_name = "cumulo",
        env_var = "CUMULO_CONFIG_PATH",
        config_file_name = "cumulo.toml",
        dotfile_name = ".cumulo.toml",
        project_file_name = "cumulo.toml"
    )
)]
pub struct CumuloConfig {
    /// Public API key of the CloudStack account.
    pub api_key: String,
    /// Secret key used to sign requests.
    pub secret_key: String,
    /// Management server URL, for example `https://cloud.example/client`.
    pub endpoint: String,
    /// Upper bound on a single API round-trip, in seconds.
    #[ortho_config(default = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub request_timeout_secs: u64,
    /// Controller host advertised to agents on new machines.
    #[ortho_config(default = DEFAULT_CONTROLLER_HOST.to_owned())]
    pub controller_host: String,
    /// Controller port advertised to agents on new machines.
    #[ortho_config(default = DEFAULT_CONTROLLER_PORT)]
    pub controller_port: u16,
    /// Prefix for generated instance display names.
    #[ortho_config(default = DEFAULT_DISPLAY_NAME_PREFIX.to_owned())]
    pub display_name_prefix: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

const REQUIRED_FIELDS: [FieldMetadata; 3] = [
    FieldMetadata::new("CloudStack API key", "CLOUDSTACK_API_KEY", "api_key"),
    FieldMetadata::new("CloudStack secret key", "CLOUDSTACK_SECRET_KEY", "secret_key"),
    FieldMetadata::new("CloudStack endpoint URL", "CLOUDSTACK_ENDPOINT", "endpoint"),
];

impl CumuloConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to cumulo.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("cumulo")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields. Error messages name
    /// the environment variable and TOML key that supply the value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is blank
    /// and [`ConfigError::Invalid`] for a zero timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let values = [&self.api_key, &self.secret_key, &self.endpoint];
        for (value, metadata) in values.into_iter().zip(REQUIRED_FIELDS.iter()) {
            Self::require_field(value, metadata)?;
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(String::from(
                "request_timeout_secs must be greater than zero",
            )));
        }
        Ok(())
    }

    /// Validated credentials with the endpoint normalised.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        self.validate()?;
        Ok(Credentials::new(
            &self.api_key,
            &self.secret_key,
            &self.endpoint,
        ))
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Settings for [`crate::connector::CloudStackConnector`].
    #[must_use]
    pub fn connector_settings(&self) -> ConnectorSettings {
        ConnectorSettings {
            controller_host: self.controller_host.clone(),
            controller_port: self.controller_port,
            display_name_prefix: self.display_name_prefix.clone(),
        }
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds an unusable value.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
