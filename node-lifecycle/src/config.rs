// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces for parsing configuration files and building the logger and
//! Ironic client they describe.

use camino::Utf8Path;
use camino::Utf8PathBuf;
use dropshot::ConfigLogging;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use serde::de::DeserializeOwned;
use slog::Logger;
use slog::o;
use std::time::Duration;
use thiserror::Error;

/// Configuration for the `ironic-node` tool
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Config {
    /// How to reach Ironic.
    pub ironic: IronicConfig,
    /// Polling behavior for provision state transitions.
    #[serde(default)]
    pub provision: ProvisionConfig,
    /// Process-wide logging configuration.
    pub log: ConfigLogging,
}

impl Config {
    /// Load a `Config` from the given TOML file
    pub fn from_file(path: &Utf8Path) -> Result<Config, LoadError> {
        load_toml(path)
    }
}

pub(crate) fn load_toml<T: DeserializeOwned>(
    path: &Utf8Path,
) -> Result<T, LoadError> {
    let file_contents = std::fs::read_to_string(path)
        .map_err(|err| LoadError::Io { path: path.into(), err })?;
    let parsed = toml::from_str(&file_contents)
        .map_err(|err| LoadError::Parse { path: path.into(), err })?;
    Ok(parsed)
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("error reading \"{path}\": {err}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("error parsing \"{path}\": {err}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: toml::de::Error,
    },
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct IronicConfig {
    /// Base URL of the Ironic API, e.g. `http://ironic.example:6385`.
    pub endpoint: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Keystone token sent as `X-Auth-Token`; standalone Ironic needs none.
    #[serde(default)]
    pub auth_token: Option<String>,
    /// Upper bound on any single HTTP request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_api_version() -> String {
    ironic_client::DEFAULT_API_VERSION.to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl IronicConfig {
    pub fn client(
        &self,
        log: &Logger,
    ) -> Result<ironic_client::Client, ironic_client::Error> {
        let http = reqwest::ClientBuilder::new()
            .timeout(Duration::from_secs(self.request_timeout_secs))
            .build()?;
        let client = ironic_client::Client::new_with_client(
            &self.endpoint,
            http,
            log.new(o!("component" => "IronicClient")),
        )?
        .with_api_version(self.api_version.clone());
        Ok(match &self.auth_token {
            Some(token) => client.with_auth_token(token.clone()),
            None => client,
        })
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ProvisionConfig {
    /// Time between provision state polls; must be at least one second.
    #[serde(
        default = "default_poll_interval_secs",
        deserialize_with = "deserialize_poll_interval_secs"
    )]
    pub poll_interval_secs: u64,
    /// Budget for a single provision state transition, e.g. a full clean.
    #[serde(default = "default_provision_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn deserialize_poll_interval_secs<'de, D>(
    deserializer: D,
) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = u64::deserialize(deserializer)?;
    if value == 0 {
        return Err(serde::de::Error::custom(
            "poll_interval_secs must be at least 1",
        ));
    }
    Ok(value)
}

fn default_provision_timeout_secs() -> u64 {
    3600
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            timeout_secs: default_provision_timeout_secs(),
        }
    }
}

impl ProvisionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
