// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface for making API requests to Ironic, the OpenStack bare metal
//! service.
//!
//! Only the calls needed to drive a node through its lifecycle are
//! implemented. Ironic answers `409 Conflict` while a node is locked by an
//! in-flight transition; that case is reported as [`Error::Busy`] so callers
//! can tell it apart from every other failure.

mod types;

pub use reqwest::StatusCode;
pub use types::*;

use reqwest::Method;
use reqwest::RequestBuilder;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use slog::Logger;
use slog::debug;

/// Header selecting the API microversion for each request.
pub const API_VERSION_HEADER: &str = "X-OpenStack-Ironic-API-Version";

/// Header carrying a Keystone token, when the deployment requires one.
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Microversion used unless the caller asks for another one. Power state
/// timeouts need at least 1.27 and RAID / manual cleaning need 1.15.
pub const DEFAULT_API_VERSION: &str = "1.81";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("ironic is busy: {message}")]
    Busy { message: String },
    #[error("ironic returned {status}: {message}")]
    Api { status: StatusCode, message: String },
    #[error("error communicating with ironic")]
    Communication(#[from] reqwest::Error),
    #[error("invalid ironic endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },
}

impl Error {
    /// Whether this is the "busy" conflict that is worth retrying later.
    pub fn is_busy(&self) -> bool {
        matches!(self, Error::Busy { .. })
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Busy { .. } => Some(StatusCode::CONFLICT),
            Error::Api { status, .. } => Some(*status),
            Error::Communication(err) => err.status(),
            Error::InvalidEndpoint { .. } => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Client {
    client: reqwest::Client,
    baseurl: String,
    api_version: String,
    auth_token: Option<String>,
    log: Logger,
}

impl Client {
    pub fn new(baseurl: &str, log: Logger) -> Result<Self, Error> {
        Self::new_with_client(baseurl, reqwest::Client::new(), log)
    }

    pub fn new_with_client(
        baseurl: &str,
        client: reqwest::Client,
        log: Logger,
    ) -> Result<Self, Error> {
        reqwest::Url::parse(baseurl).map_err(|err| Error::InvalidEndpoint {
            endpoint: baseurl.to_string(),
            reason: err.to_string(),
        })?;
        Ok(Self {
            client,
            baseurl: baseurl.trim_end_matches('/').to_string(),
            api_version: DEFAULT_API_VERSION.to_string(),
            auth_token: None,
            log,
        })
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn baseurl(&self) -> &str {
        &self.baseurl
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// `GET /v1/nodes/{node_id}`
    pub async fn get_node(&self, node_id: &str) -> Result<Node, Error> {
        let response =
            self.execute(self.request(Method::GET, &node_path(node_id))).await?;
        parse_json(response).await
    }

    /// `PATCH /v1/nodes/{node_id}`
    pub async fn update_node(
        &self,
        node_id: &str,
        patch: &[PatchOperation],
    ) -> Result<Node, Error> {
        let builder =
            self.request(Method::PATCH, &node_path(node_id)).json(patch);
        let response = self.execute(builder).await?;
        parse_json(response).await
    }

    /// `PUT /v1/nodes/{node_id}/states/power`
    ///
    /// Ironic accepts the request with `202 Accepted`; completion is only
    /// observable by polling the node's `target_power_state`.
    pub async fn change_power_state(
        &self,
        node_id: &str,
        target: TargetPowerState,
        timeout: Option<u64>,
    ) -> Result<(), Error> {
        let path = format!("{}/states/power", node_path(node_id));
        let builder = self
            .request(Method::PUT, &path)
            .json(&PowerStateRequest { target, timeout });
        self.execute(builder).await?;
        Ok(())
    }

    /// `PUT /v1/nodes/{node_id}/states/raid`
    pub async fn set_raid_config(
        &self,
        node_id: &str,
        logical_disks: &[LogicalDisk],
    ) -> Result<(), Error> {
        let path = format!("{}/states/raid", node_path(node_id));
        let builder = self
            .request(Method::PUT, &path)
            .json(&RaidConfigRequest { logical_disks });
        self.execute(builder).await?;
        Ok(())
    }

    /// `PUT /v1/nodes/{node_id}/states/provision`
    pub async fn change_provision_state(
        &self,
        node_id: &str,
        target: ProvisionTarget,
        clean_steps: &[CleanStep],
    ) -> Result<(), Error> {
        let path = format!("{}/states/provision", node_path(node_id));
        let builder = self
            .request(Method::PUT, &path)
            .json(&ProvisionStateRequest { target, clean_steps });
        self.execute(builder).await?;
        Ok(())
    }

    /// `POST /v1/nodes`
    pub async fn create_node(&self, node: &NodeCreate) -> Result<Node, Error> {
        let builder = self.request(Method::POST, "nodes").json(node);
        let response = self.execute(builder).await?;
        parse_json(response).await
    }

    /// `DELETE /v1/nodes/{node_id}`
    pub async fn delete_node(&self, node_id: &str) -> Result<(), Error> {
        self.execute(self.request(Method::DELETE, &node_path(node_id)))
            .await?;
        Ok(())
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/v1/{}", self.baseurl, path);
        let builder = self
            .client
            .request(method, url)
            .header(API_VERSION_HEADER, &self.api_version);
        match &self.auth_token {
            Some(token) => builder.header(AUTH_TOKEN_HEADER, token),
            None => builder,
        }
    }

    async fn execute(
        &self,
        builder: RequestBuilder,
    ) -> Result<reqwest::Response, Error> {
        let request = builder.build()?;
        debug!(self.log, "client request";
            "method" => %request.method(),
            "uri" => %request.url(),
        );
        let response = self.client.execute(request).await?;
        let status = response.status();
        debug!(self.log, "client response"; "status" => %status);
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = fault_message(&body);
        if status == StatusCode::CONFLICT {
            Err(Error::Busy { message })
        } else {
            Err(Error::Api { status, message })
        }
    }
}

fn node_path(node_id: &str) -> String {
    format!("nodes/{node_id}")
}

async fn parse_json<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, Error> {
    Ok(response.json().await?)
}

/// Extracts the human-readable fault from an Ironic error body.
///
/// Ironic wraps errors as `{"error_message": ...}` where the inner value is a
/// JSON document *encoded as a string* carrying `faultstring`. Some proxies
/// return the object unencoded, and some return plain text.
fn fault_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct Envelope {
        error_message: Value,
    }

    #[derive(Deserialize)]
    struct Fault {
        faultstring: String,
    }

    let Ok(envelope) = serde_json::from_str::<Envelope>(body) else {
        return body.trim().to_string();
    };
    match envelope.error_message {
        Value::String(encoded) => serde_json::from_str::<Fault>(&encoded)
            .map(|fault| fault.faultstring)
            .unwrap_or(encoded),
        other => serde_json::from_value::<Fault>(other.clone())
            .map(|fault| fault.faultstring)
            .unwrap_or_else(|_| other.to_string()),
    }
}
