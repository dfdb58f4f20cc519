//! Thing directory client.
//!
//! The directory is the system of record for devices. This service only asks
//! it one question per request: does thing X exist and belong to owner Y.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::ThingsConfig;
use crate::domain::{OwnerId, SecretString, ThingId, ThingIdentity};
use crate::errors::{CertsError, Result};

const SERVICE: &str = "things";

#[async_trait]
pub trait ThingDirectoryClient: Send + Sync {
    /// Look up a thing for `owner`. Unknown things and things owned by
    /// someone else are both reported as `NotFound`.
    async fn resolve(&self, thing_id: &ThingId, owner: &OwnerId) -> Result<ThingIdentity>;
}

#[derive(Debug, Deserialize)]
struct ThingResponse {
    owner: String,
    key: String,
}

#[derive(Debug)]
pub struct HttpThingDirectoryClient {
    client: Client,
    base_url: Url,
    service_token: Option<SecretString>,
    timeout: Duration,
}

impl HttpThingDirectoryClient {
    pub fn new(config: &ThingsConfig) -> Result<Self> {
        let timeout = config.timeout();
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            CertsError::config_with_source("Failed to create thing directory HTTP client", Box::new(e))
        })?;

        Ok(Self {
            client,
            base_url: config.base_url()?,
            service_token: config.service_token.clone(),
            timeout,
        })
    }

    fn thing_url(&self, thing_id: &ThingId) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CertsError::config(format!("Thing directory URL '{}' cannot be a base", self.base_url)))?
            .pop_if_empty()
            .push("things")
            .push(thing_id.as_str());
        Ok(url)
    }

    fn map_transport_error(&self, error: reqwest::Error) -> CertsError {
        if error.is_timeout() {
            CertsError::timeout("resolve_thing", self.timeout.as_millis() as u64)
        } else {
            CertsError::dependency_unavailable(SERVICE, error.to_string())
        }
    }
}

#[async_trait]
impl ThingDirectoryClient for HttpThingDirectoryClient {
    #[instrument(skip(self), fields(thing_id = %thing_id, owner_id = %owner), name = "things_resolve")]
    async fn resolve(&self, thing_id: &ThingId, owner: &OwnerId) -> Result<ThingIdentity> {
        let mut request = self.client.get(self.thing_url(thing_id)?);
        if let Some(token) = &self.service_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.map_err(|e| self.map_transport_error(e))?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => return Err(CertsError::not_found("Thing", thing_id.as_str())),
            status => {
                warn!(status = %status, "Thing directory returned an error");
                return Err(CertsError::dependency_unavailable(
                    SERVICE,
                    format!("unexpected status {}", status),
                ));
            }
        }

        let body: ThingResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                self.map_transport_error(e)
            } else {
                CertsError::dependency_unavailable(SERVICE, format!("malformed response: {}", e))
            }
        })?;

        if body.owner != owner.as_str() {
            debug!(actual_owner = %body.owner, "Thing belongs to another owner");
            return Err(CertsError::not_found("Thing", thing_id.as_str()));
        }
        if body.key.trim().is_empty() {
            return Err(CertsError::validation_field(
                format!("Thing '{}' has no key to use as common name", thing_id),
                "thing_id",
            ));
        }

        Ok(ThingIdentity {
            thing_id: thing_id.clone(),
            owner_id: owner.clone(),
            external_key: body.key,
        })
    }
}
