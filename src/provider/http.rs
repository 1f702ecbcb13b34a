//! Provider reached as JSON over HTTP.
//!
//! Every operation is a `POST {endpoint}/{operation}` carrying a JSON body.
//! Non-success responses may carry `{"message": ..., "state": ...}`; when
//! the state is missing, read-only operations are assumed to have left
//! remote state untouched and mutating ones are not.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::traits::{CheckResult, CreateResult, Provider};
use crate::error::{HuskError, ProviderError, ResourceState, Result};
use crate::resource::{ObjectDiff, PropertyKey, PropertyMap, ResourceId, TypeToken};

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Maximum attempts for a rate-limited read-only call.
const MAX_RETRIES: u32 = 3;

/// Base delay between retries in milliseconds.
const RETRY_DELAY_MS: u64 = 250;

/// Provider client for one HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: Client,
    endpoint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Check,
    Name,
    Create,
    Get,
    InspectChange,
    Update,
    Delete,
}

impl Operation {
    const fn path(self) -> &'static str {
        match self {
            Self::Check => "check",
            Self::Name => "name",
            Self::Create => "create",
            Self::Get => "get",
            Self::InspectChange => "inspect-change",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    const fn is_mutating(self) -> bool {
        matches!(self, Self::Create | Self::Update | Self::Delete)
    }

    /// State assumed when a failure does not say.
    const fn default_state(self) -> ResourceState {
        if self.is_mutating() {
            ResourceState::Unknown
        } else {
            ResourceState::Recovered
        }
    }
}

#[derive(Serialize)]
struct PropertiesRequest<'a> {
    #[serde(rename = "type")]
    type_token: &'a TypeToken,
    properties: &'a PropertyMap,
}

#[derive(Serialize)]
struct IdRequest<'a> {
    #[serde(rename = "type")]
    type_token: &'a TypeToken,
    id: &'a ResourceId,
}

#[derive(Serialize)]
struct ChangeRequest<'a> {
    #[serde(rename = "type")]
    type_token: &'a TypeToken,
    id: &'a ResourceId,
    olds: &'a PropertyMap,
    news: &'a PropertyMap,
    changes: Vec<&'a str>,
}

#[derive(Deserialize)]
struct NameResponse {
    name: String,
}

#[derive(Deserialize)]
struct GetResponse {
    #[serde(default)]
    properties: PropertyMap,
}

#[derive(Deserialize)]
struct InspectChangeResponse {
    #[serde(default)]
    replaces: Vec<PropertyKey>,
}

#[derive(Deserialize)]
struct EmptyResponse {}

#[derive(Deserialize)]
struct WireError {
    message: String,
    #[serde(default)]
    state: Option<ResourceState>,
}

/// Outcome of a single attempt that did not succeed.
enum AttemptError {
    RateLimited(Option<Duration>),
    Failed(ProviderError),
}

impl HttpProvider {
    /// Creates a client for the given endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(endpoint: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| HuskError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    /// The endpoint this client talks to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<Req, Resp>(&self, op: Operation, body: &Req) -> std::result::Result<Resp, ProviderError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.call_once(op, body).await {
                Ok(response) => return Ok(response),
                Err(AttemptError::Failed(e)) => return Err(e),
                Err(AttemptError::RateLimited(retry_after)) => {
                    if op.is_mutating() || attempt >= MAX_RETRIES {
                        return Err(ProviderError::recovered(format!(
                            "{} rate limited by {}",
                            op.path(),
                            self.endpoint
                        )));
                    }
                    let delay = retry_after
                        .unwrap_or_else(|| Duration::from_millis(RETRY_DELAY_MS * u64::from(attempt)));
                    debug!("Rate limited, retry attempt {attempt} of {MAX_RETRIES} in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn call_once<Req, Resp>(&self, op: Operation, body: &Req) -> std::result::Result<Resp, AttemptError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{}", self.endpoint, op.path());
        trace!("POST {url}");

        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                let state = if e.is_connect() {
                    ResourceState::Recovered
                } else {
                    op.default_state()
                };
                AttemptError::Failed(ProviderError {
                    message: format!("{} request to {url} failed: {e}", op.path()),
                    state,
                })
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(AttemptError::RateLimited(retry_after));
        }

        let text = response.text().await.map_err(|e| {
            AttemptError::Failed(ProviderError {
                message: format!("Failed to read {} response: {e}", op.path()),
                state: op.default_state(),
            })
        })?;

        if !status.is_success() {
            let error = match serde_json::from_str::<WireError>(&text) {
                Ok(wire) => ProviderError {
                    message: wire.message,
                    state: wire.state.unwrap_or_else(|| op.default_state()),
                },
                Err(_) => ProviderError {
                    message: format!("{} returned HTTP {}: {text}", op.path(), status.as_u16()),
                    state: op.default_state(),
                },
            };
            warn!(operation = op.path(), state = %error.state, "Provider call failed: {}", error.message);
            return Err(AttemptError::Failed(error));
        }

        let payload = if text.trim().is_empty() { "{}" } else { text.as_str() };
        serde_json::from_str(payload).map_err(|e| {
            AttemptError::Failed(ProviderError {
                message: format!("Invalid {} response: {e}", op.path()),
                state: op.default_state(),
            })
        })
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn check(
        &self,
        type_token: &TypeToken,
        properties: &PropertyMap,
    ) -> std::result::Result<CheckResult, ProviderError> {
        self.call(Operation::Check, &PropertiesRequest { type_token, properties })
            .await
    }

    async fn name(
        &self,
        type_token: &TypeToken,
        properties: &PropertyMap,
    ) -> std::result::Result<String, ProviderError> {
        let response: NameResponse = self
            .call(Operation::Name, &PropertiesRequest { type_token, properties })
            .await?;
        Ok(response.name)
    }

    async fn create(
        &self,
        type_token: &TypeToken,
        properties: &PropertyMap,
    ) -> std::result::Result<CreateResult, ProviderError> {
        self.call(Operation::Create, &PropertiesRequest { type_token, properties })
            .await
    }

    async fn get(
        &self,
        type_token: &TypeToken,
        id: &ResourceId,
    ) -> std::result::Result<PropertyMap, ProviderError> {
        let response: GetResponse = self.call(Operation::Get, &IdRequest { type_token, id }).await?;
        Ok(response.properties)
    }

    async fn inspect_change(
        &self,
        type_token: &TypeToken,
        id: &ResourceId,
        olds: &PropertyMap,
        news: &PropertyMap,
        diff: &ObjectDiff,
    ) -> std::result::Result<Vec<PropertyKey>, ProviderError> {
        let request = ChangeRequest {
            type_token,
            id,
            olds,
            news,
            changes: diff.changed_keys(),
        };
        let response: InspectChangeResponse = self.call(Operation::InspectChange, &request).await?;
        Ok(response.replaces)
    }

    async fn update(
        &self,
        type_token: &TypeToken,
        id: &ResourceId,
        olds: &PropertyMap,
        news: &PropertyMap,
        diff: &ObjectDiff,
    ) -> std::result::Result<(), ProviderError> {
        let request = ChangeRequest {
            type_token,
            id,
            olds,
            news,
            changes: diff.changed_keys(),
        };
        let _: EmptyResponse = self.call(Operation::Update, &request).await?;
        Ok(())
    }

    async fn delete(&self, type_token: &TypeToken, id: &ResourceId) -> std::result::Result<(), ProviderError> {
        let _: EmptyResponse = self.call(Operation::Delete, &IdRequest { type_token, id }).await?;
        Ok(())
    }
}
