//! Proxy onto the target STAC API
//!
//! Reads pass through, and collection writes (create, update, delete) are
//! mirrored onto the target. Responses from the target are mapped three ways:
//!
//! - 2xx: JSON body passed through as-is
//! - 4xx except 403: wrapped in a failure envelope carrying the remote body and code
//! - 403 and anything else: forwarded byte-for-byte (status, headers, body)
//!
//! Forwarding 403/5xx untouched keeps gateway or VPN misconfiguration visible
//! to the operator. Transport failures surface as [`Error::Http`]. Writes turn
//! rejected requests into typed errors instead of envelopes.

use bytes::Bytes;
use reqwest::{header::HeaderMap, Client, Response, StatusCode};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::stac::client::normalize_catalog_url;
use crate::stac::extent::{ParsedCollection, StacCollection};

/// Mapped response from the target STAC API
#[derive(Debug, Clone)]
pub enum ProxyResponse {
    /// Successful JSON response
    Json { status: StatusCode, body: Value },
    /// 4xx wrapped as `{stac_api_server_response, stac_api_server_response_code, status}`
    Envelope { status: StatusCode, body: Value },
    /// Forwarded unchanged
    Raw {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },
}

impl ProxyResponse {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Json { status, .. } | Self::Envelope { status, .. } | Self::Raw { status, .. } => {
                *status
            }
        }
    }

    /// Build the failure envelope for a rejected request
    pub fn envelope(status: StatusCode, remote_body: Value) -> Self {
        Self::Envelope {
            status,
            body: json!({
                "stac_api_server_response": remote_body,
                "stac_api_server_response_code": status.as_u16(),
                "status": "failed",
            }),
        }
    }

    async fn from_response(response: Response) -> Result<Self> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        if status.is_success() {
            if let Ok(value) = serde_json::from_slice::<Value>(&body) {
                return Ok(Self::Json {
                    status,
                    body: value,
                });
            }
        } else if status.is_client_error() && status != StatusCode::FORBIDDEN {
            let remote = serde_json::from_slice::<Value>(&body)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()));
            return Ok(Self::envelope(status, remote));
        }

        Ok(Self::Raw {
            status,
            headers,
            body,
        })
    }
}

/// Client for the target STAC API
#[derive(Clone)]
pub struct StacProxy {
    client: Client,
    base_url: String,
}

impl StacProxy {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: normalize_catalog_url(base_url),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collections_root(&self) -> String {
        format!("{}/collections", self.base_url)
    }

    async fn get(&self, url: String) -> Result<ProxyResponse> {
        tracing::debug!(url = %url, "Proxying GET to target STAC API");
        let response = self.client.get(&url).send().await?;
        ProxyResponse::from_response(response).await
    }

    /// `GET /collections`
    pub async fn collections(&self) -> Result<ProxyResponse> {
        self.get(self.collections_root()).await
    }

    /// `GET /collections/{id}`
    pub async fn collection(&self, collection_id: &str) -> Result<ProxyResponse> {
        self.get(format!("{}/{collection_id}", self.collections_root()))
            .await
    }

    /// `GET /collections/{id}/items`
    pub async fn items(&self, collection_id: &str) -> Result<ProxyResponse> {
        self.get(format!("{}/{collection_id}/items", self.collections_root()))
            .await
    }

    /// `GET /collections/{id}/items/{item_id}`
    pub async fn item(&self, collection_id: &str, item_id: &str) -> Result<ProxyResponse> {
        self.get(format!(
            "{}/{collection_id}/items/{item_id}",
            self.collections_root()
        ))
        .await
    }

    /// `POST /collections`
    ///
    /// The document is validated locally first. A 409 from the target is
    /// [`Error::CollectionAlreadyExists`].
    pub async fn create_collection(&self, document: &Value) -> Result<ProxyResponse> {
        let collection_id = validate_document(document)?;
        let url = self.collections_root();
        tracing::info!(url = %url, collection = %collection_id, "Creating collection on target STAC API");

        let response = self.client.post(&url).json(document).send().await?;
        settle_write(
            ProxyResponse::from_response(response).await?,
            &collection_id,
            "created",
            StatusCode::CONFLICT,
            Error::CollectionAlreadyExists,
        )
    }

    /// `PUT /collections`
    ///
    /// A 404 from the target is [`Error::CollectionDoesNotExist`].
    pub async fn update_collection(&self, document: &Value) -> Result<ProxyResponse> {
        let collection_id = validate_document(document)?;
        let url = self.collections_root();
        tracing::info!(url = %url, collection = %collection_id, "Updating collection on target STAC API");

        let response = self.client.put(&url).json(document).send().await?;
        settle_write(
            ProxyResponse::from_response(response).await?,
            &collection_id,
            "updated",
            StatusCode::NOT_FOUND,
            Error::CollectionDoesNotExist,
        )
    }

    /// `DELETE /collections/{id}`
    ///
    /// A 404 is [`Error::CollectionDoesNotExist`], any other 4xx except 403
    /// is [`Error::InvalidPayload`]. 403 and 5xx come back as
    /// [`ProxyResponse::Raw`].
    pub async fn delete_collection(&self, collection_id: &str) -> Result<ProxyResponse> {
        let url = format!("{}/{collection_id}", self.collections_root());
        tracing::info!(url = %url, "Deleting collection on target STAC API");

        let response = self.client.delete(&url).send().await?;
        settle_write(
            ProxyResponse::from_response(response).await?,
            collection_id,
            "deleted",
            StatusCode::NOT_FOUND,
            Error::CollectionDoesNotExist,
        )
    }
}

/// Id of a collection document that would be indexable
fn validate_document(document: &Value) -> Result<String> {
    match StacCollection::from_value(document)? {
        ParsedCollection::Valid(collection) => Ok(collection.id),
        ParsedCollection::Skipped { reason, .. } => Err(Error::InvalidPayload {
            status: StatusCode::BAD_REQUEST.as_u16(),
            message: reason,
        }),
    }
}

/// Map the target's answer to a write
///
/// `typed_status` is the one 4xx status that becomes `typed_error`; other
/// enveloped statuses are [`Error::InvalidPayload`]. A success without a JSON
/// body (204) is answered with `{<verb>: id}`.
fn settle_write(
    response: ProxyResponse,
    collection_id: &str,
    verb: &str,
    typed_status: StatusCode,
    typed_error: fn(String) -> Error,
) -> Result<ProxyResponse> {
    match response {
        ProxyResponse::Envelope { status, .. } if status == typed_status => {
            Err(typed_error(collection_id.to_string()))
        }
        ProxyResponse::Envelope { status, body } => Err(Error::InvalidPayload {
            status: status.as_u16(),
            message: body["stac_api_server_response"].to_string(),
        }),
        ProxyResponse::Raw { status, .. } if status.is_success() => Ok(ProxyResponse::Json {
            status,
            body: json!({ verb: collection_id }),
        }),
        other => Ok(other),
    }
}
