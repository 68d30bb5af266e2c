//! Client for the search cluster's administrative HTTP API.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod types;

pub use error::{Error, Result};
pub use types::*;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, trace};
use url::Url;

/// Default timeout applied to every administrative request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The subset of the cluster administrative API the supervisor relies on.
#[async_trait]
pub trait ClusterClient
where
    Self: Send + Sync + 'static,
{
    /// Current value of [`ALLOCATION_EXCLUDE_SETTING`], if set.
    async fn allocation_exclude(&self) -> Result<Option<String>>;

    /// Writes [`ALLOCATION_EXCLUDE_SETTING`] as a transient setting.
    async fn set_allocation_exclude(&self, nodes: &str) -> Result<Acknowledged>;

    /// Removes the transient [`ALLOCATION_EXCLUDE_SETTING`].
    async fn clear_allocation_exclude(&self) -> Result<Acknowledged>;

    /// Current cluster health.
    async fn cluster_health(&self) -> Result<ClusterHealth>;
}

/// Options for configuring an `OpensearchClusterClient`.
pub struct OpensearchClusterClientOptions {
    /// Base URL of the node's REST endpoint, e.g. `http://localhost:9200`.
    pub base_url: Url,

    /// Optional basic auth credentials as `(username, password)`.
    pub credentials: Option<(String, String)>,

    /// Timeout applied to every request.
    pub request_timeout: Duration,
}

/// [`ClusterClient`] speaking to an OpenSearch compatible REST endpoint.
#[derive(Clone, Debug)]
pub struct OpensearchClusterClient {
    base_url: Url,
    client: Client,
    credentials: Option<(String, String)>,
}

impl OpensearchClusterClient {
    /// Creates a new `OpensearchClusterClient`.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL cannot carry a path or the HTTP client
    /// could not be built.
    pub fn new(
        OpensearchClusterClientOptions {
            base_url,
            credentials,
            request_timeout,
        }: OpensearchClusterClientOptions,
    ) -> Result<Self> {
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidUrl(base_url.to_string()));
        }

        let client = Client::builder().timeout(request_timeout).build()?;

        Ok(Self {
            base_url,
            client,
            credentials,
        })
    }

    /// The base URL requests are sent to.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((username, password)) => request.basic_auth(username, Some(password)),
            None => request,
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, path: &str) -> Result<T> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        let body = response.text().await?;
        trace!("{} {}: {}", path, status, body);

        if !status.is_success() {
            return Err(Error::Status {
                path: path.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }

    async fn put_transient_exclude(&self, value: Option<&str>) -> Result<Acknowledged> {
        let url = self.endpoint(&["_cluster", "settings"])?;
        let body = json!({ "transient": { ALLOCATION_EXCLUDE_SETTING: value } });
        debug!("updating {} to {:?}", ALLOCATION_EXCLUDE_SETTING, value);

        self.send(self.client.put(url).json(&body), "/_cluster/settings")
            .await
    }
}

#[async_trait]
impl ClusterClient for OpensearchClusterClient {
    async fn allocation_exclude(&self) -> Result<Option<String>> {
        let mut url = self.endpoint(&["_cluster", "settings"])?;
        url.query_pairs_mut().append_pair("flat_settings", "true");

        let settings: ClusterSettings = self
            .send(self.client.get(url), "/_cluster/settings")
            .await?;

        Ok(settings.get(ALLOCATION_EXCLUDE_SETTING))
    }

    async fn set_allocation_exclude(&self, nodes: &str) -> Result<Acknowledged> {
        self.put_transient_exclude(Some(nodes)).await
    }

    async fn clear_allocation_exclude(&self) -> Result<Acknowledged> {
        self.put_transient_exclude(None).await
    }

    async fn cluster_health(&self) -> Result<ClusterHealth> {
        let url = self.endpoint(&["_cluster", "health"])?;
        self.send(self.client.get(url), "/_cluster/health").await
    }
}
