//! Schema fetching from the remote service.
//!
//! The cache talks to the service only through [`SchemaFetcher`]; the
//! bundled [`HttpFetcher`] covers the common case and anything else
//! (tests, alternative transports) plugs in behind the trait.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::Error;

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches collection schemas from the remote service.
///
/// Both operations return a mapping of collection name to raw schema
/// payload (the `properties`-bearing mapping tree).
pub trait SchemaFetcher: Send + Sync {
    /// Fetch the schemas of every collection in the service.
    fn fetch_all(&self) -> Result<BTreeMap<String, Value>, Error>;

    /// Fetch the schemas of the named collections in one request.
    fn fetch_named(&self, collections: &[String]) -> Result<BTreeMap<String, Value>, Error>;
}

/// Fetches schemas over HTTP from the service's mapping endpoints.
///
/// Requires the `remote` feature (enabled by default).
#[cfg(feature = "remote")]
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
    base_url: String,
}

#[cfg(feature = "remote")]
impl HttpFetcher {
    /// Build a fetcher against the service's base URL.
    ///
    /// # Errors
    ///
    /// Returns `Error::Network` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, Error> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let client = reqwest::blocking::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|source| Error::Network {
                url: base_url.clone(),
                source,
            })?;

        Ok(Self { client, base_url })
    }

    fn fetch_mappings(&self, url: String) -> Result<BTreeMap<String, Value>, Error> {
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|source| Error::Network {
                url: url.clone(),
                source,
            })?;

        // Check for HTTP errors before parsing
        let response = response
            .error_for_status()
            .map_err(|source| Error::Network {
                url: url.clone(),
                source,
            })?;

        let body = response.text().map_err(|source| Error::Network {
            url: url.clone(),
            source,
        })?;
        let payload: Value =
            serde_json::from_str(&body).map_err(|source| Error::InvalidJson { source })?;

        // Shape: {"collection": {"mappings": {...}}, ...}
        let Value::Object(map) = payload else {
            return Err(Error::Fetch {
                message: format!("unexpected mapping payload from {url}"),
            });
        };

        Ok(map
            .into_iter()
            .map(|(name, entry)| (name, unwrap_mappings(entry)))
            .collect())
    }
}

#[cfg(feature = "remote")]
fn unwrap_mappings(entry: Value) -> Value {
    match entry {
        Value::Object(mut obj) => match obj.remove("mappings") {
            Some(mappings) => mappings,
            None => Value::Object(obj),
        },
        other => other,
    }
}

#[cfg(feature = "remote")]
impl SchemaFetcher for HttpFetcher {
    fn fetch_all(&self) -> Result<BTreeMap<String, Value>, Error> {
        self.fetch_mappings(format!("{}/_mapping", self.base_url))
    }

    fn fetch_named(&self, collections: &[String]) -> Result<BTreeMap<String, Value>, Error> {
        if collections.is_empty() {
            return Ok(BTreeMap::new());
        }
        self.fetch_mappings(format!(
            "{}/{}/_mapping",
            self.base_url,
            collections.join(",")
        ))
    }
}
