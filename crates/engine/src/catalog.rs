//! Existence checks for buses, lines and stops.
//!
//! The catalog is owned by the CRUD service; this crate only asks whether an
//! id exists. [`HttpCatalog`] asks that service over HTTP and caches positive
//! answers, [`StaticCatalog`] serves a fixed set (tests, fixtures) and
//! [`OpenCatalog`] accepts everything.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use busline_core::error::CoreError;
use busline_core::store::EntityCatalog;
use parking_lot::RwLock;
use reqwest::StatusCode;

/// HTTP request timeout for a single catalog lookup.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum EntityKind {
    Bus,
    Line,
    Stop,
}

impl EntityKind {
    fn path_segment(self) -> &'static str {
        match self {
            Self::Bus => "buses",
            Self::Line => "lines",
            Self::Stop => "stops",
        }
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Failures talking to the catalog service.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Catalog returned HTTP {0}")]
    HttpStatus(u16),

    #[error("Invalid catalog URL: {0}")]
    InvalidUrl(String),
}

impl From<CatalogError> for CoreError {
    fn from(err: CatalogError) -> Self {
        CoreError::Storage(format!("catalog lookup failed: {err}"))
    }
}

// ---------------------------------------------------------------------------
// Open
// ---------------------------------------------------------------------------

/// Accepts every id. Used when no catalog service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenCatalog;

#[async_trait]
impl EntityCatalog for OpenCatalog {
    async fn bus_exists(&self, _bus_id: &str) -> Result<bool, CoreError> {
        Ok(true)
    }

    async fn line_exists(&self, _line_id: &str) -> Result<bool, CoreError> {
        Ok(true)
    }

    async fn stop_exists(&self, _stop_id: &str) -> Result<bool, CoreError> {
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Static
// ---------------------------------------------------------------------------

/// Fixed set of known ids.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    buses: HashSet<String>,
    lines: HashSet<String>,
    stops: HashSet<String>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bus(mut self, bus_id: &str) -> Self {
        self.buses.insert(bus_id.to_string());
        self
    }

    pub fn with_line(mut self, line_id: &str) -> Self {
        self.lines.insert(line_id.to_string());
        self
    }

    pub fn with_stop(mut self, stop_id: &str) -> Self {
        self.stops.insert(stop_id.to_string());
        self
    }
}

#[async_trait]
impl EntityCatalog for StaticCatalog {
    async fn bus_exists(&self, bus_id: &str) -> Result<bool, CoreError> {
        Ok(self.buses.contains(bus_id))
    }

    async fn line_exists(&self, line_id: &str) -> Result<bool, CoreError> {
        Ok(self.lines.contains(line_id))
    }

    async fn stop_exists(&self, stop_id: &str) -> Result<bool, CoreError> {
        Ok(self.stops.contains(stop_id))
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Looks ids up with `GET {base}/{buses|lines|stops}/{id}`.
///
/// `200` means the entity exists and is cached; `404` means it does not and
/// is not cached, so an entity created later is picked up. Any other status
/// is an error.
pub struct HttpCatalog {
    client: reqwest::Client,
    base_url: reqwest::Url,
    known: RwLock<HashSet<(EntityKind, String)>>,
}

impl HttpCatalog {
    pub fn new(base_url: &str) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Self::with_client(client, base_url)
    }

    /// Create a catalog reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self, CatalogError> {
        let base_url =
            reqwest::Url::parse(base_url).map_err(|e| CatalogError::InvalidUrl(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(CatalogError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self {
            client,
            base_url,
            known: RwLock::new(HashSet::new()),
        })
    }

    fn entity_url(&self, kind: EntityKind, id: &str) -> Result<reqwest::Url, CatalogError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CatalogError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push(kind.path_segment())
            .push(id);
        Ok(url)
    }

    async fn exists(&self, kind: EntityKind, id: &str) -> Result<bool, CoreError> {
        let cache_key = (kind, id.to_string());
        if self.known.read().contains(&cache_key) {
            return Ok(true);
        }

        let url = self.entity_url(kind, id)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(CatalogError::from)?;

        match response.status() {
            status if status.is_success() => {
                self.known.write().insert(cache_key);
                Ok(true)
            }
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                tracing::warn!(
                    entity = kind.path_segment(),
                    id,
                    status = status.as_u16(),
                    "Catalog lookup returned unexpected status"
                );
                Err(CatalogError::HttpStatus(status.as_u16()).into())
            }
        }
    }
}

#[async_trait]
impl EntityCatalog for HttpCatalog {
    async fn bus_exists(&self, bus_id: &str) -> Result<bool, CoreError> {
        self.exists(EntityKind::Bus, bus_id).await
    }

    async fn line_exists(&self, line_id: &str) -> Result<bool, CoreError> {
        self.exists(EntityKind::Line, line_id).await
    }

    async fn stop_exists(&self, stop_id: &str) -> Result<bool, CoreError> {
        self.exists(EntityKind::Stop, stop_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_catalog_knows_only_registered_ids() {
        let catalog = StaticCatalog::new().with_bus("B1").with_line("L1");
        assert!(catalog.bus_exists("B1").await.unwrap());
        assert!(!catalog.bus_exists("B2").await.unwrap());
        assert!(catalog.line_exists("L1").await.unwrap());
        assert!(!catalog.stop_exists("S1").await.unwrap());
    }

    #[test]
    fn entity_url_escapes_ids() {
        let catalog = HttpCatalog::new("http://catalog.local/api").unwrap();
        let url = catalog.entity_url(EntityKind::Stop, "S 1/2").unwrap();
        assert_eq!(url.as_str(), "http://catalog.local/api/stops/S%201%2F2");

        let catalog = HttpCatalog::new("http://catalog.local/api/").unwrap();
        let url = catalog.entity_url(EntityKind::Bus, "B1").unwrap();
        assert_eq!(url.as_str(), "http://catalog.local/api/buses/B1");
    }

    #[test]
    fn rejects_invalid_base_url() {
        assert!(HttpCatalog::new("not a url").is_err());
    }
}
