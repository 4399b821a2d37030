//! OpenSearch catalogue resolver for EarthCARE products.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::catalogue;
use super::traits::{ProductLink, ProductQuery, ProductResolver, ResolverError};
use crate::config::{ArchiveConfig, Credentials};
use crate::jobs::HeadersMap;

const SEARCH_TIMEOUT: Duration = Duration::from_secs(60);

pub struct OpenSearchResolver {
    client: Client,
    catalogue_url: String,
    collection: String,
    baseline: String,
    tolerance: TimeDelta,
    max_records: u32,
    authorization: String,
}

impl OpenSearchResolver {
    pub fn new(
        config: &ArchiveConfig,
        credentials: &Credentials,
        user_agent: &str,
    ) -> Result<Self, ResolverError> {
        let client = Client::builder()
            .timeout(SEARCH_TIMEOUT)
            .user_agent(user_agent)
            .build()
            .map_err(|e| ResolverError::Request(e.to_string()))?;

        Ok(Self {
            client,
            catalogue_url: config.catalogue_url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            baseline: config.baseline.clone(),
            tolerance: TimeDelta::minutes(i64::from(config.time_tolerance_minutes)),
            max_records: config.max_records,
            authorization: basic_auth(credentials),
        })
    }

    /// Builds a resolver when credentials are configured, `None` otherwise.
    pub fn from_config(
        config: &ArchiveConfig,
        user_agent: &str,
    ) -> Result<Option<Self>, ResolverError> {
        match config.credentials() {
            Some(credentials) => Self::new(config, &credentials, user_agent).map(Some),
            None => Ok(None),
        }
    }

    fn search_url(
        &self,
        collection: &str,
        product: &str,
        query: &ProductQuery,
    ) -> Result<Url, ResolverError> {
        let base = format!("{}/collections/{}/items", self.catalogue_url, collection);
        let mut url =
            Url::parse(&base).map_err(|e| ResolverError::Request(format!("{base}: {e}")))?;

        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("productType", catalogue::search_code(product));
            pairs.append_pair("startDate", &format_instant(query.timestamp - self.tolerance));
            pairs.append_pair("endDate", &format_instant(query.timestamp + self.tolerance));
            pairs.append_pair("maximumRecords", &self.max_records.to_string());
            if let Some(orbit) = query.orbit {
                pairs.append_pair("orbitNumber", &orbit.to_string());
            }
            pairs.append_pair("httpAccept", "application/geo+json");
        }

        Ok(url)
    }

    async fn search(&self, url: Url) -> Result<Vec<CatalogueEntry>, ResolverError> {
        debug!(%url, "Searching catalogue");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ResolverError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolverError::HttpStatus(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ResolverError::Request(e.to_string()))?;
        parse_features(&body)
    }

    fn link_for(&self, product: &str, entry: CatalogueEntry) -> ProductLink {
        let file_name = format!("{product}/{}", entry.file_name());
        let mut headers = HeadersMap::new();
        headers.insert("Authorization".to_string(), self.authorization.clone());
        ProductLink {
            url: entry.href,
            file_name,
            headers,
        }
    }
}

#[async_trait]
impl ProductResolver for OpenSearchResolver {
    async fn resolve(&self, query: &ProductQuery) -> Result<Vec<ProductLink>, ResolverError> {
        let collection = query.collection.as_deref().unwrap_or(&self.collection);
        let baseline = query.baseline.as_deref().unwrap_or(&self.baseline);

        let mut links = Vec::new();
        let mut last_error = None;
        let mut searched = 0usize;

        for product in &query.products {
            let url = self.search_url(collection, product, query)?;
            match self.search(url).await {
                Ok(entries) => {
                    searched += 1;
                    let before = links.len();
                    links.extend(
                        entries
                            .into_iter()
                            .filter(|entry| catalogue::baseline_of(&entry.title) == Some(baseline))
                            .map(|entry| self.link_for(product, entry)),
                    );
                    debug!(product, found = links.len() - before, "Catalogue search finished");
                }
                Err(err) => {
                    warn!(product, timestamp = %query.timestamp, error = %err, "Catalogue search failed");
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(err) if searched == 0 => Err(err),
            _ => Ok(links),
        }
    }
}

/// A catalogue hit with a download link.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CatalogueEntry {
    title: String,
    href: String,
}

impl CatalogueEntry {
    fn file_name(&self) -> String {
        let segment = Url::parse(&self.href)
            .ok()
            .and_then(|url| {
                url.path_segments()
                    .and_then(|mut segments| segments.next_back().map(str::to_owned))
            })
            .filter(|segment| segment.to_ascii_lowercase().ends_with(".zip"));
        segment.unwrap_or_else(|| format!("{}.zip", self.title))
    }
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    properties: FeatureProperties,
}

#[derive(Debug, Default, Deserialize)]
struct FeatureProperties {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    links: FeatureLinks,
}

#[derive(Debug, Default, Deserialize)]
struct FeatureLinks {
    #[serde(default)]
    enclosure: Vec<Link>,
    #[serde(default)]
    data: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
}

fn parse_features(body: &str) -> Result<Vec<CatalogueEntry>, ResolverError> {
    let collection: FeatureCollection =
        serde_json::from_str(body).map_err(|e| ResolverError::InvalidResponse(e.to_string()))?;

    Ok(collection
        .features
        .into_iter()
        .filter_map(|feature| {
            let title = feature.properties.title.or(feature.id)?;
            let links = feature.properties.links;
            let href = links.enclosure.into_iter().chain(links.data).next()?.href;
            Some(CatalogueEntry { title, href })
        })
        .collect())
}

fn format_instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn basic_auth(credentials: &Credentials) -> String {
    let token = STANDARD.encode(format!("{}:{}", credentials.username, credentials.password));
    format!("Basic {token}")
}
