use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::require_env;
use crate::domain::Campaign;
use crate::error::FetchError;

pub const CATALOG_URL_VAR: &str = "DES_CATALOG_URL";
pub const CATALOG_TOKEN_VAR: &str = "DES_CATALOG_TOKEN";

/// One row of the coadd listing query, in query column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRow {
    pub key: String,
    pub tile_name: String,
    pub relative_path: String,
    pub filename: String,
    #[serde(default)]
    pub compression_suffix: Option<String>,
    pub band: String,
    pub attempt_id: i64,
}

pub trait CatalogClient {
    fn query_rows(&self, sql: &str) -> Result<Vec<CatalogRow>, FetchError>;
}

const COADD_QUERY_TEMPLATE: &str = "select
    m.tilename || '-' || m.band as key,
    m.tilename as tile_name,
    fai.path as relative_path,
    fai.filename as filename,
    fai.compression as compression_suffix,
    m.band as band,
    m.pfw_attempt_id as attempt_id
from
    prod.proctag t,
    prod.coadd m,
    prod.file_archive_info fai
where
    t.tag='{campaign}'
    and t.pfw_attempt_id=m.pfw_attempt_id
    and m.filetype='coadd'
    and fai.filename=m.filename
    and fai.archive_name='desar2home'
";

/// Render the single listing query for every coadd in a campaign.
pub fn coadd_query(campaign: &Campaign) -> String {
    COADD_QUERY_TEMPLATE.replace("{campaign}", campaign.as_str())
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    rows: Vec<CatalogRow>,
}

/// Catalog access over an HTTP query service that accepts `{"query": ...}`
/// and answers `{"rows": [...]}`.
#[derive(Clone)]
pub struct CatalogHttpClient {
    client: Client,
    url: String,
}

impl CatalogHttpClient {
    pub fn new(url: impl Into<String>, token: Option<&str>) -> Result<Self, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("coadd-fetch/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| FetchError::CatalogHttp(err.to_string()))?,
        );
        if let Some(token) = token.map(str::trim).filter(|token| !token.is_empty()) {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|err| FetchError::CatalogHttp(err.to_string()))?,
            );
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|err| FetchError::CatalogHttp(err.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn from_env() -> Result<Self, FetchError> {
        let url = require_env(CATALOG_URL_VAR)?;
        let token = std::env::var(CATALOG_TOKEN_VAR).ok();
        Self::new(url, token.as_deref())
    }
}

impl CatalogClient for CatalogHttpClient {
    fn query_rows(&self, sql: &str) -> Result<Vec<CatalogRow>, FetchError> {
        info!(url = %self.url, "running catalog query");
        debug!("{sql}");
        let response = self
            .client
            .post(&self.url)
            .json(&QueryRequest { query: sql })
            .send()
            .map_err(|err| FetchError::CatalogHttp(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "catalog request failed".to_string());
            return Err(FetchError::CatalogStatus { status, message });
        }

        let body: QueryResponse = response
            .json()
            .map_err(|err| FetchError::CatalogHttp(err.to_string()))?;
        info!(rows = body.rows.len(), "catalog query returned");
        Ok(body.rows)
    }
}
