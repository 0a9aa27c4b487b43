use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum FetchError {
    #[error("invalid tile name: {0}")]
    InvalidTileName(String),

    #[error("invalid band: {0}")]
    InvalidBand(String),

    #[error("invalid campaign: {0}")]
    InvalidCampaign(String),

    #[error("batch file names campaign {batch} but {requested} was requested")]
    #[diagnostic(help("drop --campaign or make it match the batch file"))]
    CampaignConflict { batch: String, requested: String },

    #[error("{0} not found in cache")]
    #[diagnostic(help("check the tile name and band, or rebuild the cache with `make-cache`"))]
    NotFound(String),

    #[error("cache key {key} appears {count} times in the cache table")]
    #[diagnostic(help("the cache is corrupt; rebuild it with `make-cache`"))]
    AmbiguousKey { key: String, count: usize },

    #[error("environment variable {0} is not set")]
    MissingEnv(String),

    #[error("malformed archive path: {0}")]
    MalformedPath(String),

    #[error("malformed filename: {0}")]
    MalformedFilename(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("catalog request failed: {0}")]
    CatalogHttp(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("invalid cache file {path}: {message}")]
    CacheFormat { path: String, message: String },

    #[error("value {value:?} does not fit column {column} (width {width})")]
    FieldTooWide {
        column: &'static str,
        width: usize,
        value: String,
    },

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("{tool} exited with status {status}")]
    ToolFailure { tool: String, status: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
