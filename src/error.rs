//! Error types for each stage of the pipeline.
//!
//! Only [`FetchError::SessionLost`] is fatal to a run. Every other failure is
//! contained at the per-URL or per-article boundary by [`crate::pipeline`].

use reqwest::StatusCode;
use thiserror::Error;

/// Failure to retrieve a page, either over plain HTTP or through the browser.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("non-success status {0}")]
    Status(StatusCode),

    #[error("not found: marker `{0}` did not appear before the timeout")]
    NotFound(String),

    #[error("browser-driven fetch requested but no browser session is configured")]
    BrowserUnavailable,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebDriver error: {0}")]
    WebDriver(String),

    #[error("browser session lost: {0}")]
    SessionLost(String),
}

impl FetchError {
    /// A lost browser session means the execution environment is gone; the
    /// operator has to see it instead of every remaining URL failing quietly.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FetchError::SessionLost(_))
    }
}

/// Failure of one of the enrichment services.
#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service returned status {status}: {body}")]
    Api { status: StatusCode, body: String },

    #[error("response blocked: {0}")]
    Blocked(String),

    #[error("empty response")]
    Empty,

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Failure to load or validate the run configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("credential `{label}` expects environment variable {var}, which is not set")]
    MissingCredential { label: String, var: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failure while writing an output file.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that abort a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("run aborted: {0}")]
    Fatal(#[source] FetchError),
}
