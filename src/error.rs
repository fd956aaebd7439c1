//! Defines the custom error types for the lead-sleuth application.

use std::io;
use thiserror::Error;
use url::ParseError as UrlParseError;

/// The primary error type for the lead generation pipeline.
#[derive(Error, Debug)]
pub(crate) enum AppError {
    /// Error occurring during configuration loading or validation.
    #[error("Configuration Error: {0}")]
    Config(String),

    /// Error related to file input/output operations.
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    /// Error during JSON serialization or deserialization.
    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error parsing a URL.
    #[error("URL Parsing Error: {0}")]
    UrlParse(#[from] UrlParseError),

    /// Error making HTTP requests via reqwest.
    #[error("HTTP Request Error: {0}")]
    Request(#[from] reqwest::Error),

    /// A page fetch came back unusable (bad status, wrong content).
    #[error("Fetch Error: {0}")]
    Fetch(String),

    /// Error from the headless browser (launch, navigation, CDP command).
    #[error("Browser Error: {0}")]
    Browser(String),

    /// The browser restarted while a caller was waiting for a page.
    #[error("Browser pool drained: {0}")]
    PoolDrained(String),

    /// Error during DNS resolution.
    #[error("DNS Resolution Error: {0}")]
    Dns(#[from] trust_dns_resolver::error::ResolveError),

    /// Failed to extract a domain from the provided URL.
    #[error("Failed to extract domain from URL: {0}")]
    DomainExtraction(String),

    /// A job is already running for this tenant.
    #[error("A job is already running for tenant '{0}'")]
    JobAlreadyRunning(String),

    /// The selected analyzer produced no queries for the given config.
    #[error("No queries generated for the given sector/country selection")]
    NoQueries,

    /// No analyzer is registered under the requested use-case key.
    #[error("Unknown use case: '{0}'")]
    UnknownUseCase(String),

    /// An underlying error that doesn't fit other categories, using anyhow.
    #[error("Generic Error: {0}")]
    Generic(#[from] anyhow::Error),
}

pub(crate) type Result<T> = std::result::Result<T, AppError>;
