//! Error types for portal navigation and form submission.

/// Errors that can occur while navigating a portal or submitting a form.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The HTTP request itself failed (network error, timeout, TLS).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    /// The portal answered with a non-success status and a body snippet.
    #[error("request to {url} failed with status {status}")]
    HttpStatus {
        url: String,
        status: u16,
        body: String,
    },
    /// A URL could not be parsed after resolution.
    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
    /// An operation needed the current page but nothing was fetched yet.
    #[error("no page has been loaded")]
    NoPage,
    /// No form in the current page matched the locator.
    #[error("no form matching {0}")]
    FormNotFound(String),
    /// More than one form matched attribute criteria that must be unique.
    #[error("{count} forms matching {criteria}")]
    AmbiguousForm { criteria: String, count: usize },
    /// A text input had neither a supplied value nor a default.
    #[error("no value for form field {field}")]
    MissingValue { field: String },
    /// A postprocess step could not apply its change.
    #[error("postprocess failed: {0}")]
    Postprocess(String),
}
