use thiserror::Error;

/// Returned by [`CorsMiddlewareBuilder::build`](super::CorsMiddlewareBuilder::build)
/// when the configuration is invalid or violates the CORS protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorsConfigError {
    /// `*` cannot be combined with credentials.
    #[error("cannot use wildcard origin (*) with credentials; list exact origins instead")]
    WildcardWithCredentials,

    #[error("invalid origin '{origin}', expected scheme://host[:port] (e.g. https://example.com)")]
    InvalidOriginFormat { origin: String },

    #[error("invalid origin pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("credentials require at least one allowed origin")]
    EmptyOriginsWithCredentials,
}
