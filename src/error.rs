//! Error types for ruleconv.

use thiserror::Error;

use crate::embed::ResourceKind;

/// Error type for ruleconv operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Content does not start with the expected magic bytes
    #[error("invalid magic bytes: expected {0} header")]
    InvalidMagic(&'static str),

    /// Unsupported rule-set format version
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u8),

    /// Malformed input for the declared format
    #[error("parse error: {0}")]
    Parse(String),

    /// A single rule line uses a known but unsupported construct
    #[error("unsupported rule: {0}")]
    UnsupportedRule(String),

    /// The target format cannot represent the requested conversion
    #[error("unsupported target: {0}")]
    UnsupportedTarget(String),

    /// Rule tree does not match any shape an AdGuard filter list can produce
    #[error("invalid binary AdGuard rule-set")]
    InvalidAdGuardRuleSet,

    /// Source fetch failure
    #[error("fetch source: {0}")]
    Fetch(String),

    /// Symbolic reference resolution failure
    #[error("resolve {kind} {code}: {source}")]
    Resource {
        kind: ResourceKind,
        code: String,
        #[source]
        source: Box<Error>,
    },

    /// Path template evaluation failure
    #[error("evaluate source path: {0}")]
    Template(String),

    /// Cache backend failure
    #[error("cache error: {0}")]
    Cache(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for ruleconv operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the error came from an upstream source rather than local work.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Error::Fetch(_))
    }
}
