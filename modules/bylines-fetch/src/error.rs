//! Typed errors for the fetch layer.

use thiserror::Error;

/// Security-related rejections, primarily SSRF protection. These are fatal
/// to the offending fetch and never retried.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// URL scheme not allowed (e.g., file://, ftp://)
    #[error("disallowed URL scheme: {0}")]
    DisallowedScheme(String),

    /// Host is explicitly blocked (e.g., cloud metadata hostnames)
    #[error("blocked host: {0}")]
    BlockedHost(String),

    /// Address falls in a blocked range (private, loopback, link-local, ...)
    #[error("blocked IP range: {0}")]
    BlockedCidr(String),

    /// URL has no host
    #[error("URL has no host")]
    NoHost,

    /// DNS resolution failed
    #[error("DNS resolution failed: {0}")]
    DnsResolution(String),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

pub type SecurityResult<T> = std::result::Result<T, SecurityError>;
