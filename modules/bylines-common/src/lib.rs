pub mod config;
pub mod hash;
pub mod types;
pub mod urlnorm;

pub use config::ComplianceConfig;
pub use hash::content_hash;
pub use types::*;
pub use urlnorm::canonicalize_url;
