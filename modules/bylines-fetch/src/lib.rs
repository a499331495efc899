pub mod error;
pub mod executor;
pub mod politeness;
pub mod robots;
pub mod security;

pub use error::{SecurityError, SecurityResult};
pub use executor::CompliantFetcher;
pub use politeness::{PolitenessGate, PolitenessPermit};
pub use robots::{
    ReqwestRobotsTransport, RobotsDecision, RobotsFetchResult, RobotsPolicyCache, RobotsTransport,
    TtlClass,
};
pub use security::UrlValidator;
