pub mod articles;
pub mod error;
pub mod identity;
pub mod rollback;
pub mod runs;
pub mod store;

pub use articles::UpsertResult;
pub use error::{Result, StoreError};
pub use identity::{MergeApplied, MergeRequest};
pub use rollback::{CompensationStep, MergeRollback, RollbackCoordinator, RunRollback};
pub use store::Store;
