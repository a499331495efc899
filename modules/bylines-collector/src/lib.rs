//! Pipeline orchestration: wires discovery, compliant fetching, parsing,
//! and run-scoped storage into one bounded run, and exposes the export
//! read path.

pub mod export;
pub mod pipeline;
pub mod traits;

pub use pipeline::Pipeline;
pub use traits::{DiscoverStage, ParseStage, Parsed};
