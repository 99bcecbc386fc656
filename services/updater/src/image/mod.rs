//! Image concerns: reference parsing, digest comparison, bounded pulls.

pub mod digest;
pub mod puller;
pub mod reference;

pub use digest::{local_repo_digest, needs_pull};
pub use puller::{pull_with_budget, PullBudget, PullError, PullReport};
pub use reference::ImageReference;
