//! drydock updater library
//!
//! Unattended container auto-update orchestration: given the currently
//! running workload containers, decide which have a newer image available,
//! replace them behind a health gate, roll back on failure, and prune
//! superseded images under a retention policy.
//!
//! ## Architecture
//!
//! One **tick** covers all eligible containers, strictly sequentially:
//!
//! ```text
//! run_tick
//! ├── AutoUpdateSettings   (admin config -> typed settings)
//! ├── disk guard           (data-root mount free space gate)
//! └── per container: update protocol
//!     ├── ImageReference   (name/tag/digest parsing)
//!     ├── digest oracle    (local vs remote digest, pull decision)
//!     ├── bounded pull     (idle + total deadlines)
//!     ├── retention ledger (drydock-retention history)
//!     └── health gate      (poll replacement, roll back on failure)
//! ```
//!
//! The daemon protocol, filesystem metrics, audit persistence, and identity
//! registry are all trait seams; scriptable in-memory implementations ship
//! with the library for tests.
//!
//! Scheduling lives outside: the library assumes at most one tick runs at a
//! time and propagates no cancellation into a running tick.

pub mod audit;
pub mod config;
pub mod daemon;
pub mod disk;
pub mod health;
pub mod image;
pub mod registry;
pub mod settings;
pub mod store;
pub mod tick;
pub mod update;

// Re-export commonly used types
pub use daemon::mock::MockDaemon;
pub use daemon::DaemonClient;
pub use settings::AutoUpdateSettings;
pub use tick::{run_tick, TickContext, TickReport};
pub use update::ContainerOutcome;
