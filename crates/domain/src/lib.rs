//! Domain-level building blocks shared across the monitor and API crates.
//!
//! Records, address validation, the persistence contracts and process-wide
//! services (configuration, telemetry, dedup caching) live here so both
//! binaries agree on one vocabulary.

pub mod config;
pub mod model;
pub mod services;

pub mod storage {
    mod traits;

    pub use traits::*;
}

pub use model::*;
pub use services::*;
pub use storage::*;
