//! High-level application primitives.
//!
//! Common pieces needed to bootstrap a process before running a pipeline, such as initializing logging.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod logging;

/// Common imports.
pub mod prelude {
    pub use super::logging::{fatal_and_exit, initialize_logging};
}
