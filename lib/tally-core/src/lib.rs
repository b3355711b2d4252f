//! Client-side telemetry buffering and shipping.
//!
//! Application code registers series with a [`Registry`]. A [`Pipeline`] samples the registry on a fixed interval,
//! buffers the resulting data points in a bounded queue, and ships them in gzip-compressed batches to an
//! OpenTSDB-compatible `/api/put` endpoint, restoring points from failed batches so they are retried.
#![deny(warnings)]
#![deny(missing_docs)]

mod config;
pub use self::config::PipelineConfiguration;

mod data_model;
pub use self::data_model::{is_valid_name, DataPoint, TagSet, Value};

pub mod hostname;

mod pipeline;
pub use self::pipeline::{Pipeline, PipelineStats};

mod registry;
pub use self::registry::{NameKind, RegistrationError, Registry};
