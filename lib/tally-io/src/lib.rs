//! I/O primitives: HTTP clients and streaming compression.
#![deny(warnings)]
#![deny(missing_docs)]

pub mod compression;
pub mod net;
