//! Clients for talking to remote endpoints.

pub mod http;
