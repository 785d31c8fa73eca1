//! HTTP endpoints of the operator
//!
//! Serves `/health` and, with the `metrics` feature, the Prometheus
//! `/metrics` endpoint.

mod handlers;
mod server;

pub use server::{router, run_server};
