//! pulsar-k8s: Kubernetes Operator for Apache Pulsar clusters
//!
//! This crate provides the custom resources and controllers that deploy a
//! complete Pulsar cluster (ZooKeeper, BookKeeper, brokers, proxies,
//! autorecovery, a bastion and the functions worker) on Kubernetes.

pub mod controller;
pub mod crd;
pub mod error;
pub mod telemetry;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::error::{Error, Result};
