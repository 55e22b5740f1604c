//! Core allocation, encoding and scheduling logic for netsync
//!
//! This library provides:
//! - Deterministic address allocation from CIDR pools
//! - The node annotation state codec
//! - Configuration loading and validation
//! - The periodic reconciliation loop

pub mod annotation;
pub mod config;
pub mod error;
pub mod periodic;
pub mod pool;

pub use annotation::{AnnotationState, ROUTER_ID_KEY};
pub use config::Config;
pub use error::{CoreError, Result};
pub use periodic::{run_periodic, Reconciler};
pub use pool::AddressPool;
