//! Local network interface management for netsync
//!
//! Only IPv6 addresses with global scope are managed. Interfaces are dummy
//! links used as a local sink for service addresses.
pub mod error;
pub mod ip_command;
pub mod manager;

pub use error::{LinkError, Result};
pub use ip_command::IpCommandLink;
pub use manager::LinkManager;
