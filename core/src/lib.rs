//! Core building blocks for the NetHawk reconnaissance orchestrator.
//!
//! Everything here is policy-free plumbing: resolving raw user input into a
//! reachable [`endpoint::Endpoint`], the [`registry::Registry`] of services
//! and modules, the shared [`module`] execution contract, the YAML
//! [`config::Config`], the persisted data [`model`] and the [`store`]
//! abstraction over it, and the `/etc/hosts` writer in [`hosts`].
//!
//! The actual enumeration logic lives in downstream crates and is wired
//! together by the dispatcher; this crate must not depend on any of them.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod endpoint;
pub mod hosts;
pub mod model;
pub mod module;
pub mod registry;
pub mod store;

/// Timeout for a single TCP connect attempt during endpoint resolution.
pub const TCP_CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

/// Timeout for a single ICMP echo request.
pub const ICMP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

/// Timeout for a single HTTP request issued by enumeration modules.
pub const HTTP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);
