//! Gridgate Common Types
//!
//! This crate provides the configuration, error and identity types shared by
//! every gridgate component.
//!
//! # Overview
//!
//! Gridgate is a clustered REST-to-database gateway: a fleet of cooperating
//! processes that expose HTTP(S) endpoints, route requests to database
//! workers, and recover from individual process failures without an external
//! orchestrator. This crate contains the pieces every other crate agrees on:
//!
//! - **Configuration**: [`ClusterConfig`] and the instance [`Topology`]
//! - **Identity**: [`InstanceDescriptor`] and the gateway/worker [`Role`]
//! - **Errors**: [`GridgateError`] and the crate-wide [`Result`] alias
//! - **Tokens**: collision-avoiding opaque token generation
//!
//! # Example
//!
//! ```
//! use gridgate_common::{ClusterConfig, Role, Topology};
//!
//! let config = ClusterConfig {
//!     instance_id: 2,
//!     topology: Topology::new(2, 3),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! assert_eq!(config.topology.role_of(2), Role::Worker);
//! ```

pub mod config;
pub mod error;
pub mod instance;
pub mod token;

pub use config::{staleness_threshold, ClusterConfig, ListenerConfig, Topology};
pub use error::{GridgateError, Result};
pub use instance::{age_millis, now_millis, InstanceDescriptor, InstanceId, Role};
