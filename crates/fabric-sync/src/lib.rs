//! Session coordination over fabric dependency graphs.
//!
//! Wraps a permanent [`fabric_core::DependencyGraph`] with per-session VDGs
//! and drives the submit, wait, execute, commit or rollback cycle for each
//! operation. This crate contains the coordinator, session registry,
//! configuration and error types.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod session;

pub use config::{ConfigError, CoordinatorConfig};
pub use coordinator::{Coordinator, ExecutionReport, Ticket, WorkFailure};
pub use error::CoordinatorError;
pub use session::{Session, SessionId, SessionRegistry};
