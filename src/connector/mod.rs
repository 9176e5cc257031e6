//! Connector layer: repository traits and shared data types.
//!
//! Concrete protocol connectors (directory, SQL, scripted endpoints) live
//! outside this crate; the engine depends only on the traits defined here.
//! The in-memory connector is the built-in reference implementation used by
//! the demo binary and the tests.

/// Built-in in-memory connector
mod memory;
/// Repository trait definitions
mod service;
/// Shared record and modification types
mod types;

pub use memory::InMemoryService;
pub use service::{AsyncSourceService, ConnectorService, DestinationService};
pub use types::*;
