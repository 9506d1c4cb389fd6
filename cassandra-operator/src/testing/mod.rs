//! In-memory doubles for the operator's external collaborators.
//!
//! The controllers are written against [`OrchestrationStore`] and
//! [`SidecarClientFactory`]; this module provides implementations that keep
//! everything in memory and record every call, so the decision engine and the
//! task engine can be driven end to end without a cluster.
//!
//! # Example
//!
//! ```ignore
//! use cassandra_operator::testing::{fixtures, MemoryStore, ScriptedSidecars};
//!
//! let store = MemoryStore::new();
//! let dc = fixtures::datacenter("dc1", 3, 3);
//! store.insert_datacenter(dc.clone());
//! for rack in fixtures::racks(&dc) {
//!     store.insert_statefulset(fixtures::ready_statefulset(&dc, &rack, 1));
//! }
//! let sidecars = ScriptedSidecars::new();
//! sidecars.set_status("c1-dc1-rack1-0", NodeStatus::Normal);
//! ```
//!
//! [`OrchestrationStore`]: crate::store::OrchestrationStore
//! [`SidecarClientFactory`]: crate::sidecar::SidecarClientFactory

pub mod fixtures;
mod sidecar;
mod store;

pub use sidecar::{ScriptedSidecars, SidecarCall};
pub use store::{MemoryStore, Mutation};
