//! Orchestration of a small Postgres logical-replication topology.
//!
//! A [`model::Topology`] describes one master and its replicas. A [`strategy::DdlStrategy`],
//! chosen through [`selector::select`], decides how schema changes travel along the replication
//! links, and [`protocol::ReplicationProtocol`] drives setup and teardown in dependency order.

pub mod error;
pub mod lifecycle;
mod macros;
pub mod model;
pub mod protocol;
pub mod selector;
pub mod strategy;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod wait;
