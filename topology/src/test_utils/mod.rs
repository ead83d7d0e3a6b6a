//! Testing utilities for topology orchestration.
//!
//! Orchestration logic only reaches nodes through [`postgres::NodeExecutor`], so the whole setup
//! and teardown protocol can run against an in-memory cluster. The utilities here provide that
//! cluster and the topologies tests usually need.
//!
//! # Fake executor
//!
//! [`executor::FakeExecutor`] records every statement and privileged command in order and
//! simulates their effects:
//!
//! - `initdb`, `mkdir -p`, `rm -rf` and `tee -a` act on an in-memory file system, so data
//!   directories and runtime configuration can be inspected after `init`.
//! - `pg_ctl start`, `stop` and `status` track running servers and fail like the real tool when a
//!   node is in the wrong state.
//! - Publications, subscriptions, replicated tables and pglogical objects are tracked per node,
//!   so existence checks, duplicate detection and replication status queries answer the way a
//!   live node would.
//!
//! Failures are scripted by substring with [`executor::FakeExecutor::fail_sql`] and
//! [`executor::FakeExecutor::fail_command`]; query results with
//! [`executor::FakeExecutor::respond`].
//!
//! ```rust,no_run
//! use config::shared::StrategyKind;
//! use topology::test_utils::topology::TestCluster;
//!
//! # async fn example() {
//! let cluster = TestCluster::new(StrategyKind::Vanilla);
//! cluster.boot().await;
//! cluster.protocol.setup_full_replication(false, true).await.unwrap();
//!
//! let statements = cluster.executor.statements_on("replica2").await;
//! # }
//! ```
//!
//! # Topologies
//!
//! [`topology::cascade_config`] is the three-node chain used by most tests:
//! `master` (5432) → `replica1` (5433) → `replica2` (5434).
//! [`topology::fan_out_config`] subscribes both replicas to the master.

pub mod executor;
pub mod topology;
