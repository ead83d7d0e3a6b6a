//! DDL propagation strategies.
//!
//! Every strategy implements [`DdlStrategy`]. Operations a variant does not customise fall back
//! to the provided methods, which delegate to the shared [`BaseStrategy`].

use async_trait::async_trait;
use config::shared::StrategyKind;

use crate::error::TopologyResult;
use crate::lifecycle::NodeStatus;
use crate::model::Node;

mod base;
mod ddl_patch;
mod easy_replicate;
mod logical_ddl;
mod pgl_ddl_deploy;
mod vanilla;

pub use base::{BaseStrategy, ColumnInfo};
pub use ddl_patch::DdlPatchStrategy;
pub use easy_replicate::EasyReplicateStrategy;
pub use logical_ddl::LogicalDdlStrategy;
pub use pgl_ddl_deploy::PglDdlDeployStrategy;
pub use vanilla::VanillaStrategy;

/// How publications, subscriptions and extensions are arranged so that changes made on a source
/// node become visible on its replicas.
#[async_trait]
pub trait DdlStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Shared implementation the provided methods delegate to.
    fn base(&self) -> &BaseStrategy;

    /// Builds and installs the server, plus any companion extension the strategy needs.
    async fn build_source(&self, clean: bool) -> TopologyResult<()> {
        self.base().lifecycle().build(clean).await
    }

    /// Recreates the data directory of every node.
    async fn init_cluster(&self) -> TopologyResult<()> {
        self.base().lifecycle().init_cluster().await
    }

    /// Creates the replicated schema and table on `node` and exposes them to subscribers.
    ///
    /// `enable_ddl` asks for schema changes to be propagated as well; strategies unable to do so
    /// ignore it.
    async fn setup_master(&self, node: &Node, enable_ddl: bool) -> TopologyResult<()>;

    /// Subscribes `node` to `source`.
    ///
    /// With `cascade` the replica also publishes its own copy so a further replica can subscribe
    /// to it. Fails with [`crate::error::ErrorKind::MissingPublication`] when `source` has not
    /// been set up yet.
    async fn setup_replica(
        &self,
        node: &Node,
        source: &Node,
        enable_ddl: bool,
        cascade: bool,
    ) -> TopologyResult<()>;

    /// Removes every subscription, publication and replicated schema of the cluster.
    ///
    /// Cleanup derives every object name from the topology and tolerates objects that are already
    /// gone, so running it twice in a row is harmless.
    async fn cleanup_cluster(&self) -> TopologyResult<()> {
        self.base().cleanup_cluster().await
    }

    async fn start_cluster(&self) -> TopologyResult<()> {
        self.base().lifecycle().start_cluster().await
    }

    async fn stop_cluster(&self) -> TopologyResult<()> {
        self.base().lifecycle().stop_cluster().await
    }

    async fn status_cluster(&self) -> TopologyResult<Vec<NodeStatus>> {
        self.base().lifecycle().status_cluster().await
    }

    /// Creates the replicated table of `node`.
    async fn create_table(&self, node: &Node) -> TopologyResult<()> {
        self.base().create_table(node).await
    }

    /// Drops the replicated table of `node`.
    async fn drop_table(&self, node: &Node) -> TopologyResult<()> {
        self.base().drop_table(node).await
    }

    /// Waits until the subscription of `node` replicates.
    async fn await_replication(&self, node: &Node) -> TopologyResult<()> {
        self.base().await_subscription(node).await
    }
}
