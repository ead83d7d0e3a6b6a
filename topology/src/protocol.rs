//! The replication setup protocol: master first, then each replica against its upstream.
//!
//! Every step is delegated to the selected [`DdlStrategy`]. The protocol decides which node is
//! set up against which source and stops at the first failing step, leaving whatever was already
//! created in place for [`ReplicationProtocol::clean_replication`] to remove.

use std::sync::Arc;

use config::shared::StrategyKind;
use tracing::{debug, info, warn};

use crate::bail;
use crate::error::{ErrorKind, TopologyResult};
use crate::lifecycle::NodeStatus;
use crate::model::{Node, Topology};
use crate::strategy::DdlStrategy;

pub struct ReplicationProtocol {
    strategy: Box<dyn DdlStrategy>,
    topology: Arc<Topology>,
}

impl std::fmt::Debug for ReplicationProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationProtocol")
            .field("strategy", &self.strategy.kind())
            .field("nodes", &self.topology.nodes().len())
            .finish()
    }
}

impl ReplicationProtocol {
    pub fn new(strategy: Box<dyn DdlStrategy>) -> Self {
        let topology = strategy.base().topology().clone();
        Self { strategy, topology }
    }

    pub fn strategy(&self) -> &dyn DdlStrategy {
        self.strategy.as_ref()
    }

    pub fn kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub async fn build(&self, clean: bool) -> TopologyResult<()> {
        self.strategy.build_source(clean).await
    }

    pub async fn init(&self) -> TopologyResult<()> {
        self.strategy.init_cluster().await
    }

    pub async fn start(&self) -> TopologyResult<()> {
        self.strategy.start_cluster().await
    }

    pub async fn stop(&self) -> TopologyResult<()> {
        self.strategy.stop_cluster().await
    }

    pub async fn status(&self) -> TopologyResult<Vec<NodeStatus>> {
        self.strategy.status_cluster().await
    }

    pub async fn setup_master(&self, enable_ddl: bool) -> TopologyResult<()> {
        let master = self.topology.master();
        info!(node = %master.name, strategy = %self.kind(), enable_ddl, "setting up master");
        self.strategy.setup_master(master, enable_ddl).await
    }

    /// Subscribes the replica called `name` to its upstream.
    pub async fn setup_replica(
        &self,
        name: &str,
        enable_ddl: bool,
        cascade: bool,
    ) -> TopologyResult<()> {
        let node = self.topology.get_node(name)?;
        self.setup_replica_node(node, enable_ddl, cascade).await
    }

    /// Sets up the first declared replica.
    pub async fn setup_replica1(&self, enable_ddl: bool, cascade: bool) -> TopologyResult<()> {
        let node = self.nth_replica(0)?;
        self.setup_replica_node(node, enable_ddl, cascade).await
    }

    /// Sets up the second declared replica, publishing only when another replica depends on it.
    pub async fn setup_replica2(&self, enable_ddl: bool) -> TopologyResult<()> {
        let node = self.nth_replica(1)?;
        let cascade = self.topology.has_downstream(node);
        self.setup_replica_node(node, enable_ddl, cascade).await
    }

    /// Sets up the master, then every replica in declared order.
    ///
    /// Without `cascade` replicas whose upstream is itself a replica are skipped, since their
    /// source never publishes. With `cascade` every replica that has a downstream publishes too.
    pub async fn setup_full_replication(
        &self,
        enable_ddl: bool,
        cascade: bool,
    ) -> TopologyResult<()> {
        for link in self.topology.links() {
            debug!(
                source = %link.source,
                target = %link.target,
                publication = %link.publication,
                subscription = %link.subscription,
                "planned replication link"
            );
        }

        self.setup_master(enable_ddl).await?;

        for replica in self.topology.replicas() {
            let source = self.topology.upstream_of(replica)?;
            if !cascade && !source.is_master() {
                warn!(node = %replica.name, source = %source.name, "source is a replica and cascade is off, skipping");
                continue;
            }

            let publish = cascade && self.topology.has_downstream(replica);
            self.setup_replica_node(replica, enable_ddl, publish).await?;
        }

        info!(strategy = %self.kind(), enable_ddl, cascade, "replication set up");

        Ok(())
    }

    /// Removes every replication object from every node.
    pub async fn clean_replication(&self) -> TopologyResult<()> {
        info!(strategy = %self.kind(), "cleaning replication");
        self.strategy.cleanup_cluster().await
    }

    async fn setup_replica_node(
        &self,
        node: &Node,
        enable_ddl: bool,
        cascade: bool,
    ) -> TopologyResult<()> {
        if node.is_master() {
            bail!(
                ErrorKind::InvalidState,
                "The master node cannot be set up as a replica",
                node.name.clone()
            );
        }

        let source = self.topology.upstream_of(node)?;
        info!(node = %node.name, source = %source.name, strategy = %self.kind(), enable_ddl, cascade, "setting up replica");
        self.strategy
            .setup_replica(node, source, enable_ddl, cascade)
            .await
    }

    fn nth_replica(&self, position: usize) -> TopologyResult<&Node> {
        match self.topology.replicas().nth(position) {
            Some(node) => Ok(node),
            None => bail!(
                ErrorKind::NodeNotFound,
                "Topology does not declare enough replicas",
                format!("replica #{} is not declared", position + 1)
            ),
        }
    }
}
