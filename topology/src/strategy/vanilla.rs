use std::sync::Arc;

use async_trait::async_trait;
use config::shared::StrategyKind;
use postgres::NodeExecutor;
use tracing::warn;

use crate::error::TopologyResult;
use crate::model::{Node, Topology};
use crate::strategy::{BaseStrategy, DdlStrategy};

/// Native logical replication only. Row changes replicate, schema changes never do.
#[derive(Debug)]
pub struct VanillaStrategy {
    base: BaseStrategy,
}

impl VanillaStrategy {
    pub fn new(topology: Arc<Topology>, executor: Arc<dyn NodeExecutor>) -> Self {
        Self {
            base: BaseStrategy::new(topology, executor),
        }
    }
}

fn ignore_ddl(node: &Node, enable_ddl: bool) {
    if enable_ddl {
        warn!(node = %node.name, "native publications cannot carry DDL, ignoring the ddl flag");
    }
}

#[async_trait]
impl DdlStrategy for VanillaStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Vanilla
    }

    fn base(&self) -> &BaseStrategy {
        &self.base
    }

    async fn setup_master(&self, node: &Node, enable_ddl: bool) -> TopologyResult<()> {
        ignore_ddl(node, enable_ddl);
        self.base.setup_master_native(node, false).await
    }

    async fn setup_replica(
        &self,
        node: &Node,
        source: &Node,
        enable_ddl: bool,
        cascade: bool,
    ) -> TopologyResult<()> {
        ignore_ddl(node, enable_ddl);
        self.base
            .setup_replica_native(node, source, false, cascade)
            .await
    }
}
