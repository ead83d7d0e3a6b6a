use std::sync::Arc;

use async_trait::async_trait;
use config::shared::StrategyKind;
use postgres::NodeExecutor;

use crate::error::TopologyResult;
use crate::model::{Node, Topology};
use crate::strategy::{BaseStrategy, DdlStrategy};

/// Native logical replication on a server built from a source tree whose publications can carry
/// DDL. The only difference from [`crate::strategy::VanillaStrategy`] is that the ddl flag is
/// honoured when publications are created.
#[derive(Debug)]
pub struct DdlPatchStrategy {
    base: BaseStrategy,
}

impl DdlPatchStrategy {
    pub fn new(topology: Arc<Topology>, executor: Arc<dyn NodeExecutor>) -> Self {
        Self {
            base: BaseStrategy::new(topology, executor),
        }
    }
}

#[async_trait]
impl DdlStrategy for DdlPatchStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DdlPatch
    }

    fn base(&self) -> &BaseStrategy {
        &self.base
    }

    async fn setup_master(&self, node: &Node, enable_ddl: bool) -> TopologyResult<()> {
        self.base.setup_master_native(node, enable_ddl).await
    }

    async fn setup_replica(
        &self,
        node: &Node,
        source: &Node,
        enable_ddl: bool,
        cascade: bool,
    ) -> TopologyResult<()> {
        self.base
            .setup_replica_native(node, source, enable_ddl, cascade)
            .await
    }
}
