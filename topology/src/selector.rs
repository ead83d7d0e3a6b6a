use std::sync::Arc;

use config::shared::StrategyKind;
use postgres::NodeExecutor;
use tracing::debug;

use crate::error::TopologyResult;
use crate::model::Topology;
use crate::strategy::{
    DdlPatchStrategy, DdlStrategy, EasyReplicateStrategy, LogicalDdlStrategy,
    PglDdlDeployStrategy, VanillaStrategy,
};

/// Builds the strategy for `kind`.
///
/// Fails only when the strategy needs settings the topology does not carry.
pub fn select(
    kind: StrategyKind,
    topology: Arc<Topology>,
    executor: Arc<dyn NodeExecutor>,
) -> TopologyResult<Box<dyn DdlStrategy>> {
    debug!(strategy = %kind, "selecting strategy");

    let strategy: Box<dyn DdlStrategy> = match kind {
        StrategyKind::Vanilla => Box::new(VanillaStrategy::new(topology, executor)),
        StrategyKind::DdlPatch => Box::new(DdlPatchStrategy::new(topology, executor)),
        StrategyKind::LogicalDdl => Box::new(LogicalDdlStrategy::new(topology, executor)),
        StrategyKind::PgEasyReplicate => Box::new(EasyReplicateStrategy::new(topology, executor)?),
        StrategyKind::PglDdlDeploy => Box::new(PglDdlDeployStrategy::new(topology, executor)),
    };

    Ok(strategy)
}

/// Builds the strategy named by the topology document.
pub fn select_configured(
    topology: Arc<Topology>,
    executor: Arc<dyn NodeExecutor>,
) -> TopologyResult<Box<dyn DdlStrategy>> {
    let kind = topology.strategy();
    select(kind, topology, executor)
}
