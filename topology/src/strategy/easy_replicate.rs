use std::sync::Arc;

use async_trait::async_trait;
use config::shared::{EasyReplicateConfig, StrategyKind};
use postgres::{NodeExecutor, PrivilegedCommand};
use tracing::{debug, info, warn};

use crate::bail;
use crate::error::{ErrorKind, TopologyResult};
use crate::model::{Node, Topology};
use crate::strategy::{BaseStrategy, DdlStrategy};

/// Prefix `pg_easy_replicate` gives the subscription it creates for a group.
const TOOL_SUBSCRIPTION_PREFIX: &str = "pger_subscription_";

/// Replication driven by the external `pg_easy_replicate` tool.
///
/// The tool owns bootstrap and sync of each replication link. The strategy only prepares the
/// replicated schema and table locally and shells out to the tool with the connection URLs of
/// both ends in its environment. Each replica gets its own group, `<group_name>_<replica>`.
#[derive(Debug)]
pub struct EasyReplicateStrategy {
    base: BaseStrategy,
    config: EasyReplicateConfig,
}

impl EasyReplicateStrategy {
    /// Fails with [`ErrorKind::ConfigError`] when the topology has no `easy_replicate` section.
    pub fn new(topology: Arc<Topology>, executor: Arc<dyn NodeExecutor>) -> TopologyResult<Self> {
        let Some(config) = topology.easy_replicate().cloned() else {
            bail!(
                ErrorKind::ConfigError,
                "Missing settings for the pg_easy_replicate strategy",
                "the `easy_replicate` section is required by this strategy"
            );
        };

        Ok(Self {
            base: BaseStrategy::new(topology, executor),
            config,
        })
    }

    fn group_name(&self, replica: &Node) -> String {
        format!("{}_{}", self.config.group_name, replica.name)
    }

    /// Native subscription the tool creates on the target of `replica`'s group.
    fn tool_subscription_name(&self, replica: &Node) -> String {
        format!(
            "{TOOL_SUBSCRIPTION_PREFIX}{}",
            self.group_name(replica).replace('-', "_")
        )
    }

    /// Builds a tool invocation for the link between `replica` and its upstream.
    fn command(&self, replica: &Node, args: &[String]) -> TopologyResult<PrivilegedCommand> {
        let topology = self.base.topology();
        let source = topology.upstream_of(replica)?;

        let mut argv = vec![self.config.binary.clone()];
        argv.extend(args.iter().cloned());

        let path = match std::env::var("PATH") {
            Ok(path) if !path.is_empty() => format!("{path}:{}", topology.bin_dir().display()),
            _ => topology.bin_dir().display().to_string(),
        };

        let mut command = PrivilegedCommand::new(argv)
            .env(
                "SOURCE_DB_URL",
                self.base.connection(&source.name)?.to_url(),
            )
            .env(
                "TARGET_DB_URL",
                self.base.connection(&replica.name)?.to_url(),
            )
            .env("PATH", path);

        if let Some(gem_home) = &self.config.gem_home {
            command = command.env("GEM_HOME", gem_home.clone());
        }
        if !self.config.gem_path.is_empty() {
            command = command.env("GEM_PATH", self.config.gem_path.join(":"));
        }

        Ok(command)
    }

    async fn run_tool(&self, replica: &Node, args: Vec<String>) -> TopologyResult<()> {
        let command = self.command(replica, &args)?;
        let source = self.base.topology().upstream_of(replica)?;
        debug!(
            node = %replica.name,
            command = %command.display(),
            source_url = %self.base.connection(&source.name)?.to_masked_url(),
            target_url = %self.base.connection(&replica.name)?.to_masked_url(),
            "running pg_easy_replicate"
        );
        self.base.executor().run_privileged(&command).await?;
        Ok(())
    }

    /// Runs a teardown subcommand, logging instead of failing when the tool reports an error.
    async fn run_teardown(&self, replica: &Node, args: Vec<String>) -> TopologyResult<()> {
        match self.run_tool(replica, args).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::ProcessFailed => {
                warn!(node = %replica.name, error = %err, "pg_easy_replicate teardown failed, group may already be gone");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Fails unless `source` already has the replicated table the tool copies from.
    async fn ensure_source_table(&self, source: &Node) -> TopologyResult<()> {
        if !self.base.table_exists(source).await? {
            bail!(
                ErrorKind::MissingPublication,
                "Source node has no replicated table, set it up first",
                format!(
                    "table {} not found on node `{}`",
                    source.qualified_table(),
                    source.name
                )
            );
        }

        Ok(())
    }
}

#[async_trait]
impl DdlStrategy for EasyReplicateStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PgEasyReplicate
    }

    fn base(&self) -> &BaseStrategy {
        &self.base
    }

    /// Initialises every node, starts the cluster and bootstraps one group per replica.
    async fn init_cluster(&self) -> TopologyResult<()> {
        let lifecycle = self.base.lifecycle();
        lifecycle.init_cluster().await?;
        lifecycle.start_cluster().await?;

        let topology = self.base.topology();
        for node in topology.nodes() {
            lifecycle.wait_until_ready(node).await?;
        }

        for replica in topology.replicas() {
            let group = self.group_name(replica);
            self.run_tool(
                replica,
                vec!["bootstrap".to_string(), format!("--group-name={group}")],
            )
            .await?;
            info!(node = %replica.name, %group, "replication group bootstrapped");
        }

        Ok(())
    }

    async fn setup_master(&self, node: &Node, _enable_ddl: bool) -> TopologyResult<()> {
        self.base.create_schema(node).await?;
        self.create_table(node).await?;

        info!(node = %node.name, "master set up");

        Ok(())
    }

    async fn setup_replica(
        &self,
        node: &Node,
        source: &Node,
        enable_ddl: bool,
        cascade: bool,
    ) -> TopologyResult<()> {
        self.ensure_source_table(source).await?;

        self.base.create_schema(node).await?;
        self.create_table(node).await?;

        let group = self.group_name(node);
        let track_ddl = self.config.track_ddl || enable_ddl;
        let mut args = vec!["start_sync".to_string(), format!("--group-name={group}")];
        if track_ddl {
            args.push("--track-ddl".to_string());
        }
        args.push(format!("--schema-name={}", node.replication_schema));
        self.run_tool(node, args).await?;

        if cascade {
            debug!(node = %node.name, "groups are per link, nothing extra to publish");
        }

        if self.base.topology().replication_wait().after_setup {
            self.await_replication(node).await?;
        }

        info!(node = %node.name, source = %source.name, %group, track_ddl, "sync started");

        Ok(())
    }

    /// Stops and removes every group, then drops every replication schema.
    async fn cleanup_cluster(&self) -> TopologyResult<()> {
        let topology = self.base.topology();
        for replica in topology.replicas() {
            let group = self.group_name(replica);
            self.run_teardown(
                replica,
                vec!["stop_sync".to_string(), format!("--group-name={group}")],
            )
            .await?;
            self.run_teardown(
                replica,
                vec![
                    "cleanup".to_string(),
                    format!("--group-name={group}"),
                    "--everything".to_string(),
                ],
            )
            .await?;
            debug!(node = %replica.name, %group, "replication group removed");
        }

        self.base.drop_all_schemas().await?;

        info!("replication groups and schemas removed");

        Ok(())
    }

    /// Waits for the subscription the tool created for the group of `node` to stream.
    async fn await_replication(&self, node: &Node) -> TopologyResult<()> {
        let subscription = self.tool_subscription_name(node);
        self.base
            .await_named_subscription(node, &subscription)
            .await
    }
}
