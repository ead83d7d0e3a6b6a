use std::sync::Arc;

use async_trait::async_trait;
use config::shared::StrategyKind;
use pg_escape::quote_literal;
use postgres::{NodeExecutor, StatementOptions, sql};
use tracing::{debug, info, warn};

use crate::bail;
use crate::error::{ErrorKind, TopologyResult};
use crate::model::{Node, Topology};
use crate::strategy::{BaseStrategy, DdlStrategy};

const PGLOGICAL: &str = "pglogical";
const PGL_DDL_DEPLOY: &str = "pgl_ddl_deploy";

/// Status reported by `pglogical.show_subscription_status` once changes flow.
const REPLICATING: &str = "replicating";

fn provider_node_name(node: &Node) -> String {
    format!("provider_{}", node.name)
}

fn subscriber_node_name(node: &Node) -> String {
    format!("subscriber_{}", node.name)
}

fn create_node(name: &str, dsn: &str) -> String {
    format!(
        "SELECT pglogical.create_node(node_name := {}, dsn := {})",
        quote_literal(name),
        quote_literal(dsn)
    )
}

fn drop_node(name: &str) -> String {
    format!(
        "SELECT pglogical.drop_node(node_name := {}, ifexists := true)",
        quote_literal(name)
    )
}

fn create_replication_set(set: &str) -> String {
    format!(
        "SELECT pglogical.create_replication_set(set_name := {})",
        quote_literal(set)
    )
}

fn drop_replication_set(set: &str) -> String {
    format!(
        "SELECT pglogical.drop_replication_set(set_name := {}, ifexists := true)",
        quote_literal(set)
    )
}

fn replication_set_add_all_tables(set: &str, schema: &str) -> String {
    format!(
        "SELECT pglogical.replication_set_add_all_tables({}, ARRAY[{}], false)",
        quote_literal(set),
        quote_literal(schema)
    )
}

fn replication_set_exists(set: &str) -> String {
    format!(
        "SELECT EXISTS (SELECT 1 FROM pglogical.replication_set WHERE set_name = {}) AS exists",
        quote_literal(set)
    )
}

/// pglogical refuses to touch replication sets on a database without a local node.
fn local_node_exists() -> String {
    "SELECT EXISTS (SELECT 1 FROM pglogical.local_node) AS exists".to_string()
}

fn create_pglogical_subscription(subscription: &str, provider_dsn: &str, set: &str) -> String {
    format!(
        "SELECT pglogical.create_subscription(subscription_name := {}, provider_dsn := {}, replication_sets := ARRAY[{}])",
        quote_literal(subscription),
        quote_literal(provider_dsn),
        quote_literal(set)
    )
}

fn drop_pglogical_subscription(subscription: &str) -> String {
    format!(
        "SELECT pglogical.drop_subscription(subscription_name := {}, ifexists := true)",
        quote_literal(subscription)
    )
}

fn subscription_status(subscription: &str) -> String {
    format!(
        "SELECT status FROM pglogical.show_subscription_status({})",
        quote_literal(subscription)
    )
}

/// Deployment rule propagating DDL of every object in `schema` through `set`.
fn deployment_rule(set: &str, schema: &str) -> String {
    format!(
        "INSERT INTO pgl_ddl_deploy.set_configs \
         (set_name, include_schema_regex, lock_safe_deployment, allow_multi_statements, driver) \
         VALUES ({}, {}, true, false, 'pglogical')",
        quote_literal(set),
        quote_literal(&format!("^{schema}$"))
    )
}

fn deploy(set: &str) -> String {
    format!("SELECT pgl_ddl_deploy.deploy({})", quote_literal(set))
}

fn add_role(role: &str) -> String {
    format!(
        "SELECT pgl_ddl_deploy.add_role(oid) FROM pg_roles WHERE rolname = {}",
        quote_literal(role)
    )
}

/// `pglogical` replication with DDL deployed through `pgl_ddl_deploy`.
///
/// `pglogical` has to be preloaded at server start, so init writes it to the runtime
/// configuration before the first start of each node.
#[derive(Debug)]
pub struct PglDdlDeployStrategy {
    base: BaseStrategy,
}

impl PglDdlDeployStrategy {
    pub fn new(topology: Arc<Topology>, executor: Arc<dyn NodeExecutor>) -> Self {
        Self {
            base: BaseStrategy::new(topology, executor),
        }
    }

    /// Registers `name` as the local pglogical node of `node`, reachable through its own DSN.
    async fn create_local_node(&self, node: &Node, name: &str) -> TopologyResult<()> {
        let dsn = self.base.connection(&node.name)?.to_conninfo();
        self.base
            .run(
                node,
                &create_node(name, &dsn),
                StatementOptions::execute().sensitive(),
            )
            .await?;
        debug!(node = %node.name, pglogical_node = name, "pglogical node created");
        Ok(())
    }

    /// Creates the `pub_<node>` replication set holding every table of the replication schema.
    async fn create_replication_set(&self, node: &Node) -> TopologyResult<()> {
        let set = node.publication_name();
        self.base
            .execute(node, &create_replication_set(&set))
            .await?;
        self.base
            .execute(
                node,
                &replication_set_add_all_tables(&set, &node.replication_schema),
            )
            .await?;
        info!(node = %node.name, %set, "replication set created");
        Ok(())
    }

    async fn deploy_ddl(&self, node: &Node) -> TopologyResult<()> {
        let set = node.publication_name();
        self.base
            .execute(node, &deployment_rule(&set, &node.replication_schema))
            .await?;
        self.base.execute(node, &deploy(&set)).await?;
        info!(node = %node.name, %set, "DDL deployment enabled");
        Ok(())
    }

    async fn ensure_replication_set(&self, source: &Node) -> TopologyResult<()> {
        let set = source.publication_name();
        if !self
            .base
            .query_bool(source, &replication_set_exists(&set), "exists")
            .await?
        {
            bail!(
                ErrorKind::MissingPublication,
                "Source node has no replication set, set it up first",
                format!("replication set `{set}` not found on node `{}`", source.name)
            );
        }

        Ok(())
    }

    async fn subscription_replicating(&self, node: &Node) -> TopologyResult<bool> {
        let rows = self
            .base
            .query(node, &subscription_status(&node.subscription_name()))
            .await?;

        Ok(rows.first().and_then(|row| row.get("status")) == Some(REPLICATING))
    }
}

#[async_trait]
impl DdlStrategy for PglDdlDeployStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PglDdlDeploy
    }

    fn base(&self) -> &BaseStrategy {
        &self.base
    }

    async fn build_source(&self, clean: bool) -> TopologyResult<()> {
        let lifecycle = self.base.lifecycle();
        lifecycle.build(clean).await?;
        lifecycle.build_extension(PGLOGICAL, clean).await?;
        lifecycle.build_extension(PGL_DDL_DEPLOY, clean).await
    }

    async fn init_cluster(&self) -> TopologyResult<()> {
        let lifecycle = self.base.lifecycle();
        lifecycle.init_cluster().await?;

        let preload = [format!("shared_preload_libraries = '{PGLOGICAL}'")];
        for node in self.base.topology().nodes() {
            lifecycle.append_conf(node, &preload).await?;
            lifecycle.start(node).await?;

            self.base
                .execute(node, &sql::create_extension(PGLOGICAL))
                .await?;
            self.base
                .execute(node, &sql::create_extension(PGL_DDL_DEPLOY))
                .await?;

            match &node.replication_user {
                Some(role) => {
                    self.base.execute(node, &add_role(role)).await?;
                    debug!(node = %node.name, %role, "role allowed to deploy DDL");
                }
                None => {
                    warn!(node = %node.name, "no replication user configured, skipping role registration");
                }
            }

            lifecycle.stop(node).await?;
            info!(node = %node.name, "pglogical extensions created");
        }

        Ok(())
    }

    async fn setup_master(&self, node: &Node, enable_ddl: bool) -> TopologyResult<()> {
        if !enable_ddl {
            debug!(node = %node.name, "DDL deployment is always enabled, ddl flag has no effect");
        }

        self.base.create_schema(node).await?;
        self.create_table(node).await?;

        self.create_local_node(node, &provider_node_name(node)).await?;
        self.create_replication_set(node).await?;
        self.deploy_ddl(node).await?;

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
        self.ensure_replication_set(source).await?;

        self.base.create_schema(node).await?;
        self.create_table(node).await?;
        self.create_local_node(node, &subscriber_node_name(node))
            .await?;

        let subscription = node.subscription_name();
        let set = source.publication_name();
        let provider_dsn = self.base.connection(&source.name)?.to_conninfo();
        self.base
            .run(
                node,
                &create_pglogical_subscription(&subscription, &provider_dsn, &set),
                StatementOptions::execute().sensitive(),
            )
            .await?;
        info!(node = %node.name, %subscription, source = %source.name, %set, "pglogical subscription created");

        if cascade {
            self.create_replication_set(node).await?;
            if enable_ddl {
                self.deploy_ddl(node).await?;
            }
        }

        if self.base.topology().replication_wait().after_setup {
            self.await_replication(node).await?;
        }

        info!(node = %node.name, source = %source.name, cascade, "replica set up");

        Ok(())
    }

    /// Drops pglogical subscriptions, replication sets and nodes, resets `pgl_ddl_deploy`, then
    /// runs the shared cleanup.
    async fn cleanup_cluster(&self) -> TopologyResult<()> {
        let nodes = self.base.topology().nodes();

        for node in nodes {
            self.base
                .execute(node, &drop_pglogical_subscription(&node.subscription_name()))
                .await?;
        }
        for node in nodes {
            if !self
                .base
                .query_bool(node, &local_node_exists(), "exists")
                .await?
            {
                debug!(node = %node.name, "no pglogical node, skipping replication set drop");
                continue;
            }
            self.base
                .execute(node, &drop_replication_set(&node.publication_name()))
                .await?;
        }
        for node in nodes {
            self.base
                .execute(node, &drop_node(&subscriber_node_name(node)))
                .await?;
            self.base
                .execute(node, &drop_node(&provider_node_name(node)))
                .await?;
        }
        for node in nodes {
            self.base
                .execute(node, &sql::drop_extension(PGL_DDL_DEPLOY))
                .await?;
            self.base
                .execute(node, &sql::create_extension(PGL_DDL_DEPLOY))
                .await?;
        }

        debug!("pglogical objects removed");

        self.base.cleanup_cluster().await
    }

    async fn await_replication(&self, node: &Node) -> TopologyResult<()> {
        let subscription = node.subscription_name();
        self.base
            .wait_for(&subscription, move || self.subscription_replicating(node))
            .await?;
        debug!(node = %node.name, %subscription, "pglogical subscription replicating");
        Ok(())
    }
}
