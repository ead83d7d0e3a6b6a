use std::sync::Arc;

use async_trait::async_trait;
use config::shared::StrategyKind;
use pg_escape::quote_literal;
use postgres::{NodeExecutor, sql};
use tracing::{debug, info, warn};

use crate::error::TopologyResult;
use crate::model::{Node, Topology};
use crate::strategy::{BaseStrategy, DdlStrategy};

const EXTENSION: &str = "logical_ddl";

/// Table of the extension carrying captured DDL, published next to the replicated tables.
const SHADOW_TABLE: &str = "logical_ddl.shadow_table";

fn register_node(publish: bool, source: &str) -> String {
    format!(
        "INSERT INTO logical_ddl.settings (publish, source) VALUES ({publish}, {})",
        quote_literal(source)
    )
}

fn regclass(node: &Node) -> String {
    format!("{}::regclass", quote_literal(&node.qualified_table()))
}

fn register_published_table(node: &Node) -> String {
    format!(
        "INSERT INTO logical_ddl.publish_tablelist (relid) VALUES ({})",
        regclass(node)
    )
}

fn register_subscribed_table(node: &Node, source: &str) -> String {
    format!(
        "INSERT INTO logical_ddl.subscribe_tablelist (source, relid) VALUES ({}, {})",
        quote_literal(source),
        regclass(node)
    )
}

fn unregister_table(node: &Node) -> String {
    let tablelist = if node.is_master() {
        "publish_tablelist"
    } else {
        "subscribe_tablelist"
    };
    format!(
        "DELETE FROM logical_ddl.{tablelist} WHERE relid = {}",
        regclass(node)
    )
}

fn publication_add_shadow_table(publication: &str) -> String {
    format!(
        "ALTER PUBLICATION {} ADD TABLE {SHADOW_TABLE}",
        pg_escape::quote_identifier(publication)
    )
}

/// Native logical replication plus the `logical_ddl` extension, which captures DDL into a shadow
/// table on the publisher and replays it on subscribers.
///
/// Every replicated table lives in three places that must agree: the table itself, the table
/// registry of the extension and the membership of the publication. [`DdlStrategy::create_table`]
/// and [`DdlStrategy::drop_table`] keep them consistent.
#[derive(Debug)]
pub struct LogicalDdlStrategy {
    base: BaseStrategy,
}

impl LogicalDdlStrategy {
    pub fn new(topology: Arc<Topology>, executor: Arc<dyn NodeExecutor>) -> Self {
        Self {
            base: BaseStrategy::new(topology, executor),
        }
    }

    /// Records the replicated table of `node` in the extension's table registry.
    async fn register_table(&self, node: &Node) -> TopologyResult<()> {
        let statement = if node.is_master() {
            register_published_table(node)
        } else {
            let source = self.base.topology().upstream_of(node)?;
            register_subscribed_table(node, &source.name)
        };
        self.base.execute(node, &statement).await?;
        debug!(node = %node.name, table = %node.qualified_table(), "table registered in extension");
        Ok(())
    }

    /// Makes publication membership follow a created or dropped table.
    ///
    /// Publishers change their publication, subscribers refresh their subscription when it
    /// already exists.
    async fn sync_replication_membership(&self, node: &Node, added: bool) -> TopologyResult<()> {
        if node.is_master() {
            let publication = node.publication_name();
            let statement = if added {
                sql::publication_add_table(
                    &publication,
                    &node.replication_schema,
                    &node.replication_table,
                )
            } else {
                sql::publication_drop_table(
                    &publication,
                    &node.replication_schema,
                    &node.replication_table,
                )
            };
            return self.base.execute(node, &statement).await;
        }

        let subscription = node.subscription_name();
        if !self.base.subscription_exists(node, &subscription).await? {
            warn!(node = %node.name, %subscription, "subscription does not exist yet, skipping refresh");
            return Ok(());
        }

        self.base
            .execute_autocommit(node, &sql::refresh_subscription(&subscription))
            .await?;
        debug!(node = %node.name, %subscription, "subscription refreshed");
        Ok(())
    }
}

#[async_trait]
impl DdlStrategy for LogicalDdlStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LogicalDdl
    }

    fn base(&self) -> &BaseStrategy {
        &self.base
    }

    async fn build_source(&self, clean: bool) -> TopologyResult<()> {
        let lifecycle = self.base.lifecycle();
        lifecycle.build(clean).await?;
        lifecycle.build_extension(EXTENSION, clean).await
    }

    /// Initialises every node, then creates the extension on each of them.
    async fn init_cluster(&self) -> TopologyResult<()> {
        let lifecycle = self.base.lifecycle();
        lifecycle.init_cluster().await?;

        for node in self.base.topology().nodes() {
            lifecycle.start(node).await?;
            self.base
                .execute(node, &sql::create_extension(EXTENSION))
                .await?;
            lifecycle.stop(node).await?;
            info!(node = %node.name, extension = EXTENSION, "extension created");
        }

        Ok(())
    }

    async fn setup_master(&self, node: &Node, enable_ddl: bool) -> TopologyResult<()> {
        if !enable_ddl {
            debug!(node = %node.name, "the extension always captures DDL, ddl flag has no effect");
        }

        self.base.execute(node, &register_node(true, &node.name)).await?;

        let publication = node.publication_name();
        self.base
            .execute(node, &sql::create_empty_publication(&publication))
            .await?;

        self.base.create_schema(node).await?;
        self.create_table(node).await?;

        self.base
            .execute(node, &publication_add_shadow_table(&publication))
            .await?;

        info!(node = %node.name, %publication, "master registered as publisher");

        Ok(())
    }

    async fn setup_replica(
        &self,
        node: &Node,
        source: &Node,
        _enable_ddl: bool,
        cascade: bool,
    ) -> TopologyResult<()> {
        self.base.ensure_publication(source).await?;

        self.base
            .execute(node, &register_node(false, &source.name))
            .await?;

        self.base.create_schema(node).await?;
        self.create_table(node).await?;
        self.base.create_subscription(node, source).await?;
        if cascade {
            self.base.create_publication(node, false).await?;
        }

        if self.base.topology().replication_wait().after_setup {
            self.base.await_subscription(node).await?;
        }

        info!(node = %node.name, source = %source.name, cascade, "replica registered as subscriber");

        Ok(())
    }

    /// Runs the shared cleanup, then resets the extension's bookkeeping by recreating it.
    async fn cleanup_cluster(&self) -> TopologyResult<()> {
        self.base.cleanup_cluster().await?;

        for node in self.base.topology().nodes() {
            self.base
                .execute(node, &sql::drop_extension(EXTENSION))
                .await?;
            self.base
                .execute(node, &sql::create_extension(EXTENSION))
                .await?;
            debug!(node = %node.name, extension = EXTENSION, "extension recreated");
        }

        Ok(())
    }

    async fn create_table(&self, node: &Node) -> TopologyResult<()> {
        self.base.create_table(node).await?;
        self.register_table(node).await?;
        self.sync_replication_membership(node, true).await
    }

    async fn drop_table(&self, node: &Node) -> TopologyResult<()> {
        if self.base.table_exists(node).await? {
            self.base.execute(node, &unregister_table(node)).await?;
            self.sync_replication_membership(node, false).await?;
        }
        self.base.drop_table(node).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_statements_quote_values() {
        assert_eq!(
            register_node(false, "master"),
            "INSERT INTO logical_ddl.settings (publish, source) VALUES (false, 'master')"
        );
        assert_eq!(
            publication_add_shadow_table("pub_master"),
            "ALTER PUBLICATION pub_master ADD TABLE logical_ddl.shadow_table"
        );
    }
}
