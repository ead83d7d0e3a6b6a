use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use config::shared::PgConnectionConfig;
use postgres::{NodeExecutor, SqlRow, StatementOptions, sql};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bail;
use crate::error::{ErrorKind, TopologyResult};
use crate::lifecycle::LifecycleManager;
use crate::model::{Node, Topology};
use crate::wait::poll_until;

/// One column of a replicated table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub default: Option<String>,
}

/// Behaviour shared by every strategy: statement execution, the native publication and
/// subscription steps, the three-pass cleanup and replication waiting.
pub struct BaseStrategy {
    topology: Arc<Topology>,
    executor: Arc<dyn NodeExecutor>,
    lifecycle: LifecycleManager,
    connections: HashMap<String, PgConnectionConfig>,
}

impl fmt::Debug for BaseStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseStrategy")
            .field("strategy", &self.topology.strategy())
            .field("nodes", &self.connections.len())
            .finish_non_exhaustive()
    }
}

impl BaseStrategy {
    pub fn new(topology: Arc<Topology>, executor: Arc<dyn NodeExecutor>) -> Self {
        let connections = topology
            .nodes()
            .iter()
            .map(|node| (node.name.clone(), node.connection.clone()))
            .collect();
        let lifecycle = LifecycleManager::new(topology.clone(), executor.clone());

        Self {
            topology,
            executor,
            lifecycle,
            connections,
        }
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    pub fn executor(&self) -> &Arc<dyn NodeExecutor> {
        &self.executor
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// Connection parameters of the node called `name`.
    pub fn connection(&self, name: &str) -> TopologyResult<&PgConnectionConfig> {
        match self.connections.get(name) {
            Some(connection) => Ok(connection),
            None => bail!(
                ErrorKind::NodeNotFound,
                "Node is not part of the topology",
                name
            ),
        }
    }

    /// Runs one statement on `node`.
    pub async fn run(
        &self,
        node: &Node,
        statement: &str,
        options: StatementOptions,
    ) -> TopologyResult<Option<Vec<SqlRow>>> {
        let connection = self.connection(&node.name)?;
        let rows = self
            .executor
            .run_sql(&node.name, connection, statement, options)
            .await?;

        Ok(rows)
    }

    pub async fn execute(&self, node: &Node, statement: &str) -> TopologyResult<()> {
        self.run(node, statement, StatementOptions::execute()).await?;
        Ok(())
    }

    /// Runs `statement` outside of a transaction block.
    pub async fn execute_autocommit(&self, node: &Node, statement: &str) -> TopologyResult<()> {
        self.run(node, statement, StatementOptions::autocommit())
            .await?;
        Ok(())
    }

    pub async fn query(&self, node: &Node, statement: &str) -> TopologyResult<Vec<SqlRow>> {
        let rows = self
            .run(node, statement, StatementOptions::fetch())
            .await?
            .unwrap_or_default();
        Ok(rows)
    }

    /// Runs a query returning one boolean in `column`; no row counts as `false`.
    pub async fn query_bool(
        &self,
        node: &Node,
        statement: &str,
        column: &str,
    ) -> TopologyResult<bool> {
        let rows = self.query(node, statement).await?;
        Ok(rows.first().and_then(|row| row.get(column)) == Some("t"))
    }

    /// Runs `statement`, treating "already exists" as success.
    async fn execute_tolerating_duplicate(
        &self,
        node: &Node,
        statement: &str,
        options: StatementOptions,
        object: &str,
    ) -> TopologyResult<()> {
        match self.run(node, statement, options).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_duplicate_object() => {
                warn!(node = %node.name, object, "object already exists, keeping it");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    pub async fn create_schema(&self, node: &Node) -> TopologyResult<()> {
        self.execute(node, &sql::create_schema(&node.replication_schema))
            .await?;
        debug!(node = %node.name, schema = %node.replication_schema, "schema created");
        Ok(())
    }

    pub async fn drop_schema(&self, node: &Node) -> TopologyResult<()> {
        self.execute(node, &sql::drop_schema(&node.replication_schema))
            .await?;
        debug!(node = %node.name, schema = %node.replication_schema, "schema dropped");
        Ok(())
    }

    pub async fn create_table(&self, node: &Node) -> TopologyResult<()> {
        self.execute(
            node,
            &sql::create_table(&node.replication_schema, &node.replication_table),
        )
        .await?;
        debug!(node = %node.name, table = %node.qualified_table(), "table created");
        Ok(())
    }

    pub async fn drop_table(&self, node: &Node) -> TopologyResult<()> {
        self.execute(
            node,
            &sql::drop_table(&node.replication_schema, &node.replication_table),
        )
        .await?;
        debug!(node = %node.name, table = %node.qualified_table(), "table dropped");
        Ok(())
    }

    /// Adds a column to the replicated table. `data_type` and `default` are SQL fragments.
    pub async fn add_column(
        &self,
        node: &Node,
        column: &str,
        data_type: &str,
        default: Option<&str>,
    ) -> TopologyResult<()> {
        self.execute(
            node,
            &sql::add_column(
                &node.replication_schema,
                &node.replication_table,
                column,
                data_type,
                default,
            ),
        )
        .await
    }

    pub async fn drop_column(&self, node: &Node, column: &str) -> TopologyResult<()> {
        self.execute(
            node,
            &sql::drop_column(&node.replication_schema, &node.replication_table, column),
        )
        .await
    }

    pub async fn rename_column(
        &self,
        node: &Node,
        column: &str,
        new_name: &str,
    ) -> TopologyResult<()> {
        self.execute(
            node,
            &sql::rename_column(
                &node.replication_schema,
                &node.replication_table,
                column,
                new_name,
            ),
        )
        .await
    }

    pub async fn alter_column_type(
        &self,
        node: &Node,
        column: &str,
        data_type: &str,
    ) -> TopologyResult<()> {
        self.execute(
            node,
            &sql::alter_column_type(
                &node.replication_schema,
                &node.replication_table,
                column,
                data_type,
            ),
        )
        .await
    }

    pub async fn insert_data(&self, node: &Node, data: &str) -> TopologyResult<()> {
        self.execute(
            node,
            &sql::insert_data(&node.replication_schema, &node.replication_table, data),
        )
        .await
    }

    /// Publishes every table of the replication schema of `node` as `pub_<node>`.
    pub async fn create_publication(&self, node: &Node, ddl: bool) -> TopologyResult<()> {
        let publication = node.publication_name();
        self.execute_tolerating_duplicate(
            node,
            &sql::create_schema_publication(&publication, &node.replication_schema, ddl),
            StatementOptions::execute(),
            &publication,
        )
        .await?;
        info!(node = %node.name, %publication, ddl, "publication created");
        Ok(())
    }

    pub async fn drop_publication(&self, node: &Node) -> TopologyResult<()> {
        let publication = node.publication_name();
        self.execute(node, &sql::drop_publication(&publication))
            .await?;
        debug!(node = %node.name, %publication, "publication dropped");
        Ok(())
    }

    /// Subscribes `node` to the publication of `source` as `sub_<node>`.
    pub async fn create_subscription(&self, node: &Node, source: &Node) -> TopologyResult<()> {
        let subscription = node.subscription_name();
        let publication = source.publication_name();
        let conninfo = self.connection(&source.name)?.to_conninfo();
        self.execute_tolerating_duplicate(
            node,
            &sql::create_subscription(&subscription, &conninfo, &publication),
            StatementOptions::autocommit().sensitive(),
            &subscription,
        )
        .await?;
        info!(node = %node.name, %subscription, source = %source.name, %publication, "subscription created");
        Ok(())
    }

    pub async fn drop_subscription(&self, node: &Node) -> TopologyResult<()> {
        let subscription = node.subscription_name();
        self.execute_autocommit(node, &sql::drop_subscription(&subscription))
            .await?;
        debug!(node = %node.name, %subscription, "subscription dropped");
        Ok(())
    }

    pub async fn table_exists(&self, node: &Node) -> TopologyResult<bool> {
        self.query_bool(
            node,
            &sql::table_exists(&node.replication_schema, &node.replication_table),
            "exists",
        )
        .await
    }

    /// Columns of the replicated table in ordinal order.
    pub async fn get_table_columns(&self, node: &Node) -> TopologyResult<Vec<ColumnInfo>> {
        let rows = self
            .query(
                node,
                &sql::table_columns(&node.replication_schema, &node.replication_table),
            )
            .await?;

        Ok(rows
            .iter()
            .map(|row| ColumnInfo {
                name: row.get("column_name").unwrap_or_default().to_string(),
                data_type: row.get("data_type").unwrap_or_default().to_string(),
                default: row.get("column_default").map(str::to_string),
            })
            .collect())
    }

    pub async fn select_all(&self, node: &Node) -> TopologyResult<Vec<SqlRow>> {
        self.query(
            node,
            &sql::select_all(&node.replication_schema, &node.replication_table),
        )
        .await
    }

    pub async fn get_subscriptions(&self, node: &Node) -> TopologyResult<Vec<String>> {
        self.query_names(node, &sql::list_subscriptions()).await
    }

    pub async fn get_publications(&self, node: &Node) -> TopologyResult<Vec<String>> {
        self.query_names(node, &sql::list_publications()).await
    }

    async fn query_names(&self, node: &Node, statement: &str) -> TopologyResult<Vec<String>> {
        let rows = self.query(node, statement).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get_index(0).map(str::to_string))
            .collect())
    }

    pub async fn publication_exists(&self, node: &Node, publication: &str) -> TopologyResult<bool> {
        self.query_bool(node, &sql::publication_exists(publication), "exists")
            .await
    }

    pub async fn subscription_exists(
        &self,
        node: &Node,
        subscription: &str,
    ) -> TopologyResult<bool> {
        self.query_bool(node, &sql::subscription_exists(subscription), "exists")
            .await
    }

    /// Fails unless `source` already exposes its publication.
    pub async fn ensure_publication(&self, source: &Node) -> TopologyResult<()> {
        let publication = source.publication_name();
        if !self.publication_exists(source, &publication).await? {
            bail!(
                ErrorKind::MissingPublication,
                "Source node has no publication, set it up first",
                format!("publication `{publication}` not found on node `{}`", source.name)
            );
        }

        Ok(())
    }

    /// Schema, table and publication on the master.
    pub async fn setup_master_native(&self, node: &Node, ddl: bool) -> TopologyResult<()> {
        self.create_schema(node).await?;
        self.create_table(node).await?;
        self.create_publication(node, ddl).await?;

        info!(node = %node.name, ddl, "master set up");

        Ok(())
    }

    /// Schema, table and subscription on a replica, plus its own publication with `cascade`.
    pub async fn setup_replica_native(
        &self,
        node: &Node,
        source: &Node,
        ddl: bool,
        cascade: bool,
    ) -> TopologyResult<()> {
        self.ensure_publication(source).await?;

        self.create_schema(node).await?;
        self.create_table(node).await?;
        self.create_subscription(node, source).await?;
        if cascade {
            self.create_publication(node, ddl).await?;
        }

        if self.topology.replication_wait().after_setup {
            self.await_subscription(node).await?;
        }

        info!(node = %node.name, source = %source.name, ddl, cascade, "replica set up");

        Ok(())
    }

    pub async fn drop_all_subscriptions(&self) -> TopologyResult<()> {
        for node in self.topology.nodes() {
            self.drop_subscription(node).await?;
        }
        Ok(())
    }

    pub async fn drop_all_publications(&self) -> TopologyResult<()> {
        for node in self.topology.nodes() {
            self.drop_publication(node).await?;
        }
        Ok(())
    }

    pub async fn drop_all_schemas(&self) -> TopologyResult<()> {
        for node in self.topology.nodes() {
            self.drop_schema(node).await?;
        }
        Ok(())
    }

    /// Drops every subscription, then every publication, then every replication schema.
    ///
    /// A subscription on one node references a publication on another, so each kind of object is
    /// removed cluster-wide before moving to the next.
    pub async fn cleanup_cluster(&self) -> TopologyResult<()> {
        self.drop_all_subscriptions().await?;
        self.drop_all_publications().await?;
        self.drop_all_schemas().await?;

        info!("replication objects removed from every node");

        Ok(())
    }

    /// Whether the apply worker of `subscription` on `node` runs and every table is synced.
    pub async fn subscription_active(&self, node: &Node, subscription: &str) -> TopologyResult<bool> {
        let rows = self
            .query(node, &sql::subscription_status(subscription))
            .await?;
        let Some(row) = rows.first() else {
            return Ok(false);
        };

        Ok(row.get("worker_running") == Some("t") && row.get("pending_tables") == Some("0"))
    }

    /// Waits until the subscription of `node` is active.
    pub async fn await_subscription(&self, node: &Node) -> TopologyResult<()> {
        self.await_named_subscription(node, &node.subscription_name())
            .await
    }

    /// Waits until `subscription` on `node` is active, whoever created it.
    pub async fn await_named_subscription(
        &self,
        node: &Node,
        subscription: &str,
    ) -> TopologyResult<()> {
        self.wait_for(subscription, move || self.subscription_active(node, subscription))
            .await?;
        debug!(node = %node.name, %subscription, "subscription active");
        Ok(())
    }

    /// Polls `check` within the configured replication wait budget.
    pub async fn wait_for<F, Fut>(&self, subject: &str, check: F) -> TopologyResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = TopologyResult<bool>>,
    {
        let wait = self.topology.replication_wait();
        poll_until(subject, wait.timeout(), wait.poll_interval(), check).await
    }
}
