//! Typed, read-only view of the topology document.
//!
//! A [`Topology`] is built once from a validated [`TopologyConfig`] and shared behind an [`Arc`]
//! by every component. Publication and subscription names are derived from node names alone (see
//! [`publication_name`] and [`subscription_name`]), which is what lets cleanup run without any
//! state persisted between invocations.
//!
//! [`Arc`]: std::sync::Arc

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::shared::{
    BuildConfig, EasyReplicateConfig, NodeConfig, NodeRole, PgConnectionConfig, PrivilegesConfig,
    ReplicationWaitConfig, StrategyKind, TopologyConfig,
};
use config::{Environment, load_config, load_config_from_dir};
use pg_escape::quote_identifier;
use serde::Serialize;

use crate::bail;
use crate::error::{ErrorKind, TopologyResult};

/// Returns the name of the publication exposed by `node`.
pub fn publication_name(node: &str) -> String {
    format!("pub_{node}")
}

/// Returns the name of the subscription created on `node`.
pub fn subscription_name(node: &str) -> String {
    format!("sub_{node}")
}

/// One database node.
#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    pub role: NodeRole,
    pub port: u16,
    pub replication_schema: String,
    pub replication_table: String,
    pub replication_user: Option<String>,
    /// Declared upstream, `None` for the master and for replicas of the master.
    pub upstream: Option<String>,
    pub connection: PgConnectionConfig,
}

impl Node {
    pub fn is_master(&self) -> bool {
        self.role == NodeRole::Master
    }

    pub fn publication_name(&self) -> String {
        publication_name(&self.name)
    }

    pub fn subscription_name(&self) -> String {
        subscription_name(&self.name)
    }

    /// Schema-qualified, quoted name of the replicated table.
    pub fn qualified_table(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.replication_schema),
            quote_identifier(&self.replication_table)
        )
    }
}

impl From<NodeConfig> for Node {
    fn from(config: NodeConfig) -> Self {
        Self {
            name: config.name,
            role: config.role,
            port: config.port,
            replication_schema: config.replication_schema,
            replication_table: config.replication_table,
            replication_user: config.replication_user,
            upstream: config.upstream,
            connection: config.connection,
        }
    }
}

/// The derived relationship between a replica and the node it subscribes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicationLink {
    /// Subscription created on `target`.
    pub subscription: String,
    /// Publication consumed on `source`.
    pub publication: String,
    pub source: String,
    pub target: String,
}

/// Ordered nodes plus the cluster-wide settings.
#[derive(Debug, Clone)]
pub struct Topology {
    source_dir: PathBuf,
    bin_dir: PathBuf,
    cluster_dir: PathBuf,
    extensions_dir: PathBuf,
    strategy: StrategyKind,
    build: BuildConfig,
    privileges: PrivilegesConfig,
    replication_wait: ReplicationWaitConfig,
    easy_replicate: Option<EasyReplicateConfig>,
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    master: usize,
}

impl Topology {
    /// Loads the topology document from the default configuration directory.
    pub fn load() -> TopologyResult<Self> {
        let config: TopologyConfig = load_config()?;
        Self::from_config(config)
    }

    /// Loads the topology document from `dir` for `environment`.
    pub fn load_from_dir(dir: &Path, environment: Environment) -> TopologyResult<Self> {
        let config: TopologyConfig = load_config_from_dir(dir, environment)?;
        Self::from_config(config)
    }

    /// Validates `config` and builds the topology from it.
    pub fn from_config(config: TopologyConfig) -> TopologyResult<Self> {
        config.validate()?;

        let extensions_dir = config.extensions_dir();
        let nodes: Vec<Node> = config.nodes.into_iter().map(Node::from).collect();
        let index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(position, node)| (node.name.clone(), position))
            .collect();
        let Some(master) = nodes.iter().position(Node::is_master) else {
            bail!(ErrorKind::ConfigError, "Topology has no master node");
        };

        Ok(Self {
            source_dir: PathBuf::from(config.pg_source_dir),
            bin_dir: PathBuf::from(config.pg_bin_dir),
            cluster_dir: PathBuf::from(config.pg_cluster_dir),
            extensions_dir,
            strategy: config.strategy,
            build: config.build,
            privileges: config.privileges,
            replication_wait: config.replication_wait,
            easy_replicate: config.easy_replicate,
            nodes,
            index,
            master,
        })
    }

    pub fn get_node(&self, name: &str) -> TopologyResult<&Node> {
        match self.index.get(name) {
            Some(position) => Ok(&self.nodes[*position]),
            None => bail!(
                ErrorKind::NodeNotFound,
                "Node is not part of the topology",
                name
            ),
        }
    }

    pub fn master(&self) -> &Node {
        &self.nodes[self.master]
    }

    /// Replicas in declared order.
    pub fn replicas(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|node| !node.is_master())
    }

    /// Every node in declared order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn extensions_dir(&self) -> &Path {
        &self.extensions_dir
    }

    pub fn build(&self) -> &BuildConfig {
        &self.build
    }

    pub fn privileges(&self) -> &PrivilegesConfig {
        &self.privileges
    }

    pub fn replication_wait(&self) -> &ReplicationWaitConfig {
        &self.replication_wait
    }

    pub fn easy_replicate(&self) -> Option<&EasyReplicateConfig> {
        self.easy_replicate.as_ref()
    }

    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }

    /// Path of an installed server binary such as `pg_ctl`.
    pub fn bin(&self, name: &str) -> PathBuf {
        self.bin_dir.join(name)
    }

    /// Data directory of `node`.
    pub fn data_dir(&self, node: &Node) -> PathBuf {
        self.cluster_dir.join(&node.name)
    }

    /// Returns the node `node` subscribes to: its declared upstream, otherwise the master.
    pub fn upstream_of(&self, node: &Node) -> TopologyResult<&Node> {
        if node.is_master() {
            bail!(
                ErrorKind::InvalidState,
                "The master node has no upstream",
                node.name.clone()
            );
        }

        match &node.upstream {
            Some(upstream) => self.get_node(upstream),
            None => Ok(self.master()),
        }
    }

    /// Replicas subscribing to `node`, in declared order.
    pub fn downstream_of<'a>(&'a self, node: &'a Node) -> impl Iterator<Item = &'a Node> + 'a {
        self.replicas().filter(move |replica| {
            self.upstream_of(replica)
                .is_ok_and(|upstream| upstream.name == node.name)
        })
    }

    /// Whether another replica subscribes to `node`, which then has to publish as well.
    pub fn has_downstream(&self, node: &Node) -> bool {
        self.downstream_of(node).next().is_some()
    }

    pub fn link_for(&self, node: &Node) -> TopologyResult<ReplicationLink> {
        let source = self.upstream_of(node)?;

        Ok(ReplicationLink {
            subscription: node.subscription_name(),
            publication: source.publication_name(),
            source: source.name.clone(),
            target: node.name.clone(),
        })
    }

    /// Every replication link, in declared order of the subscribing node.
    pub fn links(&self) -> Vec<ReplicationLink> {
        self.replicas()
            .filter_map(|replica| self.link_for(replica).ok())
            .collect()
    }
}
