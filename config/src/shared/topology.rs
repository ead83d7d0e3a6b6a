use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::{PgConnectionConfig, ValidationError};

const DEFAULT_REPLICATION_SCHEMA: &str = "replication";
const DEFAULT_REPLICATION_TABLE: &str = "table1";
const DEFAULT_OS_USER: &str = "postgres";
const DEFAULT_EASY_REPLICATE_GROUP: &str = "repl1";
const DEFAULT_WAIT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_WAIT_POLL_INTERVAL_MS: u64 = 100;

/// The DDL propagation mechanism the orchestrator drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Native logical replication only, DDL is never propagated.
    #[serde(alias = "plain")]
    Vanilla,
    /// Native logical replication on a server built from a patched tree with DDL support.
    #[serde(alias = "source_patch")]
    DdlPatch,
    /// The `logical_ddl` capture extension on top of native logical replication.
    #[serde(alias = "capture_extension")]
    LogicalDdl,
    /// The external `pg_easy_replicate` tool.
    PgEasyReplicate,
    /// `pglogical` together with `pgl_ddl_deploy`.
    PglDdlDeploy,
}

impl StrategyKind {
    /// Every strategy, in a stable order.
    pub const ALL: [StrategyKind; 5] = [
        StrategyKind::Vanilla,
        StrategyKind::DdlPatch,
        StrategyKind::LogicalDdl,
        StrategyKind::PgEasyReplicate,
        StrategyKind::PglDdlDeploy,
    ];

    /// Returns the identifier used in configuration documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Vanilla => "vanilla",
            StrategyKind::DdlPatch => "ddl_patch",
            StrategyKind::LogicalDdl => "logical_ddl",
            StrategyKind::PgEasyReplicate => "pg_easy_replicate",
            StrategyKind::PglDdlDeploy => "pgl_ddl_deploy",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a strategy identifier is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStrategy(pub String);

impl fmt::Display for UnknownStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let known = StrategyKind::ALL
            .iter()
            .map(StrategyKind::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "unknown strategy `{}`, expected one of: {known}", self.0)
    }
}

impl std::error::Error for UnknownStrategy {}

impl FromStr for StrategyKind {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "vanilla" | "plain" => Ok(StrategyKind::Vanilla),
            "ddl_patch" | "source_patch" => Ok(StrategyKind::DdlPatch),
            "logical_ddl" | "capture_extension" => Ok(StrategyKind::LogicalDdl),
            "pg_easy_replicate" => Ok(StrategyKind::PgEasyReplicate),
            "pgl_ddl_deploy" => Ok(StrategyKind::PglDdlDeploy),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}

/// Role of a node in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Master,
    Replica,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Master => f.write_str("master"),
            NodeRole::Replica => f.write_str("replica"),
        }
    }
}

/// One database node of the topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct NodeConfig {
    /// Unique node name, also the suffix of the node's publication and subscription names.
    pub name: String,
    pub role: NodeRole,
    /// Listening port written into the node's `postgresql.conf`.
    pub port: u16,
    #[serde(default = "default_replication_schema")]
    pub replication_schema: String,
    #[serde(default = "default_replication_table")]
    pub replication_table: String,
    /// Role granted replication rights by extension-backed strategies.
    #[serde(default)]
    pub replication_user: Option<String>,
    /// Node this replica subscribes to. Replicas without one subscribe to the master.
    #[serde(default)]
    pub upstream: Option<String>,
    pub connection: PgConnectionConfig,
}

fn default_replication_schema() -> String {
    DEFAULT_REPLICATION_SCHEMA.to_string()
}

fn default_replication_table() -> String {
    DEFAULT_REPLICATION_TABLE.to_string()
}

/// Source build settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BuildConfig {
    /// Extra arguments passed to `./configure`.
    #[serde(default)]
    pub configure_args: Vec<String>,
    /// Directory holding companion extension sources. Defaults to `<pg_source_dir>/contrib`.
    #[serde(default)]
    pub extensions_dir: Option<String>,
}

/// Operating-system account used for build and process-control commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PrivilegesConfig {
    #[serde(default = "default_os_user")]
    pub os_user: String,
    /// When false commands run as the current user.
    #[serde(default = "default_true")]
    pub use_sudo: bool,
}

impl Default for PrivilegesConfig {
    fn default() -> Self {
        Self {
            os_user: default_os_user(),
            use_sudo: true,
        }
    }
}

fn default_os_user() -> String {
    DEFAULT_OS_USER.to_string()
}

fn default_true() -> bool {
    true
}

/// Bounds for polling asynchronous replication progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReplicationWaitConfig {
    #[serde(default = "default_wait_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_wait_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Wait for every new subscription to become active before returning from setup.
    #[serde(default = "default_true")]
    pub after_setup: bool,
}

impl ReplicationWaitConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Checks that polling happens at least once within the timeout.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.poll_interval_ms == 0 {
            return Err(ValidationError::ReplicationWait(
                "`poll_interval_ms` must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval_ms > self.timeout_ms {
            return Err(ValidationError::ReplicationWait(format!(
                "`poll_interval_ms` ({}) must not exceed `timeout_ms` ({})",
                self.poll_interval_ms, self.timeout_ms
            )));
        }

        Ok(())
    }
}

impl Default for ReplicationWaitConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_WAIT_POLL_INTERVAL_MS,
            after_setup: true,
        }
    }
}

fn default_wait_timeout_ms() -> u64 {
    DEFAULT_WAIT_TIMEOUT_MS
}

fn default_wait_poll_interval_ms() -> u64 {
    DEFAULT_WAIT_POLL_INTERVAL_MS
}

/// Settings for the `pg_easy_replicate` strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EasyReplicateConfig {
    /// Path of the `pg_easy_replicate` executable.
    pub binary: String,
    #[serde(default = "default_group_name")]
    pub group_name: String,
    /// Value of `GEM_HOME` for the tool's Ruby runtime.
    #[serde(default)]
    pub gem_home: Option<String>,
    /// Entries joined with `:` into `GEM_PATH`.
    #[serde(default)]
    pub gem_path: Vec<String>,
    #[serde(default = "default_true")]
    pub track_ddl: bool,
}

fn default_group_name() -> String {
    DEFAULT_EASY_REPLICATE_GROUP.to_string()
}

/// The complete topology document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TopologyConfig {
    /// Root of the Postgres source tree.
    pub pg_source_dir: String,
    /// Directory holding the installed `initdb`, `pg_ctl` and `pg_config` binaries.
    pub pg_bin_dir: String,
    /// Directory holding one data directory per node.
    pub pg_cluster_dir: String,
    pub strategy: StrategyKind,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub privileges: PrivilegesConfig,
    #[serde(default)]
    pub replication_wait: ReplicationWaitConfig,
    #[serde(default)]
    pub easy_replicate: Option<EasyReplicateConfig>,
    pub nodes: Vec<NodeConfig>,
}

impl TopologyConfig {
    /// Returns the directory holding companion extension sources.
    pub fn extensions_dir(&self) -> PathBuf {
        match &self.build.extensions_dir {
            Some(dir) => PathBuf::from(dir),
            None => PathBuf::from(&self.pg_source_dir).join("contrib"),
        }
    }

    /// Validates the document, failing on the first violated rule.
    ///
    /// Upstreams must be declared before the nodes that use them, which is what lets setup walk
    /// the node list once in declared order.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (key, value) in [
            ("pg_source_dir", &self.pg_source_dir),
            ("pg_bin_dir", &self.pg_bin_dir),
            ("pg_cluster_dir", &self.pg_cluster_dir),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::EmptyPath(key));
            }
        }

        if self.nodes.is_empty() {
            return Err(ValidationError::NoNodes);
        }

        let masters: Vec<&str> = self
            .nodes
            .iter()
            .filter(|node| node.role == NodeRole::Master)
            .map(|node| node.name.as_str())
            .collect();
        match masters.len() {
            0 => return Err(ValidationError::MissingMaster),
            1 => {}
            count => {
                return Err(ValidationError::MultipleMasters(count, masters.join(", ")));
            }
        }

        let mut declared = HashSet::new();
        for node in &self.nodes {
            if !is_valid_node_name(&node.name) {
                return Err(ValidationError::InvalidNodeName(node.name.clone()));
            }
            if declared.contains(node.name.as_str()) {
                return Err(ValidationError::DuplicateNodeName(node.name.clone()));
            }

            match (node.role, &node.upstream) {
                (NodeRole::Master, Some(_)) => {
                    return Err(ValidationError::MasterWithUpstream(node.name.clone()));
                }
                (NodeRole::Replica, Some(upstream)) if upstream == &node.name => {
                    return Err(ValidationError::SelfUpstream(node.name.clone()));
                }
                (NodeRole::Replica, Some(upstream)) if !declared.contains(upstream.as_str()) => {
                    let exists = self.nodes.iter().any(|other| &other.name == upstream);
                    return Err(if exists {
                        ValidationError::ForwardUpstream {
                            node: node.name.clone(),
                            upstream: upstream.clone(),
                        }
                    } else {
                        ValidationError::UnknownUpstream {
                            node: node.name.clone(),
                            upstream: upstream.clone(),
                        }
                    });
                }
                _ => {}
            }

            if node.port != node.connection.port {
                return Err(ValidationError::PortMismatch {
                    node: node.name.clone(),
                    port: node.port,
                    connection_port: node.connection.port,
                });
            }

            node.connection.tls.validate()?;
            declared.insert(node.name.as_str());
        }

        self.replication_wait.validate()?;

        if self.strategy == StrategyKind::PgEasyReplicate && self.easy_replicate.is_none() {
            return Err(ValidationError::MissingStrategySection {
                strategy: StrategyKind::PgEasyReplicate.as_str(),
                section: "easy_replicate",
            });
        }

        Ok(())
    }
}

impl Config for TopologyConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] =
        &["build.configure_args", "easy_replicate.gem_path"];
}

fn is_valid_node_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::TlsConfig;

    fn node(name: &str, role: NodeRole, port: u16, upstream: Option<&str>) -> NodeConfig {
        NodeConfig {
            name: name.to_string(),
            role,
            port,
            replication_schema: default_replication_schema(),
            replication_table: default_replication_table(),
            replication_user: None,
            upstream: upstream.map(str::to_string),
            connection: PgConnectionConfig {
                host: "localhost".to_string(),
                port,
                name: "postgres".to_string(),
                username: "postgres".to_string(),
                password: None,
                tls: TlsConfig::default(),
            },
        }
    }

    fn topology(nodes: Vec<NodeConfig>) -> TopologyConfig {
        TopologyConfig {
            pg_source_dir: "/usr/src/postgres".to_string(),
            pg_bin_dir: "/usr/local/pgsql".to_string(),
            pg_cluster_dir: "/var/lib/pgcluster".to_string(),
            strategy: StrategyKind::Vanilla,
            build: BuildConfig::default(),
            privileges: PrivilegesConfig::default(),
            replication_wait: ReplicationWaitConfig::default(),
            easy_replicate: None,
            nodes,
        }
    }

    fn cascade() -> TopologyConfig {
        topology(vec![
            node("master", NodeRole::Master, 5432, None),
            node("replica1", NodeRole::Replica, 5433, None),
            node("replica2", NodeRole::Replica, 5434, Some("replica1")),
        ])
    }

    #[test]
    fn valid_cascade_passes() {
        assert_eq!(cascade().validate(), Ok(()));
    }

    #[test]
    fn rejects_missing_and_multiple_masters() {
        let no_master = topology(vec![node("replica1", NodeRole::Replica, 5433, None)]);
        assert_eq!(no_master.validate(), Err(ValidationError::MissingMaster));

        let two_masters = topology(vec![
            node("a", NodeRole::Master, 5432, None),
            node("b", NodeRole::Master, 5433, None),
        ]);
        assert_eq!(
            two_masters.validate(),
            Err(ValidationError::MultipleMasters(2, "a, b".to_string()))
        );
    }

    #[test]
    fn rejects_empty_node_list_and_paths() {
        assert_eq!(topology(vec![]).validate(), Err(ValidationError::NoNodes));

        let mut config = cascade();
        config.pg_bin_dir = " ".to_string();
        assert_eq!(
            config.validate(),
            Err(ValidationError::EmptyPath("pg_bin_dir"))
        );
    }

    #[test]
    fn rejects_forward_and_unknown_upstreams() {
        let forward = topology(vec![
            node("master", NodeRole::Master, 5432, None),
            node("replica2", NodeRole::Replica, 5434, Some("replica1")),
            node("replica1", NodeRole::Replica, 5433, None),
        ]);
        assert!(matches!(
            forward.validate(),
            Err(ValidationError::ForwardUpstream { .. })
        ));

        let unknown = topology(vec![
            node("master", NodeRole::Master, 5432, None),
            node("replica1", NodeRole::Replica, 5433, Some("ghost")),
        ]);
        assert!(matches!(
            unknown.validate(),
            Err(ValidationError::UnknownUpstream { .. })
        ));

        let selfish = topology(vec![
            node("master", NodeRole::Master, 5432, None),
            node("replica1", NodeRole::Replica, 5433, Some("replica1")),
        ]);
        assert_eq!(
            selfish.validate(),
            Err(ValidationError::SelfUpstream("replica1".to_string()))
        );
    }

    #[test]
    fn rejects_duplicate_names_and_master_upstream() {
        let duplicate = topology(vec![
            node("master", NodeRole::Master, 5432, None),
            node("master", NodeRole::Replica, 5433, None),
        ]);
        assert_eq!(
            duplicate.validate(),
            Err(ValidationError::DuplicateNodeName("master".to_string()))
        );

        let mut config = cascade();
        config.nodes.swap(0, 1);
        config.nodes[1].upstream = Some("replica1".to_string());
        assert_eq!(
            config.validate(),
            Err(ValidationError::MasterWithUpstream("master".to_string()))
        );
    }

    #[test]
    fn rejects_a_connection_on_another_port() {
        let mut config = cascade();
        config.nodes[1].connection.port = 5432;

        assert_eq!(
            config.validate(),
            Err(ValidationError::PortMismatch {
                node: "replica1".to_string(),
                port: 5433,
                connection_port: 5432,
            })
        );
    }

    #[test]
    fn pg_easy_replicate_requires_its_section() {
        let mut config = cascade();
        config.strategy = StrategyKind::PgEasyReplicate;

        assert!(matches!(
            config.validate(),
            Err(ValidationError::MissingStrategySection { .. })
        ));
    }

    #[test]
    fn rejects_poll_interval_longer_than_timeout() {
        let mut config = cascade();
        config.replication_wait.poll_interval_ms = 10_000;

        assert!(matches!(
            config.validate(),
            Err(ValidationError::ReplicationWait(_))
        ));
    }

    #[test]
    fn strategy_parses_aliases() {
        assert_eq!("plain".parse::<StrategyKind>(), Ok(StrategyKind::Vanilla));
        assert_eq!(
            "capture-extension".parse::<StrategyKind>(),
            Ok(StrategyKind::LogicalDdl)
        );
        assert_eq!(
            "PGL_DDL_DEPLOY".parse::<StrategyKind>(),
            Ok(StrategyKind::PglDdlDeploy)
        );
        assert!("bdr".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn extensions_dir_defaults_to_contrib() {
        let mut config = cascade();
        assert_eq!(
            config.extensions_dir(),
            PathBuf::from("/usr/src/postgres/contrib")
        );

        config.build.extensions_dir = Some("/opt/ext".to_string());
        assert_eq!(config.extensions_dir(), PathBuf::from("/opt/ext"));
    }

    #[test]
    fn loads_document_with_defaults_and_aliases() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("base.yaml"),
            r#"
pg_source_dir: /usr/src/postgres
pg_bin_dir: /usr/local/pgsql
pg_cluster_dir: /var/lib/pgcluster
strategy: capture_extension
nodes:
  - name: master
    role: master
    port: 5432
    connection:
      host: localhost
      port: 5432
      name: postgres
      username: postgres
      password: secret
  - name: replica1
    role: replica
    port: 5433
    connection:
      host: localhost
      port: 5433
      name: postgres
      username: postgres
"#,
        )
        .unwrap();

        let config: TopologyConfig =
            crate::load_config_from_dir(dir.path(), crate::Environment::Dev).unwrap();

        assert_eq!(config.strategy, StrategyKind::LogicalDdl);
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[1].replication_schema, "replication");
        assert_eq!(config.nodes[1].replication_table, "table1");
        assert_eq!(config.privileges.os_user, "postgres");
        assert!(config.privileges.use_sudo);
        assert_eq!(config.replication_wait.timeout_ms, 5_000);
        assert_eq!(
            config.nodes[0]
                .connection
                .password
                .as_ref()
                .map(|p| p.expose_secret()),
            Some("secret")
        );
        assert_eq!(config.validate(), Ok(()));
    }
}
