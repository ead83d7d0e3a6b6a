use std::sync::Arc;

use config::shared::{
    BuildConfig, EasyReplicateConfig, NodeConfig, NodeRole, PgConnectionConfig, PrivilegesConfig,
    ReplicationWaitConfig, StrategyKind, TlsConfig, TopologyConfig,
};

use crate::model::Topology;
use crate::protocol::ReplicationProtocol;
use crate::selector::select;
use crate::test_utils::executor::FakeExecutor;

pub const CLUSTER_DIR: &str = "/var/lib/pgcluster";
pub const BIN_DIR: &str = "/usr/local/pgsql/bin";
pub const SOURCE_DIR: &str = "/usr/src/postgres";

pub fn node_config(name: &str, role: NodeRole, port: u16, upstream: Option<&str>) -> NodeConfig {
    NodeConfig {
        name: name.to_string(),
        role,
        port,
        replication_schema: "replication".to_string(),
        replication_table: "table1".to_string(),
        replication_user: Some("postgres".to_string()),
        upstream: upstream.map(str::to_string),
        connection: PgConnectionConfig {
            host: "localhost".to_string(),
            port,
            name: "postgres".to_string(),
            username: "postgres".to_string(),
            password: Some("secret".into()),
            tls: TlsConfig::default(),
        },
    }
}

pub fn topology_config(strategy: StrategyKind, nodes: Vec<NodeConfig>) -> TopologyConfig {
    TopologyConfig {
        pg_source_dir: SOURCE_DIR.to_string(),
        pg_bin_dir: BIN_DIR.to_string(),
        pg_cluster_dir: CLUSTER_DIR.to_string(),
        strategy,
        build: BuildConfig::default(),
        privileges: PrivilegesConfig::default(),
        replication_wait: ReplicationWaitConfig {
            timeout_ms: 1_000,
            poll_interval_ms: 50,
            after_setup: true,
        },
        easy_replicate: Some(EasyReplicateConfig {
            binary: "/usr/local/bin/pg_easy_replicate".to_string(),
            group_name: "repl1".to_string(),
            gem_home: Some("/var/lib/gems".to_string()),
            gem_path: vec!["/var/lib/gems".to_string(), "/usr/lib/gems".to_string()],
            track_ddl: true,
        }),
        nodes,
    }
}

/// Master on 5432, `replica1` on 5433 subscribing to the master and `replica2` on 5434
/// subscribing to `replica1`.
pub fn cascade_config(strategy: StrategyKind) -> TopologyConfig {
    topology_config(
        strategy,
        vec![
            node_config("master", NodeRole::Master, 5432, None),
            node_config("replica1", NodeRole::Replica, 5433, None),
            node_config("replica2", NodeRole::Replica, 5434, Some("replica1")),
        ],
    )
}

/// Master on 5432 with two replicas both subscribing to it.
pub fn fan_out_config(strategy: StrategyKind) -> TopologyConfig {
    topology_config(
        strategy,
        vec![
            node_config("master", NodeRole::Master, 5432, None),
            node_config("replica1", NodeRole::Replica, 5433, None),
            node_config("replica2", NodeRole::Replica, 5434, None),
        ],
    )
}

/// A topology wired to a [`FakeExecutor`], with the protocol for one strategy.
pub struct TestCluster {
    pub topology: Arc<Topology>,
    pub executor: FakeExecutor,
    pub protocol: ReplicationProtocol,
}

impl TestCluster {
    /// Three-node cascade driven by `strategy`.
    pub fn new(strategy: StrategyKind) -> Self {
        Self::from_config(cascade_config(strategy))
    }

    pub fn from_config(config: TopologyConfig) -> Self {
        let strategy = config.strategy;
        let topology = Arc::new(Topology::from_config(config).expect("valid test topology"));
        let executor = FakeExecutor::new();
        let strategy = select(strategy, topology.clone(), Arc::new(executor.clone()))
            .expect("strategy available for test topology");

        Self {
            topology,
            executor,
            protocol: ReplicationProtocol::new(strategy),
        }
    }

    /// Initialises and starts every node.
    pub async fn boot(&self) {
        self.protocol.init().await.expect("cluster initialised");
        self.protocol.start().await.expect("cluster started");
        self.executor.clear_history().await;
    }
}
