//! Drives nodes through build, data directory initialisation, start, status and stop.
//!
//! Every effect goes through [`NodeExecutor::run_privileged`] so that build and process-control
//! commands run as the database-owning account. Cluster-wide operations walk the nodes in declared
//! order and stop at the first failure, except stopping, which attempts every node.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use postgres::{NodeExecutor, PrivilegedCommand, StatementOptions, sql};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, TopologyError, TopologyResult};
use crate::model::{Node, Topology};
use crate::wait::poll_until;

/// Name of the runtime configuration file inside a data directory.
const RUNTIME_CONFIG_FILE: &str = "postgresql.conf";

/// Directory, relative to the data directory, receiving the server logs.
const LOG_DIR: &str = "log";

/// Observed state of a node's server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// No data directory has been initialised.
    Uninitialized,
    /// Initialised but no server is running on it.
    Stopped,
    Running,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Uninitialized => f.write_str("uninitialized"),
            NodeState::Stopped => f.write_str("stopped"),
            NodeState::Running => f.write_str("running"),
        }
    }
}

/// State of one node as reported by a cluster-wide status check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatus {
    pub node: String,
    pub port: u16,
    pub state: NodeState,
}

/// Runtime settings every node needs for logical replication.
pub fn replication_settings(node: &Node) -> Vec<String> {
    vec![
        format!("# Settings for node {}", node.name),
        format!("port = {}", node.port),
        "wal_level = logical".to_string(),
        "max_wal_senders = 10".to_string(),
        "max_replication_slots = 10".to_string(),
        "logging_collector = on".to_string(),
        format!("log_directory = '{LOG_DIR}'"),
        "log_filename = 'postgresql-%Y-%m-%d_%H%M%S.log'".to_string(),
    ]
}

fn arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[derive(Clone)]
pub struct LifecycleManager {
    topology: Arc<Topology>,
    executor: Arc<dyn NodeExecutor>,
}

impl fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("nodes", &self.topology.nodes().len())
            .finish_non_exhaustive()
    }
}

impl LifecycleManager {
    pub fn new(topology: Arc<Topology>, executor: Arc<dyn NodeExecutor>) -> Self {
        Self { topology, executor }
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    async fn run(&self, command: PrivilegedCommand) -> TopologyResult<()> {
        self.executor.run_privileged(&command).await?;
        Ok(())
    }

    /// Builds and installs the server from the source tree.
    ///
    /// With `clean` the tree is cleaned first, otherwise the build is incremental.
    pub async fn build(&self, clean: bool) -> TopologyResult<()> {
        let source_dir = self.topology.source_dir();
        info!(source_dir = %source_dir.display(), clean, "building server from source");

        if clean {
            self.run(PrivilegedCommand::new(["make", "clean"]).current_dir(source_dir).quiet())
                .await?;
        }

        let mut configure = vec!["./configure".to_string()];
        configure.extend(self.topology.build().configure_args.iter().cloned());
        self.run(PrivilegedCommand::new(configure).current_dir(source_dir).quiet())
            .await?;
        self.run(PrivilegedCommand::new(["make"]).current_dir(source_dir).quiet())
            .await?;
        self.run(PrivilegedCommand::new(["make", "install"]).current_dir(source_dir).quiet())
            .await?;

        info!("server built and installed");

        Ok(())
    }

    /// Builds and installs the extension found in `<extensions_dir>/<name>` against the
    /// installed server.
    pub async fn build_extension(&self, name: &str, clean: bool) -> TopologyResult<()> {
        let dir = self.topology.extensions_dir().join(name);
        let pg_config = format!("PG_CONFIG={}", arg(&self.topology.bin("pg_config")));
        info!(extension = name, dir = %dir.display(), clean, "building extension");

        if clean {
            self.run(
                PrivilegedCommand::new(["make", pg_config.as_str(), "clean"])
                    .current_dir(&dir)
                    .quiet(),
            )
            .await?;
        }
        self.run(
            PrivilegedCommand::new(["make", pg_config.as_str()])
                .current_dir(&dir)
                .quiet(),
        )
        .await?;
        self.run(
            PrivilegedCommand::new(["make", pg_config.as_str(), "install"])
                .current_dir(&dir)
                .quiet(),
        )
        .await?;

        info!(extension = name, "extension built and installed");

        Ok(())
    }

    /// Recreates the data directory of `node` from scratch.
    ///
    /// Any existing data directory is removed, after stopping a server still running on it.
    pub async fn init(&self, node: &Node) -> TopologyResult<()> {
        let data_dir = self.topology.data_dir(node);
        let data_dir_arg = arg(&data_dir);
        info!(node = %node.name, data_dir = %data_dir.display(), "initializing data directory");

        self.ensure_stopped(node).await?;

        self.run(PrivilegedCommand::new(["rm", "-rf", data_dir_arg.as_str()]))
            .await?;
        self.run(PrivilegedCommand::new(["mkdir", "-p", data_dir_arg.as_str()]))
            .await?;
        self.run(
            PrivilegedCommand::new([arg(&self.topology.bin("initdb")), "-D".to_string(), data_dir_arg.clone()])
                .quiet(),
        )
        .await?;

        self.append_conf(node, &replication_settings(node)).await?;

        let log_dir = arg(&data_dir.join(LOG_DIR));
        self.run(PrivilegedCommand::new(["mkdir", "-p", log_dir.as_str()]))
            .await?;

        info!(node = %node.name, "data directory initialized");

        Ok(())
    }

    /// Appends `lines` to the runtime configuration file of `node`.
    ///
    /// Settings only take effect at the next server start.
    pub async fn append_conf(&self, node: &Node, lines: &[String]) -> TopologyResult<()> {
        let conf = arg(&self.topology.data_dir(node).join(RUNTIME_CONFIG_FILE));
        debug!(node = %node.name, conf = %conf, count = lines.len(), "appending runtime settings");

        let mut content = String::from("\n");
        for line in lines {
            content.push_str(line);
            content.push('\n');
        }

        self.run(
            PrivilegedCommand::new(["tee", "-a", conf.as_str()])
                .stdin(content)
                .quiet(),
        )
        .await
    }

    pub async fn start(&self, node: &Node) -> TopologyResult<()> {
        let data_dir = self.topology.data_dir(node);
        let log_file = arg(&data_dir.join(LOG_DIR).join("postgresql.log"));
        info!(node = %node.name, port = node.port, "starting node");

        self.run(
            PrivilegedCommand::new([
                arg(&self.topology.bin("pg_ctl")),
                "-D".to_string(),
                arg(&data_dir),
                "-l".to_string(),
                log_file,
                "-w".to_string(),
                "start".to_string(),
            ])
            .quiet(),
        )
        .await
    }

    pub async fn stop(&self, node: &Node) -> TopologyResult<()> {
        info!(node = %node.name, "stopping node");

        self.run(
            PrivilegedCommand::new([
                arg(&self.topology.bin("pg_ctl")),
                "-D".to_string(),
                arg(&self.topology.data_dir(node)),
                "-m".to_string(),
                "fast".to_string(),
                "-w".to_string(),
                "stop".to_string(),
            ])
            .quiet(),
        )
        .await
    }

    /// Checks the state of `node`.
    ///
    /// A failing check command means "no": a missing `PG_VERSION` file means the data directory
    /// is not initialised and a failing `pg_ctl status` means the server is not running.
    pub async fn state(&self, node: &Node) -> TopologyResult<NodeState> {
        let data_dir = self.topology.data_dir(node);

        let version_file = arg(&data_dir.join("PG_VERSION"));
        let initialized = PrivilegedCommand::new(["test", "-f", version_file.as_str()]).quiet();
        if !self.command_succeeds(initialized).await? {
            return Ok(NodeState::Uninitialized);
        }

        let status = PrivilegedCommand::new([
            arg(&self.topology.bin("pg_ctl")),
            "-D".to_string(),
            arg(&data_dir),
            "status".to_string(),
        ])
        .quiet();
        if self.command_succeeds(status).await? {
            Ok(NodeState::Running)
        } else {
            Ok(NodeState::Stopped)
        }
    }

    /// Whether a server is running on `node`.
    pub async fn status(&self, node: &Node) -> TopologyResult<bool> {
        Ok(self.state(node).await? == NodeState::Running)
    }

    /// Runs a check command, mapping a non-zero exit to `false`.
    async fn command_succeeds(&self, command: PrivilegedCommand) -> TopologyResult<bool> {
        match self.executor.run_privileged(&command).await {
            Ok(()) => Ok(true),
            Err(err) if err.exit_code().is_some() => Ok(false),
            Err(err) => Err(TopologyError::from(err)),
        }
    }

    /// Stops `node` if a server is running on it.
    pub async fn ensure_stopped(&self, node: &Node) -> TopologyResult<()> {
        if self.status(node).await? {
            self.stop(node).await?;
        } else {
            debug!(node = %node.name, "node is not running, nothing to stop");
        }

        Ok(())
    }

    /// Waits until `node` accepts connections.
    pub async fn wait_until_ready(&self, node: &Node) -> TopologyResult<()> {
        let wait = self.topology.replication_wait();
        let executor = self.executor.as_ref();
        let ping = sql::ping();
        let ping = ping.as_str();

        poll_until(&node.name, wait.timeout(), wait.poll_interval(), move || async move {
            executor
                .run_sql(&node.name, &node.connection, ping, StatementOptions::execute())
                .await
                .map(|_| true)
                .map_err(TopologyError::from)
        })
        .await
    }

    pub async fn init_cluster(&self) -> TopologyResult<()> {
        for node in self.topology.nodes() {
            self.init(node).await?;
        }

        Ok(())
    }

    /// Starts every node not already running.
    pub async fn start_cluster(&self) -> TopologyResult<()> {
        for node in self.topology.nodes() {
            match self.state(node).await? {
                NodeState::Running => {
                    info!(node = %node.name, "node already running, skipping start");
                }
                NodeState::Uninitialized => {
                    crate::bail!(
                        ErrorKind::InvalidState,
                        "Node has no initialized data directory",
                        node.name.clone()
                    );
                }
                NodeState::Stopped => self.start(node).await?,
            }
        }

        Ok(())
    }

    /// Stops every running node.
    ///
    /// A node that fails to stop does not keep the others running; all failures are reported
    /// together.
    pub async fn stop_cluster(&self) -> TopologyResult<()> {
        let mut errors = Vec::new();
        for node in self.topology.nodes() {
            let result = match self.status(node).await {
                Ok(true) => self.stop(node).await,
                Ok(false) => {
                    info!(node = %node.name, "node not running, skipping stop");
                    Ok(())
                }
                Err(err) => Err(err),
            };

            if let Err(err) = result {
                warn!(node = %node.name, error = %err, "failed to stop node");
                errors.push(err);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.into())
        }
    }

    pub async fn status_cluster(&self) -> TopologyResult<Vec<NodeStatus>> {
        let mut statuses = Vec::with_capacity(self.topology.nodes().len());
        for node in self.topology.nodes() {
            let state = self.state(node).await?;
            info!(node = %node.name, port = node.port, %state, "node status");
            statuses.push(NodeStatus {
                node: node.name.clone(),
                port: node.port,
                state,
            });
        }

        Ok(statuses)
    }
}
