use std::path::PathBuf;

use clap::{Parser, Subcommand};
use config::shared::StrategyKind;

#[derive(Parser, Debug)]
#[command(
    name = "orchestrator",
    version,
    about = "Builds, runs and wires a Postgres logical-replication topology"
)]
pub(crate) struct Cli {
    /// Strategy to use instead of the one named in the topology document.
    #[arg(long, global = true)]
    pub(crate) strategy: Option<StrategyKind>,

    /// Directory holding `base.yaml` and the environment overlays.
    /// Defaults to `APP_CONFIG_DIR`, then `./configuration`.
    #[arg(long, global = true)]
    pub(crate) config_dir: Option<PathBuf>,

    /// Also write logs to daily-rolling files in this directory.
    #[arg(long, global = true)]
    pub(crate) log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    /// Build and install the server and any companion extension
    Build {
        /// Clean the source tree first
        #[arg(long)]
        clean: bool,
    },
    /// Recreate the data directory of every node
    Init,
    /// Start every node not already running
    Start,
    /// Stop every running node
    Stop,
    /// Report the state of every node
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create the replicated schema, table and publication on the master
    SetupMaster {
        /// Propagate schema changes as well
        #[arg(long)]
        ddl: bool,
    },
    /// Subscribe the first declared replica to its upstream
    SetupReplica1 {
        #[arg(long)]
        ddl: bool,
        /// Also publish so a further replica can subscribe
        #[arg(long)]
        cascade: bool,
    },
    /// Subscribe the second declared replica to its upstream
    SetupReplica2 {
        #[arg(long)]
        ddl: bool,
    },
    /// Subscribe the named replica to its upstream
    SetupReplica {
        node: String,
        #[arg(long)]
        ddl: bool,
        #[arg(long)]
        cascade: bool,
    },
    /// Set up the master, then every replica in declared order
    SetupFullReplication {
        #[arg(long)]
        ddl: bool,
        /// Let replicas publish for the replicas subscribing to them
        #[arg(long)]
        cascade: bool,
    },
    /// Remove every subscription, publication and replicated schema
    CleanReplication,
}
