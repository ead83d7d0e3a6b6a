use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use config::Environment;
use postgres::{NodeExecutor, PgNodeExecutor};
use telemetry::tracing::init_tracing;
use topology::lifecycle::NodeStatus;
use topology::model::{ReplicationLink, Topology};
use topology::protocol::ReplicationProtocol;
use topology::selector::select;
use tracing::{error, info};

use crate::cli::{Cli, Command};

mod cli;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _log_flusher = match init_tracing(env!("CARGO_BIN_NAME"), cli.log_dir.as_deref()) {
        Ok(flusher) => flusher,
        Err(err) => {
            eprintln!("failed to initialize logging: {err}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    // Node connections may use TLS; install the provider before any client is built.
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install the default crypto provider"))?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> anyhow::Result<()> {
    let topology = Arc::new(load_topology(&cli)?);
    let kind = cli.strategy.unwrap_or_else(|| topology.strategy());

    let executor: Arc<dyn NodeExecutor> =
        Arc::new(PgNodeExecutor::new(topology.privileges().clone()));
    let protocol = ReplicationProtocol::new(select(kind, topology.clone(), executor)?);

    info!(
        strategy = %kind,
        nodes = topology.nodes().len(),
        command = ?cli.command,
        "running command"
    );

    match cli.command {
        Command::Build { clean } => protocol.build(clean).await?,
        Command::Init => protocol.init().await?,
        Command::Start => protocol.start().await?,
        Command::Stop => protocol.stop().await?,
        Command::Status { json } => {
            let statuses = protocol.status().await?;
            let links = protocol.topology().links();
            print!("{}", render_status(&statuses, &links, json)?);
        }
        Command::SetupMaster { ddl } => protocol.setup_master(ddl).await?,
        Command::SetupReplica1 { ddl, cascade } => protocol.setup_replica1(ddl, cascade).await?,
        Command::SetupReplica2 { ddl } => protocol.setup_replica2(ddl).await?,
        Command::SetupReplica { node, ddl, cascade } => {
            protocol.setup_replica(&node, ddl, cascade).await?
        }
        Command::SetupFullReplication { ddl, cascade } => {
            protocol.setup_full_replication(ddl, cascade).await?
        }
        Command::CleanReplication => protocol.clean_replication().await?,
    }

    info!(strategy = %kind, "command completed");

    Ok(())
}

fn load_topology(cli: &Cli) -> anyhow::Result<Topology> {
    let topology = match &cli.config_dir {
        Some(dir) => {
            let environment = Environment::load().context("failed to read APP_ENVIRONMENT")?;
            Topology::load_from_dir(dir, environment)
                .with_context(|| format!("failed to load topology from `{}`", dir.display()))?
        }
        None => Topology::load().context("failed to load topology")?,
    };

    Ok(topology)
}

fn render_status(
    statuses: &[NodeStatus],
    links: &[ReplicationLink],
    json: bool,
) -> anyhow::Result<String> {
    if json {
        let report = serde_json::json!({ "nodes": statuses, "links": links });
        return Ok(format!("{}\n", serde_json::to_string_pretty(&report)?));
    }

    let mut out = format!("{:<16} {:>6}  STATE\n", "NODE", "PORT");
    for status in statuses {
        out.push_str(&format!(
            "{:<16} {:>6}  {}\n",
            status.node, status.port, status.state
        ));
    }

    if !links.is_empty() {
        out.push_str("\nLINKS\n");
        for link in links {
            out.push_str(&format!(
                "{} <- {} ({} / {})\n",
                link.target, link.source, link.subscription, link.publication
            ));
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use topology::lifecycle::NodeState;

    use super::*;

    fn sample() -> (Vec<NodeStatus>, Vec<ReplicationLink>) {
        let statuses = vec![
            NodeStatus {
                node: "master".to_string(),
                port: 5432,
                state: NodeState::Running,
            },
            NodeStatus {
                node: "replica1".to_string(),
                port: 5433,
                state: NodeState::Stopped,
            },
        ];
        let links = vec![ReplicationLink {
            subscription: "sub_replica1".to_string(),
            publication: "pub_master".to_string(),
            source: "master".to_string(),
            target: "replica1".to_string(),
        }];

        (statuses, links)
    }

    #[test]
    fn text_status_lists_nodes_then_links() {
        let (statuses, links) = sample();

        let out = render_status(&statuses, &links, false).unwrap();

        let lines: Vec<&str> = out.lines().collect();
        assert!(lines[1].starts_with("master") && lines[1].ends_with("running"));
        assert!(lines[2].ends_with("stopped"));
        assert_eq!(lines.last(), Some(&"replica1 <- master (sub_replica1 / pub_master)"));
    }

    #[test]
    fn json_status_carries_nodes_and_links() {
        let (statuses, links) = sample();

        let out = render_status(&statuses, &links, true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();

        assert_eq!(value["nodes"][1]["state"], "stopped");
        assert_eq!(value["links"][0]["subscription"], "sub_replica1");
    }
}
