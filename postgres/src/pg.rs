use std::io::BufReader;

use async_trait::async_trait;
use config::shared::{IntoConnectOptions, PgConnectionConfig, PrivilegesConfig};
use rustls::ClientConfig;
use tokio_postgres::tls::MakeTlsConnect;
use tokio_postgres::{
    Client, Config, Connection, NoTls, SimpleQueryMessage, SimpleQueryRow, Socket,
};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{debug, warn};

use crate::error::ExecutorError;
use crate::executor::{NodeExecutor, PrivilegedCommand, SqlRow, StatementOptions};
use crate::process;

/// Spawns a background task driving a Postgres connection until it terminates.
fn spawn_postgres_connection<T>(node: String, connection: Connection<Socket, T::Stream>)
where
    T: MakeTlsConnect<Socket>,
    T::Stream: Send + 'static,
{
    // The `Client` owning this connection closes it when dropped, so the handle is not kept.
    tokio::spawn(async move {
        if let Err(err) = connection.await {
            warn!(node = %node, "postgres connection terminated with an error: {err}");
        }
    });
}

/// [`NodeExecutor`] backed by `tokio-postgres` and `tokio::process`.
///
/// Every statement uses a fresh connection which is closed once the statement finishes, so no
/// session state leaks between statements.
#[derive(Debug, Clone)]
pub struct PgNodeExecutor {
    privileges: PrivilegesConfig,
}

impl PgNodeExecutor {
    pub fn new(privileges: PrivilegesConfig) -> Self {
        Self { privileges }
    }

    async fn connect(
        &self,
        node: &str,
        connection: &PgConnectionConfig,
    ) -> Result<Client, ExecutorError> {
        match connection.tls.enabled {
            true => Self::connect_tls(node, connection).await,
            false => Self::connect_no_tls(node, connection).await,
        }
    }

    async fn connect_no_tls(
        node: &str,
        connection: &PgConnectionConfig,
    ) -> Result<Client, ExecutorError> {
        let config: Config = connection.with_db();

        let (client, pg_connection) = config
            .connect(NoTls)
            .await
            .map_err(|err| connection_error(node, connection, err))?;
        spawn_postgres_connection::<NoTls>(node.to_string(), pg_connection);

        Ok(client)
    }

    async fn connect_tls(
        node: &str,
        connection: &PgConnectionConfig,
    ) -> Result<Client, ExecutorError> {
        let config: Config = connection.with_db();

        let mut root_store = rustls::RootCertStore::empty();
        let mut root_certs_reader = BufReader::new(connection.tls.trusted_root_certs.as_bytes());
        for cert in rustls_pemfile::certs(&mut root_certs_reader) {
            let cert = cert.map_err(|err| ExecutorError::Tls {
                node: node.to_string(),
                detail: err.to_string(),
            })?;
            root_store.add(cert).map_err(|err| ExecutorError::Tls {
                node: node.to_string(),
                detail: err.to_string(),
            })?;
        }

        let tls_config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        let (client, pg_connection) = config
            .connect(MakeRustlsConnect::new(tls_config))
            .await
            .map_err(|err| connection_error(node, connection, err))?;
        spawn_postgres_connection::<MakeRustlsConnect>(node.to_string(), pg_connection);

        Ok(client)
    }
}

#[async_trait]
impl NodeExecutor for PgNodeExecutor {
    async fn run_sql(
        &self,
        node: &str,
        connection: &PgConnectionConfig,
        statement: &str,
        options: StatementOptions,
    ) -> Result<Option<Vec<SqlRow>>, ExecutorError> {
        let mut client = self.connect(node, connection).await?;
        let loggable = options.loggable(statement);
        debug!(node, statement = loggable, autocommit = options.autocommit, "executing statement");

        let sql_error = |err: tokio_postgres::Error| ExecutorError::SqlExecution {
            node: node.to_string(),
            statement: loggable.to_string(),
            sql_state: err.code().cloned(),
            source: Box::new(err),
        };

        let messages = if options.autocommit {
            client.simple_query(statement).await.map_err(sql_error)?
        } else {
            let transaction = client.transaction().await.map_err(sql_error)?;
            let messages = transaction
                .simple_query(statement)
                .await
                .map_err(sql_error)?;
            transaction.commit().await.map_err(sql_error)?;
            messages
        };

        if !options.fetch {
            return Ok(None);
        }

        let rows = messages
            .iter()
            .filter_map(|message| match message {
                SimpleQueryMessage::Row(row) => Some(to_sql_row(row)),
                _ => None,
            })
            .collect();

        Ok(Some(rows))
    }

    async fn run_privileged(&self, command: &PrivilegedCommand) -> Result<(), ExecutorError> {
        process::run(&self.privileges, command).await
    }
}

fn to_sql_row(row: &SimpleQueryRow) -> SqlRow {
    let columns = row
        .columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect();
    let values = (0..row.len())
        .map(|index| row.get(index).map(str::to_string))
        .collect();

    SqlRow::new(columns, values)
}

fn connection_error(
    node: &str,
    connection: &PgConnectionConfig,
    err: tokio_postgres::Error,
) -> ExecutorError {
    ExecutorError::Connection {
        node: node.to_string(),
        conninfo: connection.to_masked_conninfo(),
        source: Box::new(err),
    }
}
