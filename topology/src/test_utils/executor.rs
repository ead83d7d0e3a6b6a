use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use config::shared::PgConnectionConfig;
use pg_escape::quote_identifier;
use postgres::{
    ExecutorError, NodeExecutor, PrivilegedCommand, SqlRow, SqlState, StatementOptions,
};
use tokio::sync::Mutex;

/// One statement received by a [`FakeExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedStatement {
    pub node: String,
    pub statement: String,
    pub options: StatementOptions,
}

#[derive(Debug, Clone)]
struct SqlFailure {
    node: Option<String>,
    pattern: String,
    sql_state: Option<SqlState>,
}

#[derive(Debug, Clone)]
struct CommandFailure {
    pattern: String,
    exit_code: Option<i32>,
}

/// Objects that exist on one node, as far as the statements seen so far tell.
#[derive(Debug, Default)]
struct NodeObjects {
    publications: BTreeSet<String>,
    subscriptions: BTreeSet<String>,
    tables: BTreeSet<String>,
    /// Name of the pglogical node the database is configured as, if any.
    pglogical_node: Option<String>,
    replication_sets: BTreeSet<String>,
    pglogical_subscriptions: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct Inner {
    statements: Vec<RecordedStatement>,
    commands: Vec<PrivilegedCommand>,
    sql_failures: Vec<SqlFailure>,
    command_failures: Vec<CommandFailure>,
    responses: Vec<(String, Vec<SqlRow>)>,
    objects: HashMap<String, NodeObjects>,
    dirs: HashSet<PathBuf>,
    initialized: HashSet<PathBuf>,
    running: HashSet<PathBuf>,
    files: HashMap<PathBuf, String>,
    /// `pg_easy_replicate` groups currently syncing.
    synced_groups: BTreeSet<String>,
}

/// In-memory [`NodeExecutor`] recording every statement and command it receives.
///
/// It models just enough of a cluster for the orchestration logic to run end to end: data
/// directories created by `initdb`, servers started and stopped by `pg_ctl`, and the
/// publications, subscriptions, tables and pglogical objects created by statements. As in
/// pglogical, replication sets and subscriptions need a local pglogical node. Failures and query
/// results can be scripted by substring.
#[derive(Debug, Clone, Default)]
pub struct FakeExecutor {
    inner: Arc<Mutex<Inner>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every statement containing `pattern` fail with `sql_state`.
    pub async fn fail_sql(&self, pattern: &str, sql_state: Option<SqlState>) {
        self.inner.lock().await.sql_failures.push(SqlFailure {
            node: None,
            pattern: pattern.to_string(),
            sql_state,
        });
    }

    /// Like [`FakeExecutor::fail_sql`], restricted to statements run on `node`.
    pub async fn fail_sql_on(&self, node: &str, pattern: &str, sql_state: Option<SqlState>) {
        self.inner.lock().await.sql_failures.push(SqlFailure {
            node: Some(node.to_string()),
            pattern: pattern.to_string(),
            sql_state,
        });
    }

    /// Makes every command whose command line contains `pattern` exit with `exit_code`.
    pub async fn fail_command(&self, pattern: &str, exit_code: Option<i32>) {
        self.inner.lock().await.command_failures.push(CommandFailure {
            pattern: pattern.to_string(),
            exit_code,
        });
    }

    /// Returns `rows` for every query containing `pattern`.
    pub async fn respond(&self, pattern: &str, rows: Vec<SqlRow>) {
        self.inner
            .lock()
            .await
            .responses
            .push((pattern.to_string(), rows));
    }

    /// Drops every scripted failure.
    pub async fn clear_failures(&self) {
        let mut inner = self.inner.lock().await;
        inner.sql_failures.clear();
        inner.command_failures.clear();
    }

    /// Forgets the recorded statements and commands, keeping the simulated cluster.
    pub async fn clear_history(&self) {
        let mut inner = self.inner.lock().await;
        inner.statements.clear();
        inner.commands.clear();
    }

    pub async fn statements(&self) -> Vec<RecordedStatement> {
        self.inner.lock().await.statements.clone()
    }

    /// Statement texts run on `node`, in order.
    pub async fn statements_on(&self, node: &str) -> Vec<String> {
        self.inner
            .lock()
            .await
            .statements
            .iter()
            .filter(|recorded| recorded.node == node)
            .map(|recorded| recorded.statement.clone())
            .collect()
    }

    pub async fn commands(&self) -> Vec<PrivilegedCommand> {
        self.inner.lock().await.commands.clone()
    }

    /// Command lines run so far, in order.
    pub async fn command_lines(&self) -> Vec<String> {
        self.inner
            .lock()
            .await
            .commands
            .iter()
            .map(PrivilegedCommand::display)
            .collect()
    }

    pub async fn file(&self, path: &Path) -> Option<String> {
        self.inner.lock().await.files.get(path).cloned()
    }

    pub async fn is_running(&self, data_dir: &Path) -> bool {
        self.inner.lock().await.running.contains(data_dir)
    }

    pub async fn is_initialized(&self, data_dir: &Path) -> bool {
        self.inner.lock().await.initialized.contains(data_dir)
    }

    pub async fn publications(&self, node: &str) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner
            .objects
            .get(node)
            .map(|objects| objects.publications.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn subscriptions(&self, node: &str) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner
            .objects
            .get(node)
            .map(|objects| objects.subscriptions.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn tables(&self, node: &str) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner
            .objects
            .get(node)
            .map(|objects| objects.tables.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Prefix of the subscriptions `pg_easy_replicate` creates, one per group.
const TOOL_SUBSCRIPTION_PREFIX: &str = "pger_subscription_";

fn sql_error(node: &str, statement: &str, sql_state: Option<SqlState>) -> ExecutorError {
    let message = match &sql_state {
        Some(state) => format!("scripted failure ({})", state.code()),
        None => "scripted failure".to_string(),
    };

    ExecutorError::SqlExecution {
        node: node.to_string(),
        statement: statement.to_string(),
        sql_state,
        source: message.into(),
    }
}

/// Single-quoted literals of `statement`, unescaped.
fn literals(statement: &str) -> Vec<String> {
    let mut literals = Vec::new();
    let mut chars = statement.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\'' {
            continue;
        }

        let mut literal = String::new();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    literal.push('\'');
                    continue;
                }
                break;
            }
            literal.push(c);
        }
        literals.push(literal);
    }

    literals
}

/// The object name following `prefix` in `statement`, unquoted.
fn name_after(statement: &str, prefix: &str) -> Option<String> {
    let rest = statement.strip_prefix(prefix)?;
    let name = rest.split_whitespace().next()?;
    Some(name.trim_matches('"').to_string())
}

/// The relation name following `prefix` in `statement`, as quoted by the statement itself.
fn relation_after(statement: &str, prefix: &str) -> Option<String> {
    let rest = statement.strip_prefix(prefix)?;
    rest.split_whitespace().next().map(str::to_string)
}

fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_identifier(schema), quote_identifier(table))
}

fn exists_row(exists: bool) -> Vec<SqlRow> {
    vec![SqlRow::from_pairs([(
        "exists",
        Some(if exists { "t" } else { "f" }),
    )])]
}

impl Inner {
    fn scripted_sql_failure(&self, node: &str, statement: &str) -> Option<ExecutorError> {
        self.sql_failures
            .iter()
            .find(|failure| {
                failure.node.as_deref().is_none_or(|target| target == node)
                    && statement.contains(&failure.pattern)
            })
            .map(|failure| sql_error(node, statement, failure.sql_state.clone()))
    }

    /// Applies the effect of a statement on the simulated objects of `node`.
    fn apply(&mut self, node: &str, statement: &str) -> Result<(), ExecutorError> {
        let objects = self.objects.entry(node.to_string()).or_default();

        if let Some(name) = name_after(statement, "CREATE PUBLICATION ") {
            if !objects.publications.insert(name) {
                return Err(sql_error(node, statement, Some(SqlState::DUPLICATE_OBJECT)));
            }
        } else if let Some(name) = name_after(statement, "DROP PUBLICATION IF EXISTS ") {
            objects.publications.remove(&name);
        } else if let Some(name) = name_after(statement, "CREATE SUBSCRIPTION ") {
            if !objects.subscriptions.insert(name) {
                return Err(sql_error(node, statement, Some(SqlState::DUPLICATE_OBJECT)));
            }
        } else if let Some(name) = name_after(statement, "DROP SUBSCRIPTION IF EXISTS ") {
            objects.subscriptions.remove(&name);
        } else if let Some(name) = name_after(statement, "ALTER SUBSCRIPTION ") {
            if !objects.subscriptions.contains(&name) {
                return Err(sql_error(node, statement, Some(SqlState::UNDEFINED_OBJECT)));
            }
        } else if let Some(relation) = relation_after(statement, "CREATE TABLE IF NOT EXISTS ") {
            objects.tables.insert(relation);
        } else if let Some(relation) = relation_after(statement, "DROP TABLE IF EXISTS ") {
            objects.tables.remove(&relation);
        } else if let Some(schema) = relation_after(statement, "DROP SCHEMA IF EXISTS ") {
            let prefix = format!("{schema}.");
            objects.tables.retain(|table| !table.starts_with(&prefix));
        } else if statement.contains("pglogical.create_node(") {
            if objects.pglogical_node.is_some() {
                return Err(sql_error(
                    node,
                    statement,
                    Some(SqlState::OBJECT_NOT_IN_PREREQUISITE_STATE),
                ));
            }
            objects.pglogical_node = literals(statement).into_iter().next();
        } else if statement.contains("pglogical.drop_node(") {
            if objects.pglogical_node.as_ref() == literals(statement).first() {
                objects.pglogical_node = None;
                objects.replication_sets.clear();
            }
        } else if statement.contains("pglogical.create_replication_set(")
            || statement.contains("pglogical.drop_replication_set(")
            || statement.contains("pglogical.create_subscription(")
        {
            if objects.pglogical_node.is_none() {
                return Err(sql_error(
                    node,
                    statement,
                    Some(SqlState::OBJECT_NOT_IN_PREREQUISITE_STATE),
                ));
            }
            let Some(name) = literals(statement).into_iter().next() else {
                return Ok(());
            };
            if statement.contains("pglogical.create_replication_set(") {
                objects.replication_sets.insert(name);
            } else if statement.contains("pglogical.drop_replication_set(") {
                objects.replication_sets.remove(&name);
            } else {
                objects.pglogical_subscriptions.insert(name);
            }
        } else if statement.contains("pglogical.drop_subscription(") {
            if let Some(subscription) = literals(statement).first() {
                objects.pglogical_subscriptions.remove(subscription);
            }
        }

        Ok(())
    }

    /// Rows the simulated cluster returns for a query on `node`.
    fn query(&self, node: &str, statement: &str) -> Result<Vec<SqlRow>, ExecutorError> {
        if let Some((_, rows)) = self
            .responses
            .iter()
            .find(|(pattern, _)| statement.contains(pattern))
        {
            return Ok(rows.clone());
        }

        let empty = NodeObjects::default();
        let objects = self.objects.get(node).unwrap_or(&empty);
        let values = literals(statement);
        let first = values.first().cloned().unwrap_or_default();

        let rows = if statement.contains("FROM pg_publication WHERE pubname") {
            exists_row(objects.publications.contains(&first))
        } else if statement.contains("FROM pg_subscription WHERE subname") {
            exists_row(objects.subscriptions.contains(&first))
        } else if statement.contains("FROM information_schema.tables") {
            let table = values.get(1).cloned().unwrap_or_default();
            exists_row(objects.tables.contains(&qualified(&first, &table)))
        } else if statement.contains("FROM pglogical.local_node") {
            exists_row(objects.pglogical_node.is_some())
        } else if statement.contains("FROM pglogical.replication_set") {
            exists_row(objects.replication_sets.contains(&first))
        } else if statement.contains("pg_stat_subscription") {
            let subscription = values.last().cloned().unwrap_or_default();
            let tool_group = subscription.strip_prefix(TOOL_SUBSCRIPTION_PREFIX);
            if objects.subscriptions.contains(&subscription)
                || tool_group.is_some_and(|group| self.synced_groups.contains(group))
            {
                vec![SqlRow::from_pairs([
                    ("worker_running", Some("t")),
                    ("pending_tables", Some("0")),
                ])]
            } else {
                vec![]
            }
        } else if statement.contains("pglogical.show_subscription_status") {
            if objects.pglogical_subscriptions.contains(&first) {
                vec![SqlRow::from_pairs([("status", Some("replicating"))])]
            } else {
                vec![]
            }
        } else if statement.starts_with("SELECT pubname FROM pg_publication") {
            objects
                .publications
                .iter()
                .map(|name| SqlRow::from_pairs([("pubname", Some(name.as_str()))]))
                .collect()
        } else if statement.starts_with("SELECT subname FROM pg_subscription") {
            objects
                .subscriptions
                .iter()
                .map(|name| SqlRow::from_pairs([("subname", Some(name.as_str()))]))
                .collect()
        } else if let Some(relation) = relation_after(statement, "SELECT * FROM ") {
            if !objects.tables.contains(&relation) {
                return Err(sql_error(node, statement, Some(SqlState::UNDEFINED_TABLE)));
            }
            vec![]
        } else {
            vec![]
        };

        Ok(rows)
    }

    fn scripted_command_failure(&self, command: &PrivilegedCommand) -> Option<ExecutorError> {
        let line = command.display();
        self.command_failures
            .iter()
            .find(|failure| line.contains(&failure.pattern))
            .map(|failure| process_error(command, failure.exit_code))
    }

    /// Applies the effect of a command on the simulated file system and servers.
    fn spawn(&mut self, command: &PrivilegedCommand) -> Result<(), ExecutorError> {
        let argv: Vec<&str> = command.argv.iter().map(String::as_str).collect();
        let program = Path::new(command.program())
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();

        match (program, argv.as_slice()) {
            ("mkdir", [_, "-p", dir]) => {
                self.dirs.insert(PathBuf::from(dir));
            }
            ("rm", [_, "-rf", dir]) => {
                let dir = Path::new(dir);
                self.dirs.retain(|path| !path.starts_with(dir));
                self.initialized.retain(|path| !path.starts_with(dir));
                self.running.retain(|path| !path.starts_with(dir));
                self.files.retain(|path, _| !path.starts_with(dir));
            }
            ("initdb", [_, "-D", dir]) => {
                let dir = PathBuf::from(dir);
                if !self.dirs.contains(&dir) {
                    return Err(process_error(command, Some(1)));
                }
                self.files.insert(dir.join("postgresql.conf"), String::new());
                self.initialized.insert(dir);
            }
            ("tee", [_, "-a", file]) => {
                let content = self.files.entry(PathBuf::from(file)).or_default();
                content.push_str(command.stdin.as_deref().unwrap_or_default());
            }
            ("test", [_, "-f", file]) => {
                let file = Path::new(file);
                let exists = self.files.contains_key(file)
                    || (file.ends_with("PG_VERSION")
                        && file
                            .parent()
                            .is_some_and(|dir| self.initialized.contains(dir)));
                if !exists {
                    return Err(process_error(command, Some(1)));
                }
            }
            ("pg_ctl", [_, "-D", dir, .., action]) => {
                let dir = PathBuf::from(dir);
                match *action {
                    "start" if self.initialized.contains(&dir) && !self.running.contains(&dir) => {
                        self.running.insert(dir);
                    }
                    "stop" if self.running.contains(&dir) => {
                        self.running.remove(&dir);
                    }
                    "status" if self.running.contains(&dir) => {}
                    "status" => return Err(process_error(command, Some(3))),
                    _ => return Err(process_error(command, Some(1))),
                }
            }
            ("pg_easy_replicate", [_, action, group, ..]) => {
                let group = group.strip_prefix("--group-name=").unwrap_or(*group);
                match *action {
                    "start_sync" => {
                        self.synced_groups.insert(group.to_string());
                    }
                    "stop_sync" | "cleanup" => {
                        self.synced_groups.remove(group);
                    }
                    _ => {}
                }
            }
            _ => {}
        }

        Ok(())
    }
}

fn process_error(command: &PrivilegedCommand, exit_code: Option<i32>) -> ExecutorError {
    ExecutorError::Process {
        argv: command.argv.clone(),
        exit_code,
    }
}

#[async_trait]
impl NodeExecutor for FakeExecutor {
    async fn run_sql(
        &self,
        node: &str,
        _connection: &PgConnectionConfig,
        statement: &str,
        options: StatementOptions,
    ) -> Result<Option<Vec<SqlRow>>, ExecutorError> {
        let mut inner = self.inner.lock().await;
        inner.statements.push(RecordedStatement {
            node: node.to_string(),
            statement: statement.to_string(),
            options,
        });

        if let Some(err) = inner.scripted_sql_failure(node, statement) {
            return Err(err);
        }

        if options.fetch {
            return inner.query(node, statement).map(Some);
        }

        inner.apply(node, statement)?;

        Ok(None)
    }

    async fn run_privileged(&self, command: &PrivilegedCommand) -> Result<(), ExecutorError> {
        let mut inner = self.inner.lock().await;
        inner.commands.push(command.clone());

        if let Some(err) = inner.scripted_command_failure(command) {
            return Err(err);
        }

        inner.spawn(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_are_unescaped() {
        assert_eq!(
            literals("SELECT f('pub_master', 'it''s', ARRAY['replication'])"),
            vec!["pub_master", "it's", "replication"]
        );
    }
}
