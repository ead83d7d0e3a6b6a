use std::path::PathBuf;

use async_trait::async_trait;
use config::shared::PgConnectionConfig;

use crate::error::ExecutorError;

/// How a single statement is executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatementOptions {
    /// Run outside of a transaction block.
    ///
    /// Required for statements such as `CREATE SUBSCRIPTION` which refuse to run inside one.
    pub autocommit: bool,
    /// Return the rows produced by the statement.
    pub fetch: bool,
    /// The statement embeds credentials and is never logged or reported verbatim.
    pub sensitive: bool,
}

impl StatementOptions {
    /// Statement committed in its own transaction, no rows returned.
    pub fn execute() -> Self {
        Self::default()
    }

    /// Statement run outside of a transaction block, no rows returned.
    pub fn autocommit() -> Self {
        Self {
            autocommit: true,
            ..Self::default()
        }
    }

    /// Query whose rows are returned.
    pub fn fetch() -> Self {
        Self {
            fetch: true,
            ..Self::default()
        }
    }

    /// Marks the statement as carrying credentials, such as a connection string with a password.
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    /// Text logged and reported in place of `statement`.
    pub fn loggable<'a>(&self, statement: &'a str) -> &'a str {
        if self.sensitive {
            REDACTED_STATEMENT
        } else {
            statement
        }
    }
}

/// Placeholder logged instead of a statement carrying credentials.
pub const REDACTED_STATEMENT: &str = "<statement redacted: contains credentials>";

/// One row returned by a statement, in text format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlRow {
    columns: Vec<String>,
    values: Vec<Option<String>>,
}

impl SqlRow {
    pub fn new(columns: Vec<String>, values: Vec<Option<String>>) -> Self {
        Self { columns, values }
    }

    /// Builds a row from `(column, value)` pairs, mostly useful for scripted results.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, Option<&'a str>)>) -> Self {
        let (columns, values) = pairs
            .into_iter()
            .map(|(column, value)| (column.to_string(), value.map(str::to_string)))
            .unzip();

        Self { columns, values }
    }

    /// Returns the value of the named column. `None` when the column is absent or `NULL`.
    pub fn get(&self, column: &str) -> Option<&str> {
        let index = self.columns.iter().position(|name| name == column)?;
        self.get_index(index)
    }

    /// Returns the value at `index`. `None` when out of range or `NULL`.
    pub fn get_index(&self, index: usize) -> Option<&str> {
        self.values.get(index).and_then(|value| value.as_deref())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Option<String>] {
        &self.values
    }
}

/// An external process run as the database-owning operating-system account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrivilegedCommand {
    pub argv: Vec<String>,
    /// Extra environment variables. Only their names are ever logged.
    pub envs: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
    /// Data written to the process' standard input.
    pub stdin: Option<String>,
    /// Discard standard output and standard error.
    pub suppress_output: bool,
}

impl PrivilegedCommand {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn quiet(mut self) -> Self {
        self.suppress_output = true;
        self
    }

    /// Name of the program, the first element of `argv`.
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    /// The command line as logged.
    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

/// The two primitives through which the orchestrator acts on nodes.
///
/// Implementations never retry; callers decide whether a failure is fatal.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Opens a connection to `node`, executes `statement` and closes the connection.
    ///
    /// Unless [`StatementOptions::autocommit`] is set the statement runs inside its own
    /// transaction which is committed on success. Rows are returned only when
    /// [`StatementOptions::fetch`] is set.
    async fn run_sql(
        &self,
        node: &str,
        connection: &PgConnectionConfig,
        statement: &str,
        options: StatementOptions,
    ) -> Result<Option<Vec<SqlRow>>, ExecutorError>;

    /// Runs `command` to completion, failing with [`ExecutorError::Process`] on a non-zero exit.
    async fn run_privileged(&self, command: &PrivilegedCommand) -> Result<(), ExecutorError>;
}
