use std::io;

use thiserror::Error;
use tokio_postgres::error::SqlState;

/// Boxed driver error kept as the source of [`ExecutorError::SqlExecution`].
pub type DriverError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by a [`crate::NodeExecutor`].
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The node could not be reached.
    #[error("failed to connect to node `{node}` ({conninfo}): {source}")]
    Connection {
        node: String,
        /// Connection string with the password masked.
        conninfo: String,
        #[source]
        source: DriverError,
    },

    /// The trusted root certificates of a node could not be loaded.
    #[error("invalid trusted root certificates for node `{node}`: {detail}")]
    Tls { node: String, detail: String },

    /// A statement was rejected by the node.
    #[error("statement failed on node `{node}`: {statement}: {source}")]
    SqlExecution {
        node: String,
        statement: String,
        sql_state: Option<SqlState>,
        #[source]
        source: DriverError,
    },

    /// A privileged process exited unsuccessfully.
    #[error("command `{}` exited with {}", .argv.join(" "), describe_exit(.exit_code))]
    Process {
        argv: Vec<String>,
        exit_code: Option<i32>,
    },

    /// A privileged process could not be started.
    #[error("failed to spawn `{}`: {source}", .argv.join(" "))]
    Spawn {
        argv: Vec<String>,
        #[source]
        source: io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl ExecutorError {
    /// Returns the `SqlState` reported by the node, if any.
    pub fn sql_state(&self) -> Option<&SqlState> {
        match self {
            ExecutorError::SqlExecution { sql_state, .. } => sql_state.as_ref(),
            _ => None,
        }
    }

    /// Whether the statement failed because the object it creates already exists.
    pub fn is_duplicate_object(&self) -> bool {
        matches!(
            self.sql_state(),
            Some(state) if *state == SqlState::DUPLICATE_OBJECT
                || *state == SqlState::DUPLICATE_SCHEMA
                || *state == SqlState::DUPLICATE_TABLE
                || *state == SqlState::DUPLICATE_COLUMN
                || *state == SqlState::UNIQUE_VIOLATION
        )
    }

    /// Whether the statement failed because the object it refers to does not exist.
    pub fn is_undefined_object(&self) -> bool {
        matches!(
            self.sql_state(),
            Some(state) if *state == SqlState::UNDEFINED_OBJECT
                || *state == SqlState::UNDEFINED_TABLE
                || *state == SqlState::INVALID_SCHEMA_NAME
                || *state == SqlState::UNDEFINED_COLUMN
        )
    }

    /// Exit code of a failed process, `None` for any other error or a signal.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecutorError::Process { exit_code, .. } => *exit_code,
            _ => None,
        }
    }
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit code {code}"),
        None => "a signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql_error(state: SqlState) -> ExecutorError {
        ExecutorError::SqlExecution {
            node: "master".to_string(),
            statement: "CREATE PUBLICATION pub_master".to_string(),
            sql_state: Some(state),
            source: io::Error::other("boom").into(),
        }
    }

    #[test]
    fn classifies_tolerated_sql_states() {
        assert!(sql_error(SqlState::DUPLICATE_OBJECT).is_duplicate_object());
        assert!(sql_error(SqlState::UNDEFINED_OBJECT).is_undefined_object());
        assert!(!sql_error(SqlState::SYNTAX_ERROR).is_duplicate_object());
        assert!(!sql_error(SqlState::SYNTAX_ERROR).is_undefined_object());
    }

    #[test]
    fn process_error_renders_argv_and_exit() {
        let err = ExecutorError::Process {
            argv: vec!["pg_ctl".to_string(), "start".to_string()],
            exit_code: Some(1),
        };

        assert_eq!(err.to_string(), "command `pg_ctl start` exited with exit code 1");
        assert_eq!(err.exit_code(), Some(1));
    }
}
