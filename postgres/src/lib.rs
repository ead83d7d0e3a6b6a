//! Node Executor: the only channel through which the orchestrator touches a live node.
//!
//! Two primitives are exposed through [`NodeExecutor`]: running one SQL statement against a
//! node and running a privileged process as the database-owning operating-system account.
//! Statement text is produced by the pure functions in [`sql`].

mod error;
mod executor;
mod pg;
mod process;
pub mod sql;

pub use error::{DriverError, ExecutorError};
pub use executor::{
    NodeExecutor, PrivilegedCommand, REDACTED_STATEMENT, SqlRow, StatementOptions,
};
pub use pg::PgNodeExecutor;
pub use tokio_postgres::error::SqlState;
