//! Error types and result definitions for topology operations.
//!
//! [`TopologyError`] carries a classification, a static description, optional dynamic detail and
//! the originating error, together with the call site and a backtrace captured where the error was
//! raised. Several errors can be aggregated into one, which cluster-wide operations use to report every
//! failing node at once.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::Location;
use std::sync::Arc;

use config::LoadConfigError;
use config::shared::ValidationError;
use postgres::ExecutorError;

/// Result type used across the crate.
pub type TopologyResult<T> = Result<T, TopologyError>;

#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Error raised by the topology core.
#[derive(Debug, Clone)]
pub struct TopologyError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    Many {
        errors: Vec<TopologyError>,
        location: &'static Location<'static>,
    },
}

/// Classification of a [`TopologyError`].
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Configuration
    ConfigError,
    NodeNotFound,

    // Execution
    ProcessFailed,
    ConnectionFailed,
    SqlExecutionFailed,

    // Replication
    ReplicationTimeout,
    MissingPublication,

    // State
    InvalidState,

    IoError,
    Unknown,
}

impl TopologyError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For aggregated errors, returns the kind of the first error or [`ErrorKind::Unknown`] when
    /// there is none.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every [`ErrorKind`] contained in this error, flattened.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the dynamic detail, for aggregates the first one available.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches the originating error. Has no effect on aggregated errors.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    /// Returns the [`ExecutorError`] this error was converted from, if any.
    pub fn executor_error(&self) -> Option<&ExecutorError> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .and_then(|source| source.downcast_ref::<ExecutorError>()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Whether a statement failed because the object it creates already exists.
    pub fn is_duplicate_object(&self) -> bool {
        self.executor_error()
            .is_some_and(ExecutorError::is_duplicate_object)
    }

    /// Whether a statement failed because the object it refers to does not exist.
    pub fn is_undefined_object(&self) -> bool {
        self.executor_error()
            .is_some_and(ExecutorError::is_undefined_object)
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        TopologyError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl PartialEq for TopologyError {
    fn eq(&self, other: &TopologyError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (
                ErrorRepr::Many {
                    errors: errors_a, ..
                },
                ErrorRepr::Many {
                    errors: errors_b, ..
                },
            ) => {
                errors_a.len() == errors_b.len()
                    && errors_a.iter().zip(errors_b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl Hash for TopologyError {
    /// Hashes only the kind and the static description so that repeated occurrences of the same
    /// failure group together regardless of detail and call site.
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.repr).hash(state);
        match &self.repr {
            ErrorRepr::Single(payload) => {
                payload.kind.hash(state);
                payload.description.hash(state);
            }
            ErrorRepr::Many { errors, .. } => {
                errors.len().hash(state);
                for error in errors {
                    error.hash(state);
                }
            }
        }
    }
}

impl fmt::Display for TopologyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                write_block("Detail", payload.detail.as_deref(), f)?;
                let backtrace = payload.backtrace.to_string();
                if !backtrace.trim().is_empty() {
                    write_block("Backtrace", Some(&backtrace), f)?;
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if errors.is_empty() {
                    write!(f, "\n  (no inner errors provided)")?;
                }
                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    match lines.next() {
                        Some(first_line) => write!(f, "\n  {}. {}", index + 1, first_line)?,
                        None => write!(f, "\n  {}.", index + 1)?,
                    }
                    for line in lines {
                        if line.is_empty() {
                            write!(f, "\n     ")?;
                        } else {
                            write!(f, "\n     {line}")?;
                        }
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for TopologyError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

/// Writes an indented, titled block such as the detail or the backtrace.
fn write_block(title: &str, content: Option<&str>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let Some(content) = content else {
        return Ok(());
    };

    if content.trim().is_empty() {
        return write!(f, "\n  {title}: <empty>");
    }

    write!(f, "\n  {title}:")?;
    for line in content.lines() {
        if line.trim().is_empty() {
            write!(f, "\n    ")?;
        } else {
            write!(f, "\n    {line}")?;
        }
    }

    Ok(())
}

impl From<(ErrorKind, &'static str)> for TopologyError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> TopologyError {
        TopologyError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for TopologyError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> TopologyError {
        TopologyError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates errors. A single error is returned unwrapped.
impl<E> From<Vec<E>> for TopologyError
where
    E: Into<TopologyError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> TopologyError {
        let location = Location::caller();

        let mut errors: Vec<TopologyError> = errors.into_iter().map(Into::into).collect();
        if errors.len() == 1 {
            return errors.remove(0);
        }

        TopologyError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for TopologyError {
    #[track_caller]
    fn from(err: std::io::Error) -> TopologyError {
        let detail = err.to_string();
        TopologyError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Maps executor failures onto the error taxonomy of the core.
impl From<ExecutorError> for TopologyError {
    #[track_caller]
    fn from(err: ExecutorError) -> TopologyError {
        let (kind, description) = match &err {
            ExecutorError::Connection { .. } => {
                (ErrorKind::ConnectionFailed, "Could not connect to node")
            }
            ExecutorError::Tls { .. } => (ErrorKind::ConfigError, "Invalid TLS configuration"),
            ExecutorError::SqlExecution { .. } => {
                (ErrorKind::SqlExecutionFailed, "Statement execution failed")
            }
            ExecutorError::Process { .. } => (ErrorKind::ProcessFailed, "Command failed"),
            ExecutorError::Spawn { .. } => (ErrorKind::ProcessFailed, "Command could not be started"),
            ExecutorError::Io(_) => (ErrorKind::IoError, "I/O operation failed"),
        };

        let detail = err.to_string();
        TopologyError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<LoadConfigError> for TopologyError {
    #[track_caller]
    fn from(err: LoadConfigError) -> TopologyError {
        let detail = err.to_string();
        TopologyError::from_components(
            ErrorKind::ConfigError,
            Cow::Borrowed("Configuration could not be loaded"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<ValidationError> for TopologyError {
    #[track_caller]
    fn from(err: ValidationError) -> TopologyError {
        let detail = err.to_string();
        TopologyError::from_components(
            ErrorKind::ConfigError,
            Cow::Borrowed("Configuration is invalid"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bail, topology_error};

    #[test]
    fn single_error_renders_kind_description_and_detail() {
        let err = topology_error!(
            ErrorKind::NodeNotFound,
            "Node is not part of the topology",
            "replica9"
        );

        let rendered = err.to_string();
        assert!(rendered.starts_with("[NodeNotFound] Node is not part of the topology @ "));
        assert!(rendered.contains("\n  Detail:\n    replica9"));
        assert_eq!(err.detail(), Some("replica9"));
    }

    #[test]
    fn aggregated_errors_expose_every_kind() {
        let err = TopologyError::from(vec![
            topology_error!(ErrorKind::ProcessFailed, "Command failed"),
            topology_error!(ErrorKind::ReplicationTimeout, "Replication did not catch up"),
        ]);

        assert_eq!(err.kind(), ErrorKind::ProcessFailed);
        assert_eq!(
            err.kinds(),
            vec![ErrorKind::ProcessFailed, ErrorKind::ReplicationTimeout]
        );
        assert!(err.to_string().starts_with("[Many] 2 errors aggregated @ "));
    }

    #[test]
    fn single_element_vector_is_not_wrapped() {
        let err = TopologyError::from(vec![topology_error!(
            ErrorKind::InvalidState,
            "Node is not running"
        )]);

        assert_eq!(err.kinds(), vec![ErrorKind::InvalidState]);
        assert!(err.backtrace().is_some());
    }

    #[test]
    fn executor_errors_keep_their_classification() {
        let err = TopologyError::from(ExecutorError::Process {
            argv: vec!["pg_ctl".to_string(), "start".to_string()],
            exit_code: Some(1),
        });

        assert_eq!(err.kind(), ErrorKind::ProcessFailed);
        assert!(err.executor_error().is_some());
        assert!(!err.is_duplicate_object());
        assert_eq!(err.detail(), Some("command `pg_ctl start` exited with exit code 1"));
    }

    #[test]
    fn validation_errors_are_config_errors() {
        let err = TopologyError::from(ValidationError::MissingMaster);

        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[test]
    fn bail_returns_early() {
        fn fails() -> TopologyResult<()> {
            bail!(ErrorKind::MissingPublication, "Publication is missing", detail = "pub_master");
        }

        let err = fails().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingPublication);
        assert_eq!(err.detail(), Some("pub_master"));
    }
}
