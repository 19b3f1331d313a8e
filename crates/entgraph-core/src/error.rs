//! Error taxonomy shared by every entgraph crate.
//!
//! Variants are distinguished so callers can pattern-match on cardinality
//! and loading failures (`NotFound`, `NotSingular`, `NotLoaded`) and mask
//! them, while configuration defects (`Config`) always propagate.

use std::fmt;

/// Result alias using the entgraph [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// The primary error type.
#[derive(Debug)]
pub enum Error {
    /// A required field or edge is missing, or a validator rejected a value.
    Validation(ValidationError),
    /// The backend reported a constraint violation.
    Constraint(ConstraintError),
    /// `Only`/`First`-style read matched no row.
    NotFound(NotFoundError),
    /// `Only`-style read matched more than one row.
    NotSingular(NotSingularError),
    /// An edge was accessed without being eager-loaded.
    NotLoaded(NotLoadedError),
    /// A privacy rule denied the operation.
    Privacy(PrivacyError),
    /// Fatal wiring defect in the schema graph or pipelines.
    Config(ConfigError),
    /// Driver-level failure.
    Query(QueryError),
    /// Misuse by the caller.
    Custom(String),
}

/// A field or edge failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Field or edge name.
    pub name: String,
    /// What went wrong.
    pub cause: String,
}

impl ValidationError {
    pub fn new(name: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cause: cause.into(),
        }
    }

    /// Missing required field.
    pub fn missing_field(type_name: &str, field: &str) -> Self {
        Self::new(
            field,
            format!("missing required field \"{type_name}.{field}\""),
        )
    }

    /// Missing required edge.
    pub fn missing_edge(type_name: &str, edge: &str) -> Self {
        Self::new(edge, format!("missing required edge \"{type_name}.{edge}\""))
    }
}

/// A backend constraint violation, wrapping the original driver error.
#[derive(Debug)]
pub struct ConstraintError {
    pub message: String,
    pub source: Option<Box<Error>>,
}

impl ConstraintError {
    /// Wrap a backend error that was recognised as a constraint violation.
    pub fn wrap(err: Error) -> Self {
        Self {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotFoundError {
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotSingularError {
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotLoadedError {
    pub edge: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivacyError {
    pub reason: String,
}

/// Kind of configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// A type, field or edge name does not exist in the graph.
    Unknown,
    /// A relation targets a type without an identifier field.
    MissingIdentifier,
    /// An edge and its inverse disagree.
    InverseMismatch,
    /// Invalid schema declaration.
    InvalidSchema,
    /// A hook or interceptor returned an unusable mutator/querier result.
    Pipeline,
    /// An eager-load read back a foreign key with no matching parent.
    UnexpectedForeignKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub kind: ConfigErrorKind,
    pub message: String,
}

/// Kind of driver error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Uniqueness, foreign key or check constraint violation.
    Constraint,
    /// Malformed statement.
    Syntax,
    /// Any other execution failure.
    Execution,
    /// Operation cancelled.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub message: String,
}

impl Error {
    /// Shorthand for a configuration error.
    pub fn config(kind: ConfigErrorKind, message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            kind,
            message: message.into(),
        })
    }

    /// Shorthand for a validation error.
    pub fn validation(name: impl Into<String>, cause: impl Into<String>) -> Self {
        Error::Validation(ValidationError::new(name, cause))
    }

    pub fn not_found(label: impl Into<String>) -> Self {
        Error::NotFound(NotFoundError {
            label: label.into(),
        })
    }

    pub fn not_singular(label: impl Into<String>) -> Self {
        Error::NotSingular(NotSingularError {
            label: label.into(),
        })
    }

    pub fn not_loaded(edge: impl Into<String>) -> Self {
        Error::NotLoaded(NotLoadedError { edge: edge.into() })
    }

    pub fn query(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Error::Query(QueryError {
            kind,
            message: message.into(),
        })
    }

    /// Wrap `self` into `Error::Constraint` when the backend reported a
    /// constraint violation; otherwise return it unchanged.
    #[must_use]
    pub fn into_constraint_if_violation(self) -> Self {
        if is_constraint_violation(&self) {
            Error::Constraint(ConstraintError::wrap(self))
        } else {
            self
        }
    }
}

/// Inspect a backend error for a constraint violation.
///
/// Drivers that classify errors set `QueryErrorKind::Constraint`; for the
/// rest the message is matched against the wording used by SQLite,
/// PostgreSQL and MySQL.
pub fn is_constraint_violation(err: &Error) -> bool {
    const MARKERS: &[&str] = &[
        "UNIQUE constraint failed",
        "FOREIGN KEY constraint failed",
        "CHECK constraint failed",
        "violates unique constraint",
        "violates foreign key constraint",
        "violates check constraint",
        "Duplicate entry",
        "Cannot add or update a child row",
    ];
    match err {
        Error::Query(q) => {
            q.kind == QueryErrorKind::Constraint || MARKERS.iter().any(|m| q.message.contains(m))
        }
        Error::Constraint(_) => true,
        _ => false,
    }
}

#[must_use]
pub fn is_not_found(err: &Error) -> bool {
    matches!(err, Error::NotFound(_))
}

#[must_use]
pub fn is_not_singular(err: &Error) -> bool {
    matches!(err, Error::NotSingular(_))
}

#[must_use]
pub fn is_not_loaded(err: &Error) -> bool {
    matches!(err, Error::NotLoaded(_))
}

#[must_use]
pub fn is_validation_error(err: &Error) -> bool {
    matches!(err, Error::Validation(_))
}

#[must_use]
pub fn is_constraint_error(err: &Error) -> bool {
    matches!(err, Error::Constraint(_))
}

/// Drop a `NotFound` error, keeping every other error.
pub fn mask_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(err) if is_not_found(&err) => Ok(()),
        other => other,
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(e) => write!(f, "validation error: {}", e.cause),
            Error::Constraint(e) => write!(f, "constraint failed: {}", e.message),
            Error::NotFound(e) => write!(f, "{} not found", e.label),
            Error::NotSingular(e) => write!(f, "{} not singular", e.label),
            Error::NotLoaded(e) => write!(f, "{} edge was not loaded", e.edge),
            Error::Privacy(e) => write!(f, "privacy denied: {}", e.reason),
            Error::Config(e) => write!(f, "configuration error ({:?}): {}", e.kind, e.message),
            Error::Query(e) => write!(f, "query error ({:?}): {}", e.kind, e.message),
            Error::Custom(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Constraint(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.cause)
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constraint_detection_by_kind_and_message() {
        let by_kind = Error::query(QueryErrorKind::Constraint, "boom");
        let by_message = Error::query(
            QueryErrorKind::Execution,
            "UNIQUE constraint failed: users.name",
        );
        let other = Error::query(QueryErrorKind::Syntax, "near SELECT");
        assert!(is_constraint_violation(&by_kind));
        assert!(is_constraint_violation(&by_message));
        assert!(!is_constraint_violation(&other));
    }

    #[test]
    fn test_into_constraint_wraps_source() {
        let err = Error::query(QueryErrorKind::Constraint, "duplicate").into_constraint_if_violation();
        assert!(is_constraint_error(&err));
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("query error (Constraint): duplicate"));
    }

    #[test]
    fn test_mask_not_found() {
        assert!(mask_not_found(Err(Error::not_found("user"))).is_ok());
        assert!(mask_not_found(Err(Error::not_singular("user"))).is_err());
    }

    #[test]
    fn test_validation_display() {
        let err = Error::from(ValidationError::missing_field("User", "name"));
        assert_eq!(
            err.to_string(),
            "validation error: missing required field \"User.name\""
        );
    }
}
