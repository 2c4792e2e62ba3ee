//! Error taxonomy for graph upserts and eager fetches

use crate::relation::ParseError;

/// Errors surfaced by the engine
///
/// `Parse` and `Validation` are always raised before any storage mutation.
/// The remaining variants come out of a storage session and cause the
/// surrounding transaction to be rolled back.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphError {
    /// Malformed relation expression
    Parse(ParseError),
    /// Unknown relation/attribute, duplicate key in one array, bad value type
    Validation(String),
    /// A referenced primary key does not exist in storage
    NotFound {
        entity: String,
        id: i64,
    },
    /// Uniqueness or foreign-key violation reported by storage (message verbatim)
    Constraint(String),
    /// Storage reported a conflicting concurrent writer
    ConcurrentModification(String),
    /// Any other storage failure (connection lost, decode error, ...)
    Storage(String),
}

pub type GraphResult<T> = Result<T, GraphError>;

impl GraphError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(entity: impl Into<String>, id: i64) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id,
        }
    }

    /// Short machine-readable name for the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse(_) => "parse",
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Constraint(_) => "constraint",
            Self::ConcurrentModification(_) => "concurrent_modification",
            Self::Storage(_) => "storage",
        }
    }
}

impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(err) => write!(f, "invalid relation expression {}", err),
            Self::Validation(message) => write!(f, "validation failed: {}", message),
            Self::NotFound { entity, id } => write!(f, "{} with id {} not found", entity, id),
            Self::Constraint(message) => write!(f, "constraint violation: {}", message),
            Self::ConcurrentModification(message) => {
                write!(f, "concurrent modification: {}", message)
            }
            Self::Storage(message) => write!(f, "storage error: {}", message),
        }
    }
}

impl std::error::Error for GraphError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parse(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ParseError> for GraphError {
    fn from(err: ParseError) -> Self {
        Self::Parse(err)
    }
}

/// SQLite primary result codes for a locked database
const SQLITE_BUSY: &str = "5";
const SQLITE_LOCKED: &str = "6";

impl From<sqlx::Error> for GraphError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::Storage("expected row was not returned".to_string()),
            sqlx::Error::Database(db) => {
                use sqlx::error::ErrorKind;

                match db.kind() {
                    ErrorKind::UniqueViolation
                    | ErrorKind::ForeignKeyViolation
                    | ErrorKind::NotNullViolation
                    | ErrorKind::CheckViolation => Self::Constraint(db.message().to_string()),
                    _ => {
                        // Extended result codes keep the primary code in the low byte
                        let primary = db
                            .code()
                            .and_then(|code| code.parse::<u32>().ok())
                            .map(|code| (code & 0xff).to_string());
                        match primary.as_deref() {
                            Some(SQLITE_BUSY) | Some(SQLITE_LOCKED) => {
                                Self::ConcurrentModification(db.message().to_string())
                            }
                            _ => Self::Storage(db.message().to_string()),
                        }
                    }
                }
            }
            other => Self::Storage(other.to_string()),
        }
    }
}
