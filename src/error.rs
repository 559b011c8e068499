use thiserror::Error;

/// Engine error taxonomy. Validation-class errors keep their user-actionable
/// message all the way to the caller; persistence failures are logged at the
/// operation boundary and surfaced generically.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid query parameters: {0}")]
    Validation(String),

    #[error("invalid filter: {0}")]
    Translation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("no changes to update")]
    NoChanges,

    #[error("a query {0} is required")]
    MissingParameter(&'static str),

    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

impl QueryError {
    pub fn validation(msg: impl Into<String>) -> Self {
        QueryError::Validation(msg.into())
    }

    pub fn translation(msg: impl Into<String>) -> Self {
        QueryError::Translation(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        QueryError::NotFound(what.into())
    }

    /// True for errors callers can fix by changing the request.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, QueryError::Persistence(_))
    }
}

pub type QueryResult<T> = Result<T, QueryError>;
