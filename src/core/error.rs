use thiserror::Error;

/// Reason a single entity was rejected by the remote store during a save.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityFailure {
    pub type_name: String,
    pub key: String,
    pub message: String,
}

impl std::fmt::Display for EntityFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({}): {}", self.type_name, self.key, self.message)
    }
}

#[derive(Error, Debug)]
pub enum TrackError {
    #[error("Entity type '{0}' not found")]
    UnknownEntityType(String),

    #[error("Entity type '{0}' already exists")]
    DuplicateEntityType(String),

    #[error("Property '{0}' already exists on entity type '{1}'")]
    DuplicateProperty(String, String),

    #[error("Property '{0}' is not declared on entity type '{1}'")]
    UndeclaredProperty(String, String),

    #[error("Cannot generate a temporary key for multi-part key of entity type '{0}'")]
    MultiPartKey(String),

    #[error("Cannot generate a temporary key for a property of data type {0}")]
    UnsupportedKeyType(String),

    #[error("An entity with key {0} is already attached")]
    DuplicateKey(String),

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Invalid entity state: {0}")]
    InvalidState(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Save failed: {}", format_failures(.reasons))]
    SaveFailed { reasons: Vec<EntityFailure> },

    #[error("No data service configured for this manager")]
    NoDataService,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(String),
}

fn format_failures(reasons: &[EntityFailure]) -> String {
    if reasons.is_empty() {
        return "unknown reason".to_string();
    }
    reasons
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl TrackError {
    /// Errors raised immediately by the call that caused them.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownEntityType(_)
                | Self::DuplicateEntityType(_)
                | Self::DuplicateProperty(..)
                | Self::UndeclaredProperty(..)
                | Self::MultiPartKey(_)
                | Self::UnsupportedKeyType(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, TrackError>;

impl From<serde_json::Error> for TrackError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for TrackError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for TrackError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for TrackError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
