use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShelfError {
    #[error("Type mismatch: '{found}' cannot be saved in collection '{collection}' ({expected})")]
    TypeMismatch {
        collection: String,
        expected: String,
        found: String,
    },

    #[error("Collection '{0}' has a typed schema but no usable identity field")]
    IdentityFieldMissing(String),

    #[error("Null argument: {0}")]
    NullArgument(&'static str),

    #[error("Malformed filter '{filter}': {reason}")]
    MalformedFilter { filter: String, reason: String },

    #[error("Malformed sort '{sort}': {reason}")]
    MalformedSort { sort: String, reason: String },

    #[error("Invalid collection name: '{0}'")]
    InvalidCollectionName(String),

    #[error("Field '{field}' is already in use in collection '{collection}'")]
    FieldConflict { collection: String, field: String },

    #[error("Type '{0}' is not registered with any collection")]
    UnknownType(String),

    #[error("Watchers are disabled for this store")]
    WatchersDisabled,

    #[error("Store is closed")]
    Closed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ShelfError>;

impl ShelfError {
    pub(crate) fn malformed_filter(filter: &str, reason: impl Into<String>) -> Self {
        ShelfError::MalformedFilter {
            filter: filter.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed_sort(sort: &str, reason: impl Into<String>) -> Self {
        ShelfError::MalformedSort {
            sort: sort.to_string(),
            reason: reason.into(),
        }
    }
}
