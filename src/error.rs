use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("model hub error: {0}")]
    Hub(#[from] hf_hub::api::sync::ApiError),

    #[error("encoder error: {0}")]
    Encoder(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    #[error("dataset not found: {0}")]
    DatasetNotFound(PathBuf),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error(
        "invalid answer strategy '{0}' (expected last, cycle, random or most_similar)"
    )]
    InvalidStrategy(String),

    #[error("no questions found for training")]
    EmptyTrainingSet,

    #[error("pipeline index not found at {path}: missing {missing}")]
    IndexNotFound { path: PathBuf, missing: &'static str },
}
