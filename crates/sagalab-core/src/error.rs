use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("unknown write concern '{0}' (expected ack-one, ack-majority or ack-all)")]
    UnknownWriteConcern(String),

    #[error("unknown read concern '{0}' (expected local, majority or linearizable)")]
    UnknownReadConcern(String),

    #[error("unknown store error kind '{0}'")]
    UnknownErrorKind(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
