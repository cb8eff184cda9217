use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("acquisition error: {0}")]
    Acquire(#[from] crate::acquire::AcquireError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
