use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TempoError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Alarm time must be in the future (target {target}, now {now})")]
    InvalidAlarmTime { target: f64, now: f64 },

    #[error("Missing resource: {}", .0.display())]
    MissingResource(PathBuf),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Schedule error: {0}")]
    Schedule(String),
}

impl From<std::io::Error> for TempoError {
    fn from(e: std::io::Error) -> Self {
        TempoError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for TempoError {
    fn from(e: serde_json::Error) -> Self {
        TempoError::Persistence(e.to_string())
    }
}

impl From<csv::Error> for TempoError {
    fn from(e: csv::Error) -> Self {
        TempoError::Persistence(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TempoError>;
