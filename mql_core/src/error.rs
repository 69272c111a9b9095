use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PumpError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid state: {0}")]
    State(String),
    #[error("calibration error: {0}")]
    Calibration(String),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
