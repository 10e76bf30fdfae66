use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndicatorError {
    #[error("insufficient price history to classify a signal")]
    InsufficientData,
}
