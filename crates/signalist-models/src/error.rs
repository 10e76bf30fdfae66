use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("{ticker}: bar dated {next} does not follow {previous}")]
    UnorderedSeries {
        ticker: String,
        previous: NaiveDate,
        next: NaiveDate,
    },

    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    #[error("invalid backend reference: {0}")]
    InvalidBackendRef(String),
}
