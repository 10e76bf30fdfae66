//! Deterministic technical indicators and the signal classifier.

pub mod classifier;
pub mod ema;
pub mod engine;
pub mod error;
pub mod macd;
pub mod rsi;

pub use classifier::classify;
pub use engine::{compute, IndicatorEngine};
pub use error::IndicatorError;
pub use macd::MacdPoint;
