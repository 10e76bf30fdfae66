pub mod error;
pub mod holdings;
pub mod provider;
pub mod static_provider;
pub mod yahoo;

pub use error::{HoldingsError, MarketDataError};
pub use holdings::HoldingsLoader;
pub use provider::MarketDataProvider;
pub use static_provider::StaticProvider;
pub use yahoo::YahooProvider;
