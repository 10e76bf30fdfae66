pub mod config;
pub mod error;
pub mod holding;
pub mod indicator;
pub mod market;
pub mod report;
pub mod role;

pub use config::{BackendConfig, PipelineConfig, SignalistConfig};
pub use error::ModelError;
pub use holding::{Holding, Position};
pub use indicator::{Decision, IndicatorParams, IndicatorSet, Signal};
pub use market::{
    AnalystRecommendation, CompanyInfo, MarketResearch, NewsItem, PriceBar, PriceSeries, Quote,
};
pub use report::{NarrativeFragment, Report, RoleOutcome, RoleReport};
pub use role::{AgentRole, BackendRef, Capability};
