use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// The closed set of work a role can be asked to do.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    DataRetrieval,
    IndicatorAnalysis,
    PortfolioAggregation,
    NarrativeSynthesis,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::DataRetrieval,
        Capability::IndicatorAnalysis,
        Capability::PortfolioAggregation,
        Capability::NarrativeSynthesis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::DataRetrieval => "data-retrieval",
            Capability::IndicatorAnalysis => "indicator-analysis",
            Capability::PortfolioAggregation => "portfolio-aggregation",
            Capability::NarrativeSynthesis => "narrative-synthesis",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| ModelError::UnknownCapability(s.to_string()))
    }
}

/// Which external service fulfils a role.
///
/// Serialized as `"deterministic"` or `"model:<name>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BackendRef {
    /// Tools and the indicator engine only; no generative model.
    Deterministic,
    /// A registered language-model backend.
    Model(String),
}

impl BackendRef {
    pub fn model(name: impl Into<String>) -> Self {
        BackendRef::Model(name.into())
    }

    pub fn model_name(&self) -> Option<&str> {
        match self {
            BackendRef::Model(name) => Some(name),
            BackendRef::Deterministic => None,
        }
    }
}

impl fmt::Display for BackendRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendRef::Deterministic => f.write_str("deterministic"),
            BackendRef::Model(name) => write!(f, "model:{name}"),
        }
    }
}

impl FromStr for BackendRef {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "deterministic" {
            return Ok(BackendRef::Deterministic);
        }
        match s.strip_prefix("model:") {
            Some(name) if !name.trim().is_empty() => Ok(BackendRef::Model(name.to_string())),
            _ => Err(ModelError::InvalidBackendRef(s.to_string())),
        }
    }
}

impl TryFrom<String> for BackendRef {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BackendRef> for String {
    fn from(value: BackendRef) -> Self {
        value.to_string()
    }
}

/// A named unit of work bound to a capability, a backend and a set of tools.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentRole {
    pub name: String,
    pub capability: Capability,
    pub backend: BackendRef,
    /// Names of registered tools this role may invoke.
    #[serde(default)]
    pub tools: Vec<String>,
}

impl AgentRole {
    pub fn new(name: impl Into<String>, capability: Capability, backend: BackendRef) -> Self {
        Self {
            name: name.into(),
            capability,
            backend,
            tools: Vec::new(),
        }
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn binds(&self, tool: &str) -> bool {
        self.tools.iter().any(|t| t == tool)
    }
}
