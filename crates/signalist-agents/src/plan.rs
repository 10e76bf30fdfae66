use serde::{Deserialize, Serialize};
use signalist_models::AgentRole;
use uuid::Uuid;

use crate::error::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sequential,
    Team,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanShape {
    /// Roles run one after another in this order.
    Sequential(Vec<AgentRole>),
    /// Members run concurrently, then the coordinator runs on the merged result.
    Team {
        members: Vec<AgentRole>,
        coordinator: AgentRole,
    },
}

/// A validated, immutable run plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub id: Uuid,
    pub mode: ExecutionMode,
    pub shape: PlanShape,
}

impl ExecutionPlan {
    /// Arrange `roles` for `mode`. In team mode the last role is the coordinator.
    /// Registry checks happen in `Orchestrator::build_plan`.
    pub fn arrange(mut roles: Vec<AgentRole>, mode: ExecutionMode) -> Result<Self, AgentError> {
        if roles.is_empty() {
            return Err(AgentError::Plan("a plan needs at least one role".into()));
        }
        for (i, role) in roles.iter().enumerate() {
            if roles[..i].iter().any(|r| r.name == role.name) {
                return Err(AgentError::Plan(format!("duplicate role name '{}'", role.name)));
            }
        }

        let shape = match mode {
            ExecutionMode::Sequential => PlanShape::Sequential(roles),
            ExecutionMode::Team => {
                if roles.len() < 2 {
                    return Err(AgentError::Plan(
                        "team mode needs at least one member and a coordinator".into(),
                    ));
                }
                let coordinator = roles.pop().ok_or_else(|| {
                    AgentError::Plan("team mode needs a coordinator".into())
                })?;
                PlanShape::Team {
                    members: roles,
                    coordinator,
                }
            }
        };

        Ok(Self {
            id: Uuid::new_v4(),
            mode,
            shape,
        })
    }

    /// Every role in execution order (members before the coordinator).
    pub fn roles(&self) -> Vec<&AgentRole> {
        match &self.shape {
            PlanShape::Sequential(roles) => roles.iter().collect(),
            PlanShape::Team {
                members,
                coordinator,
            } => members.iter().chain(std::iter::once(coordinator)).collect(),
        }
    }
}
