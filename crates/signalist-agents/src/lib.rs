pub mod backend;
pub mod context;
pub mod error;
pub mod handler;
pub mod orchestrator;
pub mod plan;
pub mod prompts;
pub mod report;
pub mod retry;
pub mod stream;
pub mod tools;

pub mod test_support;

pub use backend::{BackendRegistry, LanguageModelService, TextStream};
pub use context::{ContextUpdate, MemberFailure, PipelineContext};
pub use error::{AgentError, BackendFailure, FailureClass};
pub use handler::{default_handlers, HandlerRegistry, NarrativeStyle, RoleEnv, RoleHandler, RoleOutput};
pub use orchestrator::{FinalResult, Orchestrator};
pub use plan::{ExecutionMode, ExecutionPlan, PlanShape};
pub use report::ReportAssembler;
pub use stream::{ChunkForwarder, OutputSink, StreamChunk};
pub use tools::{market_tools, HoldingsTool, Tool, ToolError, ToolRegistry};
