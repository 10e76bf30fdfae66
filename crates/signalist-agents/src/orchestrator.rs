use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use signalist_models::{AgentRole, Capability, PipelineConfig, RoleOutcome, RoleReport};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::BackendRegistry;
use crate::context::{MemberFailure, PipelineContext};
use crate::error::AgentError;
use crate::handler::{HandlerRegistry, RoleEnv, RoleHandler, RoleOutput};
use crate::plan::{ExecutionMode, ExecutionPlan, PlanShape};
use crate::retry::RetryPolicy;
use crate::stream::{ChunkForwarder, StreamChunk};
use crate::tools::ToolRegistry;

/// Outcome of a completed plan.
#[derive(Debug, Clone)]
pub struct FinalResult {
    pub plan_id: Uuid,
    pub context: PipelineContext,
    /// One entry per role that was dispatched, in plan order.
    pub reports: Vec<RoleReport>,
    pub elapsed: Duration,
}

/// Builds and executes plans over registered handlers, tools and backends.
pub struct Orchestrator {
    handlers: HandlerRegistry,
    tools: Arc<ToolRegistry>,
    backends: Arc<BackendRegistry>,
    forwarder: Arc<ChunkForwarder>,
    config: PipelineConfig,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: PipelineConfig, tools: ToolRegistry, backends: BackendRegistry) -> Self {
        Self {
            handlers: HandlerRegistry::new(),
            tools: Arc::new(tools),
            backends: Arc::new(backends),
            forwarder: ChunkForwarder::new(config.stream_buffer_chunks),
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers.extend(handlers);
        self
    }

    pub fn with_handler(mut self, capability: Capability, handler: Arc<dyn RoleHandler>) -> Self {
        self.handlers.insert(capability, handler);
        self
    }

    /// Share a forwarder across orchestrators, e.g. one per ticker in a batch.
    pub fn with_forwarder(mut self, forwarder: Arc<ChunkForwarder>) -> Self {
        self.forwarder = forwarder;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns a CancellationToken that stops the current and future runs.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn forwarder(&self) -> Arc<ChunkForwarder> {
        Arc::clone(&self.forwarder)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Validate `roles` against the registries and arrange them for `mode`.
    pub fn build_plan(
        &self,
        roles: Vec<AgentRole>,
        mode: ExecutionMode,
    ) -> Result<ExecutionPlan, AgentError> {
        for role in &roles {
            if !self.handlers.contains_key(&role.capability) {
                return Err(AgentError::Plan(format!(
                    "no handler registered for capability {} (role {})",
                    role.capability, role.name
                )));
            }
            if let Some(tool) = role.tools.iter().find(|t| !self.tools.contains(t)) {
                return Err(AgentError::Plan(format!(
                    "role {} binds unregistered tool {tool}",
                    role.name
                )));
            }
            if let Some(backend) = role.backend.model_name() {
                if !self.backends.contains_key(backend) {
                    return Err(AgentError::Plan(format!(
                        "role {} uses unregistered backend {backend}",
                        role.name
                    )));
                }
            }
        }

        let plan = ExecutionPlan::arrange(roles, mode)?;
        info!(plan_id = %plan.id, mode = ?plan.mode, roles = plan.roles().len(), "Plan built");
        Ok(plan)
    }

    /// Run a plan to completion.
    ///
    /// Sequential plans stop at the first fatal role failure. Team members that
    /// fail are reported to the coordinator instead; only a coordinator failure
    /// fails the run.
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        initial: PipelineContext,
    ) -> Result<FinalResult, AgentError> {
        let start = Instant::now();
        info!(plan_id = %plan.id, ticker = %initial.ticker, mode = ?plan.mode, "Executing plan");

        let (context, reports) = match &plan.shape {
            PlanShape::Sequential(roles) => self.run_sequential(roles, initial).await?,
            PlanShape::Team {
                members,
                coordinator,
            } => self.run_team(members, coordinator, initial).await?,
        };

        let elapsed = start.elapsed();
        info!(
            plan_id = %plan.id,
            ticker = %context.ticker,
            elapsed_ms = elapsed.as_millis() as u64,
            "Plan complete"
        );
        Ok(FinalResult {
            plan_id: plan.id,
            context,
            reports,
            elapsed,
        })
    }

    fn runner(&self, role: &AgentRole) -> Result<RoleRunner, AgentError> {
        let handler = self.handlers.get(&role.capability).cloned().ok_or_else(|| {
            AgentError::Plan(format!("no handler registered for capability {}", role.capability))
        })?;
        Ok(RoleRunner {
            handler,
            env: RoleEnv::new(
                role.clone(),
                Arc::clone(&self.tools),
                Arc::clone(&self.backends),
                Arc::clone(&self.forwarder),
                self.cancel.clone(),
            ),
            policy: RetryPolicy::from_config(&self.config),
            role_timeout: self.config.role_timeout(),
            grace: self.config.cancel_grace(),
            attempts: Arc::new(AtomicU32::new(0)),
        })
    }

    async fn run_sequential(
        &self,
        roles: &[AgentRole],
        initial: PipelineContext,
    ) -> Result<(PipelineContext, Vec<RoleReport>), AgentError> {
        let mut ctx = initial;
        let mut reports = Vec::with_capacity(roles.len());
        for role in roles {
            self.run_step(role, &mut ctx, &mut reports).await?;
        }
        Ok((ctx, reports))
    }

    /// Run one role against the live context and apply its output.
    async fn run_step(
        &self,
        role: &AgentRole,
        ctx: &mut PipelineContext,
        reports: &mut Vec<RoleReport>,
    ) -> Result<(), AgentError> {
        if self.cancel.is_cancelled() {
            info!(role = %role.name, "Cancelled before dispatch");
            return Err(AgentError::Cancelled);
        }

        let run = self.runner(role)?.run(Arc::new(ctx.clone())).await;
        reports.push(run.report);
        let output = run.result.inspect_err(|e| {
            error!(role = %role.name, error = %e, "Role failed, aborting plan");
        })?;

        self.merge(ctx, &role.name, output);
        Ok(())
    }

    /// Apply a role's output. Fragments that were not streamed while the role
    /// ran are forwarded now, so the output carries the whole narrative.
    fn merge(&self, ctx: &mut PipelineContext, role: &str, output: RoleOutput) {
        ctx.apply(output.update);
        let Some(text) = output.fragment else {
            return;
        };
        let chunk = if output.streamed {
            "\n\n".to_string()
        } else {
            format!("{}\n\n", text.trim())
        };
        self.forwarder.push(StreamChunk::text(role, chunk));
        ctx.push_fragment(role, text);
    }

    async fn run_team(
        &self,
        members: &[AgentRole],
        coordinator: &AgentRole,
        initial: PipelineContext,
    ) -> Result<(PipelineContext, Vec<RoleReport>), AgentError> {
        if self.cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        let start = Instant::now();
        let mut ctx = initial;
        let snapshot = Arc::new(ctx.clone());
        let mut attempts = Vec::with_capacity(members.len());
        let mut join_set = JoinSet::new();

        for (index, member) in members.iter().enumerate() {
            let runner = self.runner(member)?;
            attempts.push(Arc::clone(&runner.attempts));
            let snapshot = Arc::clone(&snapshot);
            join_set.spawn(async move { (index, runner.run(snapshot).await) });
        }
        info!(members = members.len(), coordinator = %coordinator.name, "Team dispatched");

        let mut settled: Vec<Option<RoleRun>> = members.iter().map(|_| None).collect();
        let deadline = tokio::time::sleep(self.config.team_timeout());
        tokio::pin!(deadline);
        let mut timed_out = false;

        loop {
            tokio::select! {
                joined = join_set.join_next() => match joined {
                    Some(Ok((index, run))) => settled[index] = Some(run),
                    Some(Err(e)) => error!(error = %e, "Team member task panicked"),
                    None => break,
                },
                _ = &mut deadline => {
                    warn!(
                        timeout_s = self.config.team_timeout_seconds,
                        pending = join_set.len(),
                        "Team timeout, aborting stragglers"
                    );
                    join_set.abort_all();
                    timed_out = true;
                    break;
                }
            }
        }
        while join_set.join_next().await.is_some() {}

        // merge in declared order, whatever order members settled in
        let mut reports = Vec::with_capacity(members.len() + 1);
        for ((member, run), attempts) in members.iter().zip(settled).zip(attempts) {
            let Some(run) = run else {
                let reason = if timed_out {
                    format!(
                        "did not finish within the {}s team timeout",
                        self.config.team_timeout_seconds
                    )
                } else {
                    "member task panicked".to_string()
                };
                reports.push(RoleReport {
                    role: member.name.clone(),
                    capability: member.capability,
                    attempts: attempts.load(Ordering::SeqCst),
                    elapsed_ms: start.elapsed().as_millis() as u64,
                    outcome: RoleOutcome::Failed {
                        reason: reason.clone(),
                    },
                });
                ctx.failures.push(MemberFailure {
                    role: member.name.clone(),
                    reason,
                });
                continue;
            };

            reports.push(run.report);
            match run.result {
                Ok(output) => self.merge(&mut ctx, &member.name, output),
                Err(e) => {
                    warn!(role = %member.name, error = %e, "Team member excluded");
                    ctx.failures.push(MemberFailure {
                        role: member.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if self.cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        debug!(
            failures = ctx.failures.len(),
            fragments = ctx.narrative_fragments.len(),
            "Team merged, running coordinator"
        );
        self.run_step(coordinator, &mut ctx, &mut reports).await?;
        Ok((ctx, reports))
    }
}

struct RoleRun {
    report: RoleReport,
    result: Result<RoleOutput, AgentError>,
}

/// Runs one role with per-attempt timeout, retry and cancellation.
#[derive(Clone)]
struct RoleRunner {
    handler: Arc<dyn RoleHandler>,
    env: RoleEnv,
    policy: RetryPolicy,
    role_timeout: Duration,
    grace: Duration,
    attempts: Arc<AtomicU32>,
}

impl RoleRunner {
    async fn run(self, ctx: Arc<PipelineContext>) -> RoleRun {
        let start = Instant::now();
        let result = self.run_with_retry(&ctx).await;
        let role = self.env.role();
        let attempts = self.attempts.load(Ordering::SeqCst);
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let outcome = match &result {
            Ok(_) => {
                info!(role = %role.name, attempts, elapsed_ms, "Role succeeded");
                RoleOutcome::Succeeded
            }
            Err(AgentError::Cancelled) => {
                info!(role = %role.name, attempts, elapsed_ms, "Role cancelled");
                RoleOutcome::Cancelled
            }
            Err(e) => {
                warn!(role = %role.name, attempts, elapsed_ms, error = %e, "Role failed");
                RoleOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        RoleRun {
            report: RoleReport {
                role: role.name.clone(),
                capability: role.capability,
                attempts,
                elapsed_ms,
                outcome,
            },
            result,
        }
    }

    async fn run_with_retry(&self, ctx: &PipelineContext) -> Result<RoleOutput, AgentError> {
        let cancel = self.env.cancel_token().clone();
        let name = &self.env.role().name;

        loop {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let err = match self.attempt(ctx).await {
                Ok(output) => return Ok(output),
                Err(e) => e,
            };

            if matches!(err, AgentError::Cancelled) || !err.is_retryable() {
                return Err(err);
            }
            if !self.policy.has_attempts_left(attempt) {
                return Err(AgentError::RetriesExhausted {
                    role: name.clone(),
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            let delay = self.policy.backoff(attempt);
            warn!(
                role = %name,
                attempt,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "Retryable failure, backing off"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(AgentError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn attempt(&self, ctx: &PipelineContext) -> Result<RoleOutput, AgentError> {
        let cancel = self.env.cancel_token();
        let work = tokio::time::timeout(self.role_timeout, self.handler.run(ctx, &self.env));
        tokio::pin!(work);

        let timed = tokio::select! {
            res = &mut work => res,
            _ = cancel.cancelled() => {
                debug!(role = %self.env.role().name, grace_ms = self.grace.as_millis() as u64, "Cancelled mid-role");
                let _ = tokio::time::timeout(self.grace, &mut work).await;
                return Err(AgentError::Cancelled);
            }
        };

        timed.map_err(|_| AgentError::Timeout {
            role: self.env.role().name.clone(),
            seconds: self.role_timeout.as_secs(),
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::default_handlers;
    use crate::test_support::{
        falling_series, scripted_registry, FlakyHandler, RecordingHandler,
    };
    use crate::tools::{market_tools, PRICE_HISTORY};
    use signalist_market::StaticProvider;
    use signalist_models::{BackendRef, IndicatorParams};

    fn orchestrator() -> Orchestrator {
        let provider = StaticProvider::new().with_series(falling_series("COF", 100));
        Orchestrator::new(
            PipelineConfig::default(),
            market_tools(Arc::new(provider), 100),
            scripted_registry("writer", ["Losing ", "steam."]),
        )
        .with_handlers(default_handlers(IndicatorParams::default()))
    }

    fn role(name: &str, capability: Capability) -> AgentRole {
        AgentRole::new(name, capability, BackendRef::Deterministic)
    }

    #[test]
    fn build_plan_checks_registries() {
        let orch = orchestrator();
        let unknown_tool = role("history", Capability::DataRetrieval).with_tools(["get_weather"]);
        assert!(matches!(
            orch.build_plan(vec![unknown_tool], ExecutionMode::Sequential),
            Err(AgentError::Plan(m)) if m.contains("get_weather")
        ));

        let unknown_backend = AgentRole::new(
            "summary",
            Capability::NarrativeSynthesis,
            BackendRef::model("nope"),
        );
        assert!(orch
            .build_plan(vec![unknown_backend], ExecutionMode::Sequential)
            .is_err());

        let bare = Orchestrator::new(PipelineConfig::default(), ToolRegistry::new(), BackendRegistry::new());
        assert!(bare
            .build_plan(vec![role("history", Capability::DataRetrieval)], ExecutionMode::Sequential)
            .is_err());
    }

    #[tokio::test]
    async fn sequential_daily_plan_produces_signal_and_fragments() {
        let orch = orchestrator();
        let plan = orch
            .build_plan(
                vec![
                    role("history", Capability::DataRetrieval).with_tools([PRICE_HISTORY]),
                    role("technical", Capability::IndicatorAnalysis),
                    AgentRole::new(
                        "summary",
                        Capability::NarrativeSynthesis,
                        BackendRef::model("writer"),
                    ),
                ],
                ExecutionMode::Sequential,
            )
            .unwrap();

        let result = orch.execute(&plan, PipelineContext::new("COF")).await.unwrap();
        assert_eq!(result.plan_id, plan.id);
        assert_eq!(
            result.context.signal.as_ref().unwrap().decision,
            signalist_models::Decision::Buy
        );
        let roles: Vec<&str> = result.reports.iter().map(|r| r.role.as_str()).collect();
        assert_eq!(roles, ["history", "technical", "summary"]);
        assert!(result.reports.iter().all(|r| r.succeeded() && r.attempts == 1));
        assert_eq!(result.context.narrative_fragments.last().unwrap().text, "Losing steam.");
    }

    #[tokio::test]
    async fn fatal_failure_aborts_remaining_roles() {
        let orch = orchestrator();
        // technical has no history in context and no tool to fetch it
        let plan = orch
            .build_plan(
                vec![
                    role("technical", Capability::IndicatorAnalysis),
                    role("summary", Capability::NarrativeSynthesis),
                ],
                ExecutionMode::Sequential,
            )
            .unwrap();
        let err = orch.execute(&plan, PipelineContext::new("COF")).await.unwrap_err();
        assert!(matches!(err, AgentError::Data(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failures_exhaust_budget() {
        let flaky = Arc::new(FlakyHandler::timeouts(10));
        let orch = orchestrator().with_handler(Capability::DataRetrieval, flaky.clone());
        let plan = orch
            .build_plan(vec![role("history", Capability::DataRetrieval)], ExecutionMode::Sequential)
            .unwrap();

        let err = orch.execute(&plan, PipelineContext::new("COF")).await.unwrap_err();
        match err {
            AgentError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test]
    async fn cancelled_before_start_dispatches_nothing() {
        let recorder = Arc::new(RecordingHandler::new());
        let orch = orchestrator().with_handler(Capability::DataRetrieval, recorder.clone());
        let plan = orch
            .build_plan(vec![role("history", Capability::DataRetrieval)], ExecutionMode::Sequential)
            .unwrap();
        orch.cancel_token().cancel();

        let err = orch.execute(&plan, PipelineContext::new("COF")).await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled));
        assert!(recorder.events().is_empty());
    }
}
