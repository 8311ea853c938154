//! Agent core: planning, orchestration and sessions.
//!
//! Submodules:
//! - `plan_parser`: strict plan JSON decoding with code-fence stripping
//! - `planner`: LLM planner choosing targets and tool sub-queries
//! - `orchestrator`: plan → filter → fallback → execute loop, server targets
//! - `agents`: agent specs, factories, the explicit registry, agent targets
//! - `execution`: tool-calling chat executor and sequential multi-agent executor
//! - `sessions`: in-memory session → thread store with per-session run locks
//! - `types`: plans, threads, responses and reports
//! - `errors`: plan, execution, agent and request-boundary errors

pub mod agents;
pub mod errors;
pub mod execution;
pub mod orchestrator;
pub mod plan_parser;
pub mod planner;
pub mod sessions;
pub mod types;

pub use agents::{
    AgentFactory, AgentInstance, AgentRegistration, AgentRegistry, AgentSpec, AgentTargets,
    ChatAgentFactory,
};
pub use errors::{AgentError, ExecutionError, OrchestratorError, PlanError};
pub use execution::{ChatExecutor, ExecutionCapability, SequentialAgentExecutor};
pub use orchestrator::{OrchestrationLoop, ServerTargets, TargetCatalog};
pub use planner::Planner;
pub use sessions::SessionThreadStore;
pub use types::{
    AgentContribution, ExecutionOutput, ExecutionResponse, Plan, QueryOutcome, QueryReport,
    TargetDescriptor, TargetSelection, Thread, ToolInvocation,
};
