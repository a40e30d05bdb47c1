//! # taskcrew
//!
//! A bounded execution loop for tool-using autonomous agents.
//!
//! This library provides:
//! - An agent execution loop that plans, invokes tools, and observes until
//!   a final answer is produced or a budget runs out
//! - A shared result cache so repeated tool requests are served without
//!   re-invoking the tool
//! - A process-wide requests-per-minute limiter shared by all agents in a run
//! - A decoder for the planner's ReAct-style text protocol, with a
//!   configurable recovery path for malformed output
//!
//! ## Architecture
//!
//! The executor drives a plan → act → observe cycle:
//! 1. Take a rate-limiter permit, if a cap is configured
//! 2. Call the planner with the accumulated step history
//! 3. Decode the response into a tool action, a cache hit, or a final answer
//! 4. Dispatch the action through the tool registry, append the observation,
//!    and repeat within the iteration and wall-clock budgets
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use taskcrew::{AgentExecutor, ExecutorConfig, RpmController, ToolCache};
//!
//! let cache = Arc::new(ToolCache::new());
//! let rpm = RpmController::new(Some(30));
//! let executor = AgentExecutor::new(planner, tools, cache, ExecutorConfig::from_env()?)
//!     .with_rate_limiter(rpm);
//! let result = executor.run("Summarize the report").await?;
//! ```

pub mod cache;
pub mod config;
pub mod executor;
pub mod parser;
pub mod rate_limit;
pub mod tools;

pub use cache::ToolCache;
pub use config::{ConfigError, ExecutorConfig};
pub use executor::{
    AgentExecutor, ExecutionResult, ExecutionStatus, ExecutorError, IntermediateStep, Planner,
    StopPolicy,
};
pub use parser::{Action, DecodeError, Decision, OutputDecoder, ParsingPolicy};
pub use rate_limit::RpmController;
pub use tools::{CacheReader, Tool, ToolRegistry};
