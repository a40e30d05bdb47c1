//! The agent execution loop.
//!
//! A bounded plan → act → observe state machine:
//! 1. Take a permit from the shared rate limiter, if one is configured
//! 2. Call the planner with the accumulated step history
//! 3. Decode the response into a tool action, a cache hit, or a final answer
//! 4. Dispatch the action, feed the observation back, repeat
//!
//! The loop ends in exactly one of three ways: the planner emits a final
//! answer, a `return_direct` tool short-circuits with its raw output, or an
//! iteration/wall-clock budget runs out and a best-effort stopped response
//! is produced. Two iterations before the hard ceiling, tool use is cut off
//! preemptively so the planner still has room to answer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::ToolCache;
use crate::config::ExecutorConfig;
use crate::parser::{Action, DecodeError, Decision, OutputDecoder, EXCEPTION_TOOL};
use crate::rate_limit::RpmController;
use crate::tools::{CacheReader, Tool, ToolRegistry, CACHE_READER_TOOL};

/// Observation substituted for a tool call once the preemptive cutoff hits.
pub const FORCED_ANSWER_OBSERVATION: &str = "I've used too many tools for this task. \
    I'm going to give you my absolute BEST Final answer now and not use any more tools.";

/// Fixed best-effort result when a budget runs out under [`StopPolicy::Force`].
pub const STOPPED_RESPONSE: &str = "Agent stopped due to iteration limit or time limit.";

/// Opaque decision-making capability: raw text in, raw text out.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, task: &str, history: &[IntermediateStep]) -> anyhow::Result<String>;
}

/// One completed loop step: the action taken and what was observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntermediateStep {
    pub action: Action,
    pub observation: String,
}

/// Terminal state of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// The planner produced a final answer.
    Finished,
    /// A `return_direct` tool ended the run with its raw output.
    DirectReturn,
    /// An iteration or wall-clock budget ran out; the output is a
    /// best-effort stopped response. Not an error.
    StoppedByBudget,
}

/// Result of one task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub output: String,
    pub status: ExecutionStatus,
    pub steps: Vec<IntermediateStep>,
    pub iterations: usize,
    pub elapsed: Duration,
}

/// How the stopped response is produced when a budget runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopPolicy {
    /// Return a fixed message.
    #[default]
    Force,
    /// Ask the planner for one final best-effort answer from the
    /// accumulated history, falling back to the fixed message on failure.
    Generate,
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Malformed planner output with no recovery policy configured.
    #[error("planner output could not be decoded: `{raw}`")]
    MalformedOutput { raw: String },

    /// A resolved tool failed; fatal for the execution.
    #[error("tool '{tool}' failed")]
    ToolExecution {
        tool: String,
        #[source]
        source: anyhow::Error,
    },

    /// The planner itself failed (transport-level, not decode-level).
    #[error("planner call failed")]
    Planner(#[source] anyhow::Error),
}

/// Drives one agent's task executions.
///
/// The cache and rate limiter are shared handles: several executors built
/// over the same `Arc`s observe one cache and one rate window.
pub struct AgentExecutor {
    planner: Arc<dyn Planner>,
    registry: ToolRegistry,
    decoder: OutputDecoder,
    cache: Arc<ToolCache>,
    rpm: Option<Arc<RpmController>>,
    config: ExecutorConfig,
}

impl AgentExecutor {
    pub fn new(
        planner: Arc<dyn Planner>,
        tools: Vec<Arc<dyn Tool>>,
        cache: Arc<ToolCache>,
        config: ExecutorConfig,
    ) -> Self {
        let mut registry = ToolRegistry::new(tools);
        registry.register(Arc::new(CacheReader::new(Arc::clone(&cache))));
        let decoder = OutputDecoder::new(Arc::clone(&cache));
        Self {
            planner,
            registry,
            decoder,
            cache,
            rpm: None,
            config,
        }
    }

    /// Attach a shared rate limiter. All executors holding the same handle
    /// draw permits from one window.
    pub fn with_rate_limiter(mut self, rpm: Arc<RpmController>) -> Self {
        self.rpm = Some(rpm);
        self
    }

    /// Execute one task to a terminal state.
    ///
    /// Budget exhaustion is not an error: it yields
    /// [`ExecutionStatus::StoppedByBudget`] with a textual result. Errors
    /// are reserved for planner transport failures, tool failures, and
    /// malformed output under [`crate::parser::ParsingPolicy::Fail`].
    pub async fn run(&self, task: &str) -> Result<ExecutionResult, ExecutorError> {
        let execution_id = Uuid::new_v4();
        let start = Instant::now();
        let force_threshold = self.config.max_iterations.saturating_sub(2);
        let mut steps: Vec<IntermediateStep> = Vec::new();
        let mut iterations: usize = 0;

        info!(
            %execution_id,
            max_iterations = self.config.max_iterations,
            "starting execution"
        );

        while self.should_continue(iterations, start.elapsed()) {
            if let Some(rpm) = &self.rpm {
                rpm.acquire().await;
            }

            debug!(%execution_id, iteration = iterations, "planning");
            let raw = self
                .planner
                .plan(task, &steps)
                .await
                .map_err(ExecutorError::Planner)?;

            let forced = iterations == force_threshold;
            let last_action = steps.last().map(|step| &step.action);
            match self.decoder.decode(&raw, last_action) {
                Ok(Decision::Finish(answer)) => {
                    info!(%execution_id, iterations, "finished with final answer");
                    return Ok(ExecutionResult {
                        output: answer,
                        status: ExecutionStatus::Finished,
                        steps,
                        iterations,
                        elapsed: start.elapsed(),
                    });
                }
                Ok(Decision::Action(action)) => {
                    if let Some(output) = self
                        .execute_actions(vec![action], forced, &mut steps)
                        .await?
                    {
                        info!(%execution_id, iterations, "tool returned directly");
                        return Ok(ExecutionResult {
                            output,
                            status: ExecutionStatus::DirectReturn,
                            steps,
                            iterations,
                            elapsed: start.elapsed(),
                        });
                    }
                }
                Ok(Decision::CacheHit(original)) => {
                    // Route the lookup through the dispatch machinery by
                    // rewriting the action onto the cache-reader tool.
                    debug!(%execution_id, tool = %original.tool, "cache hit, rewriting action");
                    let action = Action {
                        tool: CACHE_READER_TOOL.to_string(),
                        input: CacheReader::encode_key(&original.tool, &original.input),
                        raw: original.raw,
                    };
                    if let Some(output) = self
                        .execute_actions(vec![action], forced, &mut steps)
                        .await?
                    {
                        return Ok(ExecutionResult {
                            output,
                            status: ExecutionStatus::DirectReturn,
                            steps,
                            iterations,
                            elapsed: start.elapsed(),
                        });
                    }
                }
                Err(DecodeError::RepeatedUsage { message, raw }) => {
                    // Always an observation, never fatal: the planner sees
                    // its own repetition as feedback.
                    warn!(%execution_id, "planner repeated the previous tool call");
                    let observation = if forced {
                        FORCED_ANSWER_OBSERVATION.to_string()
                    } else {
                        message.clone()
                    };
                    steps.push(IntermediateStep {
                        action: Action {
                            tool: EXCEPTION_TOOL.to_string(),
                            input: message,
                            raw,
                        },
                        observation,
                    });
                }
                Err(err @ DecodeError::Malformed { .. }) => {
                    let Some(recovery) = self.config.parsing_policy.observation(&err) else {
                        return Err(ExecutorError::MalformedOutput { raw });
                    };
                    warn!(%execution_id, "recovering from malformed planner output");
                    let observation = if forced {
                        FORCED_ANSWER_OBSERVATION.to_string()
                    } else {
                        recovery.clone()
                    };
                    steps.push(IntermediateStep {
                        action: Action {
                            tool: EXCEPTION_TOOL.to_string(),
                            input: recovery,
                            raw,
                        },
                        observation,
                    });
                }
            }

            iterations += 1;
        }

        let output = self.stopped_response(task, &steps).await;
        info!(%execution_id, iterations, "stopped by budget");
        Ok(ExecutionResult {
            output,
            status: ExecutionStatus::StoppedByBudget,
            steps,
            iterations,
            elapsed: start.elapsed(),
        })
    }

    fn should_continue(&self, iterations: usize, elapsed: Duration) -> bool {
        if iterations >= self.config.max_iterations {
            return false;
        }
        match self.config.max_execution_time {
            Some(budget) => elapsed < budget,
            None => true,
        }
    }

    /// Dispatch a batch of actions in order. Returns the output of the
    /// first `return_direct` tool, which ends the batch early: later
    /// actions are not executed.
    async fn execute_actions(
        &self,
        actions: Vec<Action>,
        forced: bool,
        steps: &mut Vec<IntermediateStep>,
    ) -> Result<Option<String>, ExecutorError> {
        if forced {
            // Preemptive cutoff: skip tool invocation and substitute the
            // forced observation so the planner wraps up.
            for action in actions {
                debug!(tool = %action.tool, "forced answer, skipping tool invocation");
                steps.push(IntermediateStep {
                    action,
                    observation: FORCED_ANSWER_OBSERVATION.to_string(),
                });
            }
            return Ok(None);
        }

        for action in actions {
            let Some(tool) = self.registry.resolve(&action.tool) else {
                warn!(tool = %action.tool, "planner addressed an unknown tool");
                let observation = self.registry.invalid_tool_observation(&action.tool);
                steps.push(IntermediateStep {
                    action,
                    observation,
                });
                continue;
            };

            let return_direct = tool.return_direct();
            let output =
                tool.invoke(&action.input)
                    .await
                    .map_err(|source| ExecutorError::ToolExecution {
                        tool: action.tool.clone(),
                        source,
                    })?;

            // Cache real tool outputs so a later identical request can be
            // served through the cache-hit pathway.
            if action.tool != CACHE_READER_TOOL {
                self.cache.put(&action.tool, &action.input, &output);
            }

            if return_direct {
                steps.push(IntermediateStep {
                    action,
                    observation: output.clone(),
                });
                return Ok(Some(output));
            }

            debug!(len = output.len(), "observed tool output");
            steps.push(IntermediateStep {
                action,
                observation: output,
            });
        }

        Ok(None)
    }

    /// Best-effort result once a budget runs out. Never fails.
    async fn stopped_response(&self, task: &str, steps: &[IntermediateStep]) -> String {
        match self.config.stop_policy {
            StopPolicy::Force => STOPPED_RESPONSE.to_string(),
            StopPolicy::Generate => {
                let last_action = steps.last().map(|step| &step.action);
                match self.planner.plan(task, steps).await {
                    Ok(raw) => match self.decoder.decode(&raw, last_action) {
                        Ok(Decision::Finish(answer)) if !answer.trim().is_empty() => answer,
                        // Anything else: the raw text is the best we have.
                        _ if !raw.trim().is_empty() => raw,
                        _ => STOPPED_RESPONSE.to_string(),
                    },
                    Err(err) => {
                        warn!(error = %err, "stopped-response planning failed, using fixed message");
                        STOPPED_RESPONSE.to_string()
                    }
                }
            }
        }
    }
}
