//! Decodes raw planner output into a structured decision.
//!
//! The planner speaks a ReAct-style text protocol: either an
//! `Action:` / `Action Input:` pair requesting a tool, or a
//! `Final Answer:` marker ending the task. Anything else is malformed and
//! handled per the executor's [`ParsingPolicy`].

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::ToolCache;

/// Marker the planner uses to end the task.
pub const FINAL_ANSWER_MARKER: &str = "Final Answer:";

/// Sentinel tool name for steps synthesized from recovered decode failures.
pub const EXCEPTION_TOOL: &str = "_Exception";

/// Fixed observation used when recovering without a caller-supplied message.
pub const RECOVERY_OBSERVATION: &str = "Invalid or incomplete response";

/// A tool request decoded from planner output. Immutable once created and
/// consumed by the loop within one iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    /// Requested tool name.
    pub tool: String,
    /// Tool input, trimmed of surrounding whitespace and quotes.
    pub input: String,
    /// The raw planner text the action was decoded from.
    pub raw: String,
}

/// Outcome of decoding one planner response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Invoke a tool.
    Action(Action),
    /// The requested (tool, input) pair is already cached; route the action
    /// through the cache-reader instead of the real tool.
    CacheHit(Action),
    /// Terminal answer; the loop stops and returns it.
    Finish(String),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    /// The text parses into neither an action nor a final answer (or
    /// ambiguously into both).
    #[error("could not decode planner output: `{raw}`")]
    Malformed { raw: String },
    /// The planner requested the exact same tool call twice in direct
    /// succession. Surfaced as an observation, never fatal.
    #[error("{message}")]
    RepeatedUsage { message: String, raw: String },
}

/// How the executor reacts to malformed planner output.
#[derive(Clone, Default)]
pub enum ParsingPolicy {
    /// Propagate the failure; fatal for the task execution.
    #[default]
    Fail,
    /// Feed a fixed observation back to the planner.
    Recover,
    /// Feed a caller-supplied observation back to the planner.
    Message(String),
    /// Derive the observation from the failure itself.
    Handler(Arc<dyn Fn(&DecodeError) -> String + Send + Sync>),
}

impl ParsingPolicy {
    /// The observation to feed back, or `None` when the failure is fatal.
    pub fn observation(&self, err: &DecodeError) -> Option<String> {
        match self {
            ParsingPolicy::Fail => None,
            ParsingPolicy::Recover => Some(RECOVERY_OBSERVATION.to_string()),
            ParsingPolicy::Message(message) => Some(message.clone()),
            ParsingPolicy::Handler(handler) => Some(handler(err)),
        }
    }
}

impl fmt::Debug for ParsingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParsingPolicy::Fail => write!(f, "Fail"),
            ParsingPolicy::Recover => write!(f, "Recover"),
            ParsingPolicy::Message(message) => f.debug_tuple("Message").field(message).finish(),
            ParsingPolicy::Handler(_) => write!(f, "Handler(..)"),
        }
    }
}

/// Turns raw planner text into a [`Decision`].
pub struct OutputDecoder {
    cache: Arc<ToolCache>,
    action_re: Regex,
}

impl OutputDecoder {
    pub fn new(cache: Arc<ToolCache>) -> Self {
        let action_re = Regex::new(
            r"(?s)Action\s*\d*\s*:[\s]*(.*?)[\s]*Action\s*\d*\s*Input\s*\d*\s*:[\s]*(.*)",
        )
        .expect("action regex is valid");
        Self { cache, action_re }
    }

    /// Decode one planner response. `last_action` is the action of the most
    /// recent step, used to flag immediate repeats.
    pub fn decode(&self, raw: &str, last_action: Option<&Action>) -> Result<Decision, DecodeError> {
        let includes_answer = raw.contains(FINAL_ANSWER_MARKER);

        if let Some(caps) = self.action_re.captures(raw) {
            if includes_answer {
                // Both an action and a final answer: ambiguous.
                return Err(DecodeError::Malformed {
                    raw: raw.to_string(),
                });
            }

            let tool = caps[1].trim().trim_matches('"').trim().to_string();
            let input = caps[2].trim().trim_matches('"').to_string();
            let action = Action {
                tool,
                input,
                raw: raw.to_string(),
            };

            if let Some(last) = last_action {
                if last.tool == action.tool && last.input == action.input {
                    return Err(DecodeError::RepeatedUsage {
                        message: repeated_usage_message(&action.tool, &action.input),
                        raw: raw.to_string(),
                    });
                }
            }

            if self.cache.get(&action.tool, &action.input).is_some() {
                return Ok(Decision::CacheHit(action));
            }
            return Ok(Decision::Action(action));
        }

        if includes_answer {
            let answer = raw
                .split(FINAL_ANSWER_MARKER)
                .last()
                .unwrap_or_default()
                .trim()
                .to_string();
            return Ok(Decision::Finish(answer));
        }

        Err(DecodeError::Malformed {
            raw: raw.to_string(),
        })
    }
}

fn repeated_usage_message(tool: &str, input: &str) -> String {
    format!(
        "I just used the {tool} tool with input {input}. \
         So I already know the result of that and don't need to use it now."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> OutputDecoder {
        OutputDecoder::new(Arc::new(ToolCache::new()))
    }

    #[test]
    fn decodes_final_answer() {
        let decision = decoder()
            .decode("I now know the result.\nFinal Answer: 42", None)
            .expect("decodes");
        assert_eq!(decision, Decision::Finish("42".to_string()));
    }

    #[test]
    fn decodes_action_with_input() {
        let raw = "Thought: multiply them\nAction: multiplier\nAction Input: 2,3";
        let decision = decoder().decode(raw, None).expect("decodes");
        match decision {
            Decision::Action(action) => {
                assert_eq!(action.tool, "multiplier");
                assert_eq!(action.input, "2,3");
                assert_eq!(action.raw, raw);
            }
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[test]
    fn strips_quotes_and_numbering() {
        let raw = "Action 1: \"search\"\nAction 1 Input 1: \"rust lang\"";
        let decision = decoder().decode(raw, None).expect("decodes");
        match decision {
            Decision::Action(action) => {
                assert_eq!(action.tool, "search");
                assert_eq!(action.input, "rust lang");
            }
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[test]
    fn multiline_input_spans_to_end() {
        let raw = "Action: write\nAction Input: line one\nline two";
        let decision = decoder().decode(raw, None).expect("decodes");
        match decision {
            Decision::Action(action) => assert_eq!(action.input, "line one\nline two"),
            other => panic!("expected action, got {other:?}"),
        }
    }

    #[test]
    fn action_and_final_answer_together_is_malformed() {
        let raw = "Action: search\nAction Input: x\nFinal Answer: y";
        let err = decoder().decode(raw, None).expect_err("malformed");
        assert!(matches!(err, DecodeError::Malformed { .. }));
    }

    #[test]
    fn unstructured_text_is_malformed() {
        let err = decoder()
            .decode("let me think about this...", None)
            .expect_err("malformed");
        assert!(matches!(err, DecodeError::Malformed { .. }));
    }

    #[test]
    fn immediate_repeat_is_flagged() {
        let raw = "Action: multiplier\nAction Input: 2,3";
        let last = Action {
            tool: "multiplier".to_string(),
            input: "2,3".to_string(),
            raw: raw.to_string(),
        };
        let err = decoder().decode(raw, Some(&last)).expect_err("repeat");
        match err {
            DecodeError::RepeatedUsage { message, .. } => {
                assert!(message.contains("multiplier"));
                assert!(message.contains("2,3"));
            }
            other => panic!("expected repeated usage, got {other:?}"),
        }
    }

    #[test]
    fn different_input_is_not_a_repeat() {
        let last = Action {
            tool: "multiplier".to_string(),
            input: "2,3".to_string(),
            raw: String::new(),
        };
        let decision = decoder()
            .decode("Action: multiplier\nAction Input: 4,5", Some(&last))
            .expect("decodes");
        assert!(matches!(decision, Decision::Action(_)));
    }

    #[test]
    fn cached_pair_becomes_cache_hit() {
        let cache = Arc::new(ToolCache::new());
        cache.put("multiplier", "2,3", "6");
        let decoder = OutputDecoder::new(Arc::clone(&cache));

        let decision = decoder
            .decode("Action: multiplier\nAction Input: 2,3", None)
            .expect("decodes");
        assert!(matches!(decision, Decision::CacheHit(_)));

        // A pair the cache has never seen stays a normal action.
        let decision = decoder
            .decode("Action: multiplier\nAction Input: 7,8", None)
            .expect("decodes");
        assert!(matches!(decision, Decision::Action(_)));
    }

    #[test]
    fn policy_fail_propagates() {
        let err = DecodeError::Malformed { raw: "x".into() };
        assert_eq!(ParsingPolicy::Fail.observation(&err), None);
    }

    #[test]
    fn policy_observations() {
        let err = DecodeError::Malformed { raw: "x".into() };
        assert_eq!(
            ParsingPolicy::Recover.observation(&err),
            Some(RECOVERY_OBSERVATION.to_string())
        );
        assert_eq!(
            ParsingPolicy::Message("try again".into()).observation(&err),
            Some("try again".to_string())
        );
        let handler = ParsingPolicy::Handler(Arc::new(|e| format!("seen: {e}")));
        assert_eq!(
            handler.observation(&err),
            Some("seen: could not decode planner output: `x`".to_string())
        );
    }
}
