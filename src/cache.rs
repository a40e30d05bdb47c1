//! Shared cache of prior tool outputs.
//!
//! Keys are `{tool}-{input}` with the input trimmed of surrounding
//! whitespace only. Case and internal spacing are preserved, so two inputs
//! that differ only in internal spacing are distinct entries. Entries are
//! never evicted and never expire; the map lives for the whole run and is
//! shared between executors through an `Arc`. Concurrent writes to the same
//! key resolve as last-write-wins.

use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory mapping of (tool, input) to a previously observed output.
#[derive(Debug, Default)]
pub struct ToolCache {
    entries: Mutex<HashMap<String, String>>,
}

impl ToolCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a tool output unconditionally.
    pub fn put(&self, tool: &str, input: &str, output: &str) {
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .insert(Self::key(tool, input), output.to_string());
    }

    /// Look up the output of a prior invocation, if any.
    pub fn get(&self, tool: &str, input: &str) -> Option<String> {
        self.entries
            .lock()
            .expect("cache mutex poisoned")
            .get(&Self::key(tool, input))
            .cloned()
    }

    fn key(tool: &str, input: &str) -> String {
        format!("{tool}-{}", input.trim())
    }
}
