//! Built-in tool that reads prior results straight from the shared cache.
//!
//! The executor rewrites a cache-hit action so its effective tool is this
//! one, with the original tool name and arguments encoded in the input.
//! That lets a cache lookup flow through the same dispatch machinery as a
//! real tool call.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::cache::ToolCache;

use super::Tool;

/// Name the cache-reader registers under.
pub const CACHE_READER_TOOL: &str = "Hit Cache";

/// Reads a previously observed output out of the shared cache.
pub struct CacheReader {
    cache: Arc<ToolCache>,
}

impl CacheReader {
    pub fn new(cache: Arc<ToolCache>) -> Self {
        Self { cache }
    }

    /// Encode an original (tool, input) pair as this tool's input.
    pub fn encode_key(tool: &str, input: &str) -> String {
        format!("tool:{tool}|input:{input}")
    }
}

#[async_trait]
impl Tool for CacheReader {
    fn name(&self) -> &str {
        CACHE_READER_TOOL
    }

    fn description(&self) -> &str {
        "Reads directly from the cache."
    }

    async fn invoke(&self, input: &str) -> Result<String> {
        let (tool, tool_input) = decode_key(input)?;
        Ok(self
            .cache
            .get(tool, tool_input)
            .unwrap_or_else(|| format!("No cached result for {tool} with input {tool_input}")))
    }
}

fn decode_key(key: &str) -> Result<(&str, &str)> {
    let rest = key
        .strip_prefix("tool:")
        .ok_or_else(|| anyhow!("malformed cache key: `{key}`"))?;
    let (tool, input) = rest
        .split_once("|input:")
        .ok_or_else(|| anyhow!("malformed cache key: `{key}`"))?;
    Ok((tool.trim(), input.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_roundtrip() {
        let key = CacheReader::encode_key("multiplier", "2,3");
        assert_eq!(key, "tool:multiplier|input:2,3");
        assert_eq!(decode_key(&key).expect("decodes"), ("multiplier", "2,3"));
    }

    #[tokio::test]
    async fn reads_primed_entry() {
        let cache = Arc::new(ToolCache::new());
        cache.put("multiplier", "2,3", "6");
        let reader = CacheReader::new(Arc::clone(&cache));

        let output = reader
            .invoke("tool:multiplier|input: 2,3 ")
            .await
            .expect("invokes");
        assert_eq!(output, "6");
    }

    #[tokio::test]
    async fn miss_reports_absence() {
        let reader = CacheReader::new(Arc::new(ToolCache::new()));
        let output = reader
            .invoke("tool:multiplier|input:9,9")
            .await
            .expect("invokes");
        assert!(output.contains("No cached result"));
    }

    #[tokio::test]
    async fn malformed_key_is_an_error() {
        let reader = CacheReader::new(Arc::new(ToolCache::new()));
        assert!(reader.invoke("multiplier|2,3").await.is_err());
        assert!(reader.invoke("tool:multiplier").await.is_err());
    }
}
