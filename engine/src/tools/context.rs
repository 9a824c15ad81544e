//! Cache-backed context reader
//!
//! Lets the model pull prompts, rubrics or other reference material through
//! the content cache, so repeated reads of the same ref cost one fetch and
//! count against the size budget of the run that dispatched the call. Calls
//! made outside a run get a one-off budget.

use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::{ParamSpec, ParamType, ToolInput, ToolOutput, ToolSchema};
use serde_json::json;

use super::ToolHandler;
use crate::context::{EngineContext, RunContext};

pub struct ReadContextTool {
    ctx: EngineContext,
}

impl ReadContextTool {
    pub fn new(ctx: EngineContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ToolHandler for ReadContextTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "read_context",
            "Read a prompt, rubric or reference document by workspace path or URL. \
             Returns the text and its content key.",
        )
        .with_param(ParamSpec::required(
            "reference",
            ParamType::String,
            "Workspace-relative path or http(s) URL",
        ))
    }

    async fn call(&self, input: ToolInput) -> Result<ToolOutput, EngineError> {
        self.call_in_run(input, &self.ctx.begin_run()).await
    }

    async fn call_in_run(&self, input: ToolInput, run: &RunContext) -> Result<ToolOutput, EngineError> {
        let reference = input
            .param_str("reference")
            .map_err(|e| EngineError::InvalidArguments {
                tool: input.tool.clone(),
                reason: e.to_string(),
            })?;

        let (loaded, handle) = run.load(&reference).await;
        run.release(std::slice::from_ref(&handle));

        let Some(text) = loaded.text else {
            return Ok(ToolOutput::error(format!(
                "{} not loaded: {}",
                reference,
                loaded.skip_reason.unwrap_or_default()
            )));
        };

        Ok(ToolOutput::json(json!({
            "reference": loaded.reference,
            "key": loaded.key,
            "degraded": loaded.degraded,
            "truncated": loaded.truncated,
            "content": text,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{ContentLoader, Fetched};
    use crate::config::Config;
    use std::sync::Arc;

    struct OneDoc;

    #[async_trait]
    impl ContentLoader for OneDoc {
        async fn fetch(&self, reference: &str) -> Result<Fetched, EngineError> {
            if reference == "rubric.md" {
                Ok(Fetched::text("Score clarity 0-10"))
            } else {
                Err(EngineError::NotFound(reference.to_string()))
            }
        }
    }

    #[tokio::test]
    async fn test_read_context_returns_text_and_key() {
        let ctx = EngineContext::with_loader(&Config::default_config(), Arc::new(OneDoc));
        let tool = ReadContextTool::new(ctx.clone());
        let input = tool
            .schema()
            .validate(&json!({"reference": "rubric.md"}))
            .unwrap();

        let out = tool.call(input).await.unwrap();
        assert!(out.success);
        assert_eq!(out.data["content"], "Score clarity 0-10");
        assert_eq!(out.data["degraded"], false);
        assert!(out.render().contains(out.data["key"].as_str().unwrap()));
        assert_eq!(out.data["key"].as_str(), ctx.cache.key_for("rubric.md").as_deref());
        assert_eq!(ctx.cache.stats().referenced_entries, 0);
    }

    #[tokio::test]
    async fn test_read_context_charges_the_run() {
        let ctx = EngineContext::with_loader(&Config::default_config(), Arc::new(OneDoc));
        let tool = ReadContextTool::new(ctx.clone());
        let run = ctx.begin_run();
        let input = tool
            .schema()
            .validate(&json!({"reference": "rubric.md"}))
            .unwrap();

        let out = tool.call_in_run(input, &run).await.unwrap();
        assert!(out.success);
        let usage = run.budget.usage();
        assert_eq!(usage.used_items, 1);
        assert_eq!(usage.used_bytes, "Score clarity 0-10".len());
    }

    #[tokio::test]
    async fn test_read_context_degraded() {
        let ctx = EngineContext::with_loader(&Config::default_config(), Arc::new(OneDoc));
        let tool = ReadContextTool::new(ctx);
        let input = tool
            .schema()
            .validate(&json!({"reference": "missing.md"}))
            .unwrap();

        let out = tool.call(input).await.unwrap();
        assert_eq!(out.data["degraded"], true);
    }
}
