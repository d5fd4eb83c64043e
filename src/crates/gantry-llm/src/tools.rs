//! Tool definitions and executors for the generate-layer tool loop.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A function the model may call: name, description, JSON-schema parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON schema for the tool's arguments.
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// How the model is allowed to pick tools.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ToolChoice {
    /// The model decides whether to call a tool.
    #[default]
    Auto,
    /// Tools are disabled. Callers omit the tools array entirely for this
    /// mode; adapters never translate `None` alongside a tool list.
    None,
    /// The model must call some tool.
    Required,
    /// The model must call the named tool.
    Named(String),
}

type ExecutorFuture = Pin<Box<dyn Future<Output = std::result::Result<Value, String>> + Send>>;

/// Handler invoked when the model calls a tool. A `Err(String)` is fed back
/// to the model as an `is_error` tool result, never raised to the caller.
pub type ToolExecutorFn = dyn Fn(Value) -> ExecutorFuture + Send + Sync;

/// A tool definition plus an optional executor.
///
/// Tools without an executor are *passive*: they are advertised to the
/// model but the tool loop returns control to the caller instead of
/// executing them.
#[derive(Clone)]
pub struct Tool {
    pub definition: ToolDefinition,
    executor: Option<Arc<ToolExecutorFn>>,
}

impl Tool {
    /// A passive tool: advertised, never executed by the loop.
    pub fn passive(definition: ToolDefinition) -> Self {
        Self {
            definition,
            executor: None,
        }
    }

    /// A tool backed by an async executor closure.
    pub fn with_executor<F, Fut>(definition: ToolDefinition, executor: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, String>> + Send + 'static,
    {
        Self {
            definition,
            executor: Some(Arc::new(move |args| Box::pin(executor(args)))),
        }
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn is_passive(&self) -> bool {
        self.executor.is_none()
    }

    /// Run the executor. Callers must check [`Tool::is_passive`] first.
    pub async fn execute(&self, arguments: Value) -> std::result::Result<Value, String> {
        match &self.executor {
            Some(executor) => executor(arguments).await,
            None => Err(format!("tool '{}' has no executor", self.definition.name)),
        }
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("definition", &self.definition)
            .field("executor", &self.executor.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn executor_runs_and_errors_are_values() {
        let tool = Tool::with_executor(
            ToolDefinition::new("echo", "echo args", json!({"type": "object"})),
            |args| async move {
                if args.get("fail").is_some() {
                    Err("boom".to_string())
                } else {
                    Ok(args)
                }
            },
        );
        assert!(!tool.is_passive());
        assert_eq!(tool.execute(json!({"x": 1})).await.unwrap(), json!({"x": 1}));
        assert_eq!(tool.execute(json!({"fail": true})).await.unwrap_err(), "boom");
    }

    #[test]
    fn passive_tools_have_no_executor() {
        let tool = Tool::passive(ToolDefinition::new("hint", "", json!({})));
        assert!(tool.is_passive());
    }
}
