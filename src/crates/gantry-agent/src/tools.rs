//! The standard tool registry bound to an execution environment.
//!
//! Six tools: read_file, write_file, edit_file, shell, grep, glob. Each
//! returns structured JSON the model can consume; failures come back as
//! error strings the generate layer converts to `is_error` tool results.

use std::sync::Arc;

use serde_json::{json, Value};

use gantry_llm::{Tool, ToolDefinition};

use crate::env::ExecutionEnvironment;

fn string_arg(args: &Value, name: &str) -> Result<String, String> {
    args.get(name)
        .and_then(Value::as_str)
        .map(String::from)
        .ok_or_else(|| format!("missing required argument '{name}'"))
}

/// Build the standard toolset over an environment.
pub fn standard_tools(environment: Arc<dyn ExecutionEnvironment>) -> Vec<Tool> {
    let mut tools = Vec::new();

    let env = environment.clone();
    tools.push(Tool::with_executor(
        ToolDefinition::new(
            "read_file",
            "Read a file relative to the working directory.",
            json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            }),
        ),
        move |args| {
            let env = env.clone();
            async move {
                let path = string_arg(&args, "path")?;
                let content = env.read_file(&path).await?;
                Ok(Value::String(content))
            }
        },
    ));

    let env = environment.clone();
    tools.push(Tool::with_executor(
        ToolDefinition::new(
            "write_file",
            "Create or overwrite a file with the given content.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["path", "content"]
            }),
        ),
        move |args| {
            let env = env.clone();
            async move {
                let path = string_arg(&args, "path")?;
                let content = string_arg(&args, "content")?;
                env.write_file(&path, &content).await?;
                Ok(json!({"written": path, "bytes": content.len()}))
            }
        },
    ));

    let env = environment.clone();
    tools.push(Tool::with_executor(
        ToolDefinition::new(
            "edit_file",
            "Replace the first occurrence of old_string in a file with new_string.",
            json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "old_string": {"type": "string"},
                    "new_string": {"type": "string"}
                },
                "required": ["path", "old_string", "new_string"]
            }),
        ),
        move |args| {
            let env = env.clone();
            async move {
                let path = string_arg(&args, "path")?;
                let old_string = string_arg(&args, "old_string")?;
                let new_string = string_arg(&args, "new_string")?;
                let content = env.read_file(&path).await?;
                if !content.contains(&old_string) {
                    return Err(format!("old_string not found in {path}"));
                }
                let updated = content.replacen(&old_string, &new_string, 1);
                env.write_file(&path, &updated).await?;
                Ok(json!({"edited": path}))
            }
        },
    ));

    let env = environment.clone();
    tools.push(Tool::with_executor(
        ToolDefinition::new(
            "shell",
            "Run a shell command in the working directory.",
            json!({
                "type": "object",
                "properties": {"command": {"type": "string"}},
                "required": ["command"]
            }),
        ),
        move |args| {
            let env = env.clone();
            async move {
                let command = string_arg(&args, "command")?;
                let output = env.run_shell(&command).await?;
                Ok(json!({
                    "status": output.status,
                    "stdout": output.stdout,
                    "stderr": output.stderr,
                }))
            }
        },
    ));

    let env = environment.clone();
    tools.push(Tool::with_executor(
        ToolDefinition::new(
            "grep",
            "Search file contents with a regular expression.",
            json!({
                "type": "object",
                "properties": {
                    "pattern": {"type": "string"},
                    "glob": {"type": "string"}
                },
                "required": ["pattern"]
            }),
        ),
        move |args| {
            let env = env.clone();
            async move {
                let pattern = string_arg(&args, "pattern")?;
                let glob = args.get("glob").and_then(Value::as_str).map(String::from);
                let matches = env.grep(&pattern, glob.as_deref()).await?;
                let rendered: Vec<Value> = matches
                    .into_iter()
                    .map(|hit| json!({"path": hit.path, "line": hit.line, "text": hit.text}))
                    .collect();
                Ok(Value::Array(rendered))
            }
        },
    ));

    let env = environment;
    tools.push(Tool::with_executor(
        ToolDefinition::new(
            "glob",
            "List files matching a glob pattern.",
            json!({
                "type": "object",
                "properties": {"pattern": {"type": "string"}},
                "required": ["pattern"]
            }),
        ),
        move |args| {
            let env = env.clone();
            async move {
                let pattern = string_arg(&args, "pattern")?;
                let files = env.glob(&pattern).await?;
                Ok(json!(files))
            }
        },
    ));

    tools
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::LocalEnvironment;

    async fn toolset() -> (tempfile::TempDir, Vec<Tool>) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "alpha\nbeta\n").unwrap();
        let env: Arc<dyn ExecutionEnvironment> = Arc::new(LocalEnvironment::new(dir.path()));
        (dir, standard_tools(env))
    }

    fn tool<'t>(tools: &'t [Tool], name: &str) -> &'t Tool {
        tools.iter().find(|tool| tool.name() == name).unwrap()
    }

    #[tokio::test]
    async fn registry_has_the_standard_six() {
        let (_dir, tools) = toolset().await;
        let mut names: Vec<&str> = tools.iter().map(Tool::name).collect();
        names.sort();
        assert_eq!(
            names,
            vec!["edit_file", "glob", "grep", "read_file", "shell", "write_file"]
        );
        assert!(tools.iter().all(|tool| !tool.is_passive()));
    }

    #[tokio::test]
    async fn read_edit_write_flow() {
        let (_dir, tools) = toolset().await;

        let content = tool(&tools, "read_file")
            .execute(json!({"path": "notes.txt"}))
            .await
            .unwrap();
        assert_eq!(content, json!("alpha\nbeta\n"));

        tool(&tools, "edit_file")
            .execute(json!({"path": "notes.txt", "old_string": "beta", "new_string": "gamma"}))
            .await
            .unwrap();
        let content = tool(&tools, "read_file")
            .execute(json!({"path": "notes.txt"}))
            .await
            .unwrap();
        assert_eq!(content, json!("alpha\ngamma\n"));

        let error = tool(&tools, "edit_file")
            .execute(json!({"path": "notes.txt", "old_string": "zzz", "new_string": "y"}))
            .await
            .unwrap_err();
        assert!(error.contains("not found"));
    }

    #[tokio::test]
    async fn missing_arguments_error_cleanly() {
        let (_dir, tools) = toolset().await;
        let error = tool(&tools, "read_file").execute(json!({})).await.unwrap_err();
        assert!(error.contains("path"));
    }

    #[tokio::test]
    async fn grep_tool_returns_structured_hits() {
        let (_dir, tools) = toolset().await;
        let hits = tool(&tools, "grep")
            .execute(json!({"pattern": "beta"}))
            .await
            .unwrap();
        assert_eq!(hits[0]["path"], "notes.txt");
        assert_eq!(hits[0]["line"], 2);
    }
}
