//! Provider profiles: model choice, system prompt, and extra tools for
//! one agent flavor.

use gantry_llm::{ReasoningEffort, Tool};

use crate::env::ExecutionEnvironment;

/// Picks the model and frames the agent session.
#[derive(Clone)]
pub struct ProviderProfile {
    pub provider: String,
    pub model: String,
    pub reasoning_effort: Option<ReasoningEffort>,
    pub system_prompt: String,
    /// Provider-specific additions to the standard registry.
    pub extra_tools: Vec<Tool>,
}

impl ProviderProfile {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            reasoning_effort: None,
            system_prompt: default_system_prompt(),
            extra_tools: Vec::new(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_reasoning_effort(mut self, effort: ReasoningEffort) -> Self {
        self.reasoning_effort = Some(effort);
        self
    }

    pub fn with_extra_tool(mut self, tool: Tool) -> Self {
        self.extra_tools.push(tool);
        self
    }

    /// The full system prompt for a session in `environment`.
    pub fn render_system_prompt(&self, environment: &dyn ExecutionEnvironment) -> String {
        format!(
            "{}\n\nWorking directory: {}",
            self.system_prompt,
            environment.working_dir().display()
        )
    }

    /// Map the attribute-level effort names onto the request knob.
    pub fn effort_from_name(name: &str) -> Option<ReasoningEffort> {
        match name {
            "none" => Some(ReasoningEffort::None),
            "low" => Some(ReasoningEffort::Low),
            "medium" => Some(ReasoningEffort::Medium),
            "high" => Some(ReasoningEffort::High),
            _ => None,
        }
    }
}

fn default_system_prompt() -> String {
    "You are a coding agent working inside a checked-out repository. \
     Use the available tools to inspect and modify files, run commands, \
     and verify your work. Keep edits minimal and report what you did."
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::LocalEnvironment;

    #[test]
    fn effort_names_map() {
        assert_eq!(
            ProviderProfile::effort_from_name("high"),
            Some(ReasoningEffort::High)
        );
        assert_eq!(
            ProviderProfile::effort_from_name("none"),
            Some(ReasoningEffort::None)
        );
        assert_eq!(ProviderProfile::effort_from_name("extreme"), None);
    }

    #[test]
    fn system_prompt_includes_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let environment = LocalEnvironment::new(dir.path());
        let profile = ProviderProfile::new("anthropic", "claude-sonnet-4-20250514")
            .with_system_prompt("Be careful.");
        let rendered = profile.render_system_prompt(&environment);
        assert!(rendered.starts_with("Be careful."));
        assert!(rendered.contains(&dir.path().display().to_string()));
    }
}
