//! # gantry-agent - Agent Loop & Tooling
//!
//! Bridges the pipeline engine's codergen stages onto the unified LLM
//! core: an [`AgentLoop`] drives a session through tool calls until a
//! terminal response, with a standard read/write/edit/shell/grep/glob
//! tool registry bound to an [`ExecutionEnvironment`].
//!
//! A [`ProviderProfile`] picks the model and frames the session; node
//! attributes (`llm_model`, `llm_provider`, `reasoning_effort`,
//! `timeout_ms`) override it per stage. The loop implements
//! [`gantry_core::CodergenBackend`], so wiring an agent into an engine is
//! one configuration call:
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use gantry_agent::{AgentLoop, LocalEnvironment, ProviderProfile};
//! use gantry_core::{Engine, EngineConfig};
//! use gantry_llm::Client;
//!
//! let agent = AgentLoop::new(
//!     Client::from_env(),
//!     ProviderProfile::new("anthropic", "claude-sonnet-4-20250514"),
//!     Arc::new(LocalEnvironment::new(".")),
//! );
//! let engine = Engine::new(EngineConfig::new().with_backend(Arc::new(agent)));
//! ```

pub mod agent;
pub mod env;
pub mod profile;
pub mod tools;

pub use agent::AgentLoop;
pub use env::{ExecutionEnvironment, GrepMatch, LocalEnvironment, ShellOutput};
pub use profile::ProviderProfile;
pub use tools::standard_tools;
