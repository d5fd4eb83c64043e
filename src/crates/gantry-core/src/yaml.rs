//! YAML-based pipeline definitions.
//!
//! The DOT-source parser is an external collaborator; YAML is the
//! built-in declarative format. A [`RawGraph`] serializes naturally, so
//! a pipeline file is just:
//!
//! ```yaml
//! name: linear
//! attrs:
//!   goal: a REST API
//! nodes:
//!   - id: start
//!     attrs: { shape: Mdiamond }
//!   - id: codegen
//!     attrs: { shape: box, prompt: "Build $goal" }
//!   - id: exit
//!     attrs: { shape: Msquare }
//! edges:
//!   - { from: start, to: codegen }
//!   - { from: codegen, to: exit }
//! ```

use std::path::Path;

use crate::error::Result;
use crate::graph::{GraphSource, RawGraph};

impl RawGraph {
    /// Parse a pipeline definition from a YAML string.
    pub fn from_yaml_str(text: &str) -> Result<RawGraph> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Load a pipeline definition from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<RawGraph> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Render back to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// [`GraphSource`] over the YAML format.
pub struct YamlGraphSource;

impl GraphSource for YamlGraphSource {
    fn parse(&self, text: &str) -> Result<RawGraph> {
        RawGraph::from_yaml_str(text)
    }
}
