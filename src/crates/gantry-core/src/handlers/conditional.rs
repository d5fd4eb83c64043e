//! Conditional nodes: pure passthrough.
//!
//! The edge selector does the actual branching using edge conditions and
//! the preferred label inherited from the previous codergen outcome
//! (the engine mirrors it into the `preferred_label` context key).

use async_trait::async_trait;

use crate::context::Context;
use crate::error::Result;
use crate::graph::Node;
use crate::handlers::{EngineServices, Handler};
use crate::outcome::Outcome;

pub struct ConditionalHandler;

#[async_trait]
impl Handler for ConditionalHandler {
    async fn execute(
        &self,
        _node: &Node,
        context: &Context,
        _services: &EngineServices<'_>,
    ) -> Result<Outcome> {
        let mut outcome = Outcome::success();
        let inherited = context.get_string("preferred_label", "");
        if !inherited.is_empty() {
            outcome.preferred_label = Some(inherited);
        }
        Ok(outcome)
    }
}
