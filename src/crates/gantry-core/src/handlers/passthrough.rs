//! Start and exit nodes: structural markers that always succeed.

use async_trait::async_trait;

use crate::context::Context;
use crate::error::Result;
use crate::graph::Node;
use crate::handlers::{EngineServices, Handler};
use crate::outcome::Outcome;

pub struct PassthroughHandler;

#[async_trait]
impl Handler for PassthroughHandler {
    async fn execute(
        &self,
        _node: &Node,
        _context: &Context,
        _services: &EngineServices<'_>,
    ) -> Result<Outcome> {
        Ok(Outcome::success())
    }
}
