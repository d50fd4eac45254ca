//! Routing: who handles the next turn
//!
//! Two interchangeable strategies behind the `Router` trait:
//! - `StructuredRouter`: one generation call constrained to a JSON schema whose `next_agent`
//!   enum is exactly the registered names plus `__end__`
//! - `ToolHandoffRouter`: the router is offered one `transfer_to_<agent>` capability per
//!   registered agent; the first transfer it invokes is the decision
//!
//! A router never mutates conversation state. It returns a `RoutingDecision` which the
//! orchestrator applies (or discards, if the turn later fails).

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{RouterConfig, RoutingStrategy};
use crate::error::Result;
use crate::items::ConversationTurn;
use crate::provider::GenerationSvc;
use crate::registry::AgentRegistry;

pub mod handoff;
pub mod structured;

pub use handoff::{ToolHandoffRouter, TransferTools};
pub use structured::StructuredRouter;

/// Label the structured router returns to end the conversation.
pub const END_SENTINEL: &str = "__end__";

/// Input to a routing decision.
#[derive(Debug, Clone, Default)]
pub struct RouteRequest {
    /// Most recent turns, oldest first, including the new user turn
    pub recent: Vec<ConversationTurn>,
    /// Agent that handled the previous exchange, if any
    pub current_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    Agent(String),
    Terminate,
    /// The tool-handoff router answered without transferring
    RouterHandled { reply: Option<String> },
}

/// Why a tool-handoff decision was not a clean single transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DegradedRouting {
    NoTransfer,
    MultipleTransfers { ignored: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDecision {
    pub target: RouteTarget,
    pub rationale: Option<String>,
    /// Synthetic turn recording a tool-based transfer
    pub acknowledgement: Option<ConversationTurn>,
    pub degraded: Option<DegradedRouting>,
}

impl RoutingDecision {
    pub fn to_agent(name: impl Into<String>) -> Self {
        Self {
            target: RouteTarget::Agent(name.into()),
            rationale: None,
            acknowledgement: None,
            degraded: None,
        }
    }

    pub fn terminate() -> Self {
        Self {
            target: RouteTarget::Terminate,
            rationale: None,
            acknowledgement: None,
            degraded: None,
        }
    }

    pub fn with_rationale(mut self, rationale: Option<String>) -> Self {
        self.rationale = rationale;
        self
    }
}

#[async_trait]
pub trait Router: Send + Sync {
    async fn decide(&self, request: RouteRequest) -> Result<RoutingDecision>;

    fn strategy(&self) -> RoutingStrategy;
}

/// Router selected by configuration.
pub enum AnyRouter {
    Structured(StructuredRouter),
    ToolHandoff(ToolHandoffRouter),
}

impl AnyRouter {
    pub fn from_config(
        config: &RouterConfig,
        service: GenerationSvc,
        registry: Arc<AgentRegistry>,
    ) -> Self {
        match config.strategy {
            RoutingStrategy::Structured => AnyRouter::Structured(
                StructuredRouter::new(service, registry).temperature(config.router_temperature),
            ),
            RoutingStrategy::ToolHandoff => AnyRouter::ToolHandoff(
                ToolHandoffRouter::new(service, registry).temperature(config.router_temperature),
            ),
        }
    }
}

impl From<StructuredRouter> for AnyRouter {
    fn from(r: StructuredRouter) -> Self {
        AnyRouter::Structured(r)
    }
}

impl From<ToolHandoffRouter> for AnyRouter {
    fn from(r: ToolHandoffRouter) -> Self {
        AnyRouter::ToolHandoff(r)
    }
}

#[async_trait]
impl Router for AnyRouter {
    async fn decide(&self, request: RouteRequest) -> Result<RoutingDecision> {
        match self {
            AnyRouter::Structured(r) => r.decide(request).await,
            AnyRouter::ToolHandoff(r) => r.decide(request).await,
        }
    }

    fn strategy(&self) -> RoutingStrategy {
        match self {
            AnyRouter::Structured(r) => r.strategy(),
            AnyRouter::ToolHandoff(r) => r.strategy(),
        }
    }
}
