//! Tool-based handoff routing
//!
//! The router model is offered one `transfer_to_<agent>` capability per registered agent and
//! told not to answer the user directly. Whatever it invokes decides the next agent:
//! - exactly one transfer: route there and record a "Successfully transferred" turn
//! - several transfers: the first one wins, the rest are reported as ignored
//! - no transfer: the router's own text (if any) becomes the reply for this turn

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tower::{Service, ServiceExt};
use tracing::{debug, info, instrument, trace, warn};

use super::{DegradedRouting, RouteRequest, RouteTarget, Router, RoutingDecision};
use crate::config::RoutingStrategy;
use crate::error::{Result, RouterError};
use crate::items::ConversationTurn;
use crate::provider::{Capability, CapabilityInvocation, GenerationRequest, GenerationSvc};
use crate::registry::AgentRegistry;

const TRANSFER_PREFIX: &str = "transfer_to_";

/// Transfer capabilities derived from the registry, one per agent in registration order.
#[derive(Debug, Clone)]
pub struct TransferTools {
    handoffs: Vec<(String, String, String)>,
}

impl TransferTools {
    pub fn from_registry(registry: &AgentRegistry) -> Self {
        let handoffs = registry
            .list()
            .iter()
            .map(|a| {
                let description = if a.description.trim().is_empty() {
                    format!("Transfer to {}", a.name)
                } else {
                    a.description.clone()
                };
                (Self::tool_name(&a.name), a.name.clone(), description)
            })
            .collect();
        Self { handoffs }
    }

    /// "research_agent" -> "transfer_to_research_agent"
    pub fn tool_name(agent: &str) -> String {
        format!("{}{}", TRANSFER_PREFIX, agent)
    }

    #[instrument(skip(self))]
    pub fn capabilities(&self) -> Vec<Capability> {
        debug!("Generating {} transfer capabilities", self.handoffs.len());
        self.handoffs
            .iter()
            .map(|(tool, target, description)| {
                trace!("  Tool: {} → {}", tool, target);
                Capability {
                    name: tool.clone(),
                    description: description.clone(),
                    parameters: json!({
                        "type": "object",
                        "properties": {
                            "reason": {
                                "type": "string",
                                "description": "Reason for the transfer"
                            }
                        }
                    }),
                }
            })
            .collect()
    }

    pub fn is_transfer(&self, tool_name: &str) -> bool {
        self.target(tool_name).is_some()
    }

    /// Agent a transfer capability hands off to.
    pub fn target(&self, tool_name: &str) -> Option<&str> {
        self.handoffs
            .iter()
            .find(|(tool, _, _)| tool == tool_name)
            .map(|(_, target, _)| target.as_str())
    }

    pub fn len(&self) -> usize {
        self.handoffs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handoffs.is_empty()
    }
}

#[derive(Clone)]
pub struct ToolHandoffRouter {
    service: GenerationSvc,
    registry: Arc<AgentRegistry>,
    tools: TransferTools,
    temperature: Option<f32>,
}

impl ToolHandoffRouter {
    pub fn new(service: GenerationSvc, registry: Arc<AgentRegistry>) -> Self {
        let tools = TransferTools::from_registry(&registry);
        Self {
            service,
            registry,
            tools,
            temperature: None,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn tools(&self) -> &TransferTools {
        &self.tools
    }

    pub fn system_prompt(&self) -> String {
        let mut prompt = String::from(
            "You are a supervisor routing conversations between specialized agents. \
             The transfers are handled by tools. Do not respond directly to the user.\n\n\
             Available agents:\n",
        );
        for agent in self.registry.list() {
            let desc = agent
                .description
                .replace("Transfer to ", "")
                .replace(" agent", "");
            prompt.push_str(&format!("- {}: {}\n", agent.name, desc));
        }
        prompt.push_str(
            "\nConsider the user's latest message and the conversation flow to make the best routing decision.",
        );
        prompt
    }

    /// Turn the router's capability invocations into a decision.
    pub fn interpret(
        &self,
        content: Option<String>,
        invocations: Vec<CapabilityInvocation>,
    ) -> RoutingDecision {
        let mut transfers: Vec<(&str, Option<String>)> = Vec::new();
        for call in &invocations {
            match self.tools.target(&call.name) {
                Some(target) => {
                    let reason = call
                        .arguments
                        .get("reason")
                        .and_then(|v| v.as_str())
                        .map(|s| s.to_string());
                    transfers.push((target, reason));
                }
                None => warn!("Ignoring unknown capability {} from router", call.name),
            }
        }

        let mut iter = transfers.into_iter();
        let Some((target, reason)) = iter.next() else {
            warn!("⚠️ Router made no transfer, answering directly");
            let reply = content.filter(|c| !c.trim().is_empty());
            return RoutingDecision {
                target: RouteTarget::RouterHandled { reply },
                rationale: None,
                acknowledgement: None,
                degraded: Some(DegradedRouting::NoTransfer),
            };
        };

        let ignored: Vec<String> = iter.map(|(t, _)| t.to_string()).collect();
        let degraded = if ignored.is_empty() {
            None
        } else {
            warn!(
                "⚠️ Router requested {} transfers, using {} and ignoring {:?}",
                ignored.len() + 1,
                target,
                ignored
            );
            Some(DegradedRouting::MultipleTransfers { ignored })
        };

        info!("🔄 Transfer to {}", target);
        RoutingDecision {
            target: RouteTarget::Agent(target.to_string()),
            rationale: reason,
            acknowledgement: Some(ConversationTurn::transfer_ack(target)),
            degraded,
        }
    }
}

#[async_trait]
impl Router for ToolHandoffRouter {
    #[instrument(skip_all, fields(strategy = "tool_handoff", turns = request.recent.len()))]
    async fn decide(&self, request: RouteRequest) -> Result<RoutingDecision> {
        let mut req = GenerationRequest::new(self.system_prompt(), request.recent)
            .with_capabilities(self.tools.capabilities());
        if let Some(t) = self.temperature {
            req = req.with_temperature(t);
        }

        let mut svc = self.service.clone();
        let resp = svc
            .ready()
            .await
            .map_err(|e| RouterError::from_service(&e))?
            .call(req)
            .await
            .map_err(|e| RouterError::from_service(&e))?;

        Ok(self.interpret(resp.content, resp.invocations))
    }

    fn strategy(&self) -> RoutingStrategy {
        RoutingStrategy::ToolHandoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{boxed, GenerationResponse, ScriptedProvider};
    use crate::registry::{default_registry, AgentDescriptor};
    use crate::resilience::{GenerationError, ServiceErrorKind};

    fn router(provider: &ScriptedProvider) -> ToolHandoffRouter {
        ToolHandoffRouter::new(boxed(provider.clone()), Arc::new(default_registry()))
    }

    fn request(text: &str) -> RouteRequest {
        RouteRequest {
            recent: vec![ConversationTurn::user(text)],
            current_agent: None,
        }
    }

    #[test]
    fn one_capability_per_agent() {
        let tools = TransferTools::from_registry(&default_registry());
        let names: Vec<String> = tools.capabilities().into_iter().map(|c| c.name).collect();
        assert_eq!(
            names,
            vec![
                "transfer_to_support_agent",
                "transfer_to_research_agent",
                "transfer_to_manager_agent"
            ]
        );
        assert_eq!(tools.target("transfer_to_manager_agent"), Some("manager_agent"));
        assert!(!tools.is_transfer("transfer_to_billing_agent"));
    }

    #[test]
    fn blank_description_gets_default() {
        let registry = AgentRegistry::new()
            .with_agent(AgentDescriptor::new("billing_agent", "", "You bill."))
            .unwrap();
        let caps = TransferTools::from_registry(&registry).capabilities();
        assert_eq!(caps[0].description, "Transfer to billing_agent");
    }

    #[test]
    fn prompt_strips_transfer_wording() {
        let prompt = router(&ScriptedProvider::default()).system_prompt();
        assert!(prompt.contains("- research_agent: research for analysis and detailed research."));
        assert!(prompt.contains("Do not respond directly to the user."));
    }

    #[tokio::test]
    async fn single_transfer_routes_and_acknowledges() {
        let provider = ScriptedProvider::responses(vec![GenerationResponse::invoking(&[
            "transfer_to_research_agent",
        ])]);
        let decision = router(&provider).decide(request("research AI trends")).await.unwrap();
        assert_eq!(decision.target, RouteTarget::Agent("research_agent".into()));
        assert_eq!(
            decision.acknowledgement,
            Some(ConversationTurn::transfer_ack("research_agent"))
        );
        assert!(decision.degraded.is_none());
        assert_eq!(provider.requests()[0].capabilities.len(), 3);
    }

    #[tokio::test]
    async fn first_of_several_transfers_wins() {
        let provider = ScriptedProvider::responses(vec![GenerationResponse::invoking(&[
            "transfer_to_manager_agent",
            "transfer_to_support_agent",
        ])]);
        let decision = router(&provider).decide(request("escalate")).await.unwrap();
        assert_eq!(decision.target, RouteTarget::Agent("manager_agent".into()));
        assert_eq!(
            decision.degraded,
            Some(DegradedRouting::MultipleTransfers {
                ignored: vec!["support_agent".into()]
            })
        );
    }

    #[tokio::test]
    async fn no_transfer_is_router_handled() {
        let provider =
            ScriptedProvider::responses(vec![GenerationResponse::text("Could you clarify?")]);
        let decision = router(&provider).decide(request("hmm")).await.unwrap();
        assert_eq!(
            decision.target,
            RouteTarget::RouterHandled {
                reply: Some("Could you clarify?".into())
            }
        );
        assert_eq!(decision.degraded, Some(DegradedRouting::NoTransfer));
        assert!(decision.acknowledgement.is_none());
    }

    #[tokio::test]
    async fn unknown_capability_is_ignored() {
        let provider = ScriptedProvider::responses(vec![GenerationResponse::invoking(&[
            "lookup_weather",
            "transfer_to_support_agent",
        ])]);
        let decision = router(&provider).decide(request("help")).await.unwrap();
        assert_eq!(decision.target, RouteTarget::Agent("support_agent".into()));
        assert!(decision.degraded.is_none());
    }

    #[tokio::test]
    async fn reason_argument_becomes_rationale() {
        let r = router(&ScriptedProvider::default());
        let decision = r.interpret(
            None,
            vec![CapabilityInvocation {
                id: "call_0".into(),
                name: "transfer_to_support_agent".into(),
                arguments: json!({"reason": "account question"}),
            }],
        );
        assert_eq!(decision.rationale.as_deref(), Some("account question"));
    }

    #[tokio::test]
    async fn service_failure_is_classified() {
        let provider = ScriptedProvider::new(vec![Err(GenerationError::new(
            ServiceErrorKind::RateLimit,
            "slow down",
        ))]);
        let err = router(&provider).decide(request("hi")).await.unwrap_err();
        assert!(matches!(
            err,
            RouterError::GenerationService {
                kind: ServiceErrorKind::RateLimit,
                ..
            }
        ));
    }
}
