//! Structured-output routing
//!
//! The router model is shown the recent turns and a prompt enumerating every registered
//! agent, and must answer with `{ next_agent, reasoning }` where `next_agent` is one of the
//! registered names or `__end__`. The answer is accepted as-is; a label outside the set is a
//! protocol violation, never a silent default.

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower::{Service, ServiceExt};
use tracing::{debug, info, instrument};

use super::{RouteRequest, RouteTarget, Router, RoutingDecision, END_SENTINEL};
use crate::config::RoutingStrategy;
use crate::error::{Result, RouterError};
use crate::provider::{GenerationRequest, GenerationSvc, OutputSchema};
use crate::registry::AgentRegistry;
use crate::resilience::ServiceErrorKind;

/// Shape of the routing answer.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NextAgent {
    /// The next agent to route to, or '__end__' to finish
    pub next_agent: String,
    /// Brief explanation for the routing decision
    pub reasoning: String,
}

#[derive(Clone)]
pub struct StructuredRouter {
    service: GenerationSvc,
    registry: Arc<AgentRegistry>,
    temperature: Option<f32>,
}

impl StructuredRouter {
    pub fn new(service: GenerationSvc, registry: Arc<AgentRegistry>) -> Self {
        Self {
            service,
            registry,
            temperature: None,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    /// Registered names in order, then the end sentinel.
    pub fn labels(&self) -> Vec<String> {
        let mut labels = self.registry.names();
        labels.push(END_SENTINEL.to_string());
        labels
    }

    /// JSON schema for `NextAgent` with `next_agent` restricted to `labels()`.
    pub fn output_schema(&self) -> OutputSchema {
        let root = schemars::schema_for!(NextAgent);
        let mut schema = serde_json::to_value(&root).unwrap_or(Value::Null);
        if let Some(obj) = schema.as_object_mut() {
            obj.remove("$schema");
            obj.remove("title");
            obj.insert("additionalProperties".into(), Value::Bool(false));
            if let Some(next) = obj
                .get_mut("properties")
                .and_then(|p| p.get_mut("next_agent"))
                .and_then(Value::as_object_mut)
            {
                next.insert(
                    "enum".into(),
                    Value::Array(self.labels().into_iter().map(Value::String).collect()),
                );
            }
        }
        OutputSchema {
            name: "next_agent".into(),
            description: Some("Structured output for supervisor routing decisions".into()),
            schema,
            strict: true,
        }
    }

    pub fn system_prompt(&self, current_agent: Option<&str>) -> String {
        let current = current_agent
            .map(|n| match self.registry.lookup(n) {
                Ok(agent) => agent.title(),
                Err(_) => n.to_string(),
            })
            .or_else(|| self.registry.first().map(|a| a.title()))
            .unwrap_or_else(|| "no one".to_string());

        let mut prompt = String::from(
            "You are a supervisor routing conversations between specialized agents:\n\n",
        );
        for agent in self.registry.list() {
            prompt.push_str(&format!("- **{}**: {}\n", agent.name, agent.description));
        }
        prompt.push_str(&format!(
            "\nCurrent conversation context: The user is currently being helped by {}.\n\n",
            current
        ));
        prompt.push_str(
            "Based on the conversation, determine which agent should handle the next interaction:\n",
        );
        let mut n = 1;
        for agent in self.registry.list() {
            prompt.push_str(&format!(
                "{}. Route to **{}** if: {}\n",
                n, agent.name, agent.description
            ));
            n += 1;
        }
        prompt.push_str(&format!(
            "{}. Route to **{}** if the conversation is clearly finished (user says goodbye, thanks, etc.)\n\n",
            n, END_SENTINEL
        ));
        prompt.push_str(
            "Consider the user's latest message and the conversation flow to make the best routing decision.\n",
        );
        prompt
    }

    /// Map a raw label onto a target, rejecting anything outside `labels()`.
    pub fn interpret(&self, decision: NextAgent) -> Result<RoutingDecision> {
        let rationale = Some(decision.reasoning).filter(|r| !r.is_empty());
        if decision.next_agent == END_SENTINEL {
            return Ok(RoutingDecision::terminate().with_rationale(rationale));
        }
        if self.registry.contains(&decision.next_agent) {
            return Ok(RoutingDecision::to_agent(decision.next_agent).with_rationale(rationale));
        }
        Err(RouterError::RoutingProtocolViolation {
            label: decision.next_agent,
            allowed: self.labels(),
        })
    }
}

#[async_trait]
impl Router for StructuredRouter {
    #[instrument(skip_all, fields(strategy = "structured", turns = request.recent.len()))]
    async fn decide(&self, request: RouteRequest) -> Result<RoutingDecision> {
        let mut req = GenerationRequest::new(
            self.system_prompt(request.current_agent.as_deref()),
            request.recent,
        )
        .with_schema(self.output_schema());
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

        let payload = resp.structured.ok_or_else(|| RouterError::GenerationService {
            kind: ServiceErrorKind::Malformed,
            message: "routing response carried no structured payload".into(),
        })?;
        let raw: NextAgent =
            serde_json::from_value(payload).map_err(|e| RouterError::GenerationService {
                kind: ServiceErrorKind::Malformed,
                message: format!("routing payload does not match schema: {}", e),
            })?;

        debug!("Supervisor decision: {} - {}", raw.next_agent, raw.reasoning);
        let decision = self.interpret(raw)?;
        match &decision.target {
            RouteTarget::Agent(name) => info!("📍 Routing to {}", name),
            RouteTarget::Terminate => info!("🏁 Router ended the conversation"),
            RouteTarget::RouterHandled { .. } => {}
        }
        Ok(decision)
    }

    fn strategy(&self) -> RoutingStrategy {
        RoutingStrategy::Structured
    }
}
