//! Single-shot agent invocation
//!
//! `AgentInvoker::invoke` builds a prompt from the agent's system prompt plus a window of the
//! conversation, asks the generation service for one completion, and returns the reply as a
//! turn. Service failures never escape: the agent's canned fallback reply is returned and the
//! classified failure travels alongside it for the caller to log.

use tower::{Service, ServiceExt};
use tracing::{error, info, instrument, warn};

use crate::config::ContextWindow;
use crate::error::RouterError;
use crate::items::{self, ConversationTurn};
use crate::provider::{GenerationRequest, GenerationSvc};
use crate::registry::AgentDescriptor;

/// Result of one agent call.
#[derive(Debug)]
pub struct Invocation {
    pub turn: ConversationTurn,
    /// Present when `turn` is the fallback reply
    pub failure: Option<RouterError>,
}

impl Invocation {
    pub fn is_fallback(&self) -> bool {
        self.failure.is_some()
    }
}

#[derive(Clone)]
pub struct AgentInvoker {
    service: GenerationSvc,
    window: ContextWindow,
    temperature: Option<f32>,
    label_replies: bool,
}

impl AgentInvoker {
    pub fn new(service: GenerationSvc, window: ContextWindow) -> Self {
        Self {
            service,
            window,
            temperature: None,
            label_replies: false,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    /// Prefix replies with `[Agent Title]: `.
    pub fn label_replies(mut self, enabled: bool) -> Self {
        self.label_replies = enabled;
        self
    }

    pub fn window(&self) -> ContextWindow {
        self.window
    }

    /// Build the request an agent would send for the given history.
    pub fn request_for(
        &self,
        descriptor: &AgentDescriptor,
        history: &[ConversationTurn],
    ) -> GenerationRequest {
        let mut req = GenerationRequest::new(
            descriptor.system_prompt.clone(),
            items::window(history, self.window),
        );
        if let Some(t) = self.temperature {
            req = req.with_temperature(t);
        }
        req
    }

    #[instrument(skip_all, fields(agent = %descriptor.name))]
    pub async fn invoke(
        &self,
        descriptor: &AgentDescriptor,
        history: &[ConversationTurn],
    ) -> Invocation {
        info!("{} activated", descriptor.display_label);

        if self.window == ContextWindow::LatestUserMessage && items::latest_user(history).is_none()
        {
            warn!("No user message found for {}", descriptor.name);
            return Invocation {
                turn: ConversationTurn::agent(&descriptor.name, "No user message found."),
                failure: None,
            };
        }

        let req = self.request_for(descriptor, history);
        let mut svc = self.service.clone();
        let result = match svc.ready().await {
            Ok(ready) => ready.call(req).await,
            Err(e) => Err(e),
        };

        let failure = match result {
            Ok(resp) => match resp.content.filter(|c| !c.trim().is_empty()) {
                Some(content) => {
                    let content = if self.label_replies {
                        format!("[{}]: {}", descriptor.title(), content)
                    } else {
                        content
                    };
                    return Invocation {
                        turn: ConversationTurn::agent(&descriptor.name, content),
                        failure: None,
                    };
                }
                None => RouterError::GenerationService {
                    kind: crate::resilience::ServiceErrorKind::Malformed,
                    message: "completion had no content".to_string(),
                },
            },
            Err(e) => RouterError::from_service(&e),
        };

        error!("❌ {} failed, using fallback reply: {}", descriptor.name, failure);
        Invocation {
            turn: ConversationTurn::agent(&descriptor.name, descriptor.fallback_text()),
            failure: Some(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{boxed, GenerationResponse, ScriptedProvider};
    use crate::registry::default_registry;
    use crate::resilience::{GenerationError, ServiceErrorKind};

    fn history() -> Vec<ConversationTurn> {
        vec![
            ConversationTurn::user("old question"),
            ConversationTurn::agent("support_agent", "old answer"),
            ConversationTurn::transfer_ack("research_agent"),
            ConversationTurn::user("research AI trends"),
        ]
    }

    #[tokio::test]
    async fn reply_uses_system_prompt_and_latest_user_message() {
        let registry = default_registry();
        let agent = registry.lookup("research_agent").unwrap();
        let provider = ScriptedProvider::responses(vec![GenerationResponse::text("trends...")]);
        let invoker = AgentInvoker::new(boxed(provider.clone()), ContextWindow::LatestUserMessage)
            .temperature(0.7);

        let inv = invoker.invoke(agent, &history()).await;
        assert!(!inv.is_fallback());
        assert_eq!(inv.turn, ConversationTurn::agent("research_agent", "trends..."));

        let sent = &provider.requests()[0];
        assert_eq!(sent.system_prompt, agent.system_prompt);
        assert_eq!(sent.messages, vec![ConversationTurn::user("research AI trends")]);
        assert_eq!(sent.temperature, Some(0.7));
    }

    #[tokio::test]
    async fn labelled_replies_carry_agent_title() {
        let registry = default_registry();
        let agent = registry.lookup("manager_agent").unwrap();
        let provider = ScriptedProvider::responses(vec![GenerationResponse::text("Approved.")]);
        let invoker =
            AgentInvoker::new(boxed(provider.clone()), ContextWindow::RecentTurns(3))
                .label_replies(true);

        let inv = invoker.invoke(agent, &history()).await;
        assert_eq!(inv.turn.content, "[Manager Agent]: Approved.");
        assert_eq!(provider.requests()[0].messages.len(), 3);
    }

    #[tokio::test]
    async fn network_failure_returns_fallback() {
        let registry = default_registry();
        let agent = registry.lookup("support_agent").unwrap();
        let provider = ScriptedProvider::new(vec![Err(GenerationError::new(
            ServiceErrorKind::Network,
            "connection refused",
        ))]);
        let invoker = AgentInvoker::new(boxed(provider), ContextWindow::LatestUserMessage);

        let inv = invoker.invoke(agent, &history()).await;
        assert_eq!(inv.turn.content, agent.fallback_text());
        assert_eq!(inv.turn.source_agent.as_deref(), Some("support_agent"));
        assert!(matches!(
            inv.failure,
            Some(RouterError::GenerationService {
                kind: ServiceErrorKind::Network,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn empty_completion_is_malformed() {
        let registry = default_registry();
        let agent = registry.lookup("support_agent").unwrap();
        let provider = ScriptedProvider::responses(vec![GenerationResponse::default()]);
        let invoker = AgentInvoker::new(boxed(provider), ContextWindow::RecentTurns(2));

        let inv = invoker.invoke(agent, &history()).await;
        assert!(inv.is_fallback());
        assert!(matches!(
            inv.failure,
            Some(RouterError::GenerationService {
                kind: ServiceErrorKind::Malformed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn no_user_message_skips_service() {
        let registry = default_registry();
        let agent = registry.lookup("support_agent").unwrap();
        let provider = ScriptedProvider::default();
        let invoker = AgentInvoker::new(boxed(provider.clone()), ContextWindow::LatestUserMessage);

        let inv = invoker
            .invoke(agent, &[ConversationTurn::system("boot")])
            .await;
        assert_eq!(inv.turn.content, "No user message found.");
        assert!(provider.requests().is_empty());
    }
}
