//! Turn orchestration
//!
//! One user turn runs the state machine
//!
//! ```text
//! ROUTING --decision: agent x--> AGENT_ACTIVE(x) --single reply--> ROUTING
//! ROUTING --decision: end------> TERMINATED
//! ```
//!
//! until the turn ends. By default an agent's reply ends the turn; with
//! `reroute_after_reply` the router is consulted again, and each ROUTING -> AGENT_ACTIVE
//! transition counts against `max_transitions`.
//!
//! Every turn is staged against a private copy of the thread and committed to the store in
//! one call at the end. A turn that fails (router error, protocol violation, ceiling) commits
//! nothing. Turns on the same thread id are serialized; different thread ids run
//! independently.

use std::sync::Arc;

use tower::Layer;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{RouterConfig, RoutingStrategy};
use crate::error::{Result, RouterError};
use crate::invoker::AgentInvoker;
use crate::items::{self, ConversationTurn};
use crate::observability::TracingLayer;
use crate::provider::{boxed, GenerationSvc};
use crate::registry::AgentRegistry;
use crate::resilience::TimeoutLayer;
use crate::routing::{AnyRouter, DegradedRouting, RouteRequest, RouteTarget, Router};
use crate::sessions::{ConversationStore, InMemoryConversationStore, ThreadLocks};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnState {
    Routing,
    AgentActive(String),
    Terminated,
}

/// What one user turn produced.
#[derive(Debug)]
pub struct TurnOutcome {
    pub thread_id: String,
    /// Agent- or router-authored turns appended this turn, in order
    pub replies: Vec<ConversationTurn>,
    /// `Routing` when the turn ended normally, `Terminated` on the end sentinel
    pub final_state: TurnState,
    /// Active agent after the turn
    pub current_agent: Option<String>,
    /// ROUTING -> AGENT_ACTIVE transitions taken
    pub transitions: usize,
    pub degraded: Vec<DegradedRouting>,
    /// Invoker failures that were answered with a fallback reply
    pub fallbacks: Vec<RouterError>,
}

impl TurnOutcome {
    pub fn is_terminated(&self) -> bool {
        self.final_state == TurnState::Terminated
    }
}

pub struct Orchestrator<S = InMemoryConversationStore> {
    router: Arc<dyn Router>,
    invoker: AgentInvoker,
    registry: Arc<AgentRegistry>,
    store: S,
    config: RouterConfig,
    turn_locks: ThreadLocks<()>,
}

impl Orchestrator<InMemoryConversationStore> {
    /// Wire router and invoker from config over one generation service, with an in-memory store.
    pub fn from_config(
        config: RouterConfig,
        service: GenerationSvc,
        registry: Arc<AgentRegistry>,
    ) -> Result<Self> {
        Self::from_config_with_store(config, service, registry, InMemoryConversationStore::new())
    }
}

impl<S: ConversationStore> Orchestrator<S> {
    pub fn new(
        router: impl Router + 'static,
        invoker: AgentInvoker,
        registry: Arc<AgentRegistry>,
        store: S,
        config: RouterConfig,
    ) -> Self {
        Self {
            router: Arc::new(router),
            invoker,
            registry,
            store,
            config,
            turn_locks: ThreadLocks::new(),
        }
    }

    /// Like `from_config`, with a caller-supplied store. Every generation call gets a
    /// `generation` span and the configured timeout.
    pub fn from_config_with_store(
        config: RouterConfig,
        service: GenerationSvc,
        registry: Arc<AgentRegistry>,
        store: S,
    ) -> Result<Self> {
        config.validate()?;
        if registry.is_empty() {
            return Err(RouterError::configuration("no agents registered"));
        }

        let timed = TimeoutLayer::new(config.request_timeout).layer(service);
        let service = boxed(TracingLayer::new().layer(timed));

        let router = AnyRouter::from_config(&config, service.clone(), registry.clone());
        let invoker = AgentInvoker::new(service, config.agent_context)
            .temperature(config.agent_temperature)
            .label_replies(config.strategy == RoutingStrategy::Structured);

        info!(
            "🚀 Orchestrator ready: {:?} routing over {} agents",
            config.strategy,
            registry.len()
        );
        Ok(Self::new(router, invoker, registry, store, config))
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Run one user turn on `thread_id`.
    #[instrument(skip(self, user_input), fields(strategy = ?self.router.strategy()))]
    pub async fn handle_turn(&self, thread_id: &str, user_input: &str) -> Result<TurnOutcome> {
        let _turn = self.turn_locks.lock(thread_id).await?;

        let thread = self.store.get(thread_id).await?;
        let mut history = thread.turns;
        let mut current_agent = thread.current_agent;

        let user = ConversationTurn::user(user_input);
        history.push(user.clone());
        let mut staged = vec![user];

        let mut state = TurnState::Routing;
        let mut transitions = 0;
        let mut activated: Option<String> = None;
        let mut replies = Vec::new();
        let mut degraded = Vec::new();
        let mut fallbacks = Vec::new();

        loop {
            match state {
                TurnState::Routing => {
                    let request = RouteRequest {
                        recent: items::recent(&history, self.config.router_context_turns).to_vec(),
                        current_agent: current_agent.clone(),
                    };
                    let decision = self.router.decide(request).await.map_err(|e| {
                        error!("❌ Routing failed for {}: {}", thread_id, e);
                        e
                    })?;
                    if let Some(rationale) = &decision.rationale {
                        debug!("Routing rationale: {}", rationale);
                    }
                    if let Some(d) = decision.degraded {
                        degraded.push(d);
                    }

                    match decision.target {
                        RouteTarget::Agent(name) => {
                            if transitions >= self.config.max_transitions {
                                error!(
                                    "❌ Maximum transitions exceeded ({})",
                                    self.config.max_transitions
                                );
                                return Err(RouterError::RecursionLimitExceeded {
                                    limit: self.config.max_transitions,
                                });
                            }
                            transitions += 1;
                            if let Some(ack) = decision.acknowledgement {
                                history.push(ack.clone());
                                staged.push(ack);
                            }
                            state = TurnState::AgentActive(name);
                        }
                        RouteTarget::Terminate => {
                            info!("🏁 Conversation finished on {}", thread_id);
                            state = TurnState::Terminated;
                        }
                        RouteTarget::RouterHandled { reply } => {
                            warn!("⚠️ Turn on {} handled by router without handoff", thread_id);
                            if let Some(reply) = reply {
                                let turn = ConversationTurn::router(reply);
                                history.push(turn.clone());
                                staged.push(turn.clone());
                                replies.push(turn);
                            }
                            break;
                        }
                    }
                }
                TurnState::AgentActive(name) => {
                    let descriptor = self.registry.lookup(&name)?;
                    info!(
                        "🤖 Executing agent: {} (transition #{}/{})",
                        name, transitions, self.config.max_transitions
                    );
                    let invocation = self.invoker.invoke(descriptor, &history).await;
                    if let Some(failure) = invocation.failure {
                        warn!("{} answered with fallback: {}", name, failure);
                        fallbacks.push(failure);
                    }
                    history.push(invocation.turn.clone());
                    staged.push(invocation.turn.clone());
                    replies.push(invocation.turn);

                    current_agent = Some(name.clone());
                    activated = Some(name);
                    state = TurnState::Routing;
                    if !self.config.reroute_after_reply {
                        break;
                    }
                }
                TurnState::Terminated => break,
            }
        }

        self.store.commit(thread_id, staged, activated).await?;
        info!(
            "🎯 Turn complete on {}: {} replies, {} transitions, current agent: {:?}",
            thread_id,
            replies.len(),
            transitions,
            current_agent
        );

        Ok(TurnOutcome {
            thread_id: thread_id.to_string(),
            replies,
            final_state: state,
            current_agent,
            transitions,
            degraded,
            fallbacks,
        })
    }
}
