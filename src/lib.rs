//! # tower-handoff
//!
//! Route a conversation between a registry of prompt-configured agents, one user turn at a
//! time, over a Tower generation service.
//!
//! ## Core Concepts
//!
//! - **Registry**: agents are data (`AgentDescriptor`), keyed by name. The routing label set
//!   and the transfer capabilities are always derived from it
//! - **Router**: decides who handles the turn, either by a structured-output decision or by
//!   interpreting `transfer_to_<agent>` tool calls
//! - **Invoker**: asks the chosen agent for one reply and falls back to a canned reply when
//!   the generation service fails
//! - **Orchestrator**: runs ROUTING / AGENT_ACTIVE / TERMINATED for each user turn, enforces
//!   the transition ceiling and commits each turn to the store atomically
//! - **Layers**: timeout, retry and tracing are Tower middleware around the generation service
//!
//! ## Getting Started
//!
//! Set `OPENAI_API_KEY`, `OPENAI_BASE_URL` and `OPENAI_MODEL` (or put them in `.env`).
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tower_handoff::{default_registry, provider, OpenAIProvider, Orchestrator, RouterConfig, Settings};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let settings = Settings::from_env_file(None)?;
//! let service = provider::boxed(OpenAIProvider::from_settings(&settings));
//! let orchestrator =
//!     Orchestrator::from_config(RouterConfig::default(), service, Arc::new(default_registry()))?;
//!
//! let outcome = orchestrator
//!     .handle_turn("conversation-1", "I need help with my account")
//!     .await?;
//! for reply in &outcome.replies {
//!     println!("{}", reply.content);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod invoker;
pub mod items;
pub mod observability;
pub mod orchestrator;
pub mod provider;
pub mod registry;
pub mod repl;
pub mod resilience;
pub mod routing;
pub mod sessions;

pub use config::{ContextWindow, RouterConfig, RoutingStrategy, Settings};
pub use error::{Result, RouterError};
pub use invoker::{AgentInvoker, Invocation};
pub use items::{ConversationThread, ConversationTurn, Role};
pub use observability::TracingLayer;
pub use orchestrator::{Orchestrator, TurnOutcome, TurnState};
pub use provider::{
    GenerationRequest, GenerationResponse, GenerationSvc, OpenAIProvider, ScriptedProvider,
};
pub use registry::{default_registry, AgentDescriptor, AgentRegistry};
pub use resilience::{
    GenerationError, RetryLayer, RetryPolicy, ServiceErrorKind, TimeoutLayer, TransientErrors,
};
pub use routing::{
    AnyRouter, DegradedRouting, RouteRequest, RouteTarget, Router, RoutingDecision,
    StructuredRouter, ToolHandoffRouter, TransferTools, END_SENTINEL,
};
pub use sessions::{ConversationStore, InMemoryConversationStore};

// Re-export Tower traits that users need
pub use tower::{Layer, Service, ServiceExt};
