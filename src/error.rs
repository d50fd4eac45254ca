//! Error types for routing and handoff

use thiserror::Error;

use crate::resilience::ServiceErrorKind;

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, RouterError>;

/// Main error type for routing, invocation and configuration failures
#[derive(Debug, Error)]
pub enum RouterError {
    /// Required setting missing or invalid at startup
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Decision service returned a label outside the registered set
    #[error("Routing protocol violation: `{label}` is not one of [{}]", allowed.join(", "))]
    RoutingProtocolViolation { label: String, allowed: Vec<String> },

    /// Too many ROUTING -> AGENT_ACTIVE transitions within one user turn
    #[error("Recursion limit exceeded: more than {limit} agent transitions in one turn")]
    RecursionLimitExceeded { limit: usize },

    /// Failure talking to the language-generation service
    #[error("Generation service error ({kind}): {message}")]
    GenerationService {
        kind: ServiceErrorKind,
        message: String,
    },

    /// Registry lookup for an unknown agent
    #[error("Agent not found: {name}")]
    NotFound { name: String },

    /// Registry already holds an agent with this name
    #[error("Agent already registered: {name}")]
    DuplicateName { name: String },

    /// Conversation store failure
    #[error("Session error: {0}")]
    Session(String),
}

impl RouterError {
    pub fn configuration(message: impl Into<String>) -> Self {
        RouterError::Configuration {
            message: message.into(),
        }
    }

    /// Build a generation error by classifying a boxed service error.
    pub fn from_service(err: &tower::BoxError) -> Self {
        RouterError::GenerationService {
            kind: crate::resilience::classify(err),
            message: err.to_string(),
        }
    }

    /// True for errors that abort a single user turn but leave the process running.
    pub fn is_fatal_for_turn(&self) -> bool {
        matches!(
            self,
            RouterError::RoutingProtocolViolation { .. }
                | RouterError::RecursionLimitExceeded { .. }
                | RouterError::GenerationService { .. }
                | RouterError::NotFound { .. }
                | RouterError::Session(_)
        )
    }
}
