//! Configuration for the router
//!
//! Two pieces, both passed explicitly into constructors:
//! - `Settings`: credentials and endpoint for the generation service, read once at startup
//! - `RouterConfig`: routing strategy and tunables, with defaults matching observed behaviour

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RouterError};

pub const API_KEY_VAR: &str = "OPENAI_API_KEY";
pub const BASE_URL_VAR: &str = "OPENAI_BASE_URL";
pub const MODEL_VAR: &str = "OPENAI_MODEL";

/// API credential that never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(**********)")
    }
}

/// Generation service settings
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_key: ApiKey,
    pub base_url: String,
    pub model: String,
}

impl Settings {
    /// Load from the process environment. Variable names are matched case-insensitively.
    pub fn from_env() -> Result<Self> {
        let vars: Vec<(String, String)> = std::env::vars().collect();
        Self::from_lookup(|name| {
            vars.iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        })
    }

    /// Load `.env` (if present) into the environment first, then read settings.
    pub fn from_env_file(path: Option<&std::path::Path>) -> Result<Self> {
        let loaded = match path {
            Some(p) => dotenvy::from_path(p).map(|_| Some(p.to_path_buf())),
            None => dotenvy::dotenv().map(Some),
        };
        match loaded {
            Ok(Some(p)) => tracing::debug!("Loaded environment from {}", p.display()),
            Ok(None) => {}
            Err(e) if e.not_found() && path.is_none() => {
                tracing::debug!("No .env file found, using process environment")
            }
            Err(e) => {
                return Err(RouterError::configuration(format!(
                    "failed to load env file: {}",
                    e
                )))
            }
        }
        Self::from_env()
    }

    /// Build settings from an arbitrary lookup function; missing or blank values are fatal.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| -> Result<String> {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    RouterError::configuration(format!("missing required setting {}", name))
                })
        };

        Ok(Self {
            api_key: ApiKey::new(required(API_KEY_VAR)?),
            base_url: required(BASE_URL_VAR)?,
            model: required(MODEL_VAR)?,
        })
    }
}

/// Which routing strategy decides the next agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Structured-output decision constrained to the registered labels
    #[default]
    Structured,
    /// Router agent invokes `transfer_to_<agent>` capabilities
    ToolHandoff,
}

/// How much of the conversation an agent sees when it replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextWindow {
    /// Only the most recent user message
    LatestUserMessage,
    /// The last `n` turns of any role
    RecentTurns(usize),
    /// The last `n` user/agent turns, skipping system turns such as transfer acknowledgements
    RecentConversational(usize),
}

/// Routing tunables
///
/// Deserialized fields that are absent take the defaults of the given strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RouterConfigFields")]
pub struct RouterConfig {
    pub strategy: RoutingStrategy,

    /// Ceiling on ROUTING -> AGENT_ACTIVE transitions per user turn
    pub max_transitions: usize,

    /// Turns shown to the router when deciding
    pub router_context_turns: usize,

    pub agent_context: ContextWindow,

    pub router_temperature: f32,

    pub agent_temperature: f32,

    /// Timeout for a single generation call
    pub request_timeout: Duration,

    /// Return to ROUTING after an agent reply instead of ending the user turn
    pub reroute_after_reply: bool,
}

/// `RouterConfig` as written in a config file, every field optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RouterConfigFields {
    strategy: RoutingStrategy,
    max_transitions: Option<usize>,
    router_context_turns: Option<usize>,
    agent_context: Option<ContextWindow>,
    router_temperature: Option<f32>,
    agent_temperature: Option<f32>,
    request_timeout: Option<Duration>,
    reroute_after_reply: Option<bool>,
}

impl From<RouterConfigFields> for RouterConfig {
    fn from(fields: RouterConfigFields) -> Self {
        let base = Self::for_strategy(fields.strategy);
        Self {
            strategy: fields.strategy,
            max_transitions: fields.max_transitions.unwrap_or(base.max_transitions),
            router_context_turns: fields
                .router_context_turns
                .unwrap_or(base.router_context_turns),
            agent_context: fields.agent_context.unwrap_or(base.agent_context),
            router_temperature: fields
                .router_temperature
                .unwrap_or(base.router_temperature),
            agent_temperature: fields.agent_temperature.unwrap_or(base.agent_temperature),
            request_timeout: fields.request_timeout.unwrap_or(base.request_timeout),
            reroute_after_reply: fields
                .reroute_after_reply
                .unwrap_or(base.reroute_after_reply),
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::for_strategy(RoutingStrategy::Structured)
    }
}

impl RouterConfig {
    /// Defaults for a strategy. Structured routing shows agents the last three turns;
    /// tool handoff shows them only the latest user message.
    pub fn for_strategy(strategy: RoutingStrategy) -> Self {
        let agent_context = match strategy {
            RoutingStrategy::Structured => ContextWindow::RecentTurns(3),
            RoutingStrategy::ToolHandoff => ContextWindow::LatestUserMessage,
        };
        Self {
            strategy,
            max_transitions: 10,
            router_context_turns: 3,
            agent_context,
            router_temperature: 0.1,
            agent_temperature: 0.7,
            request_timeout: Duration::from_secs(60),
            reroute_after_reply: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_transitions == 0 {
            return Err(RouterError::configuration(
                "max_transitions must be at least 1",
            ));
        }
        if self.router_context_turns == 0 {
            return Err(RouterError::configuration(
                "router_context_turns must be at least 1",
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(RouterError::configuration("request_timeout must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn settings_load_all_required() {
        let settings = Settings::from_lookup(lookup_from(&[
            (API_KEY_VAR, "sk-test"),
            (BASE_URL_VAR, "http://localhost:8080/v1"),
            (MODEL_VAR, "gpt-4o-mini"),
        ]))
        .unwrap();
        assert_eq!(settings.api_key.expose(), "sk-test");
        assert_eq!(settings.base_url, "http://localhost:8080/v1");
        assert_eq!(settings.model, "gpt-4o-mini");
    }

    #[test]
    fn missing_setting_is_configuration_error() {
        let err = Settings::from_lookup(lookup_from(&[
            (API_KEY_VAR, "sk-test"),
            (MODEL_VAR, "gpt-4o-mini"),
        ]))
        .unwrap_err();
        assert!(matches!(err, RouterError::Configuration { .. }));
        assert!(err.to_string().contains(BASE_URL_VAR));
    }

    #[test]
    fn blank_setting_counts_as_missing() {
        let err = Settings::from_lookup(lookup_from(&[
            (API_KEY_VAR, "   "),
            (BASE_URL_VAR, "http://localhost"),
            (MODEL_VAR, "m"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains(API_KEY_VAR));
    }

    #[test]
    fn api_key_is_redacted() {
        let key = ApiKey::new("sk-secret");
        assert!(!format!("{:?}", key).contains("sk-secret"));
    }

    #[test]
    fn strategy_defaults() {
        let structured = RouterConfig::default();
        assert_eq!(structured.max_transitions, 10);
        assert_eq!(structured.router_context_turns, 3);
        assert_eq!(structured.agent_context, ContextWindow::RecentTurns(3));
        assert!(!structured.reroute_after_reply);

        let tools = RouterConfig::for_strategy(RoutingStrategy::ToolHandoff);
        assert_eq!(tools.agent_context, ContextWindow::LatestUserMessage);
        assert!(tools.validate().is_ok());
    }

    #[test]
    fn zero_ceiling_rejected() {
        let cfg = RouterConfig {
            max_transitions: 0,
            ..RouterConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let cfg: RouterConfig =
            serde_json::from_str(r#"{"strategy":"tool_handoff","max_transitions":4}"#).unwrap();
        assert_eq!(cfg.strategy, RoutingStrategy::ToolHandoff);
        assert_eq!(cfg.max_transitions, 4);
        assert_eq!(cfg.router_context_turns, 3);
    }

    #[test]
    fn deserialized_defaults_follow_strategy() {
        let tools: RouterConfig = serde_json::from_str(r#"{"strategy":"tool_handoff"}"#).unwrap();
        assert_eq!(tools.agent_context, ContextWindow::LatestUserMessage);

        let structured: RouterConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(structured.strategy, RoutingStrategy::Structured);
        assert_eq!(structured.agent_context, ContextWindow::RecentTurns(3));

        let explicit: RouterConfig = serde_json::from_str(
            r#"{"strategy":"tool_handoff","agent_context":{"recent_conversational":5}}"#,
        )
        .unwrap();
        assert_eq!(explicit.agent_context, ContextWindow::RecentConversational(5));
    }
}
