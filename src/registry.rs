//! Agent registry
//!
//! Static mapping from agent name to its descriptor, populated at startup and read-only
//! afterwards. The routing label set and the transfer capabilities are always derived
//! from the current registry keys, never hardcoded.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, RouterError};
use crate::routing::END_SENTINEL;

/// Longest name that still fits a `transfer_to_<name>` tool name (64 chars).
const MAX_NAME_LEN: usize = 64 - "transfer_to_".len();

/// Configuration for one agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Unique identifier, also the routing label
    pub name: String,
    /// Used in routing prompts and transfer capability descriptions
    pub description: String,
    pub system_prompt: String,
    /// Human-facing label, e.g. "🔬 Research Agent"
    pub display_label: String,
    /// Reply used when the generation service fails for this agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_reply: Option<String>,
}

impl AgentDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let display_label = format!("🤖 {}", title_case(&name));
        Self {
            name,
            description: description.into(),
            system_prompt: system_prompt.into(),
            display_label,
            fallback_reply: None,
        }
    }

    pub fn with_emoji(mut self, emoji: &str) -> Self {
        self.display_label = format!("{} {}", emoji, self.title());
        self
    }

    pub fn with_display_label(mut self, label: impl Into<String>) -> Self {
        self.display_label = label.into();
        self
    }

    pub fn with_fallback_reply(mut self, reply: impl Into<String>) -> Self {
        self.fallback_reply = Some(reply.into());
        self
    }

    /// "research_agent" -> "Research Agent"
    pub fn title(&self) -> String {
        title_case(&self.name)
    }

    /// Canned reply for when this agent cannot reach the generation service.
    pub fn fallback_text(&self) -> String {
        self.fallback_reply.clone().unwrap_or_else(|| {
            format!(
                "[{}]: I apologize, but I'm experiencing technical difficulties. How can I help you today?",
                self.title()
            )
        })
    }
}

/// Names double as routing labels and tool-name suffixes.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RouterError::configuration("agent name must not be empty"));
    }
    if name == END_SENTINEL {
        return Err(RouterError::configuration(format!(
            "agent name {} is reserved",
            END_SENTINEL
        )));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(RouterError::configuration(format!(
            "agent name {} is longer than {} characters",
            name, MAX_NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(RouterError::configuration(format!(
            "agent name {:?} may only contain ASCII letters, digits, '_' and '-'",
            name
        )));
    }
    Ok(())
}

fn title_case(name: &str) -> String {
    name.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(c) => c.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Registry of available agents, iterated in registration order.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: Vec<AgentDescriptor>,
    index: HashMap<String, usize>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new agent; fails if the name is taken.
    pub fn register(&mut self, descriptor: AgentDescriptor) -> Result<()> {
        validate_name(&descriptor.name)?;
        if self.index.contains_key(&descriptor.name) {
            return Err(RouterError::DuplicateName {
                name: descriptor.name,
            });
        }
        debug!("Registering agent {}", descriptor.name);
        self.index
            .insert(descriptor.name.clone(), self.agents.len());
        self.agents.push(descriptor);
        Ok(())
    }

    /// Builder-style `register`.
    pub fn with_agent(mut self, descriptor: AgentDescriptor) -> Result<Self> {
        self.register(descriptor)?;
        Ok(self)
    }

    /// Overwrite an existing agent in place, keeping its position. Returns the old descriptor.
    pub fn replace(&mut self, descriptor: AgentDescriptor) -> Result<AgentDescriptor> {
        validate_name(&descriptor.name)?;
        let idx = *self
            .index
            .get(&descriptor.name)
            .ok_or_else(|| RouterError::NotFound {
                name: descriptor.name.clone(),
            })?;
        info!("Replacing agent {}", descriptor.name);
        Ok(std::mem::replace(&mut self.agents[idx], descriptor))
    }

    pub fn lookup(&self, name: &str) -> Result<&AgentDescriptor> {
        self.index
            .get(name)
            .map(|&i| &self.agents[i])
            .ok_or_else(|| RouterError::NotFound {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn list(&self) -> &[AgentDescriptor] {
        &self.agents
    }

    pub fn names(&self) -> Vec<String> {
        self.agents.iter().map(|a| a.name.clone()).collect()
    }

    pub fn first(&self) -> Option<&AgentDescriptor> {
        self.agents.first()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Display label for an agent name, falling back to the raw name.
    pub fn label_for(&self, name: &str) -> String {
        self.lookup(name)
            .map(|a| a.display_label.clone())
            .unwrap_or_else(|_| name.to_string())
    }
}

/// Support, research and manager agents.
pub fn default_registry() -> AgentRegistry {
    let agents = [
        AgentDescriptor::new(
            "support_agent",
            "Transfer to support agent for general help and customer service.",
            "You are a Support Agent providing customer service and general help.

Provide helpful, friendly support for the user's request. Focus on:
- General questions and basic support
- Account issues and routine inquiries
- Product information and guidance

Give a direct, helpful response to the user's question.",
        )
        .with_emoji("🤖"),
        AgentDescriptor::new(
            "research_agent",
            "Transfer to research agent for analysis and detailed research.",
            "You are a Research Agent specializing in analysis and detailed insights.

Provide thorough research and analysis for the user's request. Focus on:
- In-depth research and analysis
- Complex topic investigation
- Data-driven insights and recommendations

Give a comprehensive, well-researched response to the user's question.",
        )
        .with_emoji("🔬")
        .with_fallback_reply(
            "[Research Agent]: I apologize, but I'm experiencing technical difficulties. \
             Let me help you with your research needs.",
        ),
        AgentDescriptor::new(
            "manager_agent",
            "Transfer to manager agent for escalations and strategic decisions.",
            "You are a Manager Agent handling strategic decisions and escalations.

Provide authoritative guidance for the user's request. Focus on:
- Strategic guidance and decision making
- Escalation resolution
- High-level policy and direction

Give a clear, decisive response to the user's question.",
        )
        .with_emoji("👔")
        .with_fallback_reply(
            "[Manager Agent]: I apologize, but I'm experiencing technical difficulties. \
             Let me help you with management decisions.",
        ),
    ];

    let mut registry = AgentRegistry::new();
    for agent in agents {
        // names above are distinct
        let _ = registry.register(agent);
    }
    registry
}
