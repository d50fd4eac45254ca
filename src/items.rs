//! Conversation turns and threads
//!
//! A thread's `turns` are append-only and ordered by occurrence; that order is the single
//! source of truth for "most recent user message" and "last N turns" windows.

use serde::{Deserialize, Serialize};

use crate::config::ContextWindow;

/// Author of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
    System,
}

/// One entry in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    /// Name of the registered agent that produced this turn, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_agent: Option<String>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            source_agent: None,
        }
    }

    pub fn agent(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            content: content.into(),
            source_agent: Some(name.into()),
        }
    }

    /// Reply written by the router itself rather than a registered agent.
    pub fn router(content: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            content: content.into(),
            source_agent: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            source_agent: None,
        }
    }

    /// Synthetic turn recording a tool-based transfer.
    pub fn transfer_ack(agent_name: &str) -> Self {
        Self::system(format!("Successfully transferred to {}", agent_name))
    }
}

/// Per-session conversation state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationThread {
    pub thread_id: String,
    pub turns: Vec<ConversationTurn>,
    pub current_agent: Option<String>,
}

impl ConversationThread {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            turns: Vec::new(),
            current_agent: None,
        }
    }

    pub fn recent(&self, n: usize) -> &[ConversationTurn] {
        recent(&self.turns, n)
    }

    pub fn latest_user(&self) -> Option<&ConversationTurn> {
        latest_user(&self.turns)
    }
}

/// Last `n` turns, oldest first.
pub fn recent(turns: &[ConversationTurn], n: usize) -> &[ConversationTurn] {
    &turns[turns.len().saturating_sub(n)..]
}

pub fn latest_user(turns: &[ConversationTurn]) -> Option<&ConversationTurn> {
    turns.iter().rev().find(|t| t.role == Role::User)
}

/// Select the turns an agent is shown, oldest first.
pub fn window(turns: &[ConversationTurn], window: ContextWindow) -> Vec<ConversationTurn> {
    match window {
        ContextWindow::LatestUserMessage => latest_user(turns).cloned().into_iter().collect(),
        ContextWindow::RecentTurns(n) => recent(turns, n).to_vec(),
        ContextWindow::RecentConversational(n) => {
            let mut picked: Vec<ConversationTurn> = turns
                .iter()
                .rev()
                .filter(|t| t.role != Role::System)
                .take(n)
                .cloned()
                .collect();
            picked.reverse();
            picked
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<ConversationTurn> {
        vec![
            ConversationTurn::user("first"),
            ConversationTurn::agent("support_agent", "hello"),
            ConversationTurn::user("second"),
            ConversationTurn::transfer_ack("research_agent"),
            ConversationTurn::agent("research_agent", "findings"),
        ]
    }

    #[test]
    fn recent_takes_tail_in_order() {
        let turns = sample();
        let tail = recent(&turns, 2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].role, Role::System);
        assert_eq!(tail[1].content, "findings");
        assert_eq!(recent(&turns, 50).len(), 5);
    }

    #[test]
    fn latest_user_skips_agent_turns() {
        let turns = sample();
        assert_eq!(latest_user(&turns).unwrap().content, "second");
        assert!(latest_user(&[]).is_none());
    }

    #[test]
    fn conversational_window_drops_system_turns() {
        let turns = sample();
        let picked = window(&turns, ContextWindow::RecentConversational(2));
        assert_eq!(
            picked.iter().map(|t| t.content.as_str()).collect::<Vec<_>>(),
            vec!["second", "findings"]
        );
    }

    #[test]
    fn latest_user_window_is_single_turn() {
        let turns = sample();
        let picked = window(&turns, ContextWindow::LatestUserMessage);
        assert_eq!(picked, vec![ConversationTurn::user("second")]);
    }

    #[test]
    fn transfer_ack_text() {
        let t = ConversationTurn::transfer_ack("manager_agent");
        assert_eq!(t.content, "Successfully transferred to manager_agent");
        assert_eq!(t.role, Role::System);
    }
}
