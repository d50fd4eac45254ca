//! Interactive chat loop.
//!
//! Reads one line per user turn. `quit`, `exit` and `q` (any case) leave the loop, blank lines
//! are ignored, anything else is a user turn on the REPL's thread.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::error;

use crate::items::ConversationTurn;
use crate::orchestrator::{Orchestrator, TurnOutcome};
use crate::registry::AgentRegistry;
use crate::sessions::ConversationStore;

const SEPARATOR_WIDTH: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Exit,
    Skip,
    Message(String),
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Skip;
    }
    match line.to_ascii_lowercase().as_str() {
        "quit" | "exit" | "q" => Command::Exit,
        _ => Command::Message(line.to_string()),
    }
}

pub fn banner(registry: &AgentRegistry) -> String {
    let mut out = String::from("🚀 Multi-Agent Handoff System Started!\n");
    out.push_str("💡 Available agents:\n");
    for agent in registry.list() {
        out.push_str(&format!("  {}\n", agent.display_label));
    }
    out.push_str("💡 Try saying:\n");
    out.push_str("  - 'I need research on AI trends'\n");
    out.push_str("  - 'Escalate this to manager'\n");
    out.push_str("  - 'Basic help please'\n");
    out.push_str("Type 'quit' to exit\n");
    out
}

/// Transcript lines for one completed turn.
pub fn render_outcome(registry: &AgentRegistry, outcome: &TurnOutcome) -> String {
    let mut out = String::new();
    for reply in &outcome.replies {
        out.push_str(&format!("\n{}\n", speaker(registry, reply)));
        out.push_str(&format!("{}\n", reply.content));
    }
    if outcome.is_terminated() {
        out.push_str("\n🏁 Conversation finished.\n");
    }
    let current = outcome
        .current_agent
        .as_deref()
        .map(|name| registry.label_for(name))
        .unwrap_or_else(|| "none".to_string());
    out.push_str(&format!("\n💡 Current agent: {}\n", current));
    out.push_str(&"-".repeat(SEPARATOR_WIDTH));
    out.push('\n');
    out
}

fn speaker(registry: &AgentRegistry, turn: &ConversationTurn) -> String {
    match &turn.source_agent {
        Some(name) => registry.label_for(name),
        None => "🧭 Router".to_string(),
    }
}

/// Drive `orchestrator` from `input` until an exit command or end of input.
pub async fn run_repl<S, R, W>(
    orchestrator: &Orchestrator<S>,
    thread_id: &str,
    input: R,
    mut output: W,
) -> std::io::Result<()>
where
    S: ConversationStore,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    output
        .write_all(banner(orchestrator.registry()).as_bytes())
        .await?;

    let mut lines = input.lines();
    loop {
        output.write_all(b"\nYou: ").await?;
        output.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        match parse_command(&line) {
            Command::Exit => break,
            Command::Skip => continue,
            Command::Message(text) => match orchestrator.handle_turn(thread_id, &text).await {
                Ok(outcome) => {
                    output
                        .write_all(render_outcome(orchestrator.registry(), &outcome).as_bytes())
                        .await?;
                }
                Err(e) => {
                    error!("❌ Error: {}", e);
                    output
                        .write_all(b"\nSorry, this request could not be processed.\n")
                        .await?;
                }
            },
        }
    }

    output.write_all("Goodbye! 👋\n".as_bytes()).await?;
    output.flush().await
}
