//! Conversation state store
//!
//! What this module provides
//! - `ConversationStore`: keyed access to `ConversationThread`s
//!   - `append`, `get_recent`, `set_current_agent`, `get`
//!   - `commit`: apply a whole turn's worth of turns plus the new current agent in one step
//!   - `threads`: ids seen so far
//! - `InMemoryConversationStore`: the default implementation
//! - `ThreadLocks`: per-thread async mutexes, shared with the orchestrator to serialize turns
//!
//! Threads are created empty on first reference. Operations on the same thread id are
//! serialized; operations on different thread ids never wait on each other beyond the brief
//! map lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, trace};

use crate::error::{Result, RouterError};
use crate::items::{self, ConversationThread, ConversationTurn};

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn append(&self, thread_id: &str, turn: ConversationTurn) -> Result<()>;

    /// Last `n` turns, oldest first.
    async fn get_recent(&self, thread_id: &str, n: usize) -> Result<Vec<ConversationTurn>>;

    async fn set_current_agent(&self, thread_id: &str, agent: &str) -> Result<()>;

    /// Snapshot of the whole thread.
    async fn get(&self, thread_id: &str) -> Result<ConversationThread>;

    /// Append `turns` and, when `current_agent` is `Some`, update the active agent, as one
    /// operation.
    async fn commit(
        &self,
        thread_id: &str,
        turns: Vec<ConversationTurn>,
        current_agent: Option<String>,
    ) -> Result<()>;

    async fn threads(&self) -> Result<Vec<String>>;
}

/// One async mutex per key, created on demand.
#[derive(Debug, Default)]
pub struct ThreadLocks<T> {
    slots: Mutex<HashMap<String, Arc<AsyncMutex<T>>>>,
}

impl<T: Send> ThreadLocks<T> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Slot for `key`, creating it with `init` if unseen.
    pub fn slot_or_insert_with<F>(&self, key: &str, init: F) -> Result<Arc<AsyncMutex<T>>>
    where
        F: FnOnce() -> T,
    {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| RouterError::Session("thread map lock poisoned".into()))?;
        Ok(slots
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!("Creating thread slot {}", key);
                Arc::new(AsyncMutex::new(init()))
            })
            .clone())
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        let slots = self
            .slots
            .lock()
            .map_err(|_| RouterError::Session("thread map lock poisoned".into()))?;
        let mut keys: Vec<String> = slots.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

impl<T: Default + Send> ThreadLocks<T> {
    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &str) -> Result<OwnedMutexGuard<T>> {
        let slot = self.slot_or_insert_with(key, T::default)?;
        Ok(slot.lock_owned().await)
    }
}

/// In-process store; contents live as long as the store.
#[derive(Clone, Default)]
pub struct InMemoryConversationStore {
    inner: Arc<ThreadLocks<ConversationThread>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn thread(&self, thread_id: &str) -> Result<OwnedMutexGuard<ConversationThread>> {
        let slot = self
            .inner
            .slot_or_insert_with(thread_id, || ConversationThread::new(thread_id))?;
        Ok(slot.lock_owned().await)
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn append(&self, thread_id: &str, turn: ConversationTurn) -> Result<()> {
        let mut thread = self.thread(thread_id).await?;
        trace!("Appending {:?} turn to {}", turn.role, thread_id);
        thread.turns.push(turn);
        Ok(())
    }

    async fn get_recent(&self, thread_id: &str, n: usize) -> Result<Vec<ConversationTurn>> {
        let thread = self.thread(thread_id).await?;
        Ok(items::recent(&thread.turns, n).to_vec())
    }

    async fn set_current_agent(&self, thread_id: &str, agent: &str) -> Result<()> {
        let mut thread = self.thread(thread_id).await?;
        thread.current_agent = Some(agent.to_string());
        Ok(())
    }

    async fn get(&self, thread_id: &str) -> Result<ConversationThread> {
        Ok(self.thread(thread_id).await?.clone())
    }

    async fn commit(
        &self,
        thread_id: &str,
        turns: Vec<ConversationTurn>,
        current_agent: Option<String>,
    ) -> Result<()> {
        let mut thread = self.thread(thread_id).await?;
        debug!(
            "Committing {} turns to {} (current agent: {:?})",
            turns.len(),
            thread_id,
            current_agent
        );
        thread.turns.extend(turns);
        if let Some(agent) = current_agent {
            thread.current_agent = Some(agent);
        }
        Ok(())
    }

    async fn threads(&self) -> Result<Vec<String>> {
        self.inner.keys()
    }
}
