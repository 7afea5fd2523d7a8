//! Reply generator used by `chatlink run`
//!
//! Echoes each message back with the sender's turn number. A bounded history
//! is kept per sender, the same shape a model-backed generator would need.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chatlink_core::ChatId;
use chatlink_runtime::ResponseGenerator;

pub const DEFAULT_HISTORY_LIMIT: usize = 10;

pub struct EchoGenerator {
    history_limit: usize,
    history: Mutex<HashMap<ChatId, VecDeque<String>>>,
}

impl EchoGenerator {
    pub fn new(history_limit: usize) -> Self {
        Self {
            history_limit: history_limit.max(1),
            history: Mutex::new(HashMap::new()),
        }
    }

    /// Messages remembered for `user_id`, oldest first
    pub fn history(&self, user_id: &ChatId) -> Vec<String> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .map(|turns| turns.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for EchoGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

#[async_trait]
impl ResponseGenerator for EchoGenerator {
    async fn generate(&self, user_id: &ChatId, text: &str) -> anyhow::Result<String> {
        let text = text.trim();
        if text.is_empty() {
            anyhow::bail!("empty message from {user_id}");
        }

        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let turns = history.entry(user_id.clone()).or_default();
        turns.push_back(text.to_string());
        while turns.len() > self.history_limit {
            turns.pop_front();
        }
        Ok(format!("[{}] {text}", turns.len()))
    }
}
