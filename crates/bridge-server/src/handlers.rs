//! Built-in event handlers

use crate::dispatch::{EventHandler, HandlerError};
use async_trait::async_trait;
use bridge_inference::{ConversationHistory, InferenceClient};
use rand::seq::SliceRandom;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Placeholder thoughts returned for `state_change` events
pub const DEFAULT_THOUGHTS: [&str; 5] = [
    "I'm thinking...",
    "What if...",
    "Why not...",
    "Let's try...",
    "How about...",
];

/// Agents remembered by a dialogue handler unless configured otherwise
pub const DEFAULT_MAX_AGENTS: usize = 256;

/// Answers a state change with a randomly chosen thought
pub struct ThoughtHandler {
    thoughts: Vec<String>,
}

impl ThoughtHandler {
    /// Use a custom thought list; an empty list falls back to the defaults
    pub fn new(thoughts: Vec<String>) -> Self {
        if thoughts.is_empty() {
            return Self::default();
        }
        Self { thoughts }
    }

    pub fn thoughts(&self) -> &[String] {
        &self.thoughts
    }

    fn pick(&self) -> String {
        self.thoughts
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for ThoughtHandler {
    fn default() -> Self {
        Self {
            thoughts: DEFAULT_THOUGHTS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

#[async_trait]
impl EventHandler for ThoughtHandler {
    async fn handle(&self, agent_id: &str, _data: &Value) -> Result<String, HandlerError> {
        let thought = self.pick();
        debug!(agent_id = %agent_id, thought = %thought, "State change");
        Ok(thought)
    }
}

/// Generates a line of dialogue through the inference endpoint
///
/// Payload: `{"prompt": "...", "history": ["earlier reply", ...]}` where
/// `history` is optional. Without it, the handler replays the agent's own
/// previous exchanges (at most `max_history` turns).
///
/// Memory is kept for at most `max_agents` agents; remembering a new agent
/// beyond that evicts the one spoken to least recently. `forget` drops an
/// agent explicitly.
pub struct DialogueHandler {
    client: InferenceClient,
    memory: Mutex<Memory>,
    max_history: usize,
    max_agents: usize,
}

#[derive(Default)]
struct Memory {
    agents: HashMap<String, AgentMemory>,
    clock: u64,
}

struct AgentMemory {
    history: ConversationHistory,
    last_used: u64,
}

impl DialogueHandler {
    pub fn new(client: InferenceClient, max_history: usize) -> Self {
        Self {
            client,
            memory: Mutex::new(Memory::default()),
            max_history,
            max_agents: DEFAULT_MAX_AGENTS,
        }
    }

    /// Cap the number of agents with remembered history (minimum 1)
    pub fn with_max_agents(mut self, max_agents: usize) -> Self {
        self.max_agents = max_agents.max(1);
        self
    }

    /// Number of agents with remembered history
    pub async fn remembered_agents(&self) -> usize {
        self.memory.lock().await.agents.len()
    }

    /// Number of remembered turns for an agent
    pub async fn history_len(&self, agent_id: &str) -> usize {
        self.memory
            .lock()
            .await
            .agents
            .get(agent_id)
            .map_or(0, |m| m.history.len())
    }

    /// Forget everything said with an agent
    pub async fn forget(&self, agent_id: &str) {
        self.memory.lock().await.agents.remove(agent_id);
    }

    async fn remember(&self, agent_id: &str, prompt: &str, reply: &str) {
        if self.max_history == 0 {
            return;
        }
        let mut memory = self.memory.lock().await;
        memory.clock += 1;
        let now = memory.clock;

        if !memory.agents.contains_key(agent_id) && memory.agents.len() >= self.max_agents {
            let oldest = memory
                .agents
                .iter()
                .min_by_key(|(_, m)| m.last_used)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                debug!(agent_id = %oldest, "Evicting dialogue memory");
                memory.agents.remove(&oldest);
            }
        }

        let entry = memory
            .agents
            .entry(agent_id.to_string())
            .or_insert_with(|| AgentMemory {
                history: ConversationHistory::default(),
                last_used: now,
            });
        entry.last_used = now;
        entry.history.push_user(prompt);
        entry.history.push_assistant(reply);
        entry.history.retain_last(self.max_history);
    }
}

#[async_trait]
impl EventHandler for DialogueHandler {
    async fn handle(&self, agent_id: &str, data: &Value) -> Result<String, HandlerError> {
        let prompt = data
            .get("prompt")
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::InvalidPayload("missing string field 'prompt'".into()))?;

        let explicit = parse_history(data)?;
        let remembered = explicit.is_none();
        let history = match explicit {
            Some(history) => history,
            None => self
                .memory
                .lock()
                .await
                .agents
                .get(agent_id)
                .map(|m| m.history.clone())
                .unwrap_or_default(),
        };

        debug!(
            agent_id = %agent_id,
            history = history.len(),
            "Requesting dialogue"
        );

        let reply = match self.client.complete(prompt, Some(&history)).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(agent_id = %agent_id, "Dialogue generation failed: {}", e);
                return Err(HandlerError::Inference(e));
            }
        };

        if remembered {
            self.remember(agent_id, prompt, &reply).await;
        }

        Ok(reply)
    }
}

fn parse_history(data: &Value) -> Result<Option<ConversationHistory>, HandlerError> {
    let Some(raw) = data.get("history") else {
        return Ok(None);
    };

    let entries = raw.as_array().ok_or_else(|| {
        HandlerError::InvalidPayload("'history' must be an array of strings".into())
    })?;

    let responses = entries
        .iter()
        .map(|entry| {
            entry.as_str().map(str::to_string).ok_or_else(|| {
                HandlerError::InvalidPayload("'history' must be an array of strings".into())
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(ConversationHistory::from_responses(responses)))
}
