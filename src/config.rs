//! Engine configuration.
//!
//! Collected once from the environment into an explicit value that is
//! threaded through the engine; nothing reads env vars after startup.

use std::env;
use std::time::Duration;

/// All knobs for one [`ChatEngine`](crate::engine::ChatEngine).
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Maximum input size the generation call accepts, word-count proxy.
    pub max_context_tokens: usize,
    /// Tokens reserved for the model's response.
    pub reserved_response_tokens: usize,
    /// Passages requested from the vector index per query.
    pub top_k: usize,
    /// Vector index namespace all queries are scoped to.
    pub namespace: String,
    /// Character cap for titles derived from the first message.
    pub title_max_chars: usize,
    /// Delay between simulated action phase advances.
    pub action_step_delay: Duration,

    pub embed_timeout: Duration,
    pub retrieval_timeout: Duration,
    pub generation_timeout: Duration,
    pub summarize_timeout: Duration,
    pub persist_timeout: Duration,

    pub embedding_model: String,
    pub generation_model: String,
    pub summarization_model: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 8192,
            reserved_response_tokens: 1000,
            top_k: 5,
            namespace: "handbook".to_string(),
            title_max_chars: 100,
            action_step_delay: Duration::from_secs(1),
            embed_timeout: Duration::from_secs(10),
            retrieval_timeout: Duration::from_secs(10),
            generation_timeout: Duration::from_secs(120),
            summarize_timeout: Duration::from_secs(30),
            persist_timeout: Duration::from_secs(10),
            embedding_model: "text-embedding-3-large".to_string(),
            generation_model: "gpt-4o".to_string(),
            summarization_model: "gpt-3.5-turbo".to_string(),
        }
    }
}

impl EngineConfig {
    /// Build from environment variables, falling back to defaults.
    /// Call `dotenvy::dotenv()` first if a `.env` file should apply.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.max_context_tokens =
            env_usize("MAGPIE_MAX_CONTEXT_TOKENS", config.max_context_tokens);
        config.reserved_response_tokens = env_usize(
            "MAGPIE_RESERVED_RESPONSE_TOKENS",
            config.reserved_response_tokens,
        );
        config.top_k = env_usize("MAGPIE_TOP_K", config.top_k);
        if let Ok(namespace) = env::var("MAGPIE_NAMESPACE") {
            config.namespace = namespace;
        }
        if let Ok(model) = env::var("MAGPIE_EMBEDDING_MODEL") {
            config.embedding_model = model;
        }
        if let Ok(model) = env::var("MAGPIE_GENERATION_MODEL") {
            config.generation_model = model;
        }
        if let Ok(model) = env::var("MAGPIE_SUMMARIZATION_MODEL") {
            config.summarization_model = model;
        }
        config
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
