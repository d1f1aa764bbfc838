//! Magpie - conversational retrieval-augmented assistant core
//!
//! Given a user message, Magpie embeds the query, retrieves relevant
//! passages from a vector similarity index, assembles a token-bounded
//! context, streams a generated answer back incrementally, and records
//! the finalized turn in an append-only conversation log.
//!
//! # Architecture
//!
//! - `engine` - the [`ChatEngine`](engine::ChatEngine) turn orchestrator
//! - `embedding` / `retrieval` / `generation` - external service clients
//! - `context` / `prompt` - budgeted context assembly and prompt building
//! - `state` / `render` - conversation log and its renderable projection
//! - `actions` - phased background state machine for simulated operations
//! - `persist` - session-gated, best-effort chat snapshot persistence
//!
//! # Usage
//!
//! ```rust,no_run
//! use magpie::config::EngineConfig;
//! use magpie::engine::ChatEngine;
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = EngineConfig::from_env();
//! let engine = ChatEngine::from_env(config)?;
//! # let _ = engine;
//! # Ok(())
//! # }
//! ```

pub mod actions;
pub mod config;
pub mod context;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod generation;
pub mod persist;
pub mod prompt;
pub mod render;
pub mod retrieval;
pub mod session;
pub mod state;
pub mod stream;
pub mod types;

pub use engine::{ChatEngine, TurnHandle};
pub use error::{EngineError, GenerationError, PersistenceError, RetrievalError};
pub use stream::{StreamEvent, StreamHandle, StreamReader};
pub use types::{ChatSnapshot, Message, MessageContent, RetrievedPassage, Role};
